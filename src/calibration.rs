/// Affine map from stored ADC words to volts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub bits_per_sample: u8,
    /// Left shift of the ADC code inside each 16-bit word.
    pub bit_shift: u8,
    /// Full scale input range, volts.
    pub full_scale: f64,
}

impl Calibration {
    pub fn new(bits_per_sample: u8, bit_shift: u8, full_scale: f64) -> Self {
        Self {
            bits_per_sample,
            bit_shift,
            full_scale,
        }
    }

    /// Mid-scale code, which is also the half-range divisor.
    pub fn code_zero(&self) -> f64 {
        2f64.powi(self.bits_per_sample as i32 - 1) - 0.5
    }

    pub fn max_code(&self) -> u16 {
        ((1u32 << self.bits_per_sample) - 1) as u16
    }

    /// Volts for an ADC code that has already been shifted down.
    pub fn code_to_volts(&self, code: u16) -> f64 {
        let code_zero = self.code_zero();
        let code_range = code_zero;
        self.full_scale * (code as f64 - code_zero) / code_range
    }

    /// Volts for a stored word.
    pub fn volts(&self, raw: u16) -> f64 {
        self.code_to_volts(raw >> self.bit_shift)
    }

    /// Precomputed `code_to_volts` for every representable code.
    pub fn table(&self) -> VoltTable {
        VoltTable {
            shift: self.bit_shift,
            volts: (0..=self.max_code()).map(|c| self.code_to_volts(c)).collect(),
        }
    }
}

/// Lookup table with the exact values of [`Calibration::code_to_volts`].
#[derive(Debug, Clone)]
pub struct VoltTable {
    shift: u8,
    volts: Vec<f64>,
}

impl VoltTable {
    #[inline]
    pub fn volts(&self, raw: u16) -> f64 {
        let code = (raw >> self.shift) as usize;
        // codes above max only appear in malformed words; clamp to full scale
        self.volts[code.min(self.volts.len() - 1)]
    }
}
