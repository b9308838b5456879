use crate::{ClockEdge, ClockSource, Coupling, TriggerSlope, TriggerSource};
use std::time::Duration;

/// Status codes returned by the board API.
#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
pub enum BoardReturn {
    Success = 512,
    Failed = 513,
    AccessDenied = 514,
    DmaChannelUnavailable = 515,
    InvalidHandle = 519,
    InsufficientResources = 529,
    InvalidParameter = 530,
    UnsupportedFunction = 532,
    BufferNotReady = 573,
    WaitTimeout = 579,
    WaitCanceled = 580,
    BufferOverflow = 582,
    InvalidBuffer = 583,
    Unknown = 0,
}

impl From<u32> for BoardReturn {
    fn from(value: u32) -> Self {
        match value {
            512 => Self::Success,
            513 => Self::Failed,
            514 => Self::AccessDenied,
            515 => Self::DmaChannelUnavailable,
            519 => Self::InvalidHandle,
            529 => Self::InsufficientResources,
            530 => Self::InvalidParameter,
            532 => Self::UnsupportedFunction,
            573 => Self::BufferNotReady,
            579 => Self::WaitTimeout,
            580 => Self::WaitCanceled,
            582 => Self::BufferOverflow,
            583 => Self::InvalidBuffer,
            _ => Self::Unknown,
        }
    }
}

/// Analog input channel of a dual-channel board.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Channel {
    A,
    B,
}

/// Opaque handle to a DMA buffer allocated by the board.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BufferHandle(pub usize);

/// Clock selection as handed to the board.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum ClockRate {
    /// Identifier from the board's internal rate table.
    Internal(u32),
    /// Frequency of the external clock in Hz.
    External(f64),
}

/// Internal sample rates of the ATS9360 as `(samples per second, rate id)`.
pub const ATS9360_SAMPLE_RATES: &[(u64, u32)] = &[
    (1_000, 0x01),
    (2_000, 0x02),
    (5_000, 0x04),
    (10_000, 0x08),
    (20_000, 0x0A),
    (50_000, 0x0C),
    (100_000, 0x0E),
    (200_000, 0x10),
    (500_000, 0x12),
    (1_000_000, 0x14),
    (2_000_000, 0x18),
    (5_000_000, 0x1A),
    (10_000_000, 0x1C),
    (20_000_000, 0x1E),
    (50_000_000, 0x22),
    (100_000_000, 0x24),
    (200_000_000, 0x28),
    (500_000_000, 0x30),
    (800_000_000, 0x32),
    (1_000_000_000, 0x35),
    (1_200_000_000, 0x37),
    (1_500_000_000, 0x3A),
    (1_800_000_000, 0x3D),
];

/// Input ranges of the ATS9360 as `(full scale volts, range id)`.
pub const ATS9360_INPUT_RANGES: &[(f64, u32)] = &[(0.4, 0x07)];

/// Hardware capability surface of a streaming digitizer.
///
/// Implementations wrap the vendor SDK. The acquisition producer is the only
/// caller, so methods take `&mut self` and the board never needs to be shared.
pub trait Board: Send {
    /// Width of one stored sample in bits, as reported by the device.
    fn bits_per_sample(&self) -> u8;

    /// Left shift applied to the ADC code inside each stored word.
    fn bit_shift(&self) -> u8 {
        16 - self.bits_per_sample().min(16)
    }

    fn sample_rates(&self) -> &[(u64, u32)] {
        ATS9360_SAMPLE_RATES
    }

    fn input_ranges(&self) -> &[(f64, u32)] {
        ATS9360_INPUT_RANGES
    }

    fn set_capture_clock(
        &mut self,
        source: ClockSource,
        rate: ClockRate,
        edge: ClockEdge,
        decimation: u32,
    ) -> Result<(), BoardReturn>;

    fn input_control(
        &mut self,
        channel: Channel,
        range_id: u32,
        coupling: Coupling,
    ) -> Result<(), BoardReturn>;

    fn set_trigger(
        &mut self,
        source: TriggerSource,
        slope: TriggerSlope,
        level_code: u8,
        delay_samples: u64,
    ) -> Result<(), BoardReturn>;

    fn allocate_buffer(&mut self, bytes: usize) -> Result<BufferHandle, BoardReturn>;

    fn free_buffer(&mut self, handle: BufferHandle) -> Result<(), BoardReturn>;

    /// Hand a buffer to the device so it can be filled.
    fn post_buffer(&mut self, handle: BufferHandle) -> Result<(), BoardReturn>;

    /// Block until `handle` has been filled, or fail with
    /// `BoardReturn::WaitTimeout` once `timeout` has elapsed.
    fn wait_buffer_complete(
        &mut self,
        handle: BufferHandle,
        timeout: Duration,
    ) -> Result<&[u16], BoardReturn>;

    fn start_capture(&mut self) -> Result<(), BoardReturn>;

    /// Stop capture and release every posted buffer back to software.
    fn abort_capture(&mut self) -> Result<(), BoardReturn>;
}
