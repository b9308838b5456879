use crate::AcqError;
use confique::Config;
use serde::Deserialize;
use std::path::Path;

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub clock: ClockSettings,
    #[config(nested)]
    pub trigger: TriggerSettings,
    #[config(nested)]
    pub acquisition: AcquisitionSettings,
    #[config(nested)]
    pub treatment: TreatmentSettings,
}

#[derive(Config, Debug, Clone)]
pub struct ClockSettings {
    #[config(default = "internal")]
    pub clock_source: ClockSource,
    #[config(default = "rising")]
    pub clock_edge: ClockEdge,
    /// Samples per second. Internal clocks must match the board's rate table.
    pub samplerate: f64,
}

#[derive(Config, Debug, Clone)]
pub struct TriggerSettings {
    #[config(default = "external")]
    pub trigger_source: TriggerSource,
    #[config(default = "positive")]
    pub trigger_slope: TriggerSlope,
    /// Full scale of the trigger input, volts.
    pub trigger_range: f64,
    /// Trigger level, volts.
    pub trigger_level: f64,
    /// Delay after the trigger before the record starts, ns.
    #[config(default = 0.0)]
    pub trigger_delay: f64,
}

#[derive(Config, Debug, Clone)]
pub struct AcquisitionSettings {
    pub records_per_buffer: usize,
    pub acquired_samples: usize,
    pub buffers_per_acquisition: usize,
    #[config(default = 4)]
    pub nb_buffer_allocated: usize,
    #[config(default = 5000)]
    pub buffer_timeout_ms: u64,
    /// Full scale of channels A and B, volts.
    #[config(default = 0.4)]
    pub input_range: f64,
    #[config(default = "dc")]
    pub coupling: Coupling,
    #[config(default = "sample_interleaved")]
    pub channel_layout: ChannelLayout,
}

#[derive(Config, Debug, Clone)]
pub struct TreatmentSettings {
    #[config(default = 1)]
    pub nb_process_data_treatment: usize,
    #[config(default = "per_buffer")]
    pub averaging: AveragingMode,
    /// Capacity of each hand-off queue, in items.
    #[config(default = 8)]
    pub queue_depth: usize,
    /// Re-sort reduced records by buffer index before display.
    #[config(default = false)]
    pub ordered_output: bool,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClockSource {
    Internal,
    External,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClockEdge {
    Rising,
    Falling,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    ChannelA,
    ChannelB,
    External,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSlope {
    Positive,
    Negative,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Coupling {
    Dc,
    Ac,
}

/// How the two channels share a DMA buffer.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelLayout {
    /// `A0, B0, A1, B1, ...` across the whole buffer.
    #[default]
    SampleInterleaved,
    /// Each record holds all of its A samples followed by all of its B samples.
    RecordInterleaved,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AveragingMode {
    /// Each buffer is averaged on its own.
    #[default]
    PerBuffer,
    /// Workers keep a running mean over every buffer they have reduced.
    Cumulative,
}

impl Conf {
    /// Load and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AcqError> {
        let conf = Conf::builder()
            .file(path.as_ref())
            .load()
            .map_err(|e| AcqError::InvalidConfiguration(e.to_string()))?;
        conf.validate()?;
        Ok(conf)
    }

    /// Check numeric domains. Board-specific tables (sample rates, input
    /// ranges) are checked by the producer before it touches the board.
    pub fn validate(&self) -> Result<(), AcqError> {
        fn positive(name: &str, value: f64) -> Result<(), AcqError> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(AcqError::InvalidConfiguration(format!(
                    "{name} must be a positive number, got {value}"
                )))
            }
        }
        fn at_least_one(name: &str, value: usize) -> Result<(), AcqError> {
            if value >= 1 {
                Ok(())
            } else {
                Err(AcqError::InvalidConfiguration(format!(
                    "{name} must be at least 1"
                )))
            }
        }

        positive("samplerate", self.clock.samplerate)?;
        positive("trigger_range", self.trigger.trigger_range)?;
        if !self.trigger.trigger_level.is_finite() {
            return Err(AcqError::InvalidConfiguration(
                "trigger_level must be finite".into(),
            ));
        }
        if !self.trigger.trigger_delay.is_finite() || self.trigger.trigger_delay < 0.0 {
            return Err(AcqError::InvalidConfiguration(format!(
                "trigger_delay must be non-negative, got {}",
                self.trigger.trigger_delay
            )));
        }
        positive("input_range", self.acquisition.input_range)?;

        let acq = &self.acquisition;
        at_least_one("records_per_buffer", acq.records_per_buffer)?;
        at_least_one("acquired_samples", acq.acquired_samples)?;
        at_least_one("buffers_per_acquisition", acq.buffers_per_acquisition)?;
        at_least_one("nb_buffer_allocated", acq.nb_buffer_allocated)?;
        if acq.buffer_timeout_ms == 0 {
            return Err(AcqError::InvalidConfiguration(
                "buffer_timeout_ms must be at least 1".into(),
            ));
        }
        at_least_one(
            "nb_process_data_treatment",
            self.treatment.nb_process_data_treatment,
        )?;
        at_least_one("queue_depth", self.treatment.queue_depth)?;

        Ok(())
    }
}

#[cfg(test)]
impl Conf {
    /// Small internal-clock configuration used across unit tests.
    pub(crate) fn for_tests() -> Self {
        Conf {
            clock: ClockSettings {
                clock_source: ClockSource::Internal,
                clock_edge: ClockEdge::Rising,
                samplerate: 1_000_000_000.0,
            },
            trigger: TriggerSettings {
                trigger_source: TriggerSource::External,
                trigger_slope: TriggerSlope::Positive,
                trigger_range: 2.5,
                trigger_level: 0.5,
                trigger_delay: 0.0,
            },
            acquisition: AcquisitionSettings {
                records_per_buffer: 10,
                acquired_samples: 4,
                buffers_per_acquisition: 2,
                nb_buffer_allocated: 2,
                buffer_timeout_ms: 200,
                input_range: 0.4,
                coupling: Coupling::Dc,
                channel_layout: ChannelLayout::SampleInterleaved,
            },
            treatment: TreatmentSettings {
                nb_process_data_treatment: 1,
                averaging: AveragingMode::PerBuffer,
                queue_depth: 4,
                ordered_output: false,
            },
        }
    }
}
