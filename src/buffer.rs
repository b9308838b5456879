use crate::ChannelLayout;

/// Number of analog channels carried in every DMA buffer.
pub const CHANNEL_COUNT: usize = 2;

/// Copy of one completed DMA buffer, detached from the board's slot.
#[derive(Debug, Clone)]
pub struct RawBuffer {
    /// Sequence number of the buffer within the acquisition.
    pub index: u64,
    pub data: Vec<u16>,
}

/// Shape of a DMA buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub records_per_buffer: usize,
    pub acquired_samples: usize,
    pub channel_layout: ChannelLayout,
}

impl BufferLayout {
    /// Samples per buffer over both channels.
    pub fn samples_per_buffer(&self) -> usize {
        self.records_per_buffer * self.acquired_samples * CHANNEL_COUNT
    }

    pub fn bytes_per_record(&self, bits_per_sample: u8) -> usize {
        bytes_per_sample(bits_per_sample) * self.acquired_samples
    }

    pub fn bytes_per_buffer(&self, bits_per_sample: u8) -> usize {
        self.bytes_per_record(bits_per_sample) * self.records_per_buffer * CHANNEL_COUNT
    }
}

pub fn bytes_per_sample(bits_per_sample: u8) -> usize {
    (bits_per_sample as usize + 7) / 8
}

/// Per-channel mean of one buffer across its records.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedRecord {
    pub buffer_index: u64,
    pub worker: usize,
    pub channel_a: Vec<f64>,
    pub channel_b: Vec<f64>,
    /// Buffers folded into the vectors: 1 for a per-buffer mean, the
    /// running count in cumulative mode.
    pub buffers_averaged: u64,
}

/// What a reduction worker hands to the sink.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutput {
    Reduced(ReducedRecord),
    /// The buffer was malformed and no record was produced for it.
    Dropped { worker: usize, buffer_index: u64 },
}

impl WorkerOutput {
    pub fn buffer_index(&self) -> u64 {
        match self {
            WorkerOutput::Reduced(record) => record.buffer_index,
            WorkerOutput::Dropped { buffer_index, .. } => *buffer_index,
        }
    }
}
