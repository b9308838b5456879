use crate::{
    AcqError, AveragingMode, BufferLayout, Calibration, ChannelLayout, CompletionVector,
    QueueReceiver, QueueSender, RawBuffer, ReducedRecord, VoltTable, WorkerOutput, CHANNEL_COUNT,
};
use log::{debug, info, warn};
use ndarray::{s, Array1, ArrayView2, ArrayView3, Axis, Zip};

/// Split `total` buffers over `workers`.
///
/// Every worker gets `total / workers`; the last worker also takes the
/// remainder.
pub fn shard_sizes(total: usize, workers: usize) -> Vec<usize> {
    if workers == 0 {
        return Vec::new();
    }
    let mut sizes = vec![total / workers; workers];
    sizes[workers - 1] += total % workers;
    sizes
}

/// Convert one buffer to volts and average each channel over its records.
pub fn reduce(
    raw: &RawBuffer,
    layout: &BufferLayout,
    table: &VoltTable,
) -> Result<(Vec<f64>, Vec<f64>), AcqError> {
    let malformed = || AcqError::MalformedBuffer {
        buffer: raw.index,
        expected: layout.samples_per_buffer(),
        actual: raw.data.len(),
    };
    if raw.data.len() != layout.samples_per_buffer() {
        return Err(malformed());
    }

    let records = layout.records_per_buffer;
    let samples = layout.acquired_samples;
    let (a, b) = match layout.channel_layout {
        ChannelLayout::SampleInterleaved => {
            let view = ArrayView3::from_shape((records, samples, CHANNEL_COUNT), &raw.data)
                .map_err(|_| malformed())?;
            (
                view.clone().slice_move(s![.., .., 0]),
                view.slice_move(s![.., .., 1]),
            )
        }
        ChannelLayout::RecordInterleaved => {
            let view = ArrayView3::from_shape((records, CHANNEL_COUNT, samples), &raw.data)
                .map_err(|_| malformed())?;
            (
                view.clone().slice_move(s![.., 0, ..]),
                view.slice_move(s![.., 1, ..]),
            )
        }
    };

    let a = records_mean(a, table).ok_or_else(malformed)?;
    let b = records_mean(b, table).ok_or_else(malformed)?;
    Ok((a, b))
}

fn records_mean(codes: ArrayView2<u16>, table: &VoltTable) -> Option<Vec<f64>> {
    codes
        .mapv(|raw| table.volts(raw))
        .mean_axis(Axis(0))
        .map(|mean| mean.to_vec())
}

/// Incremental mean over successive vectors of equal length.
#[derive(Debug, Clone, Default)]
pub struct RunningMean {
    mean: Array1<f64>,
    count: u64,
}

impl RunningMean {
    pub fn new() -> Self {
        Default::default()
    }

    /// Fold `sample` in as `mean * n / (n + 1) + sample / (n + 1)`.
    pub fn update(&mut self, sample: &[f64]) {
        if self.count == 0 || self.mean.len() != sample.len() {
            self.mean = Array1::from(sample.to_vec());
            self.count = 1;
            return;
        }
        let n = self.count as f64;
        Zip::from(&mut self.mean)
            .and(sample)
            .for_each(|m, &x| *m = *m * n / (n + 1.0) + x / (n + 1.0));
        self.count += 1;
    }

    pub fn mean(&self) -> &[f64] {
        self.mean.as_slice().unwrap_or(&[])
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerReport {
    pub worker: usize,
    pub assigned: usize,
    pub reduced: usize,
    pub dropped: usize,
    /// True once the whole share was consumed and the completion flag set.
    pub finished: bool,
}

/// One reduction stage thread's worth of state.
pub struct Worker {
    index: usize,
    share: usize,
    layout: BufferLayout,
    table: VoltTable,
    averaging: AveragingMode,
    running: Option<(RunningMean, RunningMean)>,
}

impl Worker {
    pub fn new(
        index: usize,
        share: usize,
        layout: BufferLayout,
        calibration: &Calibration,
        averaging: AveragingMode,
    ) -> Self {
        Self {
            index,
            share,
            layout,
            table: calibration.table(),
            averaging,
            running: None,
        }
    }

    /// Consume this worker's share of the raw-buffer stream.
    ///
    /// Returns early, without marking completion, if either queue closes.
    pub fn run(
        mut self,
        input: QueueReceiver<RawBuffer>,
        output: QueueSender<WorkerOutput>,
        completion: &CompletionVector,
    ) -> WorkerReport {
        let mut report = WorkerReport {
            worker: self.index,
            assigned: self.share,
            ..Default::default()
        };

        for _ in 0..self.share {
            let raw = match input.pop() {
                Ok(raw) => raw,
                Err(closed) => {
                    info!(
                        "Worker {} stopped after {} of {} buffers: {}",
                        self.index,
                        report.reduced + report.dropped,
                        self.share,
                        closed
                    );
                    return report;
                }
            };

            let out = match reduce(&raw, &self.layout, &self.table) {
                Ok((a, b)) => {
                    report.reduced += 1;
                    WorkerOutput::Reduced(self.record(raw.index, a, b))
                }
                Err(e) => {
                    warn!("Worker {}: {}; dropping it", self.index, e);
                    report.dropped += 1;
                    WorkerOutput::Dropped {
                        worker: self.index,
                        buffer_index: raw.index,
                    }
                }
            };

            if let Err(closed) = output.push(out) {
                info!("Worker {} output closed: {}", self.index, closed);
                return report;
            }
        }

        completion.mark_done(self.index);
        report.finished = true;
        debug!(
            "Worker {} done: {} reduced, {} dropped",
            self.index, report.reduced, report.dropped
        );
        report
    }

    fn record(&mut self, buffer_index: u64, a: Vec<f64>, b: Vec<f64>) -> ReducedRecord {
        match self.averaging {
            AveragingMode::PerBuffer => ReducedRecord {
                buffer_index,
                worker: self.index,
                channel_a: a,
                channel_b: b,
                buffers_averaged: 1,
            },
            AveragingMode::Cumulative => {
                let (mean_a, mean_b) = self
                    .running
                    .get_or_insert_with(|| (RunningMean::new(), RunningMean::new()));
                mean_a.update(&a);
                mean_b.update(&b);
                ReducedRecord {
                    buffer_index,
                    worker: self.index,
                    channel_a: mean_a.mean().to_vec(),
                    channel_b: mean_b.mean().to_vec(),
                    buffers_averaged: mean_a.count(),
                }
            }
        }
    }
}
