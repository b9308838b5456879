use crate::{ReducedRecord, WorkerOutput};
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// One write-once flag per reduction worker.
#[derive(Debug)]
pub struct CompletionVector {
    flags: Vec<AtomicBool>,
}

impl CompletionVector {
    pub fn new(workers: usize) -> Self {
        Self {
            flags: (0..workers).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Set the worker's flag. Returns true if this call flipped it.
    pub fn mark_done(&self, worker: usize) -> bool {
        match self.flags.get(worker) {
            Some(flag) => !flag.swap(true, Ordering::AcqRel),
            None => false,
        }
    }

    pub fn is_done(&self, worker: usize) -> bool {
        self.flags
            .get(worker)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    pub fn is_complete(&self) -> bool {
        self.flags.iter().all(|flag| flag.load(Ordering::Acquire))
    }

    pub fn snapshot(&self) -> Vec<bool> {
        self.flags
            .iter()
            .map(|flag| flag.load(Ordering::Acquire))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// Destination for reduced channel vectors. Fire and forget.
pub trait Display {
    fn show(&mut self, label: &str, samples: &[f64]);

    /// Called once after the last record.
    fn finish(&mut self) {}
}

/// Writes a one-line summary of every vector to the log.
#[derive(Debug, Default)]
pub struct LogDisplay {
    shown: usize,
}

impl Display for LogDisplay {
    fn show(&mut self, label: &str, samples: &[f64]) {
        self.shown += 1;
        if samples.is_empty() {
            return;
        }
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let (min, max) = samples
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        debug!(
            "Channel {label}: {} samples, mean {mean:.6} V, min {min:.6} V, max {max:.6} V",
            samples.len()
        );
    }

    fn finish(&mut self) {
        info!("Displayed {} channel vectors", self.shown);
    }
}

/// What the sink handed on over a whole run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkTotals {
    pub delivered: usize,
    pub dropped: usize,
    pub combined: Option<(Vec<f64>, Vec<f64>)>,
}

/// Collects worker output on the orchestrator thread.
pub struct Sink<'a, D: Display> {
    display: &'a mut D,
    completion: &'a CompletionVector,
    ordered: bool,
    next_index: u64,
    pending: BTreeMap<u64, WorkerOutput>,
    latest: Vec<Option<ReducedRecord>>,
    delivered: usize,
    dropped: usize,
}

impl<'a, D: Display> Sink<'a, D> {
    pub fn new(display: &'a mut D, completion: &'a CompletionVector, ordered: bool) -> Self {
        Self {
            display,
            completion,
            ordered,
            next_index: 0,
            pending: BTreeMap::new(),
            latest: vec![None; completion.len()],
            delivered: 0,
            dropped: 0,
        }
    }

    /// Route one item from the reduced-record queue.
    pub fn accept(&mut self, output: WorkerOutput) {
        if !self.ordered {
            self.dispatch(output);
            return;
        }
        self.pending.insert(output.buffer_index(), output);
        while let Some(next) = self.pending.remove(&self.next_index) {
            self.next_index += 1;
            self.dispatch(next);
        }
    }

    /// Forward a reduced record to the display.
    pub fn on_reduced(&mut self, worker: usize, record: ReducedRecord) {
        self.display.show("A", &record.channel_a);
        self.display.show("B", &record.channel_b);
        self.delivered += 1;
        if let Some(slot) = self.latest.get_mut(worker) {
            *slot = Some(record);
        }
    }

    pub fn mark_done(&self, worker: usize) -> bool {
        self.completion.mark_done(worker)
    }

    pub fn is_complete(&self) -> bool {
        self.completion.is_complete()
    }

    /// Mean over every buffer the workers have folded so far, weighting
    /// each worker's latest record by how many buffers it averages.
    pub fn combined_mean(&self) -> Option<(Vec<f64>, Vec<f64>)> {
        let records: Vec<&ReducedRecord> = self.latest.iter().flatten().collect();
        let first = records.first()?;
        let total: u64 = records.iter().map(|r| r.buffers_averaged).sum();
        let mut a = vec![0.0; first.channel_a.len()];
        let mut b = vec![0.0; first.channel_b.len()];
        for record in &records {
            let weight = record.buffers_averaged as f64 / total as f64;
            for (acc, v) in a.iter_mut().zip(&record.channel_a) {
                *acc += v * weight;
            }
            for (acc, v) in b.iter_mut().zip(&record.channel_b) {
                *acc += v * weight;
            }
        }
        Some((a, b))
    }

    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Release anything still held for ordering, then close the display.
    pub fn finish(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            debug!("Flushing {} out-of-order records", pending.len());
        }
        for (_, output) in pending {
            self.dispatch(output);
        }
        self.display.finish();
    }

    /// Finish, then report totals that include the flushed records.
    pub fn close(mut self) -> SinkTotals {
        self.finish();
        SinkTotals {
            delivered: self.delivered,
            dropped: self.dropped,
            combined: self.combined_mean(),
        }
    }

    fn dispatch(&mut self, output: WorkerOutput) {
        match output {
            WorkerOutput::Reduced(record) => self.on_reduced(record.worker, record),
            WorkerOutput::Dropped { .. } => self.dropped += 1,
        }
    }
}
