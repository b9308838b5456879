use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Throughput counter for the acquisition loop, with *all-time* totals
/// and a *sliding 1 s window* rate.
#[derive(Debug, Clone)]
pub struct Counter {
    /// All-time total bytes
    pub total_size: usize,
    /// All-time number of buffers
    pub n_buffers: usize,
    /// All-time number of records
    pub n_records: usize,
    /// Time when this counter was created or last reset
    pub t_begin: Instant,

    window: Duration,
    events: VecDeque<(Instant, usize)>,
    bytes_in_window: usize,
}

impl Default for Counter {
    fn default() -> Self {
        Counter {
            total_size: 0,
            n_buffers: 0,
            n_records: 0,
            t_begin: Instant::now(),
            window: Duration::from_secs(1),
            events: VecDeque::new(),
            bytes_in_window: 0,
        }
    }
}

impl Counter {
    pub fn new() -> Self {
        Default::default()
    }

    /// Long-term average rate since t_begin, in MB/s
    pub fn average_rate(&self) -> f64 {
        let secs = self.t_begin.elapsed().as_secs_f64().max(1e-6);
        (self.total_size as f64 / secs) / (1024.0 * 1024.0)
    }

    /// Sliding-window rate over the last second, in MB/s
    pub fn rate(&self) -> f64 {
        let secs = self.window.as_secs_f64().max(1e-6);
        (self.bytes_in_window as f64 / secs) / (1024.0 * 1024.0)
    }

    /// Record one buffer of `size` bytes holding `records` records.
    pub fn increment(&mut self, size: usize, records: usize) {
        let now = Instant::now();

        self.total_size += size;
        self.n_buffers += 1;
        self.n_records += records;

        self.events.push_back((now, size));
        self.bytes_in_window += size;

        while let Some(&(ts, sz)) = self.events.front() {
            if now.duration_since(ts) > self.window {
                self.events.pop_front();
                self.bytes_in_window -= sz;
            } else {
                break;
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Counter {
            window: self.window,
            ..Default::default()
        };
    }

    /// One-line performance summary for the end of a run.
    pub fn summary(&self) -> String {
        let secs = self.t_begin.elapsed().as_secs_f64().max(1e-6);
        format!(
            "Captured {} buffers ({} records, {:.2} MB) in {:.3} s: {:.1} buffers/s, {:.1} records/s, {:.2} MB/s",
            self.n_buffers,
            self.n_records,
            self.total_size as f64 / (1024.0 * 1024.0),
            secs,
            self.n_buffers as f64 / secs,
            self.n_records as f64 / secs,
            self.average_rate(),
        )
    }
}

/// Timestamp suitable for file names, e.g. `20250314T101502`.
pub fn file_stamp() -> String {
    let format = time::format_description::parse("[year][month][day]T[hour][minute][second]");
    match format {
        Ok(format) => time::OffsetDateTime::now_utc()
            .format(&format)
            .unwrap_or_else(|_| "run".to_string()),
        Err(_) => "run".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates_totals() {
        let mut counter = Counter::new();
        counter.increment(1024, 10);
        counter.increment(2048, 10);
        assert_eq!(counter.total_size, 3072);
        assert_eq!(counter.n_buffers, 2);
        assert_eq!(counter.n_records, 20);
        assert!(counter.rate() > 0.0);
        assert!(counter.summary().starts_with("Captured 2 buffers (20 records"));
    }

    #[test]
    fn reset_clears_window_and_totals() {
        let mut counter = Counter::new();
        counter.increment(4096, 1);
        counter.reset();
        assert_eq!(counter.total_size, 0);
        assert_eq!(counter.n_buffers, 0);
        assert_eq!(counter.rate(), 0.0);
    }

    #[test]
    fn file_stamp_is_compact() {
        let stamp = file_stamp();
        assert_eq!(stamp.len(), 15);
        assert_eq!(&stamp[8..9], "T");
    }
}
