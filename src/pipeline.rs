use crate::{
    bounded_queue, shard_sizes, AcqError, AcquisitionProducer, AcquisitionSummary, Board,
    CompletionVector, Conf, Display, RawBuffer, Sink, SinkTotals, StopSignal, Worker,
    WorkerOutput, WorkerReport,
};
use log::{info, warn};
use std::thread;

/// Everything a finished (or stopped) run leaves behind.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: AcquisitionSummary,
    pub workers: Vec<WorkerReport>,
    pub completion: Vec<bool>,
    /// Reduced records handed to the display.
    pub delivered: usize,
    pub dropped: usize,
    /// Channel A and B means over every buffer reduced in cumulative mode,
    /// or the latest buffers otherwise.
    pub combined: Option<(Vec<f64>, Vec<f64>)>,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.completion.iter().all(|&done| done)
    }
}

/// Producer, reduction workers and sink for one acquisition configuration.
#[derive(Debug, Clone)]
pub struct Pipeline {
    conf: Conf,
}

impl Pipeline {
    pub fn new(conf: Conf) -> Result<Self, AcqError> {
        conf.validate()?;
        Ok(Self { conf })
    }

    pub fn conf(&self) -> &Conf {
        &self.conf
    }

    /// Configure the board, then stream one acquisition through the workers
    /// into `display`.
    ///
    /// The sink runs on the calling thread. Producer errors are returned only
    /// after every thread has been joined.
    pub fn run<B: Board, D: Display>(
        &self,
        producer: &mut AcquisitionProducer<B>,
        display: &mut D,
        stop: &StopSignal,
    ) -> Result<RunReport, AcqError> {
        let layout = producer.configure(&self.conf)?;
        let calibration = producer.calibration().ok_or(AcqError::InvalidState {
            operation: "run",
            state: producer.state(),
        })?;

        let treatment = &self.conf.treatment;
        let shares = shard_sizes(
            self.conf.acquisition.buffers_per_acquisition,
            treatment.nb_process_data_treatment,
        );
        info!(
            "Starting {} reduction workers with shares {:?}",
            shares.len(),
            shares
        );

        let completion = CompletionVector::new(shares.len());
        let (raw_tx, raw_rx) = bounded_queue::<RawBuffer>(treatment.queue_depth, stop);
        let (out_tx, out_rx) = bounded_queue::<WorkerOutput>(treatment.queue_depth, stop);
        let mut sink = Sink::new(display, &completion, treatment.ordered_output);

        let (summary, workers) = thread::scope(|s| {
            let producer_handle = s.spawn(move || producer.run_acquisition(&raw_tx, stop));

            let worker_handles: Vec<_> = shares
                .iter()
                .enumerate()
                .map(|(index, &share)| {
                    let worker =
                        Worker::new(index, share, layout, &calibration, treatment.averaging);
                    let input = raw_rx.clone();
                    let output = out_tx.clone();
                    let completion = &completion;
                    s.spawn(move || worker.run(input, output, completion))
                })
                .collect();
            // the workers hold the only remaining ends
            drop(raw_rx);
            drop(out_tx);

            while let Ok(output) = out_rx.pop() {
                sink.accept(output);
            }

            let workers = worker_handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .map_err(|_| AcqError::ThreadPanicked("reduction worker"))
                })
                .collect::<Result<Vec<_>, _>>();
            let summary = producer_handle
                .join()
                .map_err(|_| AcqError::ThreadPanicked("producer"))
                .and_then(|result| result);
            (summary, workers)
        });

        let SinkTotals {
            delivered,
            dropped,
            combined,
        } = sink.close();

        let summary = summary?;
        let workers = workers?;
        let completion = completion.snapshot();
        if !completion.iter().all(|&done| done) {
            warn!("Run ended with unfinished workers: {:?}", completion);
        }
        info!("Delivered {delivered} reduced records, dropped {dropped} buffers");

        Ok(RunReport {
            summary,
            workers,
            completion,
            delivered,
            dropped,
            combined,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::tests::Recorder;
    use crate::{AveragingMode, Calibration, RunOutcome, SimBoard};
    use std::time::Duration;

    fn cal() -> Calibration {
        Calibration::new(12, 4, 0.4)
    }

    fn a_vectors(display: &Recorder) -> Vec<Vec<f64>> {
        display
            .shown
            .iter()
            .filter(|(label, _)| label == "A")
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn assert_close(got: &[f64], want: &[f64]) {
        assert_eq!(got.len(), want.len());
        for (g, w) in got.iter().zip(want) {
            assert!((g - w).abs() < 1e-9, "{got:?} != {want:?}");
        }
    }

    #[test]
    fn two_buffer_run_shows_each_buffer_mean() {
        let board = SimBoard::new(12, |n, buf| {
            if n == 0 {
                for pair in buf.chunks_mut(2) {
                    pair[0] = 100 << 4;
                    pair[1] = 200 << 4;
                }
            } else {
                buf.fill(0);
            }
        });
        let mut producer = AcquisitionProducer::new(board);
        let mut display = Recorder::default();
        let stop = StopSignal::new();

        let report = Pipeline::new(Conf::for_tests())
            .unwrap()
            .run(&mut producer, &mut display, &stop)
            .unwrap();

        assert_eq!(report.summary.outcome, RunOutcome::Completed);
        assert_eq!(report.summary.buffers_delivered, 2);
        assert_eq!(report.completion, vec![true]);
        assert_eq!(report.workers[0].reduced, 2);
        assert_eq!(report.delivered, 2);

        let labels: Vec<&str> = display.shown.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, ["A", "B", "A", "B"]);
        let cal = cal();
        assert_close(&display.shown[0].1, &[cal.code_to_volts(100); 4]);
        assert_close(&display.shown[1].1, &[cal.code_to_volts(200); 4]);
        assert_close(&display.shown[2].1, &[-0.4; 4]);
        assert_close(&display.shown[3].1, &[-0.4; 4]);
        assert!(display.finished);

        let stats = producer.board().stats();
        assert_eq!(stats.aborts, 1);
        assert_eq!(stats.freed, 2);
    }

    #[test]
    fn ordered_output_from_several_workers() {
        let mut conf = Conf::for_tests();
        conf.acquisition.buffers_per_acquisition = 7;
        conf.treatment.nb_process_data_treatment = 3;
        conf.treatment.ordered_output = true;
        let board = SimBoard::new(12, |n, buf| buf.fill((1000 + n as u16) << 4));
        let mut producer = AcquisitionProducer::new(board);
        let mut display = Recorder::default();
        let stop = StopSignal::new();

        let report = Pipeline::new(conf)
            .unwrap()
            .run(&mut producer, &mut display, &stop)
            .unwrap();

        assert!(report.is_complete());
        let shares: Vec<usize> = report.workers.iter().map(|w| w.assigned).collect();
        assert_eq!(shares, vec![2, 2, 3]);
        assert_eq!(report.workers.iter().map(|w| w.reduced).sum::<usize>(), 7);

        let cal = cal();
        let firsts: Vec<f64> = a_vectors(&display).iter().map(|v| v[0]).collect();
        let want: Vec<f64> = (0..7).map(|i| cal.code_to_volts(1000 + i)).collect();
        assert_close(&firsts, &want);
    }

    #[test]
    fn cumulative_workers_combine_into_the_overall_mean() {
        let mut conf = Conf::for_tests();
        conf.acquisition.buffers_per_acquisition = 4;
        conf.treatment.nb_process_data_treatment = 2;
        conf.treatment.averaging = AveragingMode::Cumulative;
        let board = SimBoard::new(12, |n, buf| buf.fill((1000 + 100 * n as u16) << 4));
        let mut producer = AcquisitionProducer::new(board);
        let mut display = Recorder::default();

        let report = Pipeline::new(conf)
            .unwrap()
            .run(&mut producer, &mut display, &StopSignal::new())
            .unwrap();

        let (a, b) = report.combined.unwrap();
        assert_close(&a, &[cal().code_to_volts(1150); 4]);
        assert_close(&b, &[cal().code_to_volts(1150); 4]);
    }

    #[test]
    fn timeout_propagates_after_threads_join() {
        let mut conf = Conf::for_tests();
        conf.acquisition.buffers_per_acquisition = 4;
        conf.acquisition.buffer_timeout_ms = 50;
        let board = SimBoard::constant(12, 2048 << 4).with_stall_after(1);
        let mut producer = AcquisitionProducer::new(board);
        let mut display = Recorder::default();

        let err = Pipeline::new(conf)
            .unwrap()
            .run(&mut producer, &mut display, &StopSignal::new())
            .unwrap_err();

        assert!(matches!(err, AcqError::AcquisitionTimeout { buffer: 1, .. }));
        assert_eq!(display.shown.len(), 2);
        assert!(display.finished);
        let stats = producer.board().stats();
        assert_eq!(stats.aborts, 1);
        assert_eq!(stats.freed, 2);
        assert!(!producer.board().is_capturing());
    }

    #[test]
    fn malformed_buffer_does_not_stall_the_run() {
        let mut conf = Conf::for_tests();
        conf.acquisition.buffers_per_acquisition = 3;
        let board = SimBoard::constant(12, 2048 << 4).with_truncated_buffer(1, 5);
        let mut producer = AcquisitionProducer::new(board);
        let mut display = Recorder::default();

        let report = Pipeline::new(conf)
            .unwrap()
            .run(&mut producer, &mut display, &StopSignal::new())
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.delivered, 2);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.workers[0].dropped, 1);
    }

    #[test]
    fn stop_signal_ends_a_long_run() {
        let mut conf = Conf::for_tests();
        conf.acquisition.buffers_per_acquisition = 10_000;
        let board = SimBoard::constant(12, 0).with_fill_interval(Duration::from_millis(2));
        let mut producer = AcquisitionProducer::new(board);
        let mut display = Recorder::default();
        let stop = StopSignal::new();
        let pipeline = Pipeline::new(conf).unwrap();

        let report = thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(50));
                stop.raise();
            });
            pipeline.run(&mut producer, &mut display, &stop)
        })
        .unwrap();

        assert_eq!(report.summary.outcome, RunOutcome::Stopped);
        assert!(report.summary.buffers_delivered < 10_000);
        assert_eq!(report.completion, vec![false]);
        assert_eq!(producer.board().stats().aborts, 1);
    }

    #[test]
    fn unknown_input_range_leaves_the_board_untouched() {
        let mut conf = Conf::for_tests();
        conf.acquisition.input_range = 1.0;
        let mut producer = AcquisitionProducer::new(SimBoard::constant(12, 0));
        let mut display = Recorder::default();

        let err = Pipeline::new(conf)
            .unwrap()
            .run(&mut producer, &mut display, &StopSignal::new())
            .unwrap_err();

        assert!(matches!(err, AcqError::InvalidConfiguration(_)));
        assert!(producer.board().clock().is_none());
        assert!(display.shown.is_empty());
    }

    #[test]
    fn invalid_configuration_is_rejected_up_front() {
        let mut conf = Conf::for_tests();
        conf.treatment.queue_depth = 0;
        assert!(matches!(
            Pipeline::new(conf),
            Err(AcqError::InvalidConfiguration(_))
        ));
    }
}
