use crate::{
    AcqError, Board, BoardReturn, BufferHandle, BufferLayout, Calibration, Channel, ClockEdge,
    ClockRate, ClockSource, Conf, Counter, Coupling, QueueClosed, QueueSender, RawBuffer,
    StopSignal, TriggerSlope, TriggerSource,
};
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};

/// Default time allowed for the board to fill one buffer.
pub const DEFAULT_BUFFER_TIMEOUT: Duration = Duration::from_millis(5000);

/// Longest single board wait, so a raised stop signal is seen promptly.
const STOP_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Unconfigured,
    ClockSet,
    InputsSet,
    TriggerSet,
    /// Buffers allocated and posted.
    Armed,
    Capturing,
    Draining,
    Idle,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct AcquisitionSummary {
    pub outcome: RunOutcome,
    /// Buffers handed to the raw-buffer queue.
    pub buffers_delivered: u64,
    pub counter: Counter,
}

/// 8-bit trigger level code for `level` volts on a trigger input of `range` volts.
pub fn trigger_level_code(level: f64, range: f64) -> u8 {
    (128.0 + 127.0 * level / range).round().clamp(0.0, 255.0) as u8
}

/// Trigger delay in samples for a delay given in nanoseconds.
pub fn delay_samples(delay_ns: f64, sample_rate: f64) -> u64 {
    (delay_ns * 1e-9 * sample_rate).round().max(0.0) as u64
}

fn check_trigger(range: f64, delay_ns: f64) -> Result<(), AcqError> {
    if !(range.is_finite() && range > 0.0) {
        return Err(AcqError::InvalidConfiguration(format!(
            "trigger range must be positive, got {range}"
        )));
    }
    if !(delay_ns.is_finite() && delay_ns >= 0.0) {
        return Err(AcqError::InvalidConfiguration(format!(
            "trigger delay must be non-negative, got {delay_ns}"
        )));
    }
    Ok(())
}

fn check_sizes(
    layout: &BufferLayout,
    buffers_per_acquisition: usize,
    pool_size: usize,
) -> Result<(), AcqError> {
    if layout.records_per_buffer == 0
        || layout.acquired_samples == 0
        || buffers_per_acquisition == 0
        || pool_size == 0
    {
        return Err(AcqError::InvalidConfiguration(
            "records, samples, buffer count and pool size must all be non-zero".into(),
        ));
    }
    Ok(())
}

/// Session on one board: configuration state machine plus the DMA pool.
///
/// The producer owns the board outright; nothing else issues device calls.
pub struct AcquisitionProducer<B: Board> {
    board: B,
    state: ProducerState,
    sample_rate: Option<f64>,
    input_range: Option<f64>,
    layout: Option<BufferLayout>,
    buffers_per_acquisition: u64,
    pool: Vec<BufferHandle>,
    timeout: Duration,
}

impl<B: Board> AcquisitionProducer<B> {
    pub fn new(board: B) -> Self {
        Self {
            board,
            state: ProducerState::Unconfigured,
            sample_rate: None,
            input_range: None,
            layout: None,
            buffers_per_acquisition: 0,
            pool: Vec::new(),
            timeout: DEFAULT_BUFFER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    pub fn sample_rate(&self) -> Option<f64> {
        self.sample_rate
    }

    pub fn layout(&self) -> Option<BufferLayout> {
        self.layout
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Code-to-volts map for the configured input range.
    pub fn calibration(&self) -> Option<Calibration> {
        self.input_range.map(|range| {
            Calibration::new(self.board.bits_per_sample(), self.board.bit_shift(), range)
        })
    }

    fn require(&self, operation: &'static str, allowed: &[ProducerState]) -> Result<(), AcqError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(AcqError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Board clock selection for `requested_rate`.
    fn clock_rate(
        &self,
        source: ClockSource,
        requested_rate: f64,
    ) -> Result<(ClockRate, u32), AcqError> {
        match source {
            ClockSource::Internal => self
                .board
                .sample_rates()
                .iter()
                .find(|&&(hz, _)| hz as f64 == requested_rate)
                .map(|&(_, id)| (ClockRate::Internal(id), 0))
                .ok_or_else(|| {
                    AcqError::InvalidConfiguration(format!(
                        "{requested_rate} S/s is not an internal clock rate of this board"
                    ))
                }),
            ClockSource::External => {
                if !(requested_rate.is_finite() && requested_rate > 0.0) {
                    return Err(AcqError::InvalidConfiguration(format!(
                        "external clock frequency must be positive, got {requested_rate}"
                    )));
                }
                // external clock mode only supports decimation by 1
                Ok((ClockRate::External(requested_rate), 1))
            }
        }
    }

    fn range_id(&self, range: f64) -> Result<u32, AcqError> {
        self.board
            .input_ranges()
            .iter()
            .find(|&&(volts, _)| (volts - range).abs() < 1e-9)
            .map(|&(_, id)| id)
            .ok_or_else(|| {
                AcqError::InvalidConfiguration(format!(
                    "±{range} V is not an input range of this board"
                ))
            })
    }

    /// Check a whole configuration against this board without touching it.
    pub fn validate_for_board(&self, conf: &Conf) -> Result<(), AcqError> {
        conf.validate()?;
        self.clock_rate(conf.clock.clock_source, conf.clock.samplerate)?;
        self.range_id(conf.acquisition.input_range)?;
        check_trigger(conf.trigger.trigger_range, conf.trigger.trigger_delay)?;
        let layout = BufferLayout {
            records_per_buffer: conf.acquisition.records_per_buffer,
            acquired_samples: conf.acquisition.acquired_samples,
            channel_layout: conf.acquisition.channel_layout,
        };
        check_sizes(
            &layout,
            conf.acquisition.buffers_per_acquisition,
            conf.acquisition.nb_buffer_allocated,
        )
    }

    pub fn configure_clock(
        &mut self,
        source: ClockSource,
        requested_rate: f64,
        edge: ClockEdge,
    ) -> Result<(), AcqError> {
        use ProducerState::*;
        self.require(
            "configure_clock",
            &[Unconfigured, ClockSet, InputsSet, TriggerSet, Idle, Aborted],
        )?;

        let (rate, decimation) = self.clock_rate(source, requested_rate)?;

        self.board
            .set_capture_clock(source, rate, edge, decimation)?;
        self.sample_rate = Some(requested_rate);
        self.input_range = None;
        self.state = ClockSet;
        info!(
            "Clock: {source:?} {requested_rate} S/s, {edge:?} edge, decimation {decimation}"
        );
        Ok(())
    }

    /// Apply the same input range and coupling to both channels.
    pub fn configure_inputs(&mut self, range: f64, coupling: Coupling) -> Result<(), AcqError> {
        use ProducerState::*;
        self.require("configure_inputs", &[ClockSet, InputsSet, TriggerSet])?;

        let range_id = self.range_id(range)?;

        for channel in [Channel::A, Channel::B] {
            self.board.input_control(channel, range_id, coupling)?;
        }
        self.input_range = Some(range);
        self.state = InputsSet;
        info!("Inputs: ±{range} V, {coupling:?} coupling");
        Ok(())
    }

    pub fn configure_trigger(
        &mut self,
        source: TriggerSource,
        slope: TriggerSlope,
        range: f64,
        level: f64,
        delay_ns: f64,
    ) -> Result<(), AcqError> {
        use ProducerState::*;
        self.require("configure_trigger", &[ClockSet, InputsSet, TriggerSet])?;
        let sample_rate = self.sample_rate.ok_or(AcqError::InvalidState {
            operation: "configure_trigger",
            state: self.state,
        })?;
        check_trigger(range, delay_ns)?;

        let level_code = trigger_level_code(level, range);
        let delay = delay_samples(delay_ns, sample_rate);
        self.board.set_trigger(source, slope, level_code, delay)?;
        self.state = TriggerSet;
        info!(
            "Trigger: {source:?} {slope:?}, level {level} V of ±{range} V (code {level_code}), delay {delay} samples"
        );
        Ok(())
    }

    /// Allocate `pool_size` DMA buffers for `layout` and post them all.
    pub fn prepare_acquisition(
        &mut self,
        layout: BufferLayout,
        buffers_per_acquisition: usize,
        pool_size: usize,
    ) -> Result<(), AcqError> {
        self.require("prepare_acquisition", &[ProducerState::TriggerSet])?;
        check_sizes(&layout, buffers_per_acquisition, pool_size)?;

        let bits = self.board.bits_per_sample();
        let bytes_per_buffer = layout.bytes_per_buffer(bits);

        for _ in 0..pool_size {
            match self.board.allocate_buffer(bytes_per_buffer) {
                Ok(handle) => self.pool.push(handle),
                Err(code) => {
                    self.release_pool();
                    return Err(AcqError::AllocationFailure {
                        bytes: bytes_per_buffer,
                        code,
                    });
                }
            }
        }
        let board = &mut self.board;
        if let Err(code) = self
            .pool
            .iter()
            .try_for_each(|&handle| board.post_buffer(handle))
        {
            self.abort_and_release();
            return Err(code.into());
        }

        self.layout = Some(layout);
        self.buffers_per_acquisition = buffers_per_acquisition as u64;
        self.state = ProducerState::Armed;
        info!(
            "Armed: {} records x {} samples per buffer, {} bytes per record, {} bytes per buffer, {} buffers in pool, {} buffers to acquire",
            layout.records_per_buffer,
            layout.acquired_samples,
            layout.bytes_per_record(bits),
            bytes_per_buffer,
            pool_size,
            buffers_per_acquisition,
        );
        Ok(())
    }

    /// Clock, inputs, trigger and buffer pool from a validated configuration.
    pub fn configure(&mut self, conf: &Conf) -> Result<BufferLayout, AcqError> {
        self.validate_for_board(conf)?;
        self.configure_clock(
            conf.clock.clock_source,
            conf.clock.samplerate,
            conf.clock.clock_edge,
        )?;
        self.configure_inputs(conf.acquisition.input_range, conf.acquisition.coupling)?;
        self.configure_trigger(
            conf.trigger.trigger_source,
            conf.trigger.trigger_slope,
            conf.trigger.trigger_range,
            conf.trigger.trigger_level,
            conf.trigger.trigger_delay,
        )?;
        self.set_timeout(Duration::from_millis(conf.acquisition.buffer_timeout_ms));
        let layout = BufferLayout {
            records_per_buffer: conf.acquisition.records_per_buffer,
            acquired_samples: conf.acquisition.acquired_samples,
            channel_layout: conf.acquisition.channel_layout,
        };
        self.prepare_acquisition(
            layout,
            conf.acquisition.buffers_per_acquisition,
            conf.acquisition.nb_buffer_allocated,
        )?;
        Ok(layout)
    }

    /// Capture every buffer of the acquisition into `output`.
    ///
    /// Capture is aborted and the pool released on every exit path. A
    /// missed buffer deadline is fatal; a raised stop signal ends the run
    /// early with [`RunOutcome::Stopped`].
    pub fn run_acquisition(
        &mut self,
        output: &QueueSender<RawBuffer>,
        stop: &StopSignal,
    ) -> Result<AcquisitionSummary, AcqError> {
        self.require("run_acquisition", &[ProducerState::Armed])?;
        let layout = self.layout.ok_or(AcqError::InvalidState {
            operation: "run_acquisition",
            state: self.state,
        })?;
        let mut counter = Counter::new();
        let bytes = layout.bytes_per_buffer(self.board.bits_per_sample());

        let result = {
            let mut capture = Capture::start(&mut self.board);
            match capture.as_mut() {
                Ok(capture) => {
                    self.state = ProducerState::Capturing;
                    let pump = Pump {
                        pool: &self.pool,
                        buffers: self.buffers_per_acquisition,
                        records: layout.records_per_buffer,
                        bytes,
                        timeout: self.timeout,
                    };
                    let result = pump.run(&mut *capture.board, output, stop, &mut counter);
                    self.state = ProducerState::Draining;
                    result
                }
                Err(code) => Err(AcqError::Board(*code)),
            }
        };
        self.release_pool();

        match result {
            Ok((outcome, buffers_delivered)) => {
                self.state = ProducerState::Idle;
                info!("{}", counter.summary());
                if outcome == RunOutcome::Stopped {
                    info!(
                        "Acquisition stopped after {} of {} buffers",
                        buffers_delivered, self.buffers_per_acquisition
                    );
                }
                Ok(AcquisitionSummary {
                    outcome,
                    buffers_delivered,
                    counter,
                })
            }
            Err(e) => {
                self.state = ProducerState::Aborted;
                error!("Acquisition aborted: {e}");
                Err(e)
            }
        }
    }

    fn abort_and_release(&mut self) {
        if let Err(code) = self.board.abort_capture() {
            error!("Abort failed: {code:?}");
        }
        self.release_pool();
    }

    fn release_pool(&mut self) {
        for handle in self.pool.drain(..) {
            if let Err(code) = self.board.free_buffer(handle) {
                warn!("Could not free buffer {:?}: {code:?}", handle);
            }
        }
    }
}

impl<B: Board> Drop for AcquisitionProducer<B> {
    fn drop(&mut self) {
        if !self.pool.is_empty() {
            debug!("Releasing {} posted buffers", self.pool.len());
            self.abort_and_release();
        }
    }
}

/// Running capture; dropping it aborts the capture exactly once.
struct Capture<'b, B: Board> {
    board: &'b mut B,
}

impl<'b, B: Board> Capture<'b, B> {
    fn start(board: &'b mut B) -> Result<Self, BoardReturn> {
        let mut capture = Capture { board };
        capture.board.start_capture()?;
        Ok(capture)
    }
}

impl<B: Board> Drop for Capture<'_, B> {
    fn drop(&mut self) {
        if let Err(code) = self.board.abort_capture() {
            error!("Abort failed: {code:?}");
        }
    }
}

/// The wait / hand off / re-post loop.
struct Pump<'p> {
    pool: &'p [BufferHandle],
    buffers: u64,
    records: usize,
    bytes: usize,
    timeout: Duration,
}

impl Pump<'_> {
    fn run<B: Board>(
        &self,
        board: &mut B,
        output: &QueueSender<RawBuffer>,
        stop: &StopSignal,
        counter: &mut Counter,
    ) -> Result<(RunOutcome, u64), AcqError> {
        for n in 0..self.buffers {
            if stop.is_raised() {
                return Ok((RunOutcome::Stopped, n));
            }
            let slot = self.pool[(n % self.pool.len() as u64) as usize];

            let deadline = Instant::now() + self.timeout;
            let data = loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match board.wait_buffer_complete(slot, remaining.min(STOP_POLL)) {
                    Ok(data) => break data.to_vec(),
                    Err(BoardReturn::WaitTimeout) if stop.is_raised() => {
                        return Ok((RunOutcome::Stopped, n));
                    }
                    Err(BoardReturn::WaitTimeout) if Instant::now() < deadline => continue,
                    Err(BoardReturn::WaitTimeout) => {
                        return Err(AcqError::AcquisitionTimeout {
                            buffer: n,
                            timeout: self.timeout,
                        });
                    }
                    Err(code) => return Err(code.into()),
                }
            };
            counter.increment(self.bytes, self.records);

            let pushed = output.push(RawBuffer { index: n, data });
            board.post_buffer(slot)?;
            match pushed {
                Ok(()) => {}
                Err(QueueClosed::Stopped) => return Ok((RunOutcome::Stopped, n)),
                Err(closed) => return Err(closed.into()),
            }
            if n % 1000 == 999 {
                debug!(
                    "Buffer {}: {:.2} MB/s, {} waiting downstream",
                    n + 1,
                    counter.rate(),
                    output.len()
                );
            }
        }
        Ok((RunOutcome::Completed, self.buffers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bounded_queue, ChannelLayout, SimBoard};

    fn layout() -> BufferLayout {
        BufferLayout {
            records_per_buffer: 2,
            acquired_samples: 4,
            channel_layout: ChannelLayout::SampleInterleaved,
        }
    }

    fn armed(board: SimBoard, buffers: usize, pool: usize) -> AcquisitionProducer<SimBoard> {
        let mut producer =
            AcquisitionProducer::new(board).with_timeout(Duration::from_millis(50));
        producer
            .configure_clock(ClockSource::Internal, 1e9, ClockEdge::Rising)
            .unwrap();
        producer.configure_inputs(0.4, Coupling::Dc).unwrap();
        producer
            .configure_trigger(TriggerSource::External, TriggerSlope::Positive, 2.5, 0.0, 0.0)
            .unwrap();
        producer.prepare_acquisition(layout(), buffers, pool).unwrap();
        producer
    }

    #[test]
    fn trigger_level_maps_range_onto_eight_bits() {
        assert_eq!(trigger_level_code(0.0, 2.5), 128);
        assert_eq!(trigger_level_code(2.5, 2.5), 255);
        assert_eq!(trigger_level_code(-2.5, 2.5), 1);
        assert_eq!(trigger_level_code(10.0, 2.5), 255);
        assert_eq!(trigger_level_code(-10.0, 2.5), 0);
        assert_eq!(trigger_level_code(0.5, 2.5), 153);
    }

    #[test]
    fn delay_is_rounded_to_whole_samples() {
        assert_eq!(delay_samples(0.0, 1e9), 0);
        assert_eq!(delay_samples(100.0, 1e9), 100);
        assert_eq!(delay_samples(100.0, 1.8e9), 180);
        assert_eq!(delay_samples(1.3, 1e9), 1);
    }

    #[test]
    fn internal_clock_must_be_in_rate_table() {
        let mut producer = AcquisitionProducer::new(SimBoard::constant(12, 0));
        let err = producer
            .configure_clock(ClockSource::Internal, 123.0, ClockEdge::Rising)
            .unwrap_err();
        assert!(matches!(err, AcqError::InvalidConfiguration(_)));
        assert_eq!(producer.state(), ProducerState::Unconfigured);
        assert!(producer.board().clock().is_none());
    }

    #[test]
    fn internal_clock_uses_no_decimation() {
        let mut producer = AcquisitionProducer::new(SimBoard::constant(12, 0));
        producer
            .configure_clock(ClockSource::Internal, 1_800_000_000.0, ClockEdge::Falling)
            .unwrap();
        let (source, rate, edge, decimation) = producer.board().clock().unwrap();
        assert_eq!(source, ClockSource::Internal);
        assert_eq!(rate, ClockRate::Internal(0x3D));
        assert_eq!(edge, ClockEdge::Falling);
        assert_eq!(decimation, 0);
    }

    #[test]
    fn external_clock_forces_decimation_of_one() {
        let mut producer = AcquisitionProducer::new(SimBoard::constant(12, 0));
        producer
            .configure_clock(ClockSource::External, 987_654_321.0, ClockEdge::Rising)
            .unwrap();
        let (_, rate, _, decimation) = producer.board().clock().unwrap();
        assert_eq!(rate, ClockRate::External(987_654_321.0));
        assert_eq!(decimation, 1);
        assert_eq!(producer.sample_rate(), Some(987_654_321.0));

        assert!(matches!(
            producer.configure_clock(ClockSource::External, -1.0, ClockEdge::Rising),
            Err(AcqError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn trigger_needs_clock_first() {
        let mut producer = AcquisitionProducer::new(SimBoard::constant(12, 0));
        let err = producer
            .configure_trigger(TriggerSource::External, TriggerSlope::Positive, 2.5, 0.1, 0.0)
            .unwrap_err();
        assert!(matches!(err, AcqError::InvalidState { .. }));
    }

    #[test]
    fn trigger_forwards_level_code_and_delay() {
        let mut producer = AcquisitionProducer::new(SimBoard::constant(12, 0));
        producer
            .configure_clock(ClockSource::Internal, 500_000_000.0, ClockEdge::Rising)
            .unwrap();
        producer
            .configure_trigger(TriggerSource::ChannelA, TriggerSlope::Negative, 1.0, -0.5, 20.0)
            .unwrap();
        assert_eq!(
            producer.board().trigger(),
            Some((TriggerSource::ChannelA, TriggerSlope::Negative, 65, 10))
        );
        assert_eq!(producer.state(), ProducerState::TriggerSet);
    }

    #[test]
    fn unknown_input_range_is_rejected() {
        let mut producer = AcquisitionProducer::new(SimBoard::constant(12, 0));
        producer
            .configure_clock(ClockSource::Internal, 1e9, ClockEdge::Rising)
            .unwrap();
        assert!(matches!(
            producer.configure_inputs(1.0, Coupling::Dc),
            Err(AcqError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn prepare_posts_whole_pool() {
        let producer = armed(SimBoard::constant(12, 0), 5, 3);
        assert_eq!(producer.state(), ProducerState::Armed);
        assert_eq!(producer.pool_size(), 3);
        let stats = producer.board().stats();
        assert_eq!(stats.allocated, 3);
        assert_eq!(stats.posted, 3);
        assert_eq!(producer.board().last_allocation(), Some(2 * 4 * 2 * 2));
    }

    #[test]
    fn allocation_failure_releases_partial_pool() {
        let board = SimBoard::constant(12, 0).with_allocation_limit(2);
        let mut producer = AcquisitionProducer::new(board);
        producer
            .configure_clock(ClockSource::Internal, 1e9, ClockEdge::Rising)
            .unwrap();
        producer.configure_inputs(0.4, Coupling::Dc).unwrap();
        producer
            .configure_trigger(TriggerSource::External, TriggerSlope::Positive, 2.5, 0.0, 0.0)
            .unwrap();
        let err = producer.prepare_acquisition(layout(), 5, 4).unwrap_err();
        assert!(matches!(err, AcqError::AllocationFailure { bytes: 32, .. }));
        assert_eq!(producer.pool_size(), 0);
        assert_eq!(producer.board().stats().freed, 2);
    }

    #[test]
    fn pool_is_conserved_over_a_run() {
        let mut producer = armed(SimBoard::constant(12, 7), 11, 3);
        let stop = StopSignal::new();
        let (tx, rx) = bounded_queue(16, &stop);
        let summary = producer.run_acquisition(&tx, &stop).unwrap();

        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(summary.buffers_delivered, 11);
        assert_eq!(summary.counter.n_buffers, 11);
        assert_eq!(summary.counter.n_records, 22);
        let stats = producer.board().stats();
        assert_eq!(stats.waited, 11);
        assert_eq!(stats.posted, 3 + 11);
        assert!(stats.max_outstanding <= 3);
        assert_eq!(stats.aborts, 1);
        assert_eq!(stats.freed, 3);
        assert_eq!(producer.state(), ProducerState::Idle);

        let indices: Vec<u64> = (0..11).map(|_| rx.pop().unwrap().index).collect();
        assert_eq!(indices, (0..11).collect::<Vec<_>>());
    }

    #[test]
    fn never_completing_wait_times_out_and_aborts_once() {
        let board = SimBoard::constant(12, 0).with_stall_after(1);
        let mut producer = armed(board, 4, 2);
        let stop = StopSignal::new();
        let (tx, _rx) = bounded_queue(8, &stop);

        let err = producer.run_acquisition(&tx, &stop).unwrap_err();
        assert!(matches!(err, AcqError::AcquisitionTimeout { buffer: 1, .. }));
        assert_eq!(producer.board().stats().aborts, 1);
        assert_eq!(producer.state(), ProducerState::Aborted);
        assert_eq!(producer.pool_size(), 0);
        assert!(!producer.board().is_capturing());
    }

    #[test]
    fn aborted_producer_can_be_reconfigured() {
        let board = SimBoard::constant(12, 0).with_stall_after(0);
        let mut producer = armed(board, 2, 2);
        let stop = StopSignal::new();
        let (tx, _rx) = bounded_queue(8, &stop);
        assert!(producer.run_acquisition(&tx, &stop).is_err());

        producer.board_mut().clear_stall();
        producer
            .configure_clock(ClockSource::Internal, 1e9, ClockEdge::Rising)
            .unwrap();
        producer.configure_inputs(0.4, Coupling::Dc).unwrap();
        producer
            .configure_trigger(TriggerSource::External, TriggerSlope::Positive, 2.5, 0.0, 0.0)
            .unwrap();
        producer.prepare_acquisition(layout(), 2, 2).unwrap();
        let summary = producer.run_acquisition(&tx, &stop).unwrap();
        assert_eq!(summary.buffers_delivered, 2);
    }

    #[test]
    fn stop_signal_ends_a_backpressured_run() {
        let mut producer = armed(SimBoard::constant(12, 0), 100, 2);
        let stop = StopSignal::new();
        let (tx, rx) = bounded_queue(1, &stop);

        std::thread::scope(|s| {
            let run = s.spawn(|| producer.run_acquisition(&tx, &stop));
            // one buffer fits in the queue, the next push blocks
            assert_eq!(rx.pop().unwrap().index, 0);
            std::thread::sleep(Duration::from_millis(20));
            stop.raise();
            let summary = run.join().unwrap().unwrap();
            assert_eq!(summary.outcome, RunOutcome::Stopped);
            assert!(summary.buffers_delivered < 100);
        });
        assert_eq!(producer.board().stats().aborts, 1);
        assert_eq!(producer.state(), ProducerState::Idle);
    }

    #[test]
    fn run_requires_armed_producer() {
        let mut producer = AcquisitionProducer::new(SimBoard::constant(12, 0));
        let stop = StopSignal::new();
        let (tx, _rx) = bounded_queue(1, &stop);
        assert!(matches!(
            producer.run_acquisition(&tx, &stop),
            Err(AcqError::InvalidState { .. })
        ));
        assert_eq!(producer.board().stats().aborts, 0);
    }

    #[test]
    fn bad_configuration_is_rejected_before_any_board_call() {
        let mut producer = AcquisitionProducer::new(SimBoard::constant(12, 0));

        let mut conf = Conf::for_tests();
        conf.acquisition.input_range = 1.0;
        assert!(matches!(
            producer.configure(&conf),
            Err(AcqError::InvalidConfiguration(_))
        ));

        let mut conf = Conf::for_tests();
        conf.clock.samplerate = 123.0;
        assert!(producer.configure(&conf).is_err());

        let mut conf = Conf::for_tests();
        conf.trigger.trigger_delay = -5.0;
        assert!(producer.configure(&conf).is_err());

        assert!(producer.board().clock().is_none());
        assert!(producer.board().inputs().is_empty());
        assert!(producer.board().trigger().is_none());
        assert_eq!(producer.board().stats().allocated, 0);
        assert_eq!(producer.state(), ProducerState::Unconfigured);
    }

    #[test]
    fn configure_applies_a_whole_configuration() {
        let conf = Conf::for_tests();
        let mut producer = AcquisitionProducer::new(SimBoard::constant(12, 0));
        let layout = producer.configure(&conf).unwrap();
        assert_eq!(layout.records_per_buffer, 10);
        assert_eq!(producer.pool_size(), 2);
        assert_eq!(producer.calibration().unwrap().full_scale, 0.4);
        assert_eq!(producer.board().inputs().len(), 2);
    }
}
