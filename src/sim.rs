//! In-process stand-in for a DMA digitizer.
//!
//! `SimBoard` follows the same buffer protocol as the real hardware:
//! buffers must be posted before capture fills them, they complete in the
//! order they were posted, and an abort hands every posted buffer back.
//! Every call is counted so tests can check the pool bookkeeping.

use crate::{
    bytes_per_sample, Board, BoardReturn, BufferHandle, Channel, ClockEdge, ClockRate,
    ClockSource, Coupling, TriggerSlope, TriggerSource,
};
use rand::Rng;
use std::{
    collections::VecDeque,
    thread,
    time::{Duration, Instant},
};

/// Fills the buffer with the given sequence number.
pub type FillFn = Box<dyn FnMut(u64, &mut [u16]) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Software,
    Posted,
    Filled,
}

struct Slot {
    data: Vec<u16>,
    state: SlotState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub allocated: usize,
    pub freed: usize,
    pub posted: usize,
    pub waited: usize,
    pub starts: usize,
    pub aborts: usize,
    /// Most buffers ever filled but not yet handed back to the board.
    pub max_outstanding: usize,
}

pub struct SimBoard {
    bits: u8,
    slots: Vec<Option<Slot>>,
    posted: VecDeque<BufferHandle>,
    capturing: bool,
    filled: u64,
    fill: FillFn,
    fill_interval: Duration,
    ready_at: Instant,
    stall_after: Option<u64>,
    truncate: Option<(u64, usize)>,
    max_buffers: Option<usize>,
    last_allocation: Option<usize>,
    clock: Option<(ClockSource, ClockRate, ClockEdge, u32)>,
    inputs: Vec<(Channel, u32, Coupling)>,
    trigger: Option<(TriggerSource, TriggerSlope, u8, u64)>,
    stats: SimStats,
}

impl SimBoard {
    pub fn new(bits: u8, fill: impl FnMut(u64, &mut [u16]) + Send + 'static) -> Self {
        Self {
            bits,
            slots: Vec::new(),
            posted: VecDeque::new(),
            capturing: false,
            filled: 0,
            fill: Box::new(fill),
            fill_interval: Duration::ZERO,
            ready_at: Instant::now(),
            stall_after: None,
            truncate: None,
            max_buffers: None,
            last_allocation: None,
            clock: None,
            inputs: Vec::new(),
            trigger: None,
            stats: SimStats::default(),
        }
    }

    /// Every stored word equals `word`.
    pub fn constant(bits: u8, word: u16) -> Self {
        Self::new(bits, move |_, buf| buf.fill(word))
    }

    /// Mid-scale codes with uniform noise of ±`noise` codes.
    pub fn noisy(bits: u8, noise: u16) -> Self {
        let shift = 16 - bits.min(16);
        let mid = 1i32 << (bits - 1);
        let max = (1i32 << bits) - 1;
        let noise = noise as i32;
        Self::new(bits, move |_, buf| {
            let mut rng = rand::rng();
            for word in buf.iter_mut() {
                let code = (mid + rng.random_range(-noise..=noise)).clamp(0, max);
                *word = (code as u16) << shift;
            }
        })
    }

    /// Time the board takes to fill each buffer.
    pub fn with_fill_interval(mut self, interval: Duration) -> Self {
        self.fill_interval = interval;
        self
    }

    /// Waits never complete once `buffers` buffers have been filled.
    pub fn with_stall_after(mut self, buffers: u64) -> Self {
        self.stall_after = Some(buffers);
        self
    }

    pub fn clear_stall(&mut self) {
        self.stall_after = None;
    }

    /// Hand back only `len` samples for buffer number `index`.
    pub fn with_truncated_buffer(mut self, index: u64, len: usize) -> Self {
        self.truncate = Some((index, len));
        self
    }

    /// Refuse to allocate more than `buffers` buffers at a time.
    pub fn with_allocation_limit(mut self, buffers: usize) -> Self {
        self.max_buffers = Some(buffers);
        self
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn last_allocation(&self) -> Option<usize> {
        self.last_allocation
    }

    pub fn clock(&self) -> Option<(ClockSource, ClockRate, ClockEdge, u32)> {
        self.clock
    }

    pub fn inputs(&self) -> &[(Channel, u32, Coupling)] {
        &self.inputs
    }

    pub fn trigger(&self) -> Option<(TriggerSource, TriggerSlope, u8, u64)> {
        self.trigger
    }

    fn slot_mut(&mut self, handle: BufferHandle) -> Result<&mut Slot, BoardReturn> {
        self.slots
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or(BoardReturn::InvalidBuffer)
    }

    fn outstanding(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|slot| slot.state == SlotState::Filled)
            .count()
    }
}

impl Board for SimBoard {
    fn bits_per_sample(&self) -> u8 {
        self.bits
    }

    fn set_capture_clock(
        &mut self,
        source: ClockSource,
        rate: ClockRate,
        edge: ClockEdge,
        decimation: u32,
    ) -> Result<(), BoardReturn> {
        self.clock = Some((source, rate, edge, decimation));
        Ok(())
    }

    fn input_control(
        &mut self,
        channel: Channel,
        range_id: u32,
        coupling: Coupling,
    ) -> Result<(), BoardReturn> {
        self.inputs.retain(|&(ch, _, _)| ch != channel);
        self.inputs.push((channel, range_id, coupling));
        Ok(())
    }

    fn set_trigger(
        &mut self,
        source: TriggerSource,
        slope: TriggerSlope,
        level_code: u8,
        delay_samples: u64,
    ) -> Result<(), BoardReturn> {
        self.trigger = Some((source, slope, level_code, delay_samples));
        Ok(())
    }

    fn allocate_buffer(&mut self, bytes: usize) -> Result<BufferHandle, BoardReturn> {
        let live = self.slots.iter().flatten().count();
        if self.max_buffers.is_some_and(|max| live >= max) {
            return Err(BoardReturn::InsufficientResources);
        }
        let samples = bytes / bytes_per_sample(self.bits);
        let slot = Slot {
            data: vec![0; samples],
            state: SlotState::Software,
        };
        let handle = match self.slots.iter().position(Option::is_none) {
            Some(free) => {
                self.slots[free] = Some(slot);
                BufferHandle(free)
            }
            None => {
                self.slots.push(Some(slot));
                BufferHandle(self.slots.len() - 1)
            }
        };
        self.last_allocation = Some(bytes);
        self.stats.allocated += 1;
        Ok(handle)
    }

    fn free_buffer(&mut self, handle: BufferHandle) -> Result<(), BoardReturn> {
        if self.slot_mut(handle)?.state == SlotState::Posted {
            return Err(BoardReturn::AccessDenied);
        }
        self.slots[handle.0] = None;
        self.stats.freed += 1;
        Ok(())
    }

    fn post_buffer(&mut self, handle: BufferHandle) -> Result<(), BoardReturn> {
        let slot = self.slot_mut(handle)?;
        if slot.state == SlotState::Posted {
            return Err(BoardReturn::InvalidBuffer);
        }
        slot.state = SlotState::Posted;
        self.posted.push_back(handle);
        self.stats.posted += 1;
        Ok(())
    }

    fn wait_buffer_complete(
        &mut self,
        handle: BufferHandle,
        timeout: Duration,
    ) -> Result<&[u16], BoardReturn> {
        if !self.capturing {
            return Err(BoardReturn::BufferNotReady);
        }
        if self.posted.front() != Some(&handle) {
            return Err(BoardReturn::InvalidBuffer);
        }
        if self.stall_after.is_some_and(|n| self.filled >= n) {
            thread::sleep(timeout);
            return Err(BoardReturn::WaitTimeout);
        }
        let now = Instant::now();
        if self.ready_at > now {
            let wait = self.ready_at - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Err(BoardReturn::WaitTimeout);
            }
            thread::sleep(wait);
        }

        self.posted.pop_front();
        let index = self.filled;
        self.filled += 1;
        self.ready_at = Instant::now() + self.fill_interval;
        self.stats.waited += 1;

        let slot = self
            .slots
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or(BoardReturn::InvalidBuffer)?;
        (self.fill)(index, &mut slot.data);
        slot.state = SlotState::Filled;
        let outstanding = self.outstanding();
        self.stats.max_outstanding = self.stats.max_outstanding.max(outstanding);

        let truncate = self.truncate;
        let slot = self.slot_mut(handle)?;
        match truncate {
            Some((i, len)) if i == index => Ok(&slot.data[..len.min(slot.data.len())]),
            _ => Ok(&slot.data[..]),
        }
    }

    fn start_capture(&mut self) -> Result<(), BoardReturn> {
        if self.posted.is_empty() {
            return Err(BoardReturn::BufferNotReady);
        }
        self.capturing = true;
        self.ready_at = Instant::now() + self.fill_interval;
        self.stats.starts += 1;
        Ok(())
    }

    fn abort_capture(&mut self) -> Result<(), BoardReturn> {
        self.capturing = false;
        for handle in self.posted.drain(..) {
            if let Some(Some(slot)) = self.slots.get_mut(handle.0) {
                slot.state = SlotState::Software;
            }
        }
        for slot in self.slots.iter_mut().flatten() {
            slot.state = SlotState::Software;
        }
        self.stats.aborts += 1;
        Ok(())
    }
}
