//! Bounded hand-off queues with cooperative cancellation.
//!
//! Both pipeline stages talk through [`QueueSender`]/[`QueueReceiver`] pairs
//! built on bounded crossbeam channels. A blocking `push` is the
//! back-pressure primitive; a blocking `pop` is how workers idle. Either one
//! returns [`QueueClosed`] as soon as the shared [`StopSignal`] is raised or
//! the other end of the queue has gone away.

use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueClosed {
    #[error("queue operation interrupted by stop signal")]
    Stopped,
    #[error("queue peer disconnected")]
    Disconnected,
}

/// Shared stop flag that also wakes every blocked queue operation.
///
/// Raising drops the only sender of a zero-capacity channel, so each
/// `select!` waiting on the paired receiver becomes ready at once.
#[derive(Clone, Debug)]
pub struct StopSignal {
    raised: Arc<AtomicBool>,
    trip: Arc<Mutex<Option<Sender<()>>>>,
    tripped: Receiver<()>,
}

impl Default for StopSignal {
    fn default() -> Self {
        let (trip, tripped) = bounded(0);
        StopSignal {
            raised: Arc::new(AtomicBool::new(false)),
            trip: Arc::new(Mutex::new(Some(trip))),
            tripped,
        }
    }
}

impl StopSignal {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        match self.trip.lock() {
            Ok(mut trip) => drop(trip.take()),
            Err(poisoned) => drop(poisoned.into_inner().take()),
        }
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

pub struct QueueSender<T> {
    tx: Sender<T>,
    stop: StopSignal,
}

pub struct QueueReceiver<T> {
    rx: Receiver<T>,
    stop: StopSignal,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            stop: self.stop.clone(),
        }
    }
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            stop: self.stop.clone(),
        }
    }
}

/// Create a bounded queue holding at most `capacity` items, cancelled by `stop`.
pub fn bounded_queue<T>(capacity: usize, stop: &StopSignal) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = bounded(capacity);
    (
        QueueSender {
            tx,
            stop: stop.clone(),
        },
        QueueReceiver {
            rx,
            stop: stop.clone(),
        },
    )
}

impl<T> QueueSender<T> {
    /// Push `item`, blocking while the queue is full.
    pub fn push(&self, item: T) -> Result<(), QueueClosed> {
        if self.stop.is_raised() {
            return Err(QueueClosed::Stopped);
        }
        select! {
            send(self.tx, item) -> res => res.map_err(|_| QueueClosed::Disconnected),
            recv(self.stop.tripped) -> _ => Err(QueueClosed::Stopped),
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<T> QueueReceiver<T> {
    /// Pop the oldest item, blocking while the queue is empty.
    pub fn pop(&self) -> Result<T, QueueClosed> {
        if self.stop.is_raised() {
            return Err(QueueClosed::Stopped);
        }
        select! {
            recv(self.rx) -> item => item.map_err(|_| QueueClosed::Disconnected),
            recv(self.stop.tripped) -> _ => Err(QueueClosed::Stopped),
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
