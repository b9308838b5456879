use crate::{BoardReturn, ProducerState, QueueClosed};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcqError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("{operation} is not allowed while the producer is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ProducerState,
    },
    #[error("board could not allocate a {bytes} byte buffer ({code:?})")]
    AllocationFailure { bytes: usize, code: BoardReturn },
    #[error("buffer {buffer} was not filled within {timeout:?}")]
    AcquisitionTimeout { buffer: u64, timeout: Duration },
    #[error("malformed buffer {buffer}: expected {expected} samples, got {actual}")]
    MalformedBuffer {
        buffer: u64,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),
    #[error("board call failed: {0:?}")]
    Board(BoardReturn),
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

impl From<BoardReturn> for AcqError {
    fn from(code: BoardReturn) -> Self {
        AcqError::Board(code)
    }
}
