pub mod board;
pub mod buffer;
pub mod calibration;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod producer;
pub mod queue;
pub mod sim;
pub mod sink;
pub mod utils;
pub mod worker;
#[cfg(feature = "hdf5")]
pub mod writer;

pub use board::*;
pub use buffer::*;
pub use calibration::*;
pub use config::*;
pub use error::*;
pub use pipeline::*;
pub use producer::*;
pub use queue::*;
pub use sim::*;
pub use sink::*;
pub use utils::*;
pub use worker::*;
#[cfg(feature = "hdf5")]
pub use writer::*;
