//! DarkLight Serial - Wire protocol for the DarkLight cover calibrator
//!
//! This crate owns everything that touches the serial line:
//! - Command framing and the single-letter command set
//! - An exclusive transport with per-attempt timeouts and bounded retries
//! - Response decoding into typed device states
//! - The dispatcher, which guards, sends and folds each semantic operation
//! - A simulated instrument for running without hardware

pub mod command;
pub mod decode;
pub mod dispatch;
pub mod serial;
pub mod sim;
pub mod transport;

pub use command::{codes, Command};
pub use decode::ProtocolError;
pub use dispatch::{CommandError, Dispatch, Dispatcher};
pub use serial::{open_serial, open_transport, DEFAULT_BAUD_RATE};
pub use sim::{SimConfig, SimulatedDevice};
pub use transport::{Link, Transport, TransportError};
