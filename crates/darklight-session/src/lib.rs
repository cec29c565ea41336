//! DarkLight Session - Connection lifecycle for the DarkLight cover calibrator
//!
//! This crate ties the serial dispatcher to a running instrument:
//! - Handshake and initial state refresh at connect
//! - Pushing session preferences to the device
//! - Selective background polling of unsettled state
//! - Deterministic reset on disconnect

pub mod poller;
pub mod session;

pub use poller::{poll_once, PollPlan, Poller};
pub use session::{ConnectError, Session, SessionConfig};
