//! DarkLight Core - Device state model for the DarkLight cover calibrator
//!
//! This crate provides the types shared by the serial link and the session:
//! - Cover, calibrator and heater states with their wire status codes
//! - Brightness bounds and the session flags derived from user commands
//! - The device model that folds acknowledged commands and readings together

pub mod model;
pub mod state;

pub use model::{CoverCommand, DeviceModel, DeviceSnapshot, Outcome};
pub use state::{
    Brightness, CalibratorState, CoverState, HeaterMode, HeaterState, PresetBand, RangeError,
    SessionFlags,
};
