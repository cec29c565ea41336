//! Response payload decoders

use darklight_core::{CalibratorState, CoverState, HeaterState};
use thiserror::Error;

use crate::command::codes;

/// Expected reply to the handshake command
pub const HANDSHAKE_REPLY: char = '?';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty response to {code}")]
    Empty { code: String },
    #[error("Unexpected multi-character response to {code}: {payload:?}")]
    Oversized { code: String, payload: String },
    #[error("Non-numeric response to {code}: {payload:?}")]
    NotNumeric { code: String, payload: String },
    #[error("Invalid status code {value} in response to {code}")]
    InvalidCode { code: String, value: u8 },
    #[error("Brightness value {value} out of range 0..={max}")]
    OutOfRange { value: u32, max: u32 },
    #[error("Invalid handshake response, expected '?' but received {payload:?}")]
    Handshake { payload: String },
}

/// A status reply is exactly one ASCII digit
pub fn status_digit(code: &str, payload: &str) -> Result<u8, ProtocolError> {
    let mut chars = payload.chars();
    let first = chars.next().ok_or_else(|| ProtocolError::Empty {
        code: code.to_string(),
    })?;
    if chars.next().is_some() {
        return Err(ProtocolError::Oversized {
            code: code.to_string(),
            payload: payload.to_string(),
        });
    }
    first
        .to_digit(10)
        .map(|d| d as u8)
        .ok_or_else(|| ProtocolError::NotNumeric {
            code: code.to_string(),
            payload: payload.to_string(),
        })
}

pub fn cover_state(payload: &str) -> Result<CoverState, ProtocolError> {
    let value = status_digit(codes::COVER_STATE, payload)?;
    CoverState::from_code(value).ok_or_else(|| invalid(codes::COVER_STATE, value))
}

pub fn calibrator_state(payload: &str) -> Result<CalibratorState, ProtocolError> {
    let value = status_digit(codes::CALIBRATOR_STATE, payload)?;
    CalibratorState::from_code(value).ok_or_else(|| invalid(codes::CALIBRATOR_STATE, value))
}

pub fn heater_state(payload: &str) -> Result<HeaterState, ProtocolError> {
    let value = status_digit(codes::HEATER_STATE, payload)?;
    HeaterState::from_code(value).ok_or_else(|| invalid(codes::HEATER_STATE, value))
}

/// Decimal integer reply (brightness, max brightness, presets)
pub fn number(code: &str, payload: &str) -> Result<u32, ProtocolError> {
    if payload.is_empty() {
        return Err(ProtocolError::Empty {
            code: code.to_string(),
        });
    }
    if !payload.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::NotNumeric {
            code: code.to_string(),
            payload: payload.to_string(),
        });
    }
    payload.parse().map_err(|_| ProtocolError::Oversized {
        code: code.to_string(),
        payload: payload.to_string(),
    })
}

/// The reply must be exactly `?`; anything longer means a garbled line
pub fn handshake(payload: &str) -> Result<(), ProtocolError> {
    let mut chars = payload.chars();
    if chars.next() == Some(HANDSHAKE_REPLY) && chars.next().is_none() {
        Ok(())
    } else {
        Err(ProtocolError::Handshake {
            payload: payload.to_string(),
        })
    }
}

fn invalid(code: &str, value: u8) -> ProtocolError {
    ProtocolError::InvalidCode {
        code: code.to_string(),
        value,
    }
}
