//! Subsystem states, brightness bounds and session flags

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lowest brightness a lit panel can be commanded to
pub const MIN_LIT_BRIGHTNESS: u32 = 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("Brightness {value} outside 1..={max}")]
    Brightness { value: i64, max: u32 },
    #[error("Stabilize time {value}ms outside {min}..={max}ms")]
    StabilizeTime { value: u32, min: u32, max: u32 },
}

/// Dust cover position as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverState {
    NotPresent,
    Closed,
    Moving,
    Open,
    Unknown,
    Error,
}

impl CoverState {
    /// Map a wire status digit (0..=5)
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::NotPresent),
            1 => Some(Self::Closed),
            2 => Some(Self::Moving),
            3 => Some(Self::Open),
            4 => Some(Self::Unknown),
            5 => Some(Self::Error),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Every state except `Moving` needs no further polling
    pub fn is_settled(self) -> bool {
        self != Self::Moving
    }

    pub fn is_present(self) -> bool {
        self != Self::NotPresent
    }
}

impl fmt::Display for CoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotPresent => "Not Present",
            Self::Closed => "Closed",
            Self::Moving => "Moving",
            Self::Open => "Open",
            Self::Unknown => "Unknown",
            Self::Error => "Error",
        };
        f.write_str(text)
    }
}

/// Flat-field panel state as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibratorState {
    NotPresent,
    Off,
    NotReady,
    Ready,
    Unknown,
    Error,
}

impl CalibratorState {
    /// Map a wire status digit (0..=5)
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::NotPresent),
            1 => Some(Self::Off),
            2 => Some(Self::NotReady),
            3 => Some(Self::Ready),
            4 => Some(Self::Unknown),
            5 => Some(Self::Error),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Codes 2..=5 are shown as "light on"
    pub fn is_lit(self) -> bool {
        !matches!(self, Self::NotPresent | Self::Off)
    }

    pub fn is_present(self) -> bool {
        self != Self::NotPresent
    }
}

impl fmt::Display for CalibratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotPresent => "Not Present",
            Self::Off => "Off",
            Self::NotReady => "Not Ready",
            Self::Ready => "Ready",
            Self::Unknown => "Unknown",
            Self::Error => "Error",
        };
        f.write_str(text)
    }
}

/// Dew heater state as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaterState {
    NotPresent,
    Off,
    Auto,
    On,
    Unknown,
    Error,
    /// Armed to heat once the cover closes
    Set,
}

impl HeaterState {
    /// Map a wire status digit (0..=6)
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::NotPresent),
            1 => Some(Self::Off),
            2 => Some(Self::Auto),
            3 => Some(Self::On),
            4 => Some(Self::Unknown),
            5 => Some(Self::Error),
            6 => Some(Self::Set),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_present(self) -> bool {
        self != Self::NotPresent
    }
}

impl fmt::Display for HeaterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotPresent => "Not Present",
            Self::Off => "Off",
            Self::Auto => "Auto",
            Self::On => "On",
            Self::Unknown => "Unknown",
            Self::Error => "Error",
            Self::Set => "Set",
        };
        f.write_str(text)
    }
}

/// Heater target selected on the device, derived from heater state reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaterMode {
    #[default]
    Off,
    On,
    Auto,
    OnClose,
}

/// Device-stored brightness preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetBand {
    Broadband,
    Narrowband,
}

impl PresetBand {
    /// Suffix appended to the save/recall command letter
    pub fn suffix(self) -> char {
        match self {
            Self::Broadband => 'B',
            Self::Narrowband => 'N',
        }
    }
}

impl fmt::Display for PresetBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broadband => f.write_str("broadband"),
            Self::Narrowband => f.write_str("narrowband"),
        }
    }
}

/// Panel brightness; `current` never exceeds `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Brightness {
    current: u32,
    max: u32,
}

impl Brightness {
    pub fn new(current: u32, max: u32) -> Self {
        Self {
            current: current.min(max),
            max,
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn contains(&self, value: i64) -> bool {
        value >= 0 && value <= i64::from(self.max)
    }

    /// Resolve a requested level into the value to transmit.
    ///
    /// `0` stands for "use max"; anything else must lie in `1..=max`.
    pub fn resolve_target(&self, requested: i64) -> Result<u32, RangeError> {
        let value = if requested == 0 {
            i64::from(self.max)
        } else {
            requested
        };
        if value >= i64::from(MIN_LIT_BRIGHTNESS) && value <= i64::from(self.max) {
            Ok(value as u32)
        } else {
            Err(RangeError::Brightness {
                value: requested,
                max: self.max,
            })
        }
    }

    /// Store a reading; returns false (no change) when out of bounds
    pub fn set_current(&mut self, value: i64) -> bool {
        if !self.contains(value) {
            return false;
        }
        self.current = value as u32;
        true
    }

    pub fn set_max(&mut self, max: u32) {
        self.max = max;
        self.current = self.current.min(max);
    }
}

/// Process-scoped flags, reset on disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFlags {
    pub cover_is_moving: bool,
    pub light_is_ready: bool,
    pub auto_on: bool,
    pub auto_heat_on: bool,
    pub heat_on_close: bool,
    pub light_disabled: bool,
    pub heat_mode_is_changing: bool,
}

impl Default for SessionFlags {
    fn default() -> Self {
        Self {
            cover_is_moving: false,
            light_is_ready: true,
            auto_on: false,
            auto_heat_on: false,
            heat_on_close: false,
            light_disabled: false,
            heat_mode_is_changing: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cover_codes() {
        let expected = [
            CoverState::NotPresent,
            CoverState::Closed,
            CoverState::Moving,
            CoverState::Open,
            CoverState::Unknown,
            CoverState::Error,
        ];
        for (code, state) in expected.iter().enumerate() {
            assert_eq!(CoverState::from_code(code as u8), Some(*state));
            assert_eq!(state.code(), code as u8);
        }
        assert_eq!(CoverState::from_code(6), None);
        assert_eq!(CoverState::from_code(9), None);
    }

    #[test]
    fn test_only_moving_is_unsettled() {
        assert!(!CoverState::Moving.is_settled());
        assert!(CoverState::Closed.is_settled());
        assert!(CoverState::Error.is_settled());
    }

    #[test]
    fn test_calibrator_lit() {
        assert!(!CalibratorState::NotPresent.is_lit());
        assert!(!CalibratorState::Off.is_lit());
        for code in 2..=5 {
            assert!(CalibratorState::from_code(code).unwrap().is_lit());
        }
    }

    #[test]
    fn test_heater_codes() {
        assert_eq!(HeaterState::from_code(6), Some(HeaterState::Set));
        assert_eq!(HeaterState::from_code(7), None);
        assert_eq!(HeaterState::Auto.code(), 2);
    }

    #[test]
    fn test_resolve_target() {
        let b = Brightness::new(0, 255);
        assert_eq!(b.resolve_target(0), Ok(255));
        assert_eq!(b.resolve_target(1), Ok(1));
        assert_eq!(b.resolve_target(255), Ok(255));
        assert!(b.resolve_target(256).is_err());
        assert!(b.resolve_target(-1).is_err());
    }

    #[test]
    fn test_resolve_target_without_max() {
        let b = Brightness::default();
        assert!(b.resolve_target(0).is_err());
    }

    #[test]
    fn test_set_current_bounds() {
        let mut b = Brightness::new(10, 100);
        assert!(!b.set_current(101));
        assert_eq!(b.current(), 10);
        assert!(b.set_current(0));
        assert_eq!(b.current(), 0);
    }

    #[test]
    fn test_set_max_clamps_current() {
        let mut b = Brightness::new(200, 255);
        b.set_max(100);
        assert_eq!(b.current(), 100);
    }

    #[test]
    fn test_default_flags() {
        let flags = SessionFlags::default();
        assert!(flags.light_is_ready);
        assert!(!flags.cover_is_moving);
        assert!(!flags.light_disabled);
    }
}
