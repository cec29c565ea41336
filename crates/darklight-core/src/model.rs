//! Device state model
//!
//! The model is the single source of truth for what the instrument last
//! reported and for the session flags derived from user commands. It never
//! talks to the wire itself: callers fold acknowledged or decoded results in
//! through [`DeviceModel::apply`], which keeps the cross-field invariants
//! (exclusive heater modes, brightness bounds) intact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::state::{
    Brightness, CalibratorState, CoverState, HeaterMode, HeaterState, SessionFlags,
};

/// Cover motion commands the device acknowledges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverCommand {
    Open,
    Close,
    Halt,
}

/// A result that changes model state.
///
/// Command variants are only produced after the device acknowledged the
/// command; report variants carry an already decoded device reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    CoverCommanded(CoverCommand),
    LightOff,
    BrightnessCommanded(u32),
    AutoOn(bool),
    AutoHeat(bool),
    HeatOnClose(bool),
    /// Local-only preference, no wire exchange
    LightDisabled(bool),
    CoverReport(CoverState),
    CalibratorReport(CalibratorState),
    HeaterReport(HeaterState),
    BrightnessReport(u32),
    MaxBrightnessReport(u32),
}

/// Serializable copy of the model for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub cover: Option<CoverState>,
    pub calibrator: Option<CalibratorState>,
    pub heater: Option<HeaterState>,
    pub heater_mode: HeaterMode,
    pub brightness: Brightness,
    pub flags: SessionFlags,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DeviceModel {
    cover: Option<CoverState>,
    calibrator: Option<CalibratorState>,
    heater: Option<HeaterState>,
    heater_mode: HeaterMode,
    brightness: Brightness,
    flags: SessionFlags,
    updated_at: DateTime<Utc>,
}

impl Default for DeviceModel {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceModel {
    pub fn new() -> Self {
        Self {
            cover: None,
            calibrator: None,
            heater: None,
            heater_mode: HeaterMode::default(),
            brightness: Brightness::default(),
            flags: SessionFlags::default(),
            updated_at: Utc::now(),
        }
    }

    /// Drop everything learned during the session
    pub fn reset(&mut self) {
        *self = Self::new();
        debug!("Device model reset");
    }

    /// Fold an outcome into the model.
    ///
    /// Returns `false` when the outcome was discarded (a brightness reading
    /// outside `0..=max`); the model is unchanged in that case.
    pub fn apply(&mut self, outcome: Outcome) -> bool {
        match outcome {
            Outcome::CoverCommanded(command) => {
                self.flags.cover_is_moving = true;
                if command == CoverCommand::Close && self.flags.auto_on {
                    self.flags.light_is_ready = false;
                }
            }
            Outcome::LightOff => {
                self.calibrator = Some(CalibratorState::Off);
                self.brightness.set_current(0);
            }
            Outcome::BrightnessCommanded(_) => {
                self.flags.light_is_ready = false;
            }
            Outcome::AutoOn(enabled) => {
                self.flags.auto_on = enabled;
            }
            Outcome::AutoHeat(enabled) => {
                if enabled {
                    if self.flags.heat_on_close {
                        warn!("Heat on close currently enabled, switching modes");
                    }
                    self.flags.heat_on_close = false;
                }
                self.flags.auto_heat_on = enabled;
                self.flags.heat_mode_is_changing = true;
            }
            Outcome::HeatOnClose(enabled) => {
                if enabled {
                    if self.flags.auto_heat_on {
                        warn!("Auto heat currently enabled, switching modes");
                    }
                    self.flags.auto_heat_on = false;
                }
                self.flags.heat_on_close = enabled;
                self.flags.heat_mode_is_changing = true;
            }
            Outcome::LightDisabled(disabled) => {
                self.flags.light_disabled = disabled;
            }
            Outcome::CoverReport(state) => self.apply_cover(state),
            Outcome::CalibratorReport(state) => {
                self.calibrator = Some(state);
                if state == CalibratorState::Ready {
                    self.flags.light_is_ready = true;
                }
            }
            Outcome::HeaterReport(state) => self.apply_heater(state),
            Outcome::BrightnessReport(value) => {
                if !self.brightness.set_current(i64::from(value)) {
                    warn!(
                        value = value,
                        max = self.brightness.max(),
                        "Brightness value out of range, discarded"
                    );
                    return false;
                }
            }
            Outcome::MaxBrightnessReport(max) => {
                self.brightness.set_max(max);
            }
        }
        self.updated_at = Utc::now();
        true
    }

    fn apply_cover(&mut self, state: CoverState) {
        let previous = self.cover.replace(state);
        if state.is_settled() && state.is_present() {
            self.flags.cover_is_moving = false;
        }
        if previous == Some(state) {
            return;
        }
        match state {
            CoverState::Closed => {
                info!("Cover is closed");
                // Intent only: the light is not commanded from here.
                if self.flags.auto_on {
                    info!("Auto-on set, activating light");
                }
            }
            CoverState::Open => info!("Cover is open"),
            CoverState::Unknown => warn!("Cover in unknown state"),
            CoverState::Error => warn!("Cover reported error"),
            CoverState::Moving | CoverState::NotPresent => {}
        }
    }

    fn apply_heater(&mut self, state: HeaterState) {
        self.heater = Some(state);
        self.heater_mode = match state {
            HeaterState::NotPresent => self.heater_mode,
            HeaterState::Off | HeaterState::Error => HeaterMode::Off,
            HeaterState::Auto => HeaterMode::Auto,
            HeaterState::On => HeaterMode::On,
            HeaterState::Set => HeaterMode::OnClose,
            HeaterState::Unknown if self.flags.auto_heat_on => HeaterMode::Auto,
            HeaterState::Unknown if self.flags.heat_on_close => HeaterMode::OnClose,
            HeaterState::Unknown => HeaterMode::On,
        };
        if state == HeaterState::Off {
            self.flags.heat_mode_is_changing = false;
        }
    }

    pub fn cover_state(&self) -> Option<CoverState> {
        self.cover
    }

    pub fn calibrator_state(&self) -> Option<CalibratorState> {
        self.calibrator
    }

    pub fn heater_state(&self) -> Option<HeaterState> {
        self.heater
    }

    pub fn heater_mode(&self) -> HeaterMode {
        self.heater_mode
    }

    pub fn brightness(&self) -> Brightness {
        self.brightness
    }

    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    /// Unobserved subsystems count as present until the device says otherwise
    pub fn cover_present(&self) -> bool {
        self.cover.map_or(true, CoverState::is_present)
    }

    pub fn calibrator_present(&self) -> bool {
        self.calibrator.map_or(true, CalibratorState::is_present)
    }

    pub fn heater_present(&self) -> bool {
        self.heater.map_or(true, HeaterState::is_present)
    }

    pub fn light_is_lit(&self) -> bool {
        self.calibrator.is_some_and(CalibratorState::is_lit)
    }

    /// Whether the panel may be switched on given the cover interlock
    pub fn light_permitted(&self) -> bool {
        !self.flags.light_disabled || self.cover == Some(CoverState::Closed)
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            cover: self.cover,
            calibrator: self.calibrator,
            heater: self.heater,
            heater_mode: self.heater_mode,
            brightness: self.brightness,
            flags: self.flags,
            updated_at: self.updated_at,
        }
    }
}
