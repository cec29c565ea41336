//! Semantic operations on the instrument
//!
//! Each operation holds the model lock for its guard check, its wire
//! exchange and the fold of the result, so a poll-driven correction can never
//! interleave with a user-driven update. Local flags change only after the
//! device acknowledged the command.

use std::ops::RangeInclusive;

use darklight_core::{
    CalibratorState, CoverCommand, CoverState, DeviceModel, DeviceSnapshot, HeaterState, Outcome,
    PresetBand, RangeError,
};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::command::{codes, Command};
use crate::decode::{self, ProtocolError};
use crate::transport::{Link, Transport, TransportError};

/// Accepted stabilize times in milliseconds
pub const STABILIZE_TIME_MS: RangeInclusive<u32> = 2000..=10000;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error("Light is disabled while the cover is not closed")]
    LightDisabled,
    #[error("Light must be on")]
    LightNotOn,
}

/// Whether a guarded command reached the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Sent,
    /// Device already in the requested state; nothing transmitted
    Skipped,
}

pub struct Dispatcher<S> {
    transport: Transport<S>,
    model: Mutex<DeviceModel>,
    snapshots: watch::Sender<DeviceSnapshot>,
}

impl<S: Link> Dispatcher<S> {
    pub fn new(transport: Transport<S>) -> Self {
        let model = DeviceModel::new();
        let (snapshots, _) = watch::channel(model.snapshot());
        Self {
            transport,
            model: Mutex::new(model),
            snapshots,
        }
    }

    pub fn transport(&self) -> &Transport<S> {
        &self.transport
    }

    /// Latest published state, without waiting on the model lock
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receive a new snapshot after every state change
    pub fn subscribe(&self) -> watch::Receiver<DeviceSnapshot> {
        self.snapshots.subscribe()
    }

    /// Run a read-only query against the model
    pub async fn with_model<R>(&self, f: impl FnOnce(&DeviceModel) -> R) -> R {
        let model = self.model.lock().await;
        f(&model)
    }

    /// Discard all session state
    pub async fn reset(&self) {
        let mut model = self.model.lock().await;
        model.reset();
        self.snapshots.send_replace(model.snapshot());
    }

    /// Validate the link; the device answers `?`
    pub async fn handshake(&self) -> Result<(), CommandError> {
        debug!("Sending handshake command");
        let payload = self.exchange(&Command::new(codes::HANDSHAKE)).await?;
        decode::handshake(&payload)?;
        Ok(())
    }

    // ----- cover -----

    pub async fn open_cover(&self) -> Result<Dispatch, CommandError> {
        let mut model = self.model.lock().await;
        if matches!(model.cover_state(), Some(CoverState::Open | CoverState::Moving)) {
            debug!("Cover already open or moving");
            return Ok(Dispatch::Skipped);
        }
        info!("Opening cover");
        self.exchange(&Command::new(codes::OPEN))
            .await
            .inspect_err(|e| warn!(error = %e, "Open command failed"))?;
        self.commit(&mut model, Outcome::CoverCommanded(CoverCommand::Open));

        // A lit panel may react to the cover opening
        if model
            .calibrator_state()
            .is_some_and(|s| s.is_present() && s != CalibratorState::Off)
        {
            if let Err(e) = self.read_calibrator(&mut model).await {
                warn!(error = %e, "Calibrator refresh after open failed");
            }
            if let Err(e) = self.read_brightness(&mut model).await {
                warn!(error = %e, "Brightness refresh after open failed");
            }
        }
        Ok(Dispatch::Sent)
    }

    pub async fn close_cover(&self) -> Result<Dispatch, CommandError> {
        let mut model = self.model.lock().await;
        if matches!(model.cover_state(), Some(CoverState::Closed | CoverState::Moving)) {
            debug!("Cover already closed or moving");
            return Ok(Dispatch::Skipped);
        }
        info!("Closing cover");
        self.exchange(&Command::new(codes::CLOSE))
            .await
            .inspect_err(|e| warn!(error = %e, "Close command failed"))?;
        self.commit(&mut model, Outcome::CoverCommanded(CoverCommand::Close));
        Ok(Dispatch::Sent)
    }

    /// Only meaningful while the cover reports Moving
    pub async fn halt_cover(&self) -> Result<Dispatch, CommandError> {
        let mut model = self.model.lock().await;
        if model.cover_state() != Some(CoverState::Moving) {
            debug!("Cover not moving, halt ignored");
            return Ok(Dispatch::Skipped);
        }
        info!("Halting cover");
        self.exchange(&Command::new(codes::HALT))
            .await
            .inspect_err(|e| warn!(error = %e, "Halt command failed"))?;
        self.commit(&mut model, Outcome::CoverCommanded(CoverCommand::Halt));
        Ok(Dispatch::Sent)
    }

    pub async fn get_cover_state(&self) -> Result<CoverState, CommandError> {
        let mut model = self.model.lock().await;
        self.read_cover(&mut model).await
    }

    // ----- calibrator -----

    /// Switch the panel on at full brightness
    pub async fn turn_light_on(&self) -> Result<Dispatch, CommandError> {
        let mut model = self.model.lock().await;
        if !model.light_permitted() {
            warn!("Light is set to disabled while cover is open");
            return Err(CommandError::LightDisabled);
        }
        // Not yet observed is treated as off
        if !matches!(model.calibrator_state(), None | Some(CalibratorState::Off)) {
            debug!("Light already on");
            return Ok(Dispatch::Skipped);
        }
        info!("Turning light on");
        self.write_brightness(&mut model, 0).await?;
        Ok(Dispatch::Sent)
    }

    pub async fn turn_light_off(&self) -> Result<Dispatch, CommandError> {
        let mut model = self.model.lock().await;
        if model.calibrator_state() == Some(CalibratorState::Off) {
            debug!("Light already off");
            return Ok(Dispatch::Skipped);
        }
        info!("Turning light off");
        self.exchange(&Command::new(codes::LIGHT_OFF))
            .await
            .inspect_err(|e| warn!(error = %e, "Turn light off command failed"))?;
        self.commit(&mut model, Outcome::LightOff);
        Ok(Dispatch::Sent)
    }

    /// Command a brightness level; `0` means maximum. Returns the value sent.
    pub async fn set_brightness(&self, value: i64) -> Result<u32, CommandError> {
        let mut model = self.model.lock().await;
        if !model.light_permitted() {
            warn!("Light disabled while cover is open");
            return Err(CommandError::LightDisabled);
        }
        info!(value = value, "Setting brightness");
        self.write_brightness(&mut model, value).await
    }

    /// Step the lit panel up or down, staying within `1..=max`
    pub async fn adjust_brightness(&self, delta: i32) -> Result<u32, CommandError> {
        let mut model = self.model.lock().await;
        if !model.light_is_lit() {
            warn!("Must turn light on to adjust brightness");
            return Err(CommandError::LightNotOn);
        }
        let target = i64::from(model.brightness().current()) + i64::from(delta);
        // Zero would mean maximum; the upper bound is checked on write
        if target < 1 {
            return Err(RangeError::Brightness {
                value: target,
                max: model.brightness().max(),
            }
            .into());
        }
        self.write_brightness(&mut model, target).await
    }

    pub async fn get_brightness(&self) -> Result<u32, CommandError> {
        let mut model = self.model.lock().await;
        self.read_brightness(&mut model).await
    }

    pub async fn get_max_brightness(&self) -> Result<u32, CommandError> {
        let mut model = self.model.lock().await;
        debug!("Getting max brightness");
        let payload = self.exchange(&Command::new(codes::MAX_BRIGHTNESS)).await?;
        let max = decode::number(codes::MAX_BRIGHTNESS, &payload)?;
        self.commit(&mut model, Outcome::MaxBrightnessReport(max));
        Ok(max)
    }

    pub async fn get_calibrator_state(&self) -> Result<CalibratorState, CommandError> {
        let mut model = self.model.lock().await;
        self.read_calibrator(&mut model).await
    }

    pub async fn set_auto_on(&self, enabled: bool) -> Result<(), CommandError> {
        let mut model = self.model.lock().await;
        let code = if enabled {
            codes::AUTO_ON_ENABLE
        } else {
            codes::AUTO_ON_DISABLE
        };
        debug!(enabled = enabled, "Setting auto-on");
        self.exchange(&Command::new(code))
            .await
            .inspect_err(|e| warn!(enabled = enabled, error = %e, "Auto-on command failed"))?;
        self.commit(&mut model, Outcome::AutoOn(enabled));
        Ok(())
    }

    /// Local interlock only; nothing is sent to the device
    pub async fn set_light_disabled(&self, disabled: bool) {
        let mut model = self.model.lock().await;
        debug!(disabled = disabled, "Setting light disabled");
        self.commit(&mut model, Outcome::LightDisabled(disabled));
    }

    pub async fn set_stabilize_time(&self, millis: u32) -> Result<(), CommandError> {
        if !STABILIZE_TIME_MS.contains(&millis) {
            return Err(RangeError::StabilizeTime {
                value: millis,
                min: *STABILIZE_TIME_MS.start(),
                max: *STABILIZE_TIME_MS.end(),
            }
            .into());
        }
        let _model = self.model.lock().await;
        debug!(millis = millis, "Setting stabilize time");
        self.exchange(&Command::new(codes::STABILIZE_TIME).with_arg(millis))
            .await
            .inspect_err(|e| warn!(error = %e, "Stabilize time command failed"))?;
        Ok(())
    }

    pub async fn save_preset(&self, band: PresetBand) -> Result<(), CommandError> {
        let _model = self.lit_model().await?;
        info!(band = %band, "Saving preset brightness");
        self.exchange(&Command::save_preset(band))
            .await
            .inspect_err(|e| warn!(band = %band, error = %e, "Save preset command failed"))?;
        Ok(())
    }

    /// Fetch a stored preset and apply it as a second, separate transaction
    pub async fn recall_preset(&self, band: PresetBand) -> Result<u32, CommandError> {
        let value = {
            let _model = self.lit_model().await?;
            info!(band = %band, "Setting brightness to preset value");
            let command = Command::recall_preset(band);
            let payload = self
                .exchange(&command)
                .await
                .inspect_err(|e| warn!(band = %band, error = %e, "Recall preset command failed"))?;
            decode::number(command.code(), &payload)?
        };
        self.set_brightness(i64::from(value)).await
    }

    // ----- heater -----

    pub async fn get_heater_state(&self) -> Result<HeaterState, CommandError> {
        let mut model = self.model.lock().await;
        self.read_heater(&mut model).await
    }

    pub async fn turn_heater_on(&self) -> Result<Dispatch, CommandError> {
        let mut model = self.model.lock().await;
        // A faulted heater is left alone
        if matches!(model.heater_state(), Some(HeaterState::On | HeaterState::Error)) {
            debug!("Heater already on or faulted");
            return Ok(Dispatch::Skipped);
        }
        info!("Turning heater on");
        self.exchange(&Command::new(codes::HEATER_ON))
            .await
            .inspect_err(|e| warn!(error = %e, "Set heater on command failed"))?;
        if let Err(e) = self.read_heater(&mut model).await {
            warn!(error = %e, "Heater state refresh failed");
        }
        Ok(Dispatch::Sent)
    }

    /// Error is never taken as already off
    pub async fn turn_heater_off(&self) -> Result<Dispatch, CommandError> {
        let mut model = self.model.lock().await;
        if model.heater_state() == Some(HeaterState::Off) {
            debug!("Heater already off");
            return Ok(Dispatch::Skipped);
        }
        info!("Turning heater off");
        self.exchange(&Command::new(codes::HEATER_OFF))
            .await
            .inspect_err(|e| warn!(error = %e, "Set heater off command failed"))?;
        if let Err(e) = self.read_heater(&mut model).await {
            warn!(error = %e, "Heater state refresh failed");
        }
        Ok(Dispatch::Sent)
    }

    /// Enabling auto heat also drops heat-on-close
    pub async fn set_auto_heat(&self, enabled: bool) -> Result<(), CommandError> {
        let mut model = self.model.lock().await;
        let code = if enabled {
            codes::AUTO_HEAT_ENABLE
        } else {
            codes::AUTO_HEAT_DISABLE
        };
        debug!(enabled = enabled, "Setting auto heat");
        self.exchange(&Command::new(code))
            .await
            .inspect_err(|e| warn!(enabled = enabled, error = %e, "Auto heat command failed"))?;
        // Model only changes once the device acknowledged
        self.commit(&mut model, Outcome::AutoHeat(enabled));
        if enabled {
            info!("Auto control of heating enabled");
        }
        Ok(())
    }

    /// Enabling heat-on-close also drops auto heat
    pub async fn set_heat_on_close(&self, enabled: bool) -> Result<(), CommandError> {
        let mut model = self.model.lock().await;
        let code = if enabled {
            codes::HEAT_ON_CLOSE_ENABLE
        } else {
            codes::HEAT_ON_CLOSE_DISABLE
        };
        debug!(enabled = enabled, "Setting heat on close");
        self.exchange(&Command::new(code))
            .await
            .inspect_err(|e| warn!(enabled = enabled, error = %e, "Heat on close command failed"))?;
        self.commit(&mut model, Outcome::HeatOnClose(enabled));
        if enabled {
            info!("Heater set to turn on after cover closes");
        }
        Ok(())
    }

    // ----- internals -----

    async fn exchange(&self, command: &Command) -> Result<String, CommandError> {
        Ok(self.transport.send(command).await?)
    }

    fn commit(&self, model: &mut DeviceModel, outcome: Outcome) -> bool {
        let accepted = model.apply(outcome);
        if accepted {
            self.snapshots.send_replace(model.snapshot());
        }
        accepted
    }

    async fn lit_model(&self) -> Result<tokio::sync::MutexGuard<'_, DeviceModel>, CommandError> {
        let model = self.model.lock().await;
        if !model.light_is_lit() {
            warn!("Must turn light on first");
            return Err(CommandError::LightNotOn);
        }
        Ok(model)
    }

    async fn write_brightness(&self, model: &mut DeviceModel, requested: i64) -> Result<u32, CommandError> {
        let value = model.brightness().resolve_target(requested)?;
        self.exchange(&Command::new(codes::SET_BRIGHTNESS).with_arg(value))
            .await
            .inspect_err(|e| warn!(value = value, error = %e, "Set brightness command failed"))?;
        self.commit(model, Outcome::BrightnessCommanded(value));
        Ok(value)
    }

    async fn read_cover(&self, model: &mut DeviceModel) -> Result<CoverState, CommandError> {
        debug!("Get cover state");
        let state = self
            .read_status(codes::COVER_STATE, decode::cover_state)
            .await?;
        self.commit(model, Outcome::CoverReport(state));
        Ok(state)
    }

    async fn read_calibrator(&self, model: &mut DeviceModel) -> Result<CalibratorState, CommandError> {
        debug!("Get calibrator state");
        let state = self
            .read_status(codes::CALIBRATOR_STATE, decode::calibrator_state)
            .await?;
        self.commit(model, Outcome::CalibratorReport(state));
        Ok(state)
    }

    async fn read_heater(&self, model: &mut DeviceModel) -> Result<HeaterState, CommandError> {
        debug!("Get heater state");
        let state = self
            .read_status(codes::HEATER_STATE, decode::heater_state)
            .await?;
        self.commit(model, Outcome::HeaterReport(state));
        Ok(state)
    }

    async fn read_brightness(&self, model: &mut DeviceModel) -> Result<u32, CommandError> {
        debug!("Getting brightness");
        let payload = self.exchange(&Command::new(codes::BRIGHTNESS)).await?;
        let value = decode::number(codes::BRIGHTNESS, &payload)?;
        if !self.commit(model, Outcome::BrightnessReport(value)) {
            return Err(ProtocolError::OutOfRange {
                value,
                max: model.brightness().max(),
            }
            .into());
        }
        Ok(value)
    }

    /// Failures leave the model untouched; callers decide how to report them
    async fn read_status<T>(
        &self,
        code: &str,
        decoder: fn(&str) -> Result<T, ProtocolError>,
    ) -> Result<T, CommandError> {
        let payload = self.exchange(&Command::new(code)).await?;
        Ok(decoder(&payload)?)
    }
}
