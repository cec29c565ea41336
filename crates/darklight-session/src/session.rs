//! Connection lifecycle
//!
//! A session validates the link, pulls the initial device state, pushes the
//! configured preferences and then owns the background poller. All state is
//! discarded on disconnect.

use std::sync::Arc;
use std::time::Duration;

use darklight_core::{DeviceSnapshot, RangeError};
use darklight_serial::dispatch::STABILIZE_TIME_MS;
use darklight_serial::{CommandError, Dispatcher, Link, Transport};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::poller::Poller;

/// Preferences applied to the device at connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub stabilize_time_ms: u32,
    pub auto_on: bool,
    /// Refuse to light the panel unless the cover is closed
    pub disable_light: bool,
    pub auto_heat: bool,
    pub heat_on_close: bool,
    pub poll_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stabilize_time_ms: 2000,
            auto_on: false,
            disable_light: true,
            auto_heat: false,
            heat_on_close: false,
            poll_interval_ms: 1000,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.auto_heat && self.heat_on_close {
            return Err(ConnectError::ConflictingHeatModes);
        }
        if !STABILIZE_TIME_MS.contains(&self.stabilize_time_ms) {
            return Err(RangeError::StabilizeTime {
                value: self.stabilize_time_ms,
                min: *STABILIZE_TIME_MS.start(),
                max: *STABILIZE_TIME_MS.end(),
            }
            .into());
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Auto heat and heat on close cannot both be enabled")]
    ConflictingHeatModes,
    #[error("Invalid session configuration: {0}")]
    Config(#[from] RangeError),
    #[error("Handshake failed: {0}")]
    Handshake(#[source] CommandError),
}

pub struct Session<S> {
    dispatcher: Arc<Dispatcher<S>>,
    config: SessionConfig,
    poller: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl<S: Link> Session<S> {
    /// Handshake and initialise the device.
    ///
    /// Only a failed handshake aborts; later steps are logged and skipped.
    pub async fn connect(transport: Transport<S>, config: SessionConfig) -> Result<Self, ConnectError> {
        config.validate()?;

        let dispatcher = Arc::new(Dispatcher::new(transport));
        info!(port = %dispatcher.transport().label(), "Connecting");
        dispatcher.handshake().await.map_err(|e| {
            warn!(error = %e, "Failed to send handshake command. Check baud rate");
            ConnectError::Handshake(e)
        })?;
        info!("Handshake successful");

        let session = Self {
            dispatcher,
            config,
            poller: None,
        };
        session.initialise().await;
        Ok(session)
    }

    async fn initialise(&self) {
        let dispatcher = &self.dispatcher;
        let config = &self.config;

        // Presence of each subsystem decides the rest of the sequence
        logged("cover state", dispatcher.get_cover_state().await);
        logged("calibrator state", dispatcher.get_calibrator_state().await);

        if dispatcher.with_model(|m| m.calibrator_present()).await {
            logged(
                "stabilize time",
                dispatcher.set_stabilize_time(config.stabilize_time_ms).await,
            );
            logged("auto-on", dispatcher.set_auto_on(config.auto_on).await);
            dispatcher.set_light_disabled(config.disable_light).await;
            logged("max brightness", dispatcher.get_max_brightness().await);
            // Current level is only meaningful while lit
            if dispatcher.with_model(|m| m.light_is_lit()).await {
                logged("brightness", dispatcher.get_brightness().await);
            }
        } else {
            debug!("No calibrator present, skipping light setup");
        }

        logged("heater state", dispatcher.get_heater_state().await);
        if dispatcher.with_model(|m| m.heater_present()).await {
            // Heat modes are exclusive; auto heat wins
            if config.auto_heat {
                logged("auto heat", dispatcher.set_auto_heat(true).await);
            } else if config.heat_on_close {
                logged("heat on close", dispatcher.set_heat_on_close(true).await);
            }
        }

        let snapshot = dispatcher.snapshot();
        info!(
            cover = ?snapshot.cover,
            calibrator = ?snapshot.calibrator,
            heater = ?snapshot.heater,
            max_brightness = snapshot.brightness.max(),
            "Device initialised"
        );
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<S>> {
        &self.dispatcher
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceSnapshot> {
        self.dispatcher.subscribe()
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_some()
    }

    /// Spawn the background poller; no-op if it is already running
    pub fn start_polling(&mut self) {
        if self.poller.is_some() {
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller = Poller::new(self.dispatcher.clone(), self.config.poll_interval());
        let handle = tokio::spawn(poller.run(shutdown_rx));
        self.poller = Some((shutdown_tx, handle));
    }

    /// Stop the poller after its current cycle completes
    pub async fn stop_polling(&mut self) {
        if let Some((shutdown, handle)) = self.poller.take() {
            let _ = shutdown.send(true);
            if let Err(e) = handle.await {
                warn!(error = %e, "Poller task ended abnormally");
            }
        }
    }

    /// Stop polling and discard all device state
    pub async fn disconnect(mut self) {
        self.stop_polling().await;
        self.dispatcher.reset().await;
        info!("Disconnected");
    }
}

fn logged<T>(step: &str, result: Result<T, CommandError>) -> Option<T> {
    result
        .inspect_err(|e| warn!(step = step, error = %e, "Connect step failed"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.stabilize_time_ms, 2000);
        assert!(config.disable_light);
        assert!(!config.auto_on);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_conflicting_heat_modes_rejected() {
        let config = SessionConfig {
            auto_heat: true,
            heat_on_close: true,
            ..SessionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConnectError::ConflictingHeatModes)
        ));
    }

    #[test]
    fn test_stabilize_time_validated() {
        let config = SessionConfig {
            stabilize_time_ms: 500,
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConnectError::Config(_))));
    }
}
