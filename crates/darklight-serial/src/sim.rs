//! In-process simulated instrument
//!
//! Speaks the device side of the protocol over a [`tokio::io::DuplexStream`]
//! so the transport, dispatcher and poller can be driven without hardware.
//! Recent frames the host writes are recorded; bytes that arrive outside a
//! well-formed `<...>` frame are recorded separately as framing violations.
//!
//! Cover motion and calibrator warm-up advance per poll, not per wall-clock
//! tick, which keeps tests deterministic under a paused clock.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use darklight_core::{CalibratorState, CoverState, HeaterState};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::{debug, trace};

use crate::command::{codes, FRAME_END, FRAME_START};

const DUPLEX_CAPACITY: usize = 256;
/// Oldest frames are dropped beyond this many
const FRAME_LOG_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub cover_present: bool,
    pub calibrator_present: bool,
    pub heater_present: bool,
    pub max_brightness: u32,
    /// Cover polls answered with Moving before motion completes
    pub travel_polls: u32,
    /// Calibrator polls answered with NotReady after a brightness change
    pub warmup_polls: u32,
    pub initial_cover: CoverState,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            cover_present: true,
            calibrator_present: true,
            heater_present: true,
            max_brightness: 255,
            travel_polls: 2,
            warmup_polls: 2,
            initial_cover: CoverState::Closed,
        }
    }
}

#[derive(Debug)]
struct DeviceState {
    config: SimConfig,
    cover: CoverState,
    motion: Option<(CoverState, u32)>,
    light_on: bool,
    warmup_remaining: u32,
    brightness: u32,
    broadband: u32,
    narrowband: u32,
    heater: HeaterState,
    auto_on: bool,
    auto_heat: bool,
    heat_on_close: bool,
    stabilize_ms: u32,
    frames: VecDeque<String>,
    received: usize,
    violations: Vec<Vec<u8>>,
    ignore_next: u32,
    silent: bool,
    scripted: VecDeque<String>,
}

impl DeviceState {
    fn new(config: SimConfig) -> Self {
        let cover = if config.cover_present {
            config.initial_cover
        } else {
            CoverState::NotPresent
        };
        Self {
            cover,
            motion: None,
            light_on: false,
            warmup_remaining: 0,
            brightness: 0,
            broadband: 0,
            narrowband: 0,
            heater: HeaterState::Off,
            auto_on: false,
            auto_heat: false,
            heat_on_close: false,
            stabilize_ms: 2000,
            frames: VecDeque::new(),
            received: 0,
            violations: Vec::new(),
            ignore_next: 0,
            silent: false,
            scripted: VecDeque::new(),
            config,
        }
    }

    /// Handle one complete frame body; `None` means stay silent
    fn respond(&mut self, body: &str) -> Option<String> {
        self.received += 1;
        if self.frames.len() == FRAME_LOG_CAPACITY {
            self.frames.pop_front();
        }
        self.frames.push_back(body.to_string());

        if self.silent {
            return None;
        }
        if self.ignore_next > 0 {
            self.ignore_next -= 1;
            return None;
        }
        let reply = self.execute(body);
        Some(self.scripted.pop_front().unwrap_or(reply))
    }

    fn execute(&mut self, body: &str) -> String {
        let split = body
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(body.len());
        let (code, arg) = body.split_at(split);
        let arg: Option<u32> = arg.parse().ok();

        match code {
            codes::HANDSHAKE => "?".to_string(),
            codes::COVER_STATE => self.poll_cover().code().to_string(),
            codes::OPEN => self.start_motion(CoverState::Open, code),
            codes::CLOSE => self.start_motion(CoverState::Closed, code),
            codes::HALT => {
                if self.motion.take().is_some() {
                    self.cover = CoverState::Unknown;
                }
                code.to_string()
            }
            codes::CALIBRATOR_STATE => self.poll_calibrator().code().to_string(),
            codes::LIGHT_OFF => {
                self.light_on = false;
                self.brightness = 0;
                code.to_string()
            }
            codes::SET_BRIGHTNESS => {
                let value = arg.unwrap_or(0).min(self.config.max_brightness);
                self.brightness = value;
                self.light_on = value > 0;
                self.warmup_remaining = self.config.warmup_polls;
                code.to_string()
            }
            codes::BRIGHTNESS => self.brightness.to_string(),
            codes::MAX_BRIGHTNESS => self.config.max_brightness.to_string(),
            codes::STABILIZE_TIME => {
                if let Some(ms) = arg {
                    self.stabilize_ms = ms;
                }
                code.to_string()
            }
            codes::AUTO_ON_ENABLE | codes::AUTO_ON_DISABLE => {
                self.auto_on = code == codes::AUTO_ON_ENABLE;
                code.to_string()
            }
            "DB" => {
                self.broadband = self.brightness;
                code.to_string()
            }
            "DN" => {
                self.narrowband = self.brightness;
                code.to_string()
            }
            "GB" => self.broadband.to_string(),
            "GN" => self.narrowband.to_string(),
            codes::HEATER_STATE => self.heater_state().code().to_string(),
            codes::HEATER_ON => {
                self.heater = HeaterState::On;
                code.to_string()
            }
            codes::HEATER_OFF => {
                self.heater = HeaterState::Off;
                code.to_string()
            }
            codes::AUTO_HEAT_ENABLE => {
                self.auto_heat = true;
                self.heat_on_close = false;
                self.heater = HeaterState::Auto;
                code.to_string()
            }
            codes::AUTO_HEAT_DISABLE => {
                self.auto_heat = false;
                self.heater = HeaterState::Off;
                code.to_string()
            }
            codes::HEAT_ON_CLOSE_ENABLE => {
                self.heat_on_close = true;
                self.auto_heat = false;
                self.heater = HeaterState::Set;
                code.to_string()
            }
            codes::HEAT_ON_CLOSE_DISABLE => {
                self.heat_on_close = false;
                self.heater = HeaterState::Off;
                code.to_string()
            }
            _ => "E".to_string(),
        }
    }

    fn start_motion(&mut self, target: CoverState, code: &str) -> String {
        if self.config.cover_present {
            self.motion = Some((target, self.config.travel_polls));
        }
        code.to_string()
    }

    fn poll_cover(&mut self) -> CoverState {
        if let Some((target, remaining)) = self.motion {
            if remaining > 0 {
                self.motion = Some((target, remaining - 1));
                return CoverState::Moving;
            }
            self.motion = None;
            self.cover = target;
        }
        self.cover
    }

    fn poll_calibrator(&mut self) -> CalibratorState {
        if !self.config.calibrator_present {
            return CalibratorState::NotPresent;
        }
        if !self.light_on {
            return CalibratorState::Off;
        }
        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            return CalibratorState::NotReady;
        }
        CalibratorState::Ready
    }

    fn heater_state(&self) -> HeaterState {
        if self.config.heater_present {
            self.heater
        } else {
            HeaterState::NotPresent
        }
    }
}

/// Handle to a running simulated device
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    /// Start the device task and return the host end of the line
    pub fn spawn(config: SimConfig) -> (DuplexStream, Self) {
        let (host, device) = tokio::io::duplex(DUPLEX_CAPACITY);
        let sim = Self {
            state: Arc::new(Mutex::new(DeviceState::new(config))),
        };
        tokio::spawn(sim.clone().serve(device));
        (host, sim)
    }

    async fn serve(self, mut line: DuplexStream) {
        let mut buf = [0u8; 64];
        let mut frame: Option<Vec<u8>> = None;
        let mut stray = Vec::new();

        loop {
            let n = match line.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            trace!(bytes = n, "Simulator received");

            for &byte in &buf[..n] {
                let reply = match byte {
                    FRAME_START => {
                        if let Some(body) = frame.replace(Vec::new()) {
                            let mut broken = vec![FRAME_START];
                            broken.extend(body);
                            self.lock().violations.push(broken);
                        }
                        None
                    }
                    FRAME_END => match frame.take() {
                        Some(body) => self.handle(&body),
                        None => {
                            stray.push(byte);
                            None
                        }
                    },
                    _ => {
                        match frame.as_mut() {
                            Some(body) => body.push(byte),
                            None => stray.push(byte),
                        }
                        None
                    }
                };

                if let Some(reply) = reply {
                    let bytes = format!("{}{reply}{}", FRAME_START as char, FRAME_END as char);
                    if line.write_all(bytes.as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
            if !stray.is_empty() {
                self.lock().violations.push(std::mem::take(&mut stray));
            }
        }
        debug!("Simulated device line closed");
    }

    fn handle(&self, body: &[u8]) -> Option<String> {
        let mut state = self.lock();
        match std::str::from_utf8(body) {
            Ok(text) if is_well_formed(text) => state.respond(text),
            _ => {
                state.violations.push(body.to_vec());
                None
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bodies of the most recent frames received, oldest first
    pub fn frames(&self) -> Vec<String> {
        self.lock().frames.iter().cloned().collect()
    }

    /// Frames received since spawn or the last [`clear_frames`](Self::clear_frames)
    pub fn frame_count(&self) -> usize {
        self.lock().received
    }

    pub fn clear_frames(&self) {
        let mut state = self.lock();
        state.frames.clear();
        state.received = 0;
    }

    /// Byte runs that were not part of a well-formed frame
    pub fn violations(&self) -> Vec<Vec<u8>> {
        self.lock().violations.clone()
    }

    /// Swallow the next `count` frames without answering
    pub fn ignore_next(&self, count: u32) {
        self.lock().ignore_next = count;
    }

    pub fn set_silent(&self, silent: bool) {
        self.lock().silent = silent;
    }

    /// Answer the next frame with `payload` instead of the modelled reply
    pub fn script_reply(&self, payload: impl Into<String>) {
        self.lock().scripted.push_back(payload.into());
    }

    pub fn cover(&self) -> CoverState {
        self.lock().cover
    }

    pub fn brightness(&self) -> u32 {
        self.lock().brightness
    }

    pub fn stabilize_ms(&self) -> u32 {
        self.lock().stabilize_ms
    }

    pub fn auto_on(&self) -> bool {
        self.lock().auto_on
    }

    /// `(auto_heat, heat_on_close)` as stored on the device
    pub fn heat_modes(&self) -> (bool, bool) {
        let state = self.lock();
        (state.auto_heat, state.heat_on_close)
    }

    pub fn set_heater(&self, heater: HeaterState) {
        self.lock().heater = heater;
    }
}

/// One or two command letters followed by optional decimal digits
fn is_well_formed(body: &str) -> bool {
    let letters = body.chars().take_while(|c| c.is_ascii_alphabetic()).count();
    (1..=2).contains(&letters) && body[letters..].bytes().all(|b| b.is_ascii_digit())
}
