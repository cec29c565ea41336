//! Wire commands and outbound framing

use std::fmt;
use std::time::Duration;

use darklight_core::PresetBand;

/// First byte of every outbound frame
pub const FRAME_START: u8 = b'<';

/// Last byte of every frame, in both directions
pub const FRAME_END: u8 = b'>';

/// How long a single attempt waits for the line to become readable
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempts per transaction, including the first
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Single-character command set understood by the instrument
pub mod codes {
    pub const HANDSHAKE: &str = "Z";

    pub const OPEN: &str = "O";
    pub const CLOSE: &str = "C";
    pub const HALT: &str = "H";
    pub const COVER_STATE: &str = "P";

    pub const LIGHT_OFF: &str = "F";
    pub const SET_BRIGHTNESS: &str = "T";
    pub const BRIGHTNESS: &str = "B";
    pub const MAX_BRIGHTNESS: &str = "M";
    pub const CALIBRATOR_STATE: &str = "L";
    pub const STABILIZE_TIME: &str = "S";
    pub const AUTO_ON_ENABLE: &str = "A";
    pub const AUTO_ON_DISABLE: &str = "a";
    pub const SAVE_PRESET: &str = "D";
    pub const RECALL_PRESET: &str = "G";

    pub const HEATER_STATE: &str = "R";
    pub const HEATER_ON: &str = "W";
    pub const HEATER_OFF: &str = "w";
    pub const AUTO_HEAT_ENABLE: &str = "Q";
    pub const AUTO_HEAT_DISABLE: &str = "q";
    pub const HEAT_ON_CLOSE_ENABLE: &str = "E";
    pub const HEAT_ON_CLOSE_DISABLE: &str = "e";
}

/// One request to the instrument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    code: String,
    arg: Option<u32>,
    terminator: u8,
    timeout: Duration,
    max_attempts: u32,
}

impl Command {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            arg: None,
            terminator: FRAME_END,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Append a decimal argument to the code
    pub fn with_arg(mut self, arg: u32) -> Self {
        self.arg = Some(arg);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn save_preset(band: PresetBand) -> Self {
        Self::new(format!("{}{}", codes::SAVE_PRESET, band.suffix()))
    }

    pub fn recall_preset(band: PresetBand) -> Self {
        Self::new(format!("{}{}", codes::RECALL_PRESET, band.suffix()))
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn arg(&self) -> Option<u32> {
        self.arg
    }

    pub fn terminator(&self) -> u8 {
        self.terminator
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Outbound bytes: `<` code [digits] `>`
    pub fn frame(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", FRAME_START as char, self.code)?;
        if let Some(arg) = self.arg {
            write!(f, "{arg}")?;
        }
        write!(f, "{}", FRAME_END as char)
    }
}
