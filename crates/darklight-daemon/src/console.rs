//! Line-oriented operator console on stdin

use anyhow::Result;
use darklight_core::PresetBand;
use darklight_serial::{Dispatch, Dispatcher, Link};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tracing::{debug, info};

pub const HELP: &str = "\
Commands:
  open | close | halt
  light on|off
  brightness <n>          (0 = maximum)
  up | down
  preset save|recall bb|nb
  heater on|off
  autoheat on|off
  heatclose on|off
  autoon on|off
  disable-light on|off
  stabilize <ms>          (2000-10000)
  status
  help
  quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Open,
    Close,
    Halt,
    Light(bool),
    Brightness(i64),
    Up,
    Down,
    SavePreset(PresetBand),
    RecallPreset(PresetBand),
    Heater(bool),
    AutoHeat(bool),
    HeatOnClose(bool),
    AutoOn(bool),
    DisableLight(bool),
    Stabilize(u32),
    Status,
    Help,
    Quit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown command '{0}', try 'help'")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
}

/// Parse one console line; blank lines yield `None`
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, ParseError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();

    let command = match verb.to_lowercase().as_str() {
        "open" => ConsoleCommand::Open,
        "close" => ConsoleCommand::Close,
        "halt" => ConsoleCommand::Halt,
        "light" => ConsoleCommand::Light(switch(arg, "light on|off")?),
        "brightness" => {
            let value = arg
                .and_then(|a| a.parse().ok())
                .ok_or(ParseError::Usage("brightness <n>"))?;
            ConsoleCommand::Brightness(value)
        }
        "up" => ConsoleCommand::Up,
        "down" => ConsoleCommand::Down,
        "preset" => {
            const USAGE: &str = "preset save|recall bb|nb";
            let band = match words.next() {
                Some("bb") => PresetBand::Broadband,
                Some("nb") => PresetBand::Narrowband,
                _ => return Err(ParseError::Usage(USAGE)),
            };
            match arg {
                Some("save") => ConsoleCommand::SavePreset(band),
                Some("recall") => ConsoleCommand::RecallPreset(band),
                _ => return Err(ParseError::Usage(USAGE)),
            }
        }
        "heater" => ConsoleCommand::Heater(switch(arg, "heater on|off")?),
        "autoheat" => ConsoleCommand::AutoHeat(switch(arg, "autoheat on|off")?),
        "heatclose" => ConsoleCommand::HeatOnClose(switch(arg, "heatclose on|off")?),
        "autoon" => ConsoleCommand::AutoOn(switch(arg, "autoon on|off")?),
        "disable-light" => ConsoleCommand::DisableLight(switch(arg, "disable-light on|off")?),
        "stabilize" => {
            let ms = arg
                .and_then(|a| a.parse().ok())
                .ok_or(ParseError::Usage("stabilize <ms>"))?;
            ConsoleCommand::Stabilize(ms)
        }
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn switch(arg: Option<&str>, usage: &'static str) -> Result<bool, ParseError> {
    match arg {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        _ => Err(ParseError::Usage(usage)),
    }
}

fn describe(dispatch: Dispatch, sent: &str, skipped: &str) -> String {
    match dispatch {
        Dispatch::Sent => sent.to_string(),
        Dispatch::Skipped => skipped.to_string(),
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

/// Run a command and describe the result for the operator
pub async fn execute<S: Link>(dispatcher: &Dispatcher<S>, command: ConsoleCommand) -> Result<String> {
    debug!(?command, "Console command");
    let message = match command {
        ConsoleCommand::Open => describe(
            dispatcher.open_cover().await?,
            "Opening cover",
            "Cover already open or moving",
        ),
        ConsoleCommand::Close => describe(
            dispatcher.close_cover().await?,
            "Closing cover",
            "Cover already closed or moving",
        ),
        ConsoleCommand::Halt => describe(
            dispatcher.halt_cover().await?,
            "Halting cover",
            "Cover is not moving",
        ),
        ConsoleCommand::Light(true) => describe(
            dispatcher.turn_light_on().await?,
            "Light on",
            "Light already on",
        ),
        ConsoleCommand::Light(false) => describe(
            dispatcher.turn_light_off().await?,
            "Light off",
            "Light already off",
        ),
        ConsoleCommand::Brightness(value) => {
            let sent = dispatcher.set_brightness(value).await?;
            format!("Brightness set to {sent}")
        }
        ConsoleCommand::Up => {
            let sent = dispatcher.adjust_brightness(1).await?;
            format!("Brightness set to {sent}")
        }
        ConsoleCommand::Down => {
            let sent = dispatcher.adjust_brightness(-1).await?;
            format!("Brightness set to {sent}")
        }
        ConsoleCommand::SavePreset(band) => {
            dispatcher.save_preset(band).await?;
            format!("Saved {band} preset")
        }
        ConsoleCommand::RecallPreset(band) => {
            let sent = dispatcher.recall_preset(band).await?;
            format!("Recalled {band} preset, brightness {sent}")
        }
        ConsoleCommand::Heater(true) => describe(
            dispatcher.turn_heater_on().await?,
            "Heater on",
            "Heater already on",
        ),
        ConsoleCommand::Heater(false) => describe(
            dispatcher.turn_heater_off().await?,
            "Heater off",
            "Heater already off",
        ),
        ConsoleCommand::AutoHeat(enabled) => {
            dispatcher.set_auto_heat(enabled).await?;
            format!("Auto heat {}", on_off(enabled))
        }
        ConsoleCommand::HeatOnClose(enabled) => {
            dispatcher.set_heat_on_close(enabled).await?;
            format!("Heat on close {}", on_off(enabled))
        }
        ConsoleCommand::AutoOn(enabled) => {
            dispatcher.set_auto_on(enabled).await?;
            format!("Auto-on {}", on_off(enabled))
        }
        ConsoleCommand::DisableLight(disabled) => {
            dispatcher.set_light_disabled(disabled).await;
            format!("Disable light while open {}", on_off(disabled))
        }
        ConsoleCommand::Stabilize(ms) => {
            dispatcher.set_stabilize_time(ms).await?;
            format!("Stabilize time set to {ms} ms")
        }
        ConsoleCommand::Status => serde_json::to_string_pretty(&dispatcher.snapshot())?,
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Quit => String::new(),
    };
    Ok(message)
}

/// Read commands from `input` until `quit` or until `shutdown` fires.
///
/// End of input only stops reading; the caller keeps polling until
/// interrupted. A command that has started always runs to completion.
pub async fn run<S, R>(
    dispatcher: &Dispatcher<S>,
    input: R,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    S: Link,
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut input_open = true;
    println!("{HELP}");

    loop {
        let line = tokio::select! {
            line = lines.next_line(), if input_open => line?,
            _ = shutdown.changed() => break,
        };
        let Some(line) = line else {
            info!("Console input closed, polling until interrupted");
            input_open = false;
            continue;
        };

        match parse(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Quit)) => break,
            Ok(Some(command)) => match execute(dispatcher, command).await {
                Ok(message) => println!("{message}"),
                Err(e) => println!("Error: {e}"),
            },
            Err(e) => println!("{e}"),
        }
    }
    Ok(())
}
