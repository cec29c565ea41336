//! Exclusive, retrying transport over a byte stream
//!
//! One transaction writes a framed command and reads back a single
//! `>`-terminated response. Each attempt runs the small state machine below;
//! a timeout or read error restarts the attempt from a clean input buffer
//! until the command's attempt budget is spent. A failed write is never
//! retried.
//!
//! ```text
//!   Write ──Written──▶ AwaitReadable ──Readable──▶ Read ──FrameComplete──▶ done
//!     │                    │                         │
//!  WriteFailed      TimedOut/ReadFailed       TimedOut/ReadFailed
//!     ▼                    ▼                         ▼
//!   abort               retry                      retry
//! ```

use futures_util::FutureExt;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::command::Command;

/// Longest inbound frame accepted before giving up on the attempt
pub const MAX_FRAME_LEN: usize = 64;

/// Inter-byte timeout once a response has started arriving
pub const DEFAULT_BYTE_TIMEOUT: Duration = Duration::from_secs(1);

/// Any byte stream the transport can drive
pub trait Link: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Link for T {}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Serial port {path} unavailable: {source}")]
    Unavailable {
        path: String,
        #[source]
        source: tokio_serial::Error,
    },
    #[error("Serial write failed: {0}")]
    Write(#[source] io::Error),
    #[error("No response after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Write,
    AwaitReadable,
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Written,
    WriteFailed,
    Readable,
    TimedOut,
    ReadFailed,
    FrameComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Enter(Phase),
    Retry,
    Complete,
    Abort,
}

/// Per-attempt transition table
pub fn transition(phase: Phase, event: Event) -> Transition {
    match (phase, event) {
        (Phase::Write, Event::Written) => Transition::Enter(Phase::AwaitReadable),
        (Phase::Write, Event::WriteFailed) => Transition::Abort,
        (Phase::AwaitReadable, Event::Readable) => Transition::Enter(Phase::Read),
        (Phase::AwaitReadable, Event::TimedOut | Event::ReadFailed) => Transition::Retry,
        (Phase::Read, Event::FrameComplete) => Transition::Complete,
        (Phase::Read, Event::TimedOut | Event::ReadFailed) => Transition::Retry,
        _ => Transition::Abort,
    }
}

/// Serial transport with exclusive access
pub struct Transport<S> {
    link: Mutex<S>,
    label: String,
    byte_timeout: Duration,
}

impl<S: Link> Transport<S> {
    pub fn new(link: S) -> Self {
        Self {
            link: Mutex::new(link),
            label: "serial".to_string(),
            byte_timeout: DEFAULT_BYTE_TIMEOUT,
        }
    }

    /// Name used in log output (usually the port path)
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_byte_timeout(mut self, byte_timeout: Duration) -> Self {
        self.byte_timeout = byte_timeout;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run one command/response transaction and return the response payload.
    ///
    /// Blocks while another transaction holds the line.
    pub async fn send(&self, command: &Command) -> Result<String, TransportError> {
        let mut link = self.link.lock().await;
        let frame = command.frame();

        let mut attempt = 1;
        let mut phase = Phase::Write;
        let mut pending = Vec::with_capacity(MAX_FRAME_LEN);
        let mut write_error = None;

        // Leftovers from an earlier exchange would be taken as this reply
        discard_stale_input(&mut *link);

        loop {
            let event = match phase {
                Phase::Write => {
                    trace!(port = %self.label, command = %command, attempt, "Sending command");
                    match write_frame(&mut *link, &frame).await {
                        Ok(()) => Event::Written,
                        Err(e) => {
                            error!(port = %self.label, command = %command, error = %e, "Serial write error");
                            write_error = Some(e);
                            Event::WriteFailed
                        }
                    }
                }
                Phase::AwaitReadable => {
                    self.await_readable(&mut *link, command, &mut pending).await
                }
                Phase::Read => self.read_frame(&mut *link, command, &mut pending).await,
            };

            match transition(phase, event) {
                Transition::Enter(next) => phase = next,
                Transition::Complete => {
                    let payload = payload_of(&pending);
                    debug!(port = %self.label, command = %command, payload = %payload, "Response received");
                    return Ok(payload);
                }
                Transition::Retry => {
                    // Give up once the attempt budget is spent
                    if attempt >= command.max_attempts() {
                        error!(
                            port = %self.label,
                            command = %command,
                            attempts = attempt,
                            "Maximum retry attempts reached"
                        );
                        return Err(TransportError::RetriesExhausted { attempts: attempt });
                    }
                    attempt += 1;
                    // Resend from a clean slate
                    pending.clear();
                    discard_stale_input(&mut *link);
                    phase = Phase::Write;
                }
                // Write errors are not retried
                Transition::Abort => {
                    let e = write_error.take().unwrap_or_else(|| {
                        io::Error::other(format!("unexpected {event:?} during {phase:?}"))
                    });
                    return Err(TransportError::Write(e));
                }
            }
        }
    }

    async fn await_readable(&self, link: &mut S, command: &Command, pending: &mut Vec<u8>) -> Event {
        let mut chunk = [0u8; MAX_FRAME_LEN];
        match timeout(command.timeout(), link.read(&mut chunk)).await {
            Err(_) => {
                warn!(port = %self.label, command = %command, "Serial read timed out");
                Event::TimedOut
            }
            Ok(Ok(0)) => {
                warn!(port = %self.label, command = %command, "Serial line closed");
                Event::ReadFailed
            }
            Ok(Ok(n)) => {
                pending.extend_from_slice(&chunk[..n]);
                Event::Readable
            }
            Ok(Err(e)) => {
                warn!(port = %self.label, command = %command, error = %e, "Serial read error");
                Event::ReadFailed
            }
        }
    }

    async fn read_frame(&self, link: &mut S, command: &Command, pending: &mut Vec<u8>) -> Event {
        let mut chunk = [0u8; MAX_FRAME_LEN];
        loop {
            let end = pending.iter().position(|&b| b == command.terminator());
            if let Some(end) = end.filter(|&end| end < MAX_FRAME_LEN) {
                pending.truncate(end + 1);
                return Event::FrameComplete;
            }
            if end.is_some() || pending.len() >= MAX_FRAME_LEN {
                warn!(port = %self.label, len = pending.len(), "Response exceeds frame limit");
                return Event::ReadFailed;
            }
            match timeout(self.byte_timeout, link.read(&mut chunk)).await {
                Err(_) => {
                    warn!(port = %self.label, command = %command, "Response stalled before terminator");
                    return Event::TimedOut;
                }
                Ok(Ok(0)) => {
                    warn!(port = %self.label, command = %command, "Serial line closed mid-frame");
                    return Event::ReadFailed;
                }
                Ok(Ok(n)) => pending.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => {
                    warn!(port = %self.label, command = %command, error = %e, "Serial read error");
                    return Event::ReadFailed;
                }
            }
        }
    }
}

async fn write_frame<S: Link>(link: &mut S, frame: &[u8]) -> io::Result<()> {
    link.write_all(frame).await?;
    link.flush().await
}

/// Drop whatever is already buffered without waiting for more
fn discard_stale_input<S: Link>(link: &mut S) {
    let mut buf = [0u8; MAX_FRAME_LEN];
    let mut discarded = 0;
    while let Some(Ok(n)) = link.read(&mut buf).now_or_never() {
        if n == 0 {
            break;
        }
        discarded += n;
    }
    if discarded > 0 {
        debug!(bytes = discarded, "Discarded stale input");
    }
}

/// Strip the leading marker byte and the terminator
fn payload_of(frame: &[u8]) -> String {
    if frame.len() < 2 {
        return String::new();
    }
    String::from_utf8_lossy(&frame[1..frame.len() - 1]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        assert_eq!(
            transition(Phase::Write, Event::Written),
            Transition::Enter(Phase::AwaitReadable)
        );
        assert_eq!(transition(Phase::Write, Event::WriteFailed), Transition::Abort);
        assert_eq!(
            transition(Phase::AwaitReadable, Event::Readable),
            Transition::Enter(Phase::Read)
        );
        assert_eq!(transition(Phase::AwaitReadable, Event::TimedOut), Transition::Retry);
        assert_eq!(transition(Phase::AwaitReadable, Event::ReadFailed), Transition::Retry);
        assert_eq!(transition(Phase::Read, Event::FrameComplete), Transition::Complete);
        assert_eq!(transition(Phase::Read, Event::ReadFailed), Transition::Retry);
        assert_eq!(transition(Phase::Read, Event::TimedOut), Transition::Retry);
    }

    #[test]
    fn test_unexpected_events_abort() {
        assert_eq!(transition(Phase::Write, Event::Readable), Transition::Abort);
        assert_eq!(transition(Phase::AwaitReadable, Event::Written), Transition::Abort);
        assert_eq!(transition(Phase::Read, Event::Written), Transition::Abort);
    }

    #[test]
    fn test_payload_of() {
        assert_eq!(payload_of(b"<1>"), "1");
        assert_eq!(payload_of(b"<255>"), "255");
        assert_eq!(payload_of(b"<>"), "");
        assert_eq!(payload_of(b">"), "");
    }

    #[tokio::test]
    async fn test_response_split_across_reads() {
        let (client, mut device) = tokio::io::duplex(64);
        let transport = Transport::new(client);

        let device_task = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            let n = device.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"<B>");
            device.write_all(b"<1").await.unwrap();
            tokio::task::yield_now().await;
            device.write_all(b"28>junk").await.unwrap();
            device
        });

        let payload = transport.send(&Command::new("B")).await.unwrap();
        assert_eq!(payload, "128");
        device_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_input_is_discarded() {
        let (client, mut device) = tokio::io::duplex(64);
        device.write_all(b"<9>").await.unwrap();
        let transport = Transport::new(client);

        let device_task = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            let n = device.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"<P>");
            device.write_all(b"<3>").await.unwrap();
            device
        });

        let payload = transport.send(&Command::new("P")).await.unwrap();
        assert_eq!(payload, "3");
        device_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_failure_is_not_retried() {
        let (client, device) = tokio::io::duplex(64);
        drop(device);
        let transport = Transport::new(client);

        let result = transport.send(&Command::new("O")).await;
        assert!(matches!(result, Err(TransportError::Write(_))));
    }
}
