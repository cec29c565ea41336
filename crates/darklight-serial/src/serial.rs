//! Physical serial port access

use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::info;

use crate::transport::{Transport, TransportError};

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Open `path` as 8N1 without flow control
pub fn open_serial(path: &str, baud_rate: u32) -> Result<SerialStream, TransportError> {
    let port = tokio_serial::new(path, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
        .map_err(|source| TransportError::Unavailable {
            path: path.to_string(),
            source,
        })?;
    info!(port = path, baud = baud_rate, "Serial port opened");
    Ok(port)
}

/// Open a port and wrap it in a transport labelled with its path
pub fn open_transport(path: &str, baud_rate: u32) -> Result<Transport<SerialStream>, TransportError> {
    open_serial(path, baud_rate).map(|port| Transport::new(port).with_label(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_port_is_unavailable() {
        let result = open_serial("/dev/darklight-does-not-exist", DEFAULT_BAUD_RATE);
        match result {
            Err(TransportError::Unavailable { path, .. }) => {
                assert_eq!(path, "/dev/darklight-does-not-exist")
            }
            other => panic!("expected Unavailable, got {:?}", other.map(|_| ())),
        }
    }
}
