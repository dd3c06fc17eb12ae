//! Serial transport for the controller link.
//!
//! The link only needs a byte stream. Anything implementing
//! `AsyncRead + AsyncWrite + Unpin + Send` works:
//! - `tokio_serial::SerialStream` (real hardware, `serial` feature)
//! - `tokio::io::DuplexStream` (tests)
//!
//! # Feature Flag
//!
//! Opening a real port requires the `serial` feature (enabled by default). Without it,
//! [`open_port`] returns [`DaqError::SerialFeatureDisabled`] and callers can still
//! attach any stream they open themselves.

use crate::config::LinkConfig;
use crate::error::{AppResult, DaqError};
use tokio::io::{AsyncRead, AsyncWrite};

/// Trait alias for async serial port I/O.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Type-erased write half handed to the command rendezvous.
pub type DynWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!("Failed to open serial port: {port_path_owned}"))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

/// Open the port named in `link`.
#[cfg(feature = "serial")]
pub async fn open_port(link: &LinkConfig) -> AppResult<DynSerial> {
    if link.port.is_empty() {
        return Err(DaqError::Configuration("link.port is not set".into()));
    }
    let stream = open_serial_async(&link.port, link.baud_rate)
        .await
        .map_err(|e| DaqError::Transport(format!("{e:#}")))?;
    tracing::info!(port = %link.port, baud = link.baud_rate, "Serial port opened");
    Ok(Box::new(stream))
}

/// Always fails: serial support was compiled out.
#[cfg(not(feature = "serial"))]
pub async fn open_port(_link: &LinkConfig) -> AppResult<DynSerial> {
    Err(DaqError::SerialFeatureDisabled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn duplex_is_a_serial_port() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut port: DynSerial = Box::new(device);

        host.write_all(b"READY...\n").await.unwrap();
        let mut buf = [0u8; 9];
        port.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"READY...\n");
    }

    #[tokio::test]
    async fn empty_port_name_is_rejected() {
        let result = open_port(&LinkConfig::default()).await;
        assert!(result.is_err());
    }
}
