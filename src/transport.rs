//! Transport abstraction: how a byte stream to the device is established.
//!
//! The engine is generic over [`Transport`]; TCP and serial RTU are the two
//! provided implementations. A transport only knows how to open its stream,
//! so reconnection policy and framing stay in the engine.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::constants::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_TCP_PORT};
use crate::error::{ModbusError, ModbusResult};

/// Something that can open a fresh byte stream to the device.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a new stream. Called on every connect and reconnect attempt.
    async fn connect(&self) -> ModbusResult<Self::Stream>;

    /// Human-readable endpoint description for logs.
    fn describe(&self) -> String;
}

/// TCP transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    pub host: String,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    /// Connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

impl TcpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

/// Connects over TCP with a bounded connect timeout and Nagle disabled.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    pub fn new(config: TcpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn connect(&self) -> ModbusResult<Self::Stream> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        debug!("Connecting to {addr}");
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                ModbusError::connection(format!("Connect to {addr} timed out after {timeout:?}"))
            })?
            .map_err(|e| ModbusError::connection(format!("Connect to {addr} failed: {e}")))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn describe(&self) -> String {
        format!("tcp://{}:{}", self.config.host, self.config.port)
    }
}

/// Serial line configuration.
#[cfg(feature = "rtu")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub path: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// `None`, `Even` or `Odd`.
    #[serde(default = "default_parity")]
    pub parity: String,
}

#[cfg(feature = "rtu")]
fn default_baud_rate() -> u32 {
    9600
}

#[cfg(feature = "rtu")]
fn default_data_bits() -> u8 {
    8
}

#[cfg(feature = "rtu")]
fn default_stop_bits() -> u8 {
    1
}

#[cfg(feature = "rtu")]
fn default_parity() -> String {
    "None".to_string()
}

#[cfg(feature = "rtu")]
impl SerialConfig {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: default_parity(),
        }
    }
}

/// Opens a serial port for RTU traffic.
#[cfg(feature = "rtu")]
#[derive(Debug, Clone)]
pub struct SerialTransport {
    config: SerialConfig,
}

#[cfg(feature = "rtu")]
impl SerialTransport {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }
}

#[cfg(feature = "rtu")]
#[async_trait]
impl Transport for SerialTransport {
    type Stream = tokio_serial::SerialStream;

    async fn connect(&self) -> ModbusResult<Self::Stream> {
        use tokio_serial::SerialPortBuilderExt;

        let data_bits = match self.config.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            8 => tokio_serial::DataBits::Eight,
            other => {
                return Err(ModbusError::config(format!("Invalid data bits: {other}")));
            }
        };
        let stop_bits = match self.config.stop_bits {
            1 => tokio_serial::StopBits::One,
            2 => tokio_serial::StopBits::Two,
            other => {
                return Err(ModbusError::config(format!("Invalid stop bits: {other}")));
            }
        };
        let parity = match self.config.parity.as_str() {
            "Even" | "even" => tokio_serial::Parity::Even,
            "Odd" | "odd" => tokio_serial::Parity::Odd,
            _ => tokio_serial::Parity::None,
        };

        debug!(
            "Opening serial port {} at {} baud",
            self.config.path, self.config.baud_rate
        );
        let stream = tokio_serial::new(&self.config.path, self.config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .open_native_async()
            .map_err(|e| {
                ModbusError::connection(format!("Open {} failed: {e}", self.config.path))
            })?;
        Ok(stream)
    }

    fn describe(&self) -> String {
        format!("serial://{}@{}", self.config.path, self.config.baud_rate)
    }
}

/// List serial port device names present on the system.
#[cfg(feature = "rtu")]
pub fn available_ports() -> ModbusResult<Vec<String>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| ModbusError::io(format!("Listing serial ports failed: {e}")))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_config_defaults() {
        let config: TcpConfig = serde_json::from_str(r#"{"host": "10.0.0.5"}"#).unwrap();
        assert_eq!(config.port, DEFAULT_TCP_PORT);
        assert_eq!(config.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
    }

    #[cfg(feature = "rtu")]
    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttyUSB0", 19200);
        assert_eq!(config.data_bits, 8);
        assert_eq!(config.stop_bits, 1);
        assert_eq!(config.parity, "None");
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        // Port 1 on localhost is never listening in the test environment.
        let transport = TcpTransport::new(TcpConfig::new("127.0.0.1", 1));
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, ModbusError::Connection(_)));
    }
}
