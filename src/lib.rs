//! Async Modbus master for TCP and serial RTU links.
//!
//! The crate is built around three layers:
//!
//! - **Codec**: [`Pdu`], the [`frame`] encoders/decoders and the
//!   [`crc`] checksum turn typed requests into wire bytes and back.
//! - **Engine**: [`ModbusEngine`] owns one connection, matches responses to
//!   requests through a [transaction table](transaction::TransactionTable),
//!   enforces per-request timeouts and recovers lost links.
//! - **Client**: [`ModbusTcpClient`] and [`ModbusSerialClient`] expose one
//!   typed method per supported function code.
//!
//! # Features
//!
//! - `rtu` (default): serial RTU support via `tokio-serial`.
//!
//! # Quick start
//!
//! ```no_run
//! use modbus_master::{ModbusTcpClient, RequestOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ModbusTcpClient::tcp("192.168.1.10", 502);
//!     client.connect().await?;
//!
//!     let registers = client
//!         .read_holding_registers(0x0000, 10, RequestOptions::default())
//!         .await?;
//!     println!("registers: {registers:?}");
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod connection;
pub mod constants;
pub mod crc;
pub mod error;
pub mod frame;
pub mod function;
pub mod pdu;
pub mod transaction;
pub mod transport;

pub use client::{ModbusClient, ModbusTcpClient};
#[cfg(feature = "rtu")]
pub use client::ModbusSerialClient;
pub use connection::{ConnectionEvent, ConnectionState, ModbusEngine};
pub use constants::{DEFAULT_RECONNECT_INTERVAL_MS, DEFAULT_TCP_PORT, DEFAULT_TIMEOUT_MS};
pub use error::{ExceptionCode, ModbusError, ModbusResult};
pub use frame::{MbapHeader, RtuFrame, RtuFrameDecoder, TcpFrame, TcpFrameDecoder};
pub use function::{
    FunctionCode, Request, RequestKind, RequestOptions, Response, ResponseValue,
};
pub use pdu::Pdu;
pub use transaction::TransactionMode;
#[cfg(feature = "rtu")]
pub use transport::{available_ports, SerialConfig, SerialTransport};
pub use transport::{TcpConfig, TcpTransport, Transport};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
