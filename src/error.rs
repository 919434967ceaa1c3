//! Error types for the Modbus master engine.
//!
//! Every failure a caller can observe is a [`ModbusError`]. The variants map
//! one-to-one onto the failure classes of the protocol: request validation,
//! transaction capacity, transport, framing/protocol violations, device
//! exception responses, and timeouts.

use std::time::Duration;

use thiserror::Error;

/// Result type for all engine operations.
pub type ModbusResult<T> = std::result::Result<T, ModbusError>;

/// Modbus master errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModbusError {
    /// Malformed request parameters, rejected before any byte is sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// All 65536 transaction ids are in flight.
    #[error("Concurrent transaction limit reached")]
    TransactionLimit,

    /// Operation requires an established connection.
    #[error("No connection")]
    NoConnection,

    /// Serial link already has an outstanding transaction.
    #[error("Transaction already pending on serial link")]
    Busy,

    /// The connection was torn down while the transaction was in flight.
    #[error("Disconnected")]
    Disconnected,

    /// Connecting to the remote endpoint failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transport-level read/write failure.
    #[error("IO error: {0}")]
    Io(String),

    /// Frame or response violates the protocol (mismatched ids, truncated
    /// payload, bad MBAP header).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Serial frame CRC did not match. The byte stream cannot be trusted past
    /// this point; the engine drops its reassembly buffer and the caller
    /// should expect realignment on the next exchange.
    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// The device answered with a Modbus exception response.
    #[error("Modbus exception: {0}")]
    Exception(ExceptionCode),

    /// No response arrived within the configured window.
    #[error("Request timeout ({0:?})")]
    Timeout(Duration),

    /// connect()/reconnect() called in a state that does not permit it.
    #[error("Already connected or reconnecting")]
    AlreadyConnected,

    /// Invalid transport or client configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ModbusError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        ModbusError::InvalidRequest(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        ModbusError::Connection(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        ModbusError::Io(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        ModbusError::Protocol(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        ModbusError::Config(msg.into())
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        ModbusError::Io(err.to_string())
    }
}

/// Canonical Modbus exception codes.
///
/// An exception response carries the request's function code with bit 0x80
/// set and a single-byte exception code. The code set has gaps (0x08 and
/// 0x09 are unassigned); codes outside the table surface as [`Unknown`].
///
/// [`Unknown`]: ExceptionCode::Unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    /// 0x01 - function code not supported by the device.
    IllegalFunction,
    /// 0x02 - address + length combination is out of range for the device.
    IllegalDataAddress,
    /// 0x03 - a value in the request's data field is not allowed.
    IllegalDataValue,
    /// 0x04 - unrecoverable failure while performing the action.
    SlaveDeviceFailure,
    /// 0x05 - request accepted, long-running processing in progress.
    Acknowledge,
    /// 0x06 - device busy with a long-running command.
    SlaveDeviceBusy,
    /// 0x07 - extended file area consistency check failed.
    MemoryParityError,
    /// 0x0A - gateway could not allocate a path to the target.
    GatewayPathUnavailable,
    /// 0x0B - gateway got no response from the target device.
    GatewayTargetFailedToRespond,
    /// Any code outside the canonical table.
    Unknown(u8),
}

impl ExceptionCode {
    /// Map a raw exception byte onto the table.
    pub fn from_u8(code: u8) -> Self {
        match code {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::SlaveDeviceFailure,
            0x05 => ExceptionCode::Acknowledge,
            0x06 => ExceptionCode::SlaveDeviceBusy,
            0x07 => ExceptionCode::MemoryParityError,
            0x0A => ExceptionCode::GatewayPathUnavailable,
            0x0B => ExceptionCode::GatewayTargetFailedToRespond,
            other => ExceptionCode::Unknown(other),
        }
    }

    /// The raw wire code.
    pub fn code(&self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::SlaveDeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::SlaveDeviceBusy => 0x06,
            ExceptionCode::MemoryParityError => 0x07,
            ExceptionCode::GatewayPathUnavailable => 0x0A,
            ExceptionCode::GatewayTargetFailedToRespond => 0x0B,
            ExceptionCode::Unknown(code) => *code,
        }
    }
}

impl std::fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExceptionCode::IllegalFunction => write!(f, "ILLEGAL FUNCTION"),
            ExceptionCode::IllegalDataAddress => write!(f, "ILLEGAL DATA ADDRESS"),
            ExceptionCode::IllegalDataValue => write!(f, "ILLEGAL DATA VALUE"),
            ExceptionCode::SlaveDeviceFailure => write!(f, "SLAVE DEVICE FAILURE"),
            ExceptionCode::Acknowledge => write!(f, "ACKNOWLEDGE"),
            ExceptionCode::SlaveDeviceBusy => write!(f, "SLAVE DEVICE BUSY"),
            ExceptionCode::MemoryParityError => write!(f, "MEMORY PARITY ERROR"),
            ExceptionCode::GatewayPathUnavailable => write!(f, "GATEWAY PATH UNAVAILABLE"),
            ExceptionCode::GatewayTargetFailedToRespond => {
                write!(f, "GATEWAY TARGET DEVICE FAILED TO RESPOND")
            }
            ExceptionCode::Unknown(code) => write!(f, "unknown exception 0x{code:02X}"),
        }
    }
}
