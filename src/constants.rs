//! Protocol limits and defaults.

/// Maximum PDU size per the Modbus application protocol (253 bytes).
pub const MAX_PDU_SIZE: usize = 253;

/// MBAP header length (transaction id + protocol id + length + unit id).
pub const MBAP_HEADER_LEN: usize = 7;

/// Maximum value the MBAP length field may carry (unit id + 253-byte PDU).
pub const MAX_MBAP_LENGTH: u16 = 254;

/// Smallest complete TCP frame: MBAP header plus a one-byte function code.
pub const MIN_TCP_FRAME_LEN: usize = MBAP_HEADER_LEN + 1;

/// Maximum coils per read request (0x01/0x02): 2000 bits = 250 data bytes.
pub const MAX_READ_COILS: u16 = 2000;

/// Maximum registers per read request (0x03/0x04): 125 * 2 = 250 data bytes.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum coils per 0x0F write: 1968 bits = 246 data bytes, keeping the
/// request PDU within 253 bytes alongside its 6-byte fixed part.
pub const MAX_WRITE_COILS: usize = 1968;

/// Maximum registers per 0x10 write: 123 * 2 = 246 data bytes.
pub const MAX_WRITE_REGISTERS: usize = 123;

/// Standard Modbus TCP port.
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Default response timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default TCP connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Default interval between reconnect attempts in milliseconds.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5000;
