//! Function code registry, request building and response decoding.
//!
//! Everything that maps typed operations onto PDU bytes lives here: the
//! closed set of supported function codes, per-function request validation
//! and encoding, and the response parsers that turn payload bytes back into
//! typed values.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{MAX_WRITE_COILS, MAX_WRITE_REGISTERS};
use crate::error::{ExceptionCode, ModbusError, ModbusResult};
use crate::pdu::Pdu;

/// Supported Modbus function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    /// Look up a raw function code. Codes outside the registry return `None`.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(FunctionCode::ReadCoils),
            0x02 => Some(FunctionCode::ReadDiscreteInputs),
            0x03 => Some(FunctionCode::ReadHoldingRegisters),
            0x04 => Some(FunctionCode::ReadInputRegisters),
            0x05 => Some(FunctionCode::WriteSingleCoil),
            0x06 => Some(FunctionCode::WriteSingleRegister),
            0x0F => Some(FunctionCode::WriteMultipleCoils),
            0x10 => Some(FunctionCode::WriteMultipleRegisters),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// True for the four read functions.
    pub fn is_read(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::ReadHoldingRegisters
                | FunctionCode::ReadInputRegisters
        )
    }

    pub fn description(self) -> &'static str {
        match self {
            FunctionCode::ReadCoils => "Read Coils",
            FunctionCode::ReadDiscreteInputs => "Read Discrete Inputs",
            FunctionCode::ReadHoldingRegisters => "Read Holding Registers",
            FunctionCode::ReadInputRegisters => "Read Input Registers",
            FunctionCode::WriteSingleCoil => "Write Single Coil",
            FunctionCode::WriteSingleRegister => "Write Single Register",
            FunctionCode::WriteMultipleCoils => "Write Multiple Coils",
            FunctionCode::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }
}

impl std::fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), self.to_u8())
    }
}

/// Per-request options.
///
/// `timeout_secs` is expressed in whole seconds; `unsigned` switches register
/// decoding from signed 16-bit (the default) to unsigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Target unit identifier.
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    /// Response timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Decode registers as unsigned 16-bit values.
    #[serde(default)]
    pub unsigned: bool,
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            unit_id: default_unit_id(),
            timeout_secs: default_timeout_secs(),
            unsigned: false,
        }
    }
}

impl RequestOptions {
    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_unsigned(mut self, unsigned: bool) -> Self {
        self.unsigned = unsigned;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// The function-specific part of a request.
#[derive(Debug, Clone)]
pub enum RequestKind {
    /// Read `quantity` items starting at the request address.
    Read { quantity: u16 },
    /// Force a single coil on or off.
    WriteCoil(bool),
    /// Write one holding register.
    WriteRegister(u16),
    /// Write a contiguous block of coils.
    WriteCoils(Vec<bool>),
    /// Write a contiguous block of registers.
    WriteRegisters(Vec<u16>),
}

/// A validated request, ready for encoding.
#[derive(Debug, Clone)]
pub struct Request {
    pub function: FunctionCode,
    pub address: u16,
    pub kind: RequestKind,
    pub options: RequestOptions,
}

impl Request {
    /// Build a request, rejecting parameter combinations the protocol cannot
    /// express before anything touches the wire.
    pub fn new(
        function: FunctionCode,
        address: u16,
        kind: RequestKind,
        options: RequestOptions,
    ) -> ModbusResult<Self> {
        match (&function, &kind) {
            (fc, RequestKind::Read { quantity }) if fc.is_read() => {
                if *quantity == 0 {
                    return Err(ModbusError::invalid_request("Read quantity must be > 0"));
                }
            }
            (FunctionCode::WriteSingleCoil, RequestKind::WriteCoil(_)) => {}
            (FunctionCode::WriteSingleRegister, RequestKind::WriteRegister(_)) => {}
            (FunctionCode::WriteMultipleCoils, RequestKind::WriteCoils(values)) => {
                if values.is_empty() {
                    return Err(ModbusError::invalid_request("Coil block must not be empty"));
                }
                if values.len() > MAX_WRITE_COILS {
                    return Err(ModbusError::invalid_request(format!(
                        "Too many coils: {} (max {})",
                        values.len(),
                        MAX_WRITE_COILS
                    )));
                }
            }
            (FunctionCode::WriteMultipleRegisters, RequestKind::WriteRegisters(values)) => {
                if values.is_empty() {
                    return Err(ModbusError::invalid_request(
                        "Register block must not be empty",
                    ));
                }
                if values.len() > MAX_WRITE_REGISTERS {
                    return Err(ModbusError::invalid_request(format!(
                        "Too many registers: {} (max {})",
                        values.len(),
                        MAX_WRITE_REGISTERS
                    )));
                }
            }
            _ => {
                return Err(ModbusError::invalid_request(format!(
                    "Payload does not match function {function}"
                )));
            }
        }
        Ok(Self {
            function,
            address,
            kind,
            options,
        })
    }

    pub fn unit_id(&self) -> u8 {
        self.options.unit_id
    }

    /// Encode the request PDU.
    pub fn encode(&self) -> ModbusResult<Pdu> {
        let mut pdu = Pdu::new();
        pdu.push(self.function.to_u8())?;
        pdu.push_u16(self.address)?;
        match &self.kind {
            RequestKind::Read { quantity } => {
                pdu.push_u16(*quantity)?;
            }
            RequestKind::WriteCoil(on) => {
                pdu.push_u16(if *on { 0xFF00 } else { 0x0000 })?;
            }
            RequestKind::WriteRegister(value) => {
                pdu.push_u16(*value)?;
            }
            RequestKind::WriteCoils(values) => {
                pdu.push_u16(values.len() as u16)?;
                let byte_count = (values.len() + 7) / 8;
                pdu.push(byte_count as u8)?;
                let mut packed = vec![0u8; byte_count];
                for (i, on) in values.iter().enumerate() {
                    if *on {
                        packed[i / 8] |= 1 << (i % 8);
                    }
                }
                pdu.extend(&packed)?;
            }
            RequestKind::WriteRegisters(values) => {
                pdu.push_u16(values.len() as u16)?;
                pdu.push((values.len() * 2) as u8)?;
                for value in values {
                    pdu.push_u16(*value)?;
                }
            }
        }
        Ok(pdu)
    }
}

/// Decoded response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseValue {
    /// Coil or discrete input states, one entry per requested item.
    Bits(Vec<bool>),
    /// Register values, sign- or zero-extended per the request options.
    Registers(Vec<i32>),
    /// Echo of a single coil write.
    CoilEcho { address: u16, value: bool },
    /// Echo of a single register write.
    RegisterEcho { address: u16, value: u16 },
    /// Echo of a multiple write: start address and item count.
    MultiWriteEcho { address: u16, quantity: u16 },
}

impl ResponseValue {
    pub fn into_bits(self) -> ModbusResult<Vec<bool>> {
        match self {
            ResponseValue::Bits(bits) => Ok(bits),
            other => Err(ModbusError::protocol(format!(
                "Expected bit response, got {other:?}"
            ))),
        }
    }

    pub fn into_registers(self) -> ModbusResult<Vec<i32>> {
        match self {
            ResponseValue::Registers(regs) => Ok(regs),
            other => Err(ModbusError::protocol(format!(
                "Expected register response, got {other:?}"
            ))),
        }
    }
}

/// A fully decoded response.
#[derive(Debug, Clone)]
pub struct Response {
    pub unit_id: u8,
    pub function: FunctionCode,
    pub transaction_id: u16,
    pub value: ResponseValue,
}

/// Check a response PDU against its request before decoding.
///
/// Rejects unit-id mismatches first, then surfaces exception responses, then
/// rejects any function code other than the one requested.
pub fn validate_response(request: &Request, unit_id: u8, pdu: &Pdu) -> ModbusResult<()> {
    if unit_id != request.unit_id() {
        return Err(ModbusError::protocol(format!(
            "Unit id mismatch: expected {}, got {}",
            request.unit_id(),
            unit_id
        )));
    }
    let fc = pdu
        .function_code()
        .ok_or_else(|| ModbusError::protocol("Empty response PDU"))?;
    if fc == request.function.to_u8() | 0x80 {
        let code = pdu
            .exception_code()
            .ok_or_else(|| ModbusError::protocol("Exception response without code byte"))?;
        return Err(ModbusError::Exception(ExceptionCode::from_u8(code)));
    }
    if fc != request.function.to_u8() {
        return Err(ModbusError::protocol(format!(
            "Unexpected function code: expected 0x{:02X}, got 0x{fc:02X}",
            request.function.to_u8()
        )));
    }
    Ok(())
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_u8(&mut self) -> ModbusResult<u8> {
        let byte = self
            .data
            .get(self.pos)
            .copied()
            .ok_or_else(|| ModbusError::protocol("Truncated response payload"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> ModbusResult<u16> {
        let hi = self.read_u8()?;
        let lo = self.read_u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn read_bytes(&mut self, len: usize) -> ModbusResult<&'a [u8]> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(ModbusError::protocol("Truncated response payload"));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}

/// Decode a validated response payload (the PDU bytes after the function
/// code) into a typed value.
pub fn decode_response(request: &Request, payload: &[u8]) -> ModbusResult<ResponseValue> {
    let mut cursor = Cursor::new(payload);
    match (&request.function, &request.kind) {
        (FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs, RequestKind::Read { quantity }) => {
            let byte_count = cursor.read_u8()? as usize;
            let expected = (*quantity as usize + 7) / 8;
            if byte_count != expected {
                return Err(ModbusError::protocol(format!(
                    "Byte count {byte_count} does not match {quantity} requested bits"
                )));
            }
            let bytes = cursor.read_bytes(byte_count)?;
            // Bit 0 of the first data byte is the first requested item;
            // padding bits past the requested count are dropped.
            let bits = (0..*quantity as usize)
                .map(|i| bytes[i / 8] & (1 << (i % 8)) != 0)
                .collect();
            Ok(ResponseValue::Bits(bits))
        }
        (
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters,
            RequestKind::Read { quantity },
        ) => {
            let byte_count = cursor.read_u8()? as usize;
            if byte_count != *quantity as usize * 2 {
                return Err(ModbusError::protocol(format!(
                    "Byte count {byte_count} does not match {quantity} requested registers"
                )));
            }
            let bytes = cursor.read_bytes(byte_count)?;
            let registers = bytes
                .chunks_exact(2)
                .map(|pair| {
                    let raw = u16::from_be_bytes([pair[0], pair[1]]);
                    if request.options.unsigned {
                        raw as i32
                    } else {
                        raw as i16 as i32
                    }
                })
                .collect();
            Ok(ResponseValue::Registers(registers))
        }
        (FunctionCode::WriteSingleCoil, RequestKind::WriteCoil(_)) => {
            let address = cursor.read_u16()?;
            let value = cursor.read_u16()? == 0xFF00;
            Ok(ResponseValue::CoilEcho { address, value })
        }
        (FunctionCode::WriteSingleRegister, RequestKind::WriteRegister(_)) => {
            let address = cursor.read_u16()?;
            let value = cursor.read_u16()?;
            Ok(ResponseValue::RegisterEcho { address, value })
        }
        (
            FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters,
            RequestKind::WriteCoils(_) | RequestKind::WriteRegisters(_),
        ) => {
            let address = cursor.read_u16()?;
            let quantity = cursor.read_u16()?;
            Ok(ResponseValue::MultiWriteEcho { address, quantity })
        }
        _ => Err(ModbusError::protocol("Request and response kind mismatch")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_request(function: FunctionCode, quantity: u16) -> Request {
        Request::new(
            function,
            0x0000,
            RequestKind::Read { quantity },
            RequestOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_function_code_registry() {
        assert_eq!(FunctionCode::from_u8(0x03), Some(FunctionCode::ReadHoldingRegisters));
        assert_eq!(FunctionCode::from_u8(0x0F), Some(FunctionCode::WriteMultipleCoils));
        assert_eq!(FunctionCode::from_u8(0x07), None);
        assert_eq!(FunctionCode::from_u8(0x83), None);
        assert!(FunctionCode::ReadCoils.is_read());
        assert!(!FunctionCode::WriteSingleCoil.is_read());
    }

    #[test]
    fn test_encode_read_registers() {
        let request = Request::new(
            FunctionCode::ReadHoldingRegisters,
            0x0010,
            RequestKind::Read { quantity: 2 },
            RequestOptions::default(),
        )
        .unwrap();
        assert_eq!(request.encode().unwrap().as_slice(), &[0x03, 0x00, 0x10, 0x00, 0x02]);
    }

    #[test]
    fn test_encode_write_single_coil() {
        let on = Request::new(
            FunctionCode::WriteSingleCoil,
            0x0005,
            RequestKind::WriteCoil(true),
            RequestOptions::default(),
        )
        .unwrap();
        assert_eq!(on.encode().unwrap().as_slice(), &[0x05, 0x00, 0x05, 0xFF, 0x00]);

        let off = Request::new(
            FunctionCode::WriteSingleCoil,
            0x0005,
            RequestKind::WriteCoil(false),
            RequestOptions::default(),
        )
        .unwrap();
        assert_eq!(off.encode().unwrap().as_slice(), &[0x05, 0x00, 0x05, 0x00, 0x00]);
    }

    #[test]
    fn test_encode_write_multiple_coils_bit_packing() {
        // Coil 0 maps to bit 0 of the first data byte.
        let request = Request::new(
            FunctionCode::WriteMultipleCoils,
            0x0000,
            RequestKind::WriteCoils(vec![true, false, true, true, false, false, false, false, true]),
            RequestOptions::default(),
        )
        .unwrap();
        assert_eq!(
            request.encode().unwrap().as_slice(),
            &[0x0F, 0x00, 0x00, 0x00, 0x09, 0x02, 0x0D, 0x01]
        );
    }

    #[test]
    fn test_encode_write_multiple_registers() {
        let request = Request::new(
            FunctionCode::WriteMultipleRegisters,
            0x0001,
            RequestKind::WriteRegisters(vec![0x000A, 0x0102]),
            RequestOptions::default(),
        )
        .unwrap();
        assert_eq!(
            request.encode().unwrap().as_slice(),
            &[0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn test_write_limits() {
        assert!(Request::new(
            FunctionCode::WriteMultipleCoils,
            0,
            RequestKind::WriteCoils(vec![true; 1968]),
            RequestOptions::default(),
        )
        .is_ok());
        assert!(matches!(
            Request::new(
                FunctionCode::WriteMultipleCoils,
                0,
                RequestKind::WriteCoils(vec![true; 1969]),
                RequestOptions::default(),
            ),
            Err(ModbusError::InvalidRequest(_))
        ));
        assert!(Request::new(
            FunctionCode::WriteMultipleRegisters,
            0,
            RequestKind::WriteRegisters(vec![0; 123]),
            RequestOptions::default(),
        )
        .is_ok());
        assert!(Request::new(
            FunctionCode::WriteMultipleRegisters,
            0,
            RequestKind::WriteRegisters(vec![0; 124]),
            RequestOptions::default(),
        )
        .is_err());
        assert!(Request::new(
            FunctionCode::WriteMultipleRegisters,
            0,
            RequestKind::WriteRegisters(vec![]),
            RequestOptions::default(),
        )
        .is_err());
    }

    #[test]
    fn test_zero_quantity_read_rejected() {
        assert!(matches!(
            Request::new(
                FunctionCode::ReadCoils,
                0,
                RequestKind::Read { quantity: 0 },
                RequestOptions::default(),
            ),
            Err(ModbusError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_decode_coils_truncates_padding() {
        let request = read_request(FunctionCode::ReadCoils, 10);
        // 10 coils arrive as two bytes; the top 6 bits of the second byte
        // are padding and must not appear in the output.
        let value = decode_response(&request, &[0x02, 0xCD, 0xFF]).unwrap();
        assert_eq!(
            value,
            ResponseValue::Bits(vec![
                true, false, true, true, false, false, true, true, true, true
            ])
        );
    }

    #[test]
    fn test_decode_registers_signed_and_unsigned() {
        let signed = read_request(FunctionCode::ReadHoldingRegisters, 2);
        let value = decode_response(&signed, &[0x04, 0x00, 0x2A, 0xFF, 0xFF]).unwrap();
        assert_eq!(value, ResponseValue::Registers(vec![42, -1]));

        let unsigned = Request::new(
            FunctionCode::ReadHoldingRegisters,
            0,
            RequestKind::Read { quantity: 2 },
            RequestOptions::default().with_unsigned(true),
        )
        .unwrap();
        let value = decode_response(&unsigned, &[0x04, 0x00, 0x2A, 0xFF, 0xFF]).unwrap();
        assert_eq!(value, ResponseValue::Registers(vec![42, 65535]));
    }

    #[test]
    fn test_decode_rejects_byte_count_mismatch() {
        // A short byte count must not shrink the result set.
        let registers = read_request(FunctionCode::ReadHoldingRegisters, 2);
        assert!(matches!(
            decode_response(&registers, &[0x01, 0x2A]),
            Err(ModbusError::Protocol(_))
        ));
        // An oversized byte count must not yield extra values.
        let single = read_request(FunctionCode::ReadHoldingRegisters, 1);
        assert!(matches!(
            decode_response(&single, &[0x04, 0x00, 0x01, 0x00, 0x02]),
            Err(ModbusError::Protocol(_))
        ));
        // 16 coils need two data bytes; one is a malformed frame.
        let coils = read_request(FunctionCode::ReadCoils, 16);
        assert!(matches!(
            decode_response(&coils, &[0x01, 0xFF]),
            Err(ModbusError::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_truncated_payload() {
        let request = read_request(FunctionCode::ReadHoldingRegisters, 2);
        assert!(matches!(
            decode_response(&request, &[0x04, 0x00, 0x2A]),
            Err(ModbusError::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_write_echoes() {
        let coil = Request::new(
            FunctionCode::WriteSingleCoil,
            0x0005,
            RequestKind::WriteCoil(true),
            RequestOptions::default(),
        )
        .unwrap();
        assert_eq!(
            decode_response(&coil, &[0x00, 0x05, 0xFF, 0x00]).unwrap(),
            ResponseValue::CoilEcho { address: 5, value: true }
        );

        let block = Request::new(
            FunctionCode::WriteMultipleRegisters,
            0x0001,
            RequestKind::WriteRegisters(vec![1, 2, 3]),
            RequestOptions::default(),
        )
        .unwrap();
        assert_eq!(
            decode_response(&block, &[0x00, 0x01, 0x00, 0x03]).unwrap(),
            ResponseValue::MultiWriteEcho { address: 1, quantity: 3 }
        );
    }

    #[test]
    fn test_validate_unit_id_mismatch_first() {
        let request = read_request(FunctionCode::ReadCoils, 1);
        // Even an exception response from the wrong unit is a protocol error.
        let pdu = Pdu::from_slice(&[0x81, 0x02]).unwrap();
        assert!(matches!(
            validate_response(&request, 9, &pdu),
            Err(ModbusError::Protocol(_))
        ));
    }

    #[test]
    fn test_validate_exception() {
        let request = read_request(FunctionCode::ReadCoils, 1);
        let pdu = Pdu::from_slice(&[0x81, 0x02]).unwrap();
        assert_eq!(
            validate_response(&request, 1, &pdu),
            Err(ModbusError::Exception(ExceptionCode::IllegalDataAddress))
        );
    }

    #[test]
    fn test_validate_wrong_function() {
        let request = read_request(FunctionCode::ReadCoils, 1);
        let pdu = Pdu::from_slice(&[0x03, 0x02, 0x00, 0x00]).unwrap();
        assert!(matches!(
            validate_response(&request, 1, &pdu),
            Err(ModbusError::Protocol(_))
        ));
    }
}
