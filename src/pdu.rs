//! Protocol data unit.
//!
//! A PDU is the transport-independent payload of every Modbus message:
//! function code followed by data, at most 253 bytes. It is held in a
//! fixed-size stack buffer so request encoding never allocates.

use crate::constants::MAX_PDU_SIZE;
use crate::error::{ModbusError, ModbusResult};

/// A Modbus protocol data unit.
#[derive(Debug, Clone)]
pub struct Pdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl Pdu {
    /// Create an empty PDU.
    pub fn new() -> Self {
        Self {
            data: [0u8; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Build a PDU from raw bytes.
    pub fn from_slice(bytes: &[u8]) -> ModbusResult<Self> {
        if bytes.len() > MAX_PDU_SIZE {
            return Err(ModbusError::protocol(format!(
                "PDU too large: {} bytes (max {})",
                bytes.len(),
                MAX_PDU_SIZE
            )));
        }
        let mut pdu = Self::new();
        pdu.data[..bytes.len()].copy_from_slice(bytes);
        pdu.len = bytes.len();
        Ok(pdu)
    }

    /// Append one byte.
    pub fn push(&mut self, byte: u8) -> ModbusResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(ModbusError::protocol("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Append a big-endian u16.
    pub fn push_u16(&mut self, value: u16) -> ModbusResult<()> {
        let bytes = value.to_be_bytes();
        self.push(bytes[0])?;
        self.push(bytes[1])
    }

    /// Append a byte slice.
    pub fn extend(&mut self, bytes: &[u8]) -> ModbusResult<()> {
        if self.len + bytes.len() > MAX_PDU_SIZE {
            return Err(ModbusError::protocol("PDU buffer full"));
        }
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First byte of the PDU, if any.
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    /// True when the function code has the exception bit set.
    pub fn is_exception(&self) -> bool {
        self.function_code().map_or(false, |fc| fc & 0x80 != 0)
    }

    /// Exception code byte of an exception PDU.
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.as_slice().get(1).copied()
        } else {
            None
        }
    }
}

impl Default for Pdu {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<[u8]> for Pdu {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_layout() {
        let mut pdu = Pdu::new();
        pdu.push(0x03).unwrap();
        pdu.push_u16(0x0010).unwrap();
        pdu.push_u16(0x0002).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x00, 0x10, 0x00, 0x02]);
        assert_eq!(pdu.function_code(), Some(0x03));
        assert!(!pdu.is_exception());
    }

    #[test]
    fn test_exception_detection() {
        let pdu = Pdu::from_slice(&[0x83, 0x02]).unwrap();
        assert!(pdu.is_exception());
        assert_eq!(pdu.exception_code(), Some(0x02));
    }

    #[test]
    fn test_overflow_rejected() {
        let mut pdu = Pdu::new();
        pdu.extend(&[0u8; MAX_PDU_SIZE]).unwrap();
        assert!(pdu.push(0x00).is_err());
        assert!(pdu.extend(&[0x00]).is_err());
        assert!(Pdu::from_slice(&[0u8; MAX_PDU_SIZE + 1]).is_err());
    }
}
