//! Wire framing for TCP (MBAP) and serial RTU transports.
//!
//! Encoders produce complete frames from a PDU; decoders reassemble frames
//! from an arbitrarily segmented byte stream. The TCP decoder consumes
//! exactly the bytes each MBAP length field declares, so a frame with an
//! unmatched transaction id never desynchronizes the stream. The RTU decoder
//! derives the expected frame length from the response function code and
//! verifies the CRC before surfacing anything.

use bytes::{Bytes, BytesMut};

use crate::constants::{MAX_MBAP_LENGTH, MBAP_HEADER_LEN, MIN_TCP_FRAME_LEN};
use crate::crc::crc16;
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::Pdu;

/// Modbus application protocol header, prepended to every TCP frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Byte count of everything after the length field (unit id + PDU).
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn new(transaction_id: u16, unit_id: u8, pdu_len: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: 0,
            length: (pdu_len + 1) as u16,
            unit_id,
        }
    }

    pub fn to_bytes(&self) -> [u8; MBAP_HEADER_LEN] {
        let mut bytes = [0u8; MBAP_HEADER_LEN];
        bytes[0..2].copy_from_slice(&self.transaction_id.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.protocol_id.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.length.to_be_bytes());
        bytes[6] = self.unit_id;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> ModbusResult<Self> {
        if bytes.len() < MBAP_HEADER_LEN {
            return Err(ModbusError::protocol("MBAP header truncated"));
        }
        let header = Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
        };
        if header.protocol_id != 0 {
            return Err(ModbusError::protocol(format!(
                "Unsupported protocol id {}",
                header.protocol_id
            )));
        }
        if header.length == 0 || header.length > MAX_MBAP_LENGTH {
            return Err(ModbusError::protocol(format!(
                "MBAP length {} out of range",
                header.length
            )));
        }
        Ok(header)
    }
}

/// Encode a complete Modbus TCP frame.
pub fn encode_tcp_frame(transaction_id: u16, unit_id: u8, pdu: &Pdu) -> Bytes {
    let header = MbapHeader::new(transaction_id, unit_id, pdu.len());
    let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + pdu.len());
    frame.extend_from_slice(&header.to_bytes());
    frame.extend_from_slice(pdu.as_slice());
    frame.freeze()
}

/// Encode a complete serial RTU frame with its CRC trailer.
pub fn encode_rtu_frame(unit_id: u8, pdu: &Pdu) -> Bytes {
    let mut frame = BytesMut::with_capacity(1 + pdu.len() + 2);
    frame.extend_from_slice(&[unit_id]);
    frame.extend_from_slice(pdu.as_slice());
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.freeze()
}

/// A reassembled TCP frame.
#[derive(Debug, Clone)]
pub struct TcpFrame {
    pub header: MbapHeader,
    pub pdu: Pdu,
}

/// Incremental decoder for the TCP byte stream.
///
/// Feed it whatever the socket yields; it hands back complete frames as they
/// become available. Partial frames stay buffered across calls.
#[derive(Debug, Default)]
pub struct TcpFrameDecoder {
    buf: BytesMut,
}

impl TcpFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> ModbusResult<Option<TcpFrame>> {
        if self.buf.len() < MIN_TCP_FRAME_LEN {
            return Ok(None);
        }
        let header = MbapHeader::from_bytes(&self.buf)?;
        let total = 6 + header.length as usize;
        if self.buf.len() < total {
            return Ok(None);
        }
        let frame = self.buf.split_to(total);
        let pdu = Pdu::from_slice(&frame[MBAP_HEADER_LEN..])?;
        Ok(Some(TcpFrame { header, pdu }))
    }
}

/// A reassembled RTU frame with a verified CRC.
#[derive(Debug, Clone)]
pub struct RtuFrame {
    pub unit_id: u8,
    pub pdu: Pdu,
}

/// Incremental decoder for the serial byte stream.
///
/// RTU frames carry no length field; the expected length is derived from the
/// response function code (and the byte count, for reads). A function code
/// outside the registry means the stream cannot be re-synchronized and is
/// reported as a protocol error.
#[derive(Debug, Default)]
pub struct RtuFrameDecoder {
    buf: BytesMut,
}

impl RtuFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Drop everything buffered. Called after a CRC failure, when byte
    /// alignment can no longer be trusted.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    fn expected_len(&self) -> ModbusResult<Option<usize>> {
        if self.buf.len() < 2 {
            return Ok(None);
        }
        let fc = self.buf[1];
        let expected = match fc {
            _ if fc & 0x80 != 0 => 5,
            0x01..=0x04 => {
                // unit id + fc + byte count + data + crc
                if self.buf.len() < 3 {
                    return Ok(None);
                }
                5 + self.buf[2] as usize
            }
            0x05 | 0x06 | 0x0F | 0x10 => 8,
            other => {
                return Err(ModbusError::protocol(format!(
                    "Unknown function code 0x{other:02X} in serial stream"
                )));
            }
        };
        Ok(Some(expected))
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> ModbusResult<Option<RtuFrame>> {
        let expected = match self.expected_len()? {
            Some(len) => len,
            None => return Ok(None),
        };
        if self.buf.len() < expected {
            return Ok(None);
        }
        let frame = self.buf.split_to(expected);
        let received = u16::from_le_bytes([frame[expected - 2], frame[expected - 1]]);
        let computed = crc16(&frame[..expected - 2]);
        if received != computed {
            return Err(ModbusError::CrcMismatch {
                expected: computed,
                actual: received,
            });
        }
        let pdu = Pdu::from_slice(&frame[1..expected - 2])?;
        Ok(Some(RtuFrame {
            unit_id: frame[0],
            pdu,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mbap_round_trip() {
        let header = MbapHeader::new(0x1234, 0x11, 5);
        let bytes = header.to_bytes();
        assert_eq!(bytes, [0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x11]);
        assert_eq!(MbapHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_mbap_rejects_bad_protocol_id() {
        let bytes = [0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x01];
        assert!(MbapHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_encode_tcp_frame() {
        let pdu = Pdu::from_slice(&[0x03, 0x00, 0x00, 0x00, 0x0A]).unwrap();
        let frame = encode_tcp_frame(0x0001, 0x01, &pdu);
        assert_eq!(
            frame.as_ref(),
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]
        );
    }

    #[test]
    fn test_encode_rtu_frame_crc_trailer() {
        let pdu = Pdu::from_slice(&[0x03, 0x00, 0x00, 0x00, 0x0A]).unwrap();
        let frame = encode_rtu_frame(0x01, &pdu);
        assert_eq!(
            frame.as_ref(),
            &[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]
        );
    }

    #[test]
    fn test_tcp_decoder_fragmented_delivery() {
        let mut decoder = TcpFrameDecoder::new();
        let frame = [
            0x00u8, 0x07, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x2A,
        ];
        decoder.extend(&frame[..4]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.extend(&frame[4..9]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.extend(&frame[9..]);
        let decoded = decoder.next_frame().unwrap().unwrap();
        assert_eq!(decoded.header.transaction_id, 0x0007);
        assert_eq!(decoded.pdu.as_slice(), &[0x03, 0x02, 0x00, 0x2A]);
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_tcp_decoder_coalesced_frames() {
        let mut decoder = TcpFrameDecoder::new();
        let mut stream = Vec::new();
        stream.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x81, 0x02]);
        stream.extend_from_slice(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x04, 0x01, 0x01, 0x01, 0x05]);
        decoder.extend(&stream);
        let first = decoder.next_frame().unwrap().unwrap();
        assert_eq!(first.header.transaction_id, 1);
        assert!(first.pdu.is_exception());
        let second = decoder.next_frame().unwrap().unwrap();
        assert_eq!(second.header.transaction_id, 2);
        assert_eq!(second.pdu.as_slice(), &[0x01, 0x01, 0x05]);
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_tcp_decoder_length_consumption_preserves_alignment() {
        // A full frame followed by the start of another: consuming exactly
        // the declared length leaves the second frame's prefix intact.
        let mut decoder = TcpFrameDecoder::new();
        decoder.extend(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x81, 0x02]);
        decoder.extend(&[0x00, 0x02, 0x00, 0x00]);
        let first = decoder.next_frame().unwrap().unwrap();
        assert_eq!(first.header.transaction_id, 1);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.extend(&[0x00, 0x03, 0x01, 0x06, 0x00]);
        let second = decoder.next_frame().unwrap().unwrap();
        assert_eq!(second.header.transaction_id, 2);
        assert_eq!(second.pdu.as_slice(), &[0x06, 0x00]);
    }

    #[test]
    fn test_rtu_decoder_read_response() {
        let mut decoder = RtuFrameDecoder::new();
        let body = [0x01u8, 0x03, 0x02, 0x00, 0x64];
        let crc = crc16(&body).to_le_bytes();
        decoder.extend(&body);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.extend(&crc);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.unit_id, 1);
        assert_eq!(frame.pdu.as_slice(), &[0x03, 0x02, 0x00, 0x64]);
    }

    #[test]
    fn test_rtu_decoder_exception_frame() {
        let mut decoder = RtuFrameDecoder::new();
        let body = [0x01u8, 0x83, 0x02];
        decoder.extend(&body);
        decoder.extend(&crc16(&body).to_le_bytes());
        let frame = decoder.next_frame().unwrap().unwrap();
        assert!(frame.pdu.is_exception());
        assert_eq!(frame.pdu.exception_code(), Some(0x02));
    }

    #[test]
    fn test_rtu_decoder_crc_mismatch() {
        let mut decoder = RtuFrameDecoder::new();
        decoder.extend(&[0x01, 0x83, 0x02, 0x00, 0x00]);
        assert!(matches!(
            decoder.next_frame(),
            Err(ModbusError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_rtu_decoder_unknown_function_fails_closed() {
        let mut decoder = RtuFrameDecoder::new();
        decoder.extend(&[0x01, 0x2B, 0x0E]);
        assert!(matches!(
            decoder.next_frame(),
            Err(ModbusError::Protocol(_))
        ));
    }
}
