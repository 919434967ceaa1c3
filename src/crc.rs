//! CRC-16/Modbus checksum for serial RTU frames.

/// Compute the CRC-16/Modbus checksum of `data`.
///
/// Initial value 0xFFFF, reflected polynomial 0xA001. The result is appended
/// to RTU frames low byte first.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_read_request() {
        // Read holding registers, unit 1, address 0, quantity 10.
        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        let crc = crc16(&frame);
        assert_eq!(crc, 0xCDC5);
        assert_eq!(crc.to_le_bytes(), [0xC5, 0xCD]);
    }

    #[test]
    fn test_crc16_known_vectors() {
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x01, 0x00, 0x02]), 0xCB95);
        assert_eq!(crc16(&[0x01, 0x83, 0x02]), 0xF1C0);
        assert_eq!(crc16(&[0x01, 0x03, 0x02, 0x00, 0x64]), 0xAFB9);
    }

    #[test]
    fn test_crc16_empty() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }
}
