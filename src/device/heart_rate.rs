use crate::error::TelemetryError;

const FLAG_VALUE_FORMAT_U16: u8 = 0b0000_0001;
const FLAG_CONTACT_SUPPORTED: u8 = 0b0000_0100;
const FLAG_CONTACT_DETECTED: u8 = 0b0000_0010;

/**
 * Decodes a Heart Rate Measurement characteristic value (Bluetooth SIG, 0x2A37).
 * Byte 0 holds flags, followed by the beats per minute as u8 or little endian u16.
 */
pub fn parse_heart_rate_measurement(value: &[u8]) -> Result<u16, TelemetryError> {
    let (flags, rest) = value.split_first().ok_or(TelemetryError::Malformed("empty payload"))?;

    if flags & FLAG_CONTACT_SUPPORTED != 0 && flags & FLAG_CONTACT_DETECTED == 0 {
        return Err(TelemetryError::NoContact);
    }

    if flags & FLAG_VALUE_FORMAT_U16 != 0 {
        match rest {
            [low, high, ..] => Ok(u16::from_le_bytes([*low, *high])),
            _ => Err(TelemetryError::Malformed("truncated u16 value")),
        }
    }
    else {
        match rest {
            [value, ..] => Ok(u16::from(*value)),
            _ => Err(TelemetryError::Malformed("missing u8 value")),
        }
    }
}
