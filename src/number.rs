//! Script number codec.
//!
//! Numbers on the stack are little-endian with the sign carried in the top
//! bit of the last byte. Zero encodes as the empty vector; `-0` (`[0x80]`)
//! decodes to zero.

use crate::error::ScriptError;

/// Default operand width for arithmetic opcodes.
pub const MAX_NUM_SIZE: usize = 4;
/// Operand width used by the lock-time opcodes.
pub const MAX_LOCKTIME_NUM_SIZE: usize = 5;

/// Encodes `value` in its minimal script number form.
pub fn encode(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }

    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut result = Vec::with_capacity(9);
    while magnitude > 0 {
        result.push((magnitude & 0xff) as u8);
        magnitude >>= 8;
    }

    // A set top bit would read as a sign, so spill into an extra byte.
    if let Some(last) = result.last_mut() {
        if *last & 0x80 != 0 {
            result.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            *last |= 0x80;
        }
    }

    result
}

/// Decodes `bytes` as a script number no wider than `max_len` bytes.
///
/// Non-minimal encodings are accepted.
pub fn decode(bytes: &[u8], max_len: usize) -> Result<i64, ScriptError> {
    if bytes.len() > max_len {
        return Err(ScriptError::NumberOverflow {
            size: bytes.len(),
            max: max_len,
        });
    }
    let Some((&last, _)) = bytes.split_last() else {
        return Ok(0);
    };

    let mut result: i64 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        result |= i64::from(byte) << (8 * i);
    }

    if last & 0x80 != 0 {
        let mask = !(0x80i64 << (8 * (bytes.len() - 1)));
        Ok(-(result & mask))
    } else {
        Ok(result)
    }
}

/// Stack truthiness: any non-zero byte, except that a lone sign bit in the
/// last position is negative zero and therefore false.
pub fn cast_to_bool(data: &[u8]) -> bool {
    for (i, &byte) in data.iter().enumerate() {
        if byte != 0 {
            return !(i == data.len() - 1 && byte == 0x80);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_boundaries() {
        assert!(encode(0).is_empty());
        assert_eq!(encode(1), vec![0x01]);
        assert_eq!(encode(-1), vec![0x81]);
        assert_eq!(encode(127), vec![0x7f]);
        assert_eq!(encode(128), vec![0x80, 0x00]);
        assert_eq!(encode(-128), vec![0x80, 0x80]);
        assert_eq!(encode(255), vec![0xff, 0x00]);
        assert_eq!(encode(256), vec![0x00, 0x01]);
        assert_eq!(encode(-32_768), vec![0x00, 0x80, 0x80]);
        assert_eq!(encode(i64::from(i32::MAX)), vec![0xff, 0xff, 0xff, 0x7f]);
    }

    #[test]
    fn decodes_negative_zero_and_padding() {
        assert_eq!(decode(&[0x80], MAX_NUM_SIZE), Ok(0));
        assert_eq!(decode(&[0x01, 0x00], MAX_NUM_SIZE), Ok(1));
        assert_eq!(decode(&[0x01, 0x80], MAX_NUM_SIZE), Ok(-1));
        assert_eq!(decode(&[], MAX_NUM_SIZE), Ok(0));
    }

    #[test]
    fn rejects_wide_operands() {
        let five = [0x00, 0x00, 0x00, 0x80, 0x00];
        assert_eq!(
            decode(&five, MAX_NUM_SIZE),
            Err(ScriptError::NumberOverflow { size: 5, max: 4 })
        );
        assert_eq!(decode(&five, MAX_LOCKTIME_NUM_SIZE), Ok(0x80_000_000));
    }

    #[test]
    fn truthiness() {
        assert!(!cast_to_bool(&[]));
        assert!(!cast_to_bool(&[0x00, 0x00]));
        assert!(!cast_to_bool(&[0x00, 0x80]));
        assert!(cast_to_bool(&[0x80, 0x00]));
        assert!(cast_to_bool(&[0x00, 0x01]));
        assert!(cast_to_bool(&[0x81]));
    }

    #[test]
    fn roundtrips_through_decode() {
        for value in [-0x7fff_ffff_i64, -256, -1, 0, 1, 16, 1_000, 0x7fff_ffff] {
            assert_eq!(decode(&encode(value), MAX_NUM_SIZE), Ok(value));
        }
    }
}
