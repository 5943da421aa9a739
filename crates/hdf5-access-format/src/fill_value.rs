//! Fill value messages (types 0x0004 and 0x0005).

use crate::bytes::{ensure_len, read_u32};
use crate::error::FormatError;

/// When storage for a dataset is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocTime {
    Early = 1,
    Late = 2,
    Incremental = 3,
}

/// Encode a version 3 fill value message with no user fill value; the
/// library default (all zero bytes) applies.
pub fn serialize(alloc: AllocTime) -> Vec<u8> {
    // Fill write time 2: write fill values only if one was set.
    vec![3, (alloc as u8) | (2 << 2)]
}

/// Extract the user-defined fill value bytes, if any, from a fill value
/// message of version 1, 2 or 3.
pub fn parse_value(data: &[u8]) -> Result<Option<Vec<u8>>, FormatError> {
    ensure_len(data, 0, 2)?;
    let (defined, pos) = match data[0] {
        1 | 2 => {
            ensure_len(data, 0, 4)?;
            (data[3] != 0, 4)
        }
        3 => (data[1] & 0x20 != 0, 2),
        version => {
            return Err(FormatError::UnsupportedVersion {
                structure: "fill value message",
                version,
            })
        }
    };
    if !defined {
        return Ok(None);
    }
    // Version 2 omits the size when the value is undefined, handled above.
    value_at(data, pos)
}

/// Extract the fill value from the pre-1.8 message: size then bytes.
pub fn parse_old_value(data: &[u8]) -> Result<Option<Vec<u8>>, FormatError> {
    value_at(data, 0)
}

fn value_at(data: &[u8], pos: usize) -> Result<Option<Vec<u8>>, FormatError> {
    let size = read_u32(data, pos)? as usize;
    if size == 0 {
        return Ok(None);
    }
    ensure_len(data, pos + 4, size)?;
    Ok(Some(data[pos + 4..pos + 4 + size].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_messages_have_no_value() {
        assert_eq!(serialize(AllocTime::Late), vec![3, 0x0a]);
        assert_eq!(serialize(AllocTime::Incremental), vec![3, 0x0b]);
        assert_eq!(parse_value(&serialize(AllocTime::Late)).unwrap(), None);
    }

    #[test]
    fn v3_defined_value() {
        let mut data = vec![3, 0x2a];
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(&(-1.0f32).to_le_bytes());
        assert_eq!(
            parse_value(&data).unwrap(),
            Some((-1.0f32).to_le_bytes().to_vec())
        );
    }

    #[test]
    fn v2_defined_value() {
        let mut data = vec![2, 2, 2, 1];
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&[7, 0]);
        assert_eq!(parse_value(&data).unwrap(), Some(vec![7, 0]));
        assert_eq!(parse_value(&[2, 2, 2, 0]).unwrap(), None);
    }

    #[test]
    fn old_message() {
        let mut data = 1u32.to_le_bytes().to_vec();
        data.push(9);
        assert_eq!(parse_old_value(&data).unwrap(), Some(vec![9]));
    }
}
