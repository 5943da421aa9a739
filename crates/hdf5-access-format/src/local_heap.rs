//! Local heaps ("HEAP"), which hold the link names of old-style groups.

use crate::bytes::{ensure_len, read_sized, read_uint};
use crate::error::FormatError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHeap {
    pub data_segment_size: u64,
    pub data_segment_address: u64,
}

impl LocalHeap {
    pub fn parse(
        data: &[u8],
        address: u64,
        offset_size: u8,
        length_size: u8,
    ) -> Result<LocalHeap, FormatError> {
        let pos = address as usize;
        let ls = length_size as usize;
        ensure_len(data, pos, 8 + 2 * ls + offset_size as usize)?;
        if &data[pos..pos + 4] != b"HEAP" {
            return Err(FormatError::InvalidSignature { expected: "HEAP" });
        }
        if data[pos + 4] != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "local heap",
                version: data[pos + 4],
            });
        }
        // The free list head sits between the size and the address.
        Ok(LocalHeap {
            data_segment_size: read_uint(data, pos + 8, ls)?,
            data_segment_address: read_sized(data, pos + 8 + 2 * ls, offset_size)?,
        })
    }

    /// The null-terminated string at `offset` within the data segment.
    pub fn read_string(&self, data: &[u8], offset: u64) -> Result<String, FormatError> {
        if offset >= self.data_segment_size {
            return Err(FormatError::Malformed(format!(
                "local heap offset {offset} beyond segment of {} bytes",
                self.data_segment_size
            )));
        }
        let out_of_range = || {
            FormatError::Malformed(format!(
                "local heap segment at {:#x} lies outside the file",
                self.data_segment_address
            ))
        };
        let start = self
            .data_segment_address
            .checked_add(offset)
            .and_then(|s| usize::try_from(s).ok())
            .ok_or_else(out_of_range)?;
        let end = self
            .data_segment_address
            .checked_add(self.data_segment_size)
            .and_then(|e| usize::try_from(e).ok())
            .ok_or_else(out_of_range)?;
        ensure_len(data, start, end - start)?;
        let segment = &data[start..end];
        let len = segment
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| FormatError::Malformed("unterminated local heap string".into()))?;
        Ok(String::from_utf8_lossy(&segment[..len]).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap_with(names: &[u8], segment_at: u64) -> Vec<u8> {
        let mut buf = b"HEAP".to_vec();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        buf.extend_from_slice(&(names.len() as u64).to_le_bytes());
        buf.extend_from_slice(&u64::MAX.to_le_bytes());
        buf.extend_from_slice(&segment_at.to_le_bytes());
        buf.resize(segment_at as usize, 0);
        buf.extend_from_slice(names);
        buf
    }

    #[test]
    fn reads_names() {
        let file = heap_with(b"\0group\0data\0\0", 40);
        let heap = LocalHeap::parse(&file, 0, 8, 8).unwrap();
        assert_eq!(heap.data_segment_address, 40);
        assert_eq!(heap.read_string(&file, 0).unwrap(), "");
        assert_eq!(heap.read_string(&file, 1).unwrap(), "group");
        assert_eq!(heap.read_string(&file, 7).unwrap(), "data");
    }

    #[test]
    fn offset_outside_segment() {
        let file = heap_with(b"\0ab\0", 40);
        let heap = LocalHeap::parse(&file, 0, 8, 8).unwrap();
        assert!(heap.read_string(&file, 4).is_err());
    }

    #[test]
    fn segment_past_the_address_space() {
        let mut file = heap_with(b"\0ab\0", 40);
        file[24..32].copy_from_slice(&(u64::MAX - 2).to_le_bytes());
        let heap = LocalHeap::parse(&file, 0, 8, 8).unwrap();
        assert!(heap.read_string(&file, 1).is_err());
    }

    #[test]
    fn wrong_signature() {
        assert!(LocalHeap::parse(&[0u8; 64], 0, 8, 8).is_err());
    }
}
