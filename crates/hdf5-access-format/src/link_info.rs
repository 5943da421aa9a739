//! Link info (0x0002) and group info (0x000A) messages of "new style" groups.

use crate::bytes::{ensure_len, read_sized, write_sized, UNDEF_ADDR};
use crate::error::FormatError;

/// Parsed link info message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfoMessage {
    pub max_creation_order: Option<u64>,
    /// Fractal heap of dense link storage; `None` when links are compact.
    pub fractal_heap_address: Option<u64>,
}

impl LinkInfoMessage {
    pub fn parse(data: &[u8], offset_size: u8) -> Result<LinkInfoMessage, FormatError> {
        ensure_len(data, 0, 2)?;
        if data[0] != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "link info message",
                version: data[0],
            });
        }
        let flags = data[1];
        let mut pos = 2;
        let max_creation_order = if flags & 0x01 != 0 {
            pos += 8;
            Some(read_sized(data, pos - 8, 8)?)
        } else {
            None
        };
        let heap = read_sized(data, pos, offset_size)?;
        Ok(LinkInfoMessage {
            max_creation_order,
            fractal_heap_address: (heap != UNDEF_ADDR).then_some(heap),
        })
    }

    /// Encode compact storage: no creation order, undefined heap and index.
    pub fn serialize_compact() -> Vec<u8> {
        let mut buf = vec![0, 0];
        write_sized(&mut buf, UNDEF_ADDR, 8);
        write_sized(&mut buf, UNDEF_ADDR, 8);
        buf
    }
}

/// Group info message with default phase-change thresholds.
pub fn serialize_group_info() -> Vec<u8> {
    vec![0, 0]
}
