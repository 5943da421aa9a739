//! HDF5 object header parsing (versions 1 and 2, with continuation blocks).

use std::collections::VecDeque;

use crate::bytes::{ensure_len, read_sized, read_u16, read_u32, read_uint};
use crate::checksum::verify_trailing_checksum;
use crate::error::FormatError;
use crate::message_type::MessageType;

/// Signature of a version 2 object header.
pub const OHDR_SIGNATURE: [u8; 4] = *b"OHDR";

/// Signature of a version 2 continuation chunk.
pub const OCHK_SIGNATURE: [u8; 4] = *b"OCHK";

/// Message flag: the message is stored in the shared message heap or is a
/// committed object.
pub const MSG_FLAG_SHARED: u8 = 0x02;
/// Message flag: a reader must fail if it does not understand the message.
const MSG_FLAG_MUST_UNDERSTAND: u8 = 0x08;

/// Header flag (v2): message creation order is tracked.
const FLAG_TRACK_ORDER: u8 = 0x04;
/// Header flag (v2): attribute phase-change thresholds are stored.
const FLAG_ATTR_THRESHOLDS: u8 = 0x10;
/// Header flag (v2): access/modification/change/birth times are stored.
const FLAG_TIMES: u8 = 0x20;

/// One header message, its body copied out of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMessage {
    pub msg_type: MessageType,
    pub flags: u8,
    pub data: Vec<u8>,
}

impl HeaderMessage {
    pub fn is_shared(&self) -> bool {
        self.flags & MSG_FLAG_SHARED != 0
    }
}

/// A parsed object header: every non-nil, non-continuation message from the
/// first chunk and all continuation chunks, in file order.
#[derive(Debug, Clone)]
pub struct ObjectHeader {
    /// Header version (1 or 2).
    pub version: u8,
    pub messages: Vec<HeaderMessage>,
}

/// Decoding context threaded through the chunk walk.
struct Walk<'a> {
    data: &'a [u8],
    offset_size: u8,
    length_size: u8,
    verify: bool,
    tracked_order: bool,
    messages: Vec<HeaderMessage>,
    pending: VecDeque<(usize, usize)>,
    visited: usize,
}

impl ObjectHeader {
    /// Parse the object header at `offset`.
    ///
    /// `offset_size` and `length_size` come from the superblock. With
    /// `verify` set, v2 chunk checksums are validated.
    pub fn parse(
        data: &[u8],
        offset: usize,
        offset_size: u8,
        length_size: u8,
        verify: bool,
    ) -> Result<ObjectHeader, FormatError> {
        ensure_len(data, offset, 4)?;
        let mut walk = Walk {
            data,
            offset_size,
            length_size,
            verify,
            tracked_order: false,
            messages: Vec::new(),
            pending: VecDeque::new(),
            visited: 0,
        };

        let version = if data[offset..offset + 4] == OHDR_SIGNATURE {
            walk.first_chunk_v2(offset)?;
            2
        } else {
            walk.first_chunk_v1(offset)?;
            1
        };

        while let Some((start, len)) = walk.pending.pop_front() {
            // Guard against continuation loops in damaged files.
            walk.visited += 1;
            if walk.visited > 4096 {
                return Err(FormatError::Malformed(
                    "object header continuation chain does not terminate".into(),
                ));
            }
            if version == 1 {
                ensure_len(walk.data, start, len)?;
                walk.messages_v1(start, start + len)?;
            } else {
                walk.continuation_v2(start, len)?;
            }
        }

        Ok(ObjectHeader {
            version,
            messages: walk.messages,
        })
    }

    /// First message of the given type.
    pub fn find(&self, msg_type: MessageType) -> Option<&HeaderMessage> {
        self.messages.iter().find(|m| m.msg_type == msg_type)
    }

    /// All messages of the given type, in order.
    pub fn all(&self, msg_type: MessageType) -> impl Iterator<Item = &HeaderMessage> {
        self.messages.iter().filter(move |m| m.msg_type == msg_type)
    }
}

impl Walk<'_> {
    fn first_chunk_v1(&mut self, offset: usize) -> Result<(), FormatError> {
        // version(1) reserved(1) num_messages(2) ref_count(4) chunk_size(4),
        // then padding to 16 bytes.
        ensure_len(self.data, offset, 16)?;
        let version = self.data[offset];
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                structure: "object header",
                version,
            });
        }
        let chunk_size = read_u32(self.data, offset + 8)? as usize;
        let start = offset + 16;
        ensure_len(self.data, start, chunk_size)?;
        self.messages_v1(start, start + chunk_size)
    }

    fn messages_v1(&mut self, start: usize, end: usize) -> Result<(), FormatError> {
        ensure_len(self.data, start, end.saturating_sub(start))?;
        let mut pos = start;
        while pos + 8 <= end {
            let raw_type = read_u16(self.data, pos)?;
            let size = read_u16(self.data, pos + 2)? as usize;
            let flags = self.data[pos + 4];
            pos += 8;
            if pos + size > end {
                return Err(FormatError::Malformed(format!(
                    "v1 header message of {size} bytes overruns its chunk"
                )));
            }
            self.push(raw_type, flags, pos, size)?;
            // Messages are 8-byte aligned in v1 headers.
            pos += (size + 7) & !7;
        }
        Ok(())
    }

    fn first_chunk_v2(&mut self, offset: usize) -> Result<(), FormatError> {
        ensure_len(self.data, offset, 6)?;
        let version = self.data[offset + 4];
        if version != 2 {
            return Err(FormatError::UnsupportedVersion {
                structure: "object header",
                version,
            });
        }
        let flags = self.data[offset + 5];
        let mut pos = offset + 6;
        if flags & FLAG_TIMES != 0 {
            pos += 16;
        }
        if flags & FLAG_ATTR_THRESHOLDS != 0 {
            pos += 4;
        }
        let width = 1usize << (flags & 0x03);
        let chunk_size = read_uint(self.data, pos, width)? as usize;
        pos += width;

        ensure_len(self.data, pos, chunk_size.saturating_add(4))?;
        let end = pos + chunk_size;
        if self.verify {
            verify_trailing_checksum(&self.data[offset..end + 4])?;
        }
        self.messages_v2(pos, end, flags & FLAG_TRACK_ORDER != 0)
    }

    fn continuation_v2(&mut self, start: usize, len: usize) -> Result<(), FormatError> {
        ensure_len(self.data, start, len)?;
        if len < 8 || self.data[start..start + 4] != OCHK_SIGNATURE {
            return Err(FormatError::InvalidSignature { expected: "OCHK" });
        }
        if self.verify {
            verify_trailing_checksum(&self.data[start..start + len])?;
        }
        // Continuation chunks use the message prefix of the first chunk.
        let tracked = self.tracked_order;
        self.messages_v2(start + 4, start + len - 4, tracked)
    }

    fn messages_v2(&mut self, start: usize, end: usize, tracked: bool) -> Result<(), FormatError> {
        self.tracked_order = tracked;
        let prefix = if tracked { 6 } else { 4 };
        let mut pos = start;
        while pos + prefix <= end {
            let raw_type = self.data[pos] as u16;
            let size = read_u16(self.data, pos + 1)? as usize;
            let flags = self.data[pos + 3];
            pos += prefix;
            if pos + size > end {
                return Err(FormatError::Malformed(format!(
                    "v2 header message of {size} bytes overruns its chunk"
                )));
            }
            self.push(raw_type, flags, pos, size)?;
            pos += size;
        }
        Ok(())
    }

    fn push(&mut self, raw_type: u16, flags: u8, pos: usize, size: usize) -> Result<(), FormatError> {
        let msg_type = MessageType::from_u16(raw_type);
        let body = &self.data[pos..pos + size];
        match msg_type {
            MessageType::Nil => {}
            MessageType::Continuation => {
                let os = self.offset_size as usize;
                let addr = read_sized(body, 0, self.offset_size)?;
                let len = read_sized(body, os, self.length_size)?;
                self.pending.push_back((addr as usize, len as usize));
            }
            MessageType::Unknown(id) if flags & MSG_FLAG_MUST_UNDERSTAND != 0 => {
                return Err(FormatError::UnsupportedMessage(id));
            }
            _ => self.messages.push(HeaderMessage {
                msg_type,
                flags,
                data: body.to_vec(),
            }),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A v1 header holding one dataspace message and one continuation
    /// pointing at a block with a second message.
    fn build_v1() -> Vec<u8> {
        let mut buf = vec![1, 0];
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&32u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        // dataspace message, 8 bytes of body
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&8u16.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0]);
        // continuation to offset 64, length 16
        buf.extend_from_slice(&0x10u16.to_le_bytes());
        buf.extend_from_slice(&8u16.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&64u32.to_le_bytes());
        buf.extend_from_slice(&16u32.to_le_bytes());
        assert_eq!(buf.len(), 48);
        buf.resize(64, 0);
        // modification time message
        buf.extend_from_slice(&0x12u16.to_le_bytes());
        buf.extend_from_slice(&8u16.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&[1, 0, 0, 0, 7, 0, 0, 0]);
        buf
    }

    #[test]
    fn v1_with_continuation() {
        let data = build_v1();
        let oh = ObjectHeader::parse(&data, 0, 4, 4, true).unwrap();
        assert_eq!(oh.version, 1);
        let types: Vec<_> = oh.messages.iter().map(|m| m.msg_type).collect();
        assert_eq!(
            types,
            vec![MessageType::Dataspace, MessageType::ModificationTime]
        );
        assert_eq!(oh.find(MessageType::ModificationTime).unwrap().data[4], 7);
    }

    #[test]
    fn unknown_must_understand_message_fails() {
        let mut data = build_v1();
        data[16] = 0x55;
        data[20] = MSG_FLAG_MUST_UNDERSTAND;
        assert_eq!(
            ObjectHeader::parse(&data, 0, 4, 4, false).unwrap_err(),
            FormatError::UnsupportedMessage(0x55)
        );
    }

    #[test]
    fn bad_version_rejected() {
        let mut data = build_v1();
        data[0] = 3;
        assert!(matches!(
            ObjectHeader::parse(&data, 0, 4, 4, false),
            Err(FormatError::UnsupportedVersion { .. })
        ));
    }
}
