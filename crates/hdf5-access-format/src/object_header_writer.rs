//! Version 2 object header encoder.

use crate::checksum::append_checksum;
use crate::error::FormatError;
use crate::message_type::MessageType;

/// Message flag: the message body never changes after creation.
pub const MSG_FLAG_CONSTANT: u8 = 0x01;

/// Accumulates header messages and encodes them as one `OHDR` chunk.
#[derive(Debug, Default, Clone)]
pub struct ObjectHeaderWriter {
    messages: Vec<(MessageType, Vec<u8>, u8)>,
}

impl ObjectHeaderWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message with no flags set.
    pub fn add_message(&mut self, msg_type: MessageType, data: Vec<u8>) -> &mut Self {
        self.add_message_with_flags(msg_type, data, 0)
    }

    pub fn add_message_with_flags(
        &mut self,
        msg_type: MessageType,
        data: Vec<u8>,
        flags: u8,
    ) -> &mut Self {
        self.messages.push((msg_type, data, flags));
        self
    }

    fn body_len(&self) -> usize {
        self.messages.iter().map(|(_, d, _)| 4 + d.len()).sum()
    }

    fn size_width(body: usize) -> usize {
        match body {
            0..=0xFF => 1,
            0x100..=0xFFFF => 2,
            _ => 4,
        }
    }

    /// Exact number of bytes [`serialize`](Self::serialize) will produce.
    pub fn encoded_len(&self) -> usize {
        let body = self.body_len();
        6 + Self::size_width(body) + body + 4
    }

    /// Encode signature, version, flags, chunk size, messages and checksum.
    pub fn serialize(&self) -> Result<Vec<u8>, FormatError> {
        let body = self.body_len();
        let width = Self::size_width(body);
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(b"OHDR");
        buf.push(2);
        // Flag bits 0-1 select the chunk-size width: 1, 2 or 4 bytes.
        buf.push(width.trailing_zeros() as u8);
        buf.extend_from_slice(&(body as u32).to_le_bytes()[..width]);

        for (msg_type, data, flags) in &self.messages {
            let size = u16::try_from(data.len()).map_err(|_| {
                FormatError::Unsupported(format!(
                    "{msg_type:?} message of {} bytes exceeds the 64 KiB header message limit",
                    data.len()
                ))
            })?;
            let id = u8::try_from(msg_type.to_u16()).map_err(|_| {
                FormatError::Malformed(format!("message type {msg_type:?} has no v2 encoding"))
            })?;
            buf.push(id);
            buf.extend_from_slice(&size.to_le_bytes());
            buf.push(*flags);
            buf.extend_from_slice(data);
        }

        append_checksum(&mut buf);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_header::ObjectHeader;

    #[test]
    fn messages_roundtrip_through_parser() {
        let mut writer = ObjectHeaderWriter::new();
        writer
            .add_message(MessageType::Dataspace, vec![1, 2, 3, 4])
            .add_message_with_flags(MessageType::Datatype, vec![5, 6], MSG_FLAG_CONSTANT);
        let bytes = writer.serialize().unwrap();
        assert_eq!(bytes.len(), writer.encoded_len());

        let hdr = ObjectHeader::parse(&bytes, 0, 8, 8, true).unwrap();
        assert_eq!(hdr.version, 2);
        assert_eq!(hdr.messages.len(), 2);
        assert_eq!(hdr.messages[0].data, vec![1, 2, 3, 4]);
        assert_eq!(hdr.messages[1].msg_type, MessageType::Datatype);
        assert_eq!(hdr.messages[1].flags, MSG_FLAG_CONSTANT);
    }

    #[test]
    fn chunk_size_width_grows() {
        let mut writer = ObjectHeaderWriter::new();
        writer.add_message(MessageType::Attribute, vec![0xAA; 300]);
        let bytes = writer.serialize().unwrap();
        assert_eq!(bytes[5] & 0x03, 1);
        assert_eq!(bytes.len(), writer.encoded_len());
        let hdr = ObjectHeader::parse(&bytes, 0, 8, 8, true).unwrap();
        assert_eq!(hdr.messages[0].data.len(), 300);

        let mut big = ObjectHeaderWriter::new();
        big.add_message(MessageType::Attribute, vec![0; 60_000]);
        big.add_message(MessageType::Attribute, vec![0; 60_000]);
        let bytes = big.serialize().unwrap();
        assert_eq!(bytes[5] & 0x03, 2);
        assert_eq!(ObjectHeader::parse(&bytes, 0, 8, 8, true).unwrap().messages.len(), 2);
    }

    #[test]
    fn oversized_message_is_rejected() {
        let mut writer = ObjectHeaderWriter::new();
        writer.add_message(MessageType::Attribute, vec![0; 70_000]);
        assert!(matches!(writer.serialize(), Err(FormatError::Unsupported(_))));
    }

    #[test]
    fn empty_header() {
        let bytes = ObjectHeaderWriter::new().serialize().unwrap();
        let hdr = ObjectHeader::parse(&bytes, 0, 8, 8, true).unwrap();
        assert!(hdr.messages.is_empty());
    }
}
