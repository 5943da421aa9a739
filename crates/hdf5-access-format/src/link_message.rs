//! HDF5 link message (type 0x0006), the entries of a "new style" group.

use crate::bytes::{ensure_len, read_sized, read_u16, read_uint, write_sized};
use crate::error::FormatError;

/// What a link points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// Object header address in this file.
    Hard(u64),
    /// Path inside this file, resolved at access time.
    Soft(String),
    /// Any other link class (external, user-defined), kept as raw bytes.
    Other { link_type: u8, info: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMessage {
    pub name: String,
    pub target: LinkTarget,
    pub creation_order: Option<u64>,
}

const FLAG_CREATION_ORDER: u8 = 0x01;
const FLAG_LINK_TYPE: u8 = 0x02;
const FLAG_CHARSET: u8 = 0x04;

impl LinkMessage {
    pub fn hard(name: impl Into<String>, address: u64) -> LinkMessage {
        LinkMessage {
            name: name.into(),
            target: LinkTarget::Hard(address),
            creation_order: None,
        }
    }

    /// Decode a link message; `offset_size` sizes hard link addresses.
    pub fn parse(data: &[u8], offset_size: u8) -> Result<LinkMessage, FormatError> {
        ensure_len(data, 0, 2)?;
        if data[0] != 1 {
            return Err(FormatError::UnsupportedVersion {
                structure: "link message",
                version: data[0],
            });
        }
        let flags = data[1];
        let mut pos = 2;

        let link_type = if flags & FLAG_LINK_TYPE != 0 {
            ensure_len(data, pos, 1)?;
            pos += 1;
            data[pos - 1]
        } else {
            0
        };
        let creation_order = if flags & FLAG_CREATION_ORDER != 0 {
            pos += 8;
            Some(read_uint(data, pos - 8, 8)?)
        } else {
            None
        };
        if flags & FLAG_CHARSET != 0 {
            pos += 1;
        }

        let width = 1usize << ((flags >> 4) & 0x03);
        let name_len = read_uint(data, pos, width)? as usize;
        pos += width;
        ensure_len(data, pos, name_len)?;
        let name = String::from_utf8_lossy(&data[pos..pos + name_len]).into_owned();
        pos += name_len;

        let target = match link_type {
            0 => LinkTarget::Hard(read_sized(data, pos, offset_size)?),
            1 => {
                let len = read_u16(data, pos)? as usize;
                ensure_len(data, pos + 2, len)?;
                LinkTarget::Soft(String::from_utf8_lossy(&data[pos + 2..pos + 2 + len]).into_owned())
            }
            other => {
                let len = read_u16(data, pos)? as usize;
                ensure_len(data, pos + 2, len)?;
                LinkTarget::Other {
                    link_type: other,
                    info: data[pos + 2..pos + 2 + len].to_vec(),
                }
            }
        };

        Ok(LinkMessage {
            name,
            target,
            creation_order,
        })
    }

    /// Encode with 8-byte addresses.
    pub fn serialize(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let width_bits: u8 = match name.len() {
            0..=0xFF => 0,
            0x100..=0xFFFF => 1,
            _ => 2,
        };
        let link_type = match &self.target {
            LinkTarget::Hard(_) => None,
            LinkTarget::Soft(_) => Some(1),
            LinkTarget::Other { link_type, .. } => Some(*link_type),
        };
        let utf8 = !self.name.is_ascii();

        let mut flags = width_bits << 4;
        if link_type.is_some() {
            flags |= FLAG_LINK_TYPE;
        }
        if self.creation_order.is_some() {
            flags |= FLAG_CREATION_ORDER;
        }
        if utf8 {
            flags |= FLAG_CHARSET;
        }

        let mut buf = vec![1, flags];
        buf.extend(link_type);
        if let Some(order) = self.creation_order {
            buf.extend_from_slice(&order.to_le_bytes());
        }
        if utf8 {
            // UTF-8
            buf.push(1);
        }
        write_sized(&mut buf, name.len() as u64, 1 << width_bits);
        buf.extend_from_slice(name);

        match &self.target {
            LinkTarget::Hard(addr) => write_sized(&mut buf, *addr, 8),
            LinkTarget::Soft(path) => {
                buf.extend_from_slice(&(path.len() as u16).to_le_bytes());
                buf.extend_from_slice(path.as_bytes());
            }
            LinkTarget::Other { info, .. } => {
                buf.extend_from_slice(&(info.len() as u16).to_le_bytes());
                buf.extend_from_slice(info);
            }
        }
        buf
    }
}
