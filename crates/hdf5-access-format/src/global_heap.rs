//! Global heap collections ("GCOL"), which store variable-length data.
//!
//! Only what variable-length strings need is covered: reading a whole
//! collection and writing one collection holding every string of a file.

use std::collections::HashMap;

use crate::bytes::{ensure_len, pad8, read_sized, read_u16, read_u32, read_uint, write_sized};
use crate::error::FormatError;

const GCOL_SIGNATURE: [u8; 4] = *b"GCOL";

/// Collections are never smaller than this.
pub const MIN_COLLECTION_SIZE: usize = 4096;

/// Header of a collection: signature, version, reserved, size.
const COLLECTION_HEADER_SIZE: usize = 16;
/// Header of an object: index, refcount, reserved, size.
const OBJECT_HEADER_SIZE: usize = 16;

/// Bytes of one variable-length element inside a dataset or attribute:
/// length, collection address, object index.
pub const VL_REFERENCE_SIZE: usize = 16;

/// A decoded collection, objects keyed by index.
#[derive(Debug, Clone, Default)]
pub struct GlobalHeapCollection {
    objects: HashMap<u16, Vec<u8>>,
}

impl GlobalHeapCollection {
    pub fn parse(data: &[u8], address: u64, length_size: u8) -> Result<Self, FormatError> {
        let pos = address as usize;
        let ls = length_size as usize;
        ensure_len(data, pos, 8 + ls)?;
        if data[pos..pos + 4] != GCOL_SIGNATURE {
            return Err(FormatError::InvalidSignature { expected: "GCOL" });
        }
        if data[pos + 4] != 1 {
            return Err(FormatError::UnsupportedVersion {
                structure: "global heap",
                version: data[pos + 4],
            });
        }
        let size = read_uint(data, pos + 8, ls)? as usize;
        let end = pos.saturating_add(size).min(data.len());

        let mut objects = HashMap::new();
        let mut cursor = pos + 8 + ls;
        let object_header = 8 + ls;
        while cursor + object_header <= end {
            let index = read_u16(data, cursor)?;
            if index == 0 {
                break;
            }
            let obj_size = read_uint(data, cursor + 8, ls)? as usize;
            let start = cursor + object_header;
            ensure_len(data, start, obj_size)?;
            objects.insert(index, data[start..start + obj_size].to_vec());
            cursor = start + pad8(obj_size);
        }
        Ok(GlobalHeapCollection { objects })
    }

    pub fn get(&self, index: u16) -> Option<&[u8]> {
        self.objects.get(&index).map(Vec::as_slice)
    }
}

/// Decoded variable-length reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlReference {
    pub length: u32,
    pub collection: u64,
    pub index: u32,
}

impl VlReference {
    pub fn parse(data: &[u8], pos: usize, offset_size: u8) -> Result<Self, FormatError> {
        Ok(VlReference {
            length: read_u32(data, pos)?,
            collection: read_sized(data, pos + 4, offset_size)?,
            index: read_u32(data, pos + 4 + offset_size as usize)?,
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.length.to_le_bytes());
        write_sized(buf, self.collection, 8);
        buf.extend_from_slice(&self.index.to_le_bytes());
    }
}

/// Accumulates objects for one collection.
#[derive(Debug, Default)]
pub struct GlobalHeapWriter {
    objects: Vec<Vec<u8>>,
}

impl GlobalHeapWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object and return its index.
    pub fn push(&mut self, data: &[u8]) -> Result<u16, FormatError> {
        if self.objects.len() >= u16::MAX as usize {
            return Err(FormatError::Unsupported(
                "more than 65535 variable-length objects".into(),
            ));
        }
        self.objects.push(data.to_vec());
        Ok(self.objects.len() as u16)
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Encoded size of the collection, free space included.
    pub fn encoded_len(&self) -> usize {
        let used = COLLECTION_HEADER_SIZE
            + self
                .objects
                .iter()
                .map(|o| OBJECT_HEADER_SIZE + pad8(o.len()))
                .sum::<usize>();
        let total = used.max(MIN_COLLECTION_SIZE);
        // Leftover space must hold a free-space object header, or be zero.
        match total - used {
            0 => total,
            free if free < OBJECT_HEADER_SIZE => used + OBJECT_HEADER_SIZE,
            _ => total,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let total = self.encoded_len();
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&GCOL_SIGNATURE);
        buf.extend_from_slice(&[1, 0, 0, 0]);
        write_sized(&mut buf, total as u64, 8);
        for (i, obj) in self.objects.iter().enumerate() {
            buf.extend_from_slice(&(i as u16 + 1).to_le_bytes());
            buf.extend_from_slice(&1u16.to_le_bytes());
            buf.extend_from_slice(&[0; 4]);
            write_sized(&mut buf, obj.len() as u64, 8);
            buf.extend_from_slice(obj);
            buf.resize(buf.len() + pad8(obj.len()) - obj.len(), 0);
        }
        let free = total - buf.len();
        if free > 0 {
            // Free-space object: index 0, size covers its own header.
            buf.extend_from_slice(&[0; 8]);
            write_sized(&mut buf, free as u64, 8);
            buf.resize(total, 0);
        }
        buf
    }
}
