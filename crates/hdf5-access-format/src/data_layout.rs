//! HDF5 data layout message (type 0x0008).

use crate::bytes::{ensure_len, read_sized, read_u16, read_u32, read_uint, write_sized, UNDEF_ADDR};
use crate::error::FormatError;

/// How the chunks of a chunked dataset are indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkIndexKind {
    /// Version 1 B-tree (layout v3, and the only index this crate writes).
    BTreeV1,
    /// The whole dataset is one chunk (layout v4).
    SingleChunk { filtered_size: Option<u64>, filter_mask: u32 },
    /// Unfiltered chunks laid out back to back (layout v4).
    Implicit,
    FixedArray,
    ExtensibleArray,
    BTreeV2,
}

/// Parsed data layout message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLayout {
    /// Raw data stored inside the message.
    Compact(Vec<u8>),
    /// One block of `size` bytes; `address` is `None` while unallocated.
    Contiguous { address: Option<u64>, size: u64 },
    /// Chunked storage. `chunk_dims` carries one entry per dataset axis plus
    /// a trailing entry holding the element size.
    Chunked {
        chunk_dims: Vec<u64>,
        index: ChunkIndexKind,
        address: Option<u64>,
    },
}

fn defined(addr: u64) -> Option<u64> {
    (addr != UNDEF_ADDR).then_some(addr)
}

impl DataLayout {
    /// Decode a version 3 or 4 layout message.
    pub fn parse(data: &[u8], offset_size: u8, length_size: u8) -> Result<DataLayout, FormatError> {
        ensure_len(data, 0, 2)?;
        let version = data[0];
        if !matches!(version, 3 | 4) {
            return Err(FormatError::UnsupportedVersion {
                structure: "data layout",
                version,
            });
        }
        let os = offset_size as usize;
        match data[1] {
            0 => {
                let size = read_u16(data, 2)? as usize;
                ensure_len(data, 4, size)?;
                Ok(DataLayout::Compact(data[4..4 + size].to_vec()))
            }
            1 => Ok(DataLayout::Contiguous {
                address: defined(read_sized(data, 2, offset_size)?),
                size: read_uint(data, 2 + os, length_size as usize)?,
            }),
            2 if version == 3 => {
                ensure_len(data, 2, 1)?;
                let rank = data[2] as usize;
                let address = defined(read_sized(data, 3, offset_size)?);
                let mut chunk_dims = Vec::with_capacity(rank);
                for i in 0..rank {
                    chunk_dims.push(read_u32(data, 3 + os + 4 * i)? as u64);
                }
                Ok(DataLayout::Chunked {
                    chunk_dims,
                    index: ChunkIndexKind::BTreeV1,
                    address,
                })
            }
            2 => Self::parse_v4_chunked(data, offset_size, length_size),
            3 => Err(FormatError::Unsupported("virtual dataset layout".into())),
            other => Err(FormatError::Malformed(format!("layout class {other}"))),
        }
    }

    fn parse_v4_chunked(
        data: &[u8],
        offset_size: u8,
        length_size: u8,
    ) -> Result<DataLayout, FormatError> {
        ensure_len(data, 2, 3)?;
        let flags = data[2];
        let rank = data[3] as usize;
        let width = data[4] as usize;
        let mut pos = 5;
        let mut chunk_dims = Vec::with_capacity(rank);
        for _ in 0..rank {
            chunk_dims.push(read_uint(data, pos, width)?);
            pos += width;
        }
        ensure_len(data, pos, 1)?;
        let index_type = data[pos];
        pos += 1;

        let index = match index_type {
            1 if flags & 0x02 != 0 => {
                let size = read_uint(data, pos, length_size as usize)?;
                let mask = read_u32(data, pos + length_size as usize)?;
                pos += length_size as usize + 4;
                ChunkIndexKind::SingleChunk {
                    filtered_size: Some(size),
                    filter_mask: mask,
                }
            }
            1 => ChunkIndexKind::SingleChunk {
                filtered_size: None,
                filter_mask: 0,
            },
            2 => ChunkIndexKind::Implicit,
            3 => {
                pos += 1;
                ChunkIndexKind::FixedArray
            }
            4 => {
                pos += 5;
                ChunkIndexKind::ExtensibleArray
            }
            5 => {
                pos += 6;
                ChunkIndexKind::BTreeV2
            }
            other => {
                return Err(FormatError::Malformed(format!("chunk index type {other}")))
            }
        };
        let address = defined(read_sized(data, pos, offset_size)?);
        Ok(DataLayout::Chunked {
            chunk_dims,
            index,
            address,
        })
    }

    /// Encode as a version 3 message with 8-byte addresses.
    ///
    /// Only the B-tree chunk index exists in version 3; other chunk indexes
    /// are rejected.
    pub fn serialize(&self) -> Result<Vec<u8>, FormatError> {
        let mut buf = vec![3];
        match self {
            DataLayout::Compact(raw) => {
                let size = u16::try_from(raw.len()).map_err(|_| {
                    FormatError::Unsupported("compact data larger than 64 KiB".into())
                })?;
                buf.push(0);
                buf.extend_from_slice(&size.to_le_bytes());
                buf.extend_from_slice(raw);
            }
            DataLayout::Contiguous { address, size } => {
                buf.push(1);
                write_sized(&mut buf, address.unwrap_or(UNDEF_ADDR), 8);
                write_sized(&mut buf, *size, 8);
            }
            DataLayout::Chunked {
                chunk_dims,
                index: ChunkIndexKind::BTreeV1,
                address,
            } => {
                buf.push(2);
                buf.push(chunk_dims.len() as u8);
                write_sized(&mut buf, address.unwrap_or(UNDEF_ADDR), 8);
                for &d in chunk_dims {
                    let d = u32::try_from(d).map_err(|_| {
                        FormatError::Unsupported(format!("chunk dimension {d} exceeds 32 bits"))
                    })?;
                    buf.extend_from_slice(&d.to_le_bytes());
                }
            }
            DataLayout::Chunked { index, .. } => {
                return Err(FormatError::Unsupported(format!(
                    "writing chunk index {index:?}"
                )))
            }
        }
        Ok(buf)
    }
}
