//! HDF5 filter pipeline message (type 0x000B).

use crate::bytes::{ensure_len, pad8, read_u16, read_u32};
use crate::error::FormatError;

/// Well-known filter ids.
pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;

/// Filter flag: the filter may be skipped if it fails.
pub const FILTER_FLAG_OPTIONAL: u16 = 0x0001;

/// One stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescription {
    pub filter_id: u16,
    pub name: Option<String>,
    pub flags: u16,
    pub client_data: Vec<u32>,
}

/// Filters applied, in order, when a chunk is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPipeline {
    pub filters: Vec<FilterDescription>,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the byte shuffle filter.
    pub fn with_shuffle(mut self, element_size: u32) -> Self {
        self.filters.push(FilterDescription {
            filter_id: FILTER_SHUFFLE,
            name: None,
            flags: FILTER_FLAG_OPTIONAL,
            client_data: vec![element_size],
        });
        self
    }

    /// Append zlib deflate at `level` (1-9).
    pub fn with_deflate(mut self, level: u32) -> Self {
        self.filters.push(FilterDescription {
            filter_id: FILTER_DEFLATE,
            name: None,
            flags: FILTER_FLAG_OPTIONAL,
            client_data: vec![level],
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Deflate level of the pipeline, 0 if it does not deflate.
    pub fn deflate_level(&self) -> u32 {
        self.filters
            .iter()
            .find(|f| f.filter_id == FILTER_DEFLATE)
            .map(|f| f.client_data.first().copied().unwrap_or(6))
            .unwrap_or(0)
    }

    pub fn has_filter(&self, id: u16) -> bool {
        self.filters.iter().any(|f| f.filter_id == id)
    }

    /// Decode a version 1 or 2 pipeline message.
    pub fn parse(data: &[u8]) -> Result<FilterPipeline, FormatError> {
        ensure_len(data, 0, 2)?;
        let version = data[0];
        let count = data[1] as usize;
        // v1 has 6 reserved bytes and pads names and client data to 8 bytes.
        let mut pos = match version {
            1 => 8,
            2 => 2,
            v => {
                return Err(FormatError::UnsupportedVersion {
                    structure: "filter pipeline",
                    version: v,
                })
            }
        };

        let mut filters = Vec::with_capacity(count);
        for _ in 0..count {
            let filter_id = read_u16(data, pos)?;
            pos += 2;
            let name_len = if version == 1 || filter_id >= 256 {
                pos += 2;
                read_u16(data, pos - 2)? as usize
            } else {
                0
            };
            let flags = read_u16(data, pos)?;
            let n_values = read_u16(data, pos + 2)? as usize;
            pos += 4;

            let name = if name_len > 0 {
                ensure_len(data, pos, name_len)?;
                let raw = &data[pos..pos + name_len];
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                pos += if version == 1 { pad8(name_len) } else { name_len };
                Some(String::from_utf8_lossy(&raw[..end]).into_owned())
            } else {
                None
            };

            let mut client_data = Vec::with_capacity(n_values);
            for _ in 0..n_values {
                client_data.push(read_u32(data, pos)?);
                pos += 4;
            }
            if version == 1 && n_values % 2 == 1 {
                pos += 4;
            }

            filters.push(FilterDescription {
                filter_id,
                name,
                flags,
                client_data,
            });
        }
        Ok(FilterPipeline { filters })
    }

    /// Encode as a version 2 message.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![2, self.filters.len() as u8];
        for f in &self.filters {
            buf.extend_from_slice(&f.filter_id.to_le_bytes());
            let name = f.name.as_deref().filter(|_| f.filter_id >= 256);
            if f.filter_id >= 256 {
                let len = name.map_or(0, |n| n.len() + 1);
                buf.extend_from_slice(&(len as u16).to_le_bytes());
            }
            buf.extend_from_slice(&f.flags.to_le_bytes());
            buf.extend_from_slice(&(f.client_data.len() as u16).to_le_bytes());
            if let Some(n) = name {
                buf.extend_from_slice(n.as_bytes());
                buf.push(0);
            }
            for v in &f.client_data {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        buf
    }
}
