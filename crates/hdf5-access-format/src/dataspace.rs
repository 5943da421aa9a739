//! HDF5 dataspace message (type 0x0001).

use crate::bytes::{ensure_len, read_sized, write_sized};
use crate::error::FormatError;
use crate::slab::element_count;

/// Maximum-dimension value meaning "unlimited".
pub const UNLIMITED: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataspaceType {
    /// A single element, rank 0.
    Scalar,
    /// An N-dimensional array.
    Simple,
    /// No elements at all.
    Null,
}

/// Parsed dataspace message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
    pub space_type: DataspaceType,
    /// Current dimension sizes, slowest varying first.
    pub dimensions: Vec<u64>,
    /// Maximum dimension sizes; `None` means equal to `dimensions`.
    pub max_dimensions: Option<Vec<u64>>,
}

impl Dataspace {
    pub fn scalar() -> Dataspace {
        Dataspace {
            space_type: DataspaceType::Scalar,
            dimensions: Vec::new(),
            max_dimensions: None,
        }
    }

    pub fn null() -> Dataspace {
        Dataspace {
            space_type: DataspaceType::Null,
            dimensions: Vec::new(),
            max_dimensions: None,
        }
    }

    /// A simple dataspace; `max_dimensions` is dropped when equal to `dims`.
    pub fn simple(dims: &[u64], max_dimensions: Option<&[u64]>) -> Dataspace {
        Dataspace {
            space_type: DataspaceType::Simple,
            dimensions: dims.to_vec(),
            max_dimensions: max_dimensions
                .filter(|m| *m != dims)
                .map(|m| m.to_vec()),
        }
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Maximum extents, falling back to the current extents.
    pub fn max_dims(&self) -> &[u64] {
        self.max_dimensions.as_deref().unwrap_or(&self.dimensions)
    }

    /// Number of elements: 1 for scalar, 0 for null. Fails when the
    /// extent does not fit in a `u64`.
    pub fn num_elements(&self) -> Result<u64, FormatError> {
        match self.space_type {
            DataspaceType::Scalar => Ok(1),
            DataspaceType::Null => Ok(0),
            DataspaceType::Simple => element_count(&self.dimensions).ok_or_else(|| {
                FormatError::Malformed(format!("dataspace {:?} overflows", self.dimensions))
            }),
        }
    }

    /// Decode a version 1 or 2 dataspace message.
    pub fn parse(data: &[u8], length_size: u8) -> Result<Dataspace, FormatError> {
        ensure_len(data, 0, 4)?;
        let version = data[0];
        let rank = data[1] as usize;
        let flags = data[2];
        let (space_type, mut pos) = match version {
            1 => {
                let t = if rank == 0 {
                    DataspaceType::Scalar
                } else {
                    DataspaceType::Simple
                };
                (t, 8)
            }
            2 => {
                let t = match data[3] {
                    0 => DataspaceType::Scalar,
                    1 => DataspaceType::Simple,
                    2 => DataspaceType::Null,
                    other => {
                        return Err(FormatError::Malformed(format!("dataspace type {other}")))
                    }
                };
                (t, 4)
            }
            v => {
                return Err(FormatError::UnsupportedVersion {
                    structure: "dataspace",
                    version: v,
                })
            }
        };

        let ls = length_size as usize;
        let read_dims = |pos: &mut usize| -> Result<Vec<u64>, FormatError> {
            let mut dims = Vec::with_capacity(rank);
            for _ in 0..rank {
                dims.push(read_sized(data, *pos, length_size)?);
                *pos += ls;
            }
            Ok(dims)
        };
        let dimensions = read_dims(&mut pos)?;
        let max_dimensions = if flags & 0x01 != 0 {
            Some(read_dims(&mut pos)?)
        } else {
            None
        };

        Ok(Dataspace {
            space_type,
            dimensions,
            max_dimensions,
        })
    }

    /// Encode as a version 2 dataspace message with 8-byte lengths.
    pub fn serialize(&self) -> Vec<u8> {
        let type_byte = match self.space_type {
            DataspaceType::Scalar => 0,
            DataspaceType::Simple => 1,
            DataspaceType::Null => 2,
        };
        let flags = u8::from(self.max_dimensions.is_some());
        let mut buf = vec![2, self.dimensions.len() as u8, flags, type_byte];
        for &d in &self.dimensions {
            write_sized(&mut buf, d, 8);
        }
        if let Some(max) = &self.max_dimensions {
            for &d in max {
                write_sized(&mut buf, d, 8);
            }
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_with_unlimited_roundtrip() {
        let ds = Dataspace::simple(&[0, 100, 100], Some(&[UNLIMITED, 100, 100]));
        let bytes = ds.serialize();
        assert_eq!(bytes.len(), 4 + 6 * 8);
        let back = Dataspace::parse(&bytes, 8).unwrap();
        assert_eq!(back, ds);
        assert_eq!(back.num_elements().unwrap(), 0);
        assert_eq!(back.max_dims(), &[UNLIMITED, 100, 100]);
    }

    #[test]
    fn equal_max_dims_are_omitted() {
        let ds = Dataspace::simple(&[2, 3], Some(&[2, 3]));
        assert_eq!(ds.max_dimensions, None);
        assert_eq!(ds.serialize()[2], 0);
        assert_eq!(ds.max_dims(), &[2, 3]);
    }

    #[test]
    fn scalar_and_null() {
        let s = Dataspace::parse(&Dataspace::scalar().serialize(), 8).unwrap();
        assert_eq!(s.space_type, DataspaceType::Scalar);
        assert_eq!(s.num_elements().unwrap(), 1);
        let n = Dataspace::parse(&Dataspace::null().serialize(), 8).unwrap();
        assert_eq!(n.num_elements().unwrap(), 0);
    }

    #[test]
    fn v1_with_four_byte_lengths_and_unlimited() {
        let mut data = vec![1, 1, 1, 0, 0, 0, 0, 0];
        data.extend_from_slice(&5u32.to_le_bytes());
        data.extend_from_slice(&u32::MAX.to_le_bytes());
        let ds = Dataspace::parse(&data, 4).unwrap();
        assert_eq!(ds.space_type, DataspaceType::Simple);
        assert_eq!(ds.dimensions, vec![5]);
        assert_eq!(ds.max_dimensions, Some(vec![UNLIMITED]));
    }

    #[test]
    fn v1_rank_zero_is_scalar() {
        let ds = Dataspace::parse(&[1, 0, 0, 0, 0, 0, 0, 0], 8).unwrap();
        assert_eq!(ds.space_type, DataspaceType::Scalar);
    }

    #[test]
    fn errors() {
        assert!(matches!(
            Dataspace::parse(&[3, 0, 0, 0], 8),
            Err(FormatError::UnsupportedVersion { .. })
        ));
        assert!(matches!(
            Dataspace::parse(&[2, 1, 0, 1, 0], 8),
            Err(FormatError::UnexpectedEof { .. })
        ));
        assert!(matches!(
            Dataspace::parse(&[2, 0, 0, 7], 8),
            Err(FormatError::Malformed(_))
        ));
    }
}
