//! HDF5 superblock: parsing of versions 0 through 3, writing of version 2.

use byteorder::{ByteOrder, LittleEndian};

use crate::bytes::{ensure_len, read_sized, validate_sizes, write_sized, UNDEF_ADDR};
use crate::checksum::{append_checksum, verify_trailing_checksum};
use crate::error::FormatError;
use crate::signature::HDF5_SIGNATURE;

/// Encoded size of the version 2 superblock written by this crate.
pub const SUPERBLOCK_V2_SIZE: usize = 48;

/// Parsed HDF5 superblock (all versions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Superblock version (0–3).
    pub version: u8,
    /// Size of offsets in bytes (2, 4, or 8).
    pub offset_size: u8,
    /// Size of lengths in bytes (2, 4, or 8).
    pub length_size: u8,
    /// Absolute position all other addresses are relative to.
    pub base_address: u64,
    /// End-of-file address.
    pub eof_address: u64,
    /// Root group object header address.
    pub root_group_address: u64,
    /// Group leaf node K (v0/v1 only).
    pub group_leaf_node_k: Option<u16>,
    /// Group internal node K (v0/v1 only).
    pub group_internal_node_k: Option<u16>,
    /// File consistency flags.
    pub consistency_flags: u32,
    /// Superblock extension address (v2/v3 only, `None` when undefined).
    pub extension_address: Option<u64>,
}

impl Superblock {
    /// Parse the superblock whose signature starts at `signature_offset`.
    ///
    /// With `verify_checksum` set, the lookup3 checksum of v2/v3 superblocks
    /// is validated.
    pub fn parse(
        data: &[u8],
        signature_offset: usize,
        verify_checksum: bool,
    ) -> Result<Superblock, FormatError> {
        ensure_len(data, signature_offset, 9)?;
        let d = &data[signature_offset..];
        if d[..8] != HDF5_SIGNATURE {
            return Err(FormatError::SignatureNotFound);
        }

        let mut sb = match d[8] {
            0 | 1 => Self::parse_v0v1(d, d[8])?,
            2 | 3 => Self::parse_v2v3(d, d[8], verify_checksum)?,
            version => {
                return Err(FormatError::UnsupportedVersion {
                    structure: "superblock",
                    version,
                })
            }
        };
        // Addresses are relative to the superblock itself, whatever the
        // stored base says, so a user block in front of it is transparent.
        sb.base_address = signature_offset as u64;
        Ok(sb)
    }

    fn parse_v0v1(d: &[u8], version: u8) -> Result<Superblock, FormatError> {
        // Version 1 inserts indexed-storage K (2) + reserved (2) before the flags.
        let fixed = if version == 0 { 24 } else { 28 };
        ensure_len(d, 0, fixed)?;

        let offset_size = d[13];
        let length_size = d[14];
        validate_sizes(offset_size, length_size)?;

        let group_leaf_node_k = LittleEndian::read_u16(&d[16..18]);
        let group_internal_node_k = LittleEndian::read_u16(&d[18..20]);
        let consistency_flags = LittleEndian::read_u32(&d[fixed - 4..fixed]);

        let os = offset_size as usize;
        // base, free-space, eof, driver-info, then the root symbol table
        // entry: link name offset, object header address, cache type...
        let mut pos = fixed;
        let base_address = read_sized(d, pos, offset_size)?;
        pos += 2 * os;
        let eof_address = read_sized(d, pos, offset_size)?;
        pos += 2 * os;
        pos += os;
        let root_group_address = read_sized(d, pos, offset_size)?;

        Ok(Superblock {
            version,
            offset_size,
            length_size,
            base_address,
            eof_address,
            root_group_address,
            group_leaf_node_k: Some(group_leaf_node_k),
            group_internal_node_k: Some(group_internal_node_k),
            consistency_flags,
            extension_address: None,
        })
    }

    fn parse_v2v3(d: &[u8], version: u8, verify: bool) -> Result<Superblock, FormatError> {
        ensure_len(d, 0, 12)?;
        let offset_size = d[9];
        let length_size = d[10];
        validate_sizes(offset_size, length_size)?;
        let consistency_flags = d[11] as u32;

        let os = offset_size as usize;
        let end = 12 + 4 * os + 4;
        ensure_len(d, 0, end)?;
        if verify {
            verify_trailing_checksum(&d[..end])?;
        }

        let base_address = read_sized(d, 12, offset_size)?;
        let extension = read_sized(d, 12 + os, offset_size)?;
        let eof_address = read_sized(d, 12 + 2 * os, offset_size)?;
        let root_group_address = read_sized(d, 12 + 3 * os, offset_size)?;

        Ok(Superblock {
            version,
            offset_size,
            length_size,
            base_address,
            eof_address,
            root_group_address,
            group_leaf_node_k: None,
            group_internal_node_k: None,
            consistency_flags,
            extension_address: (extension != UNDEF_ADDR).then_some(extension),
        })
    }

    /// Encode a version 2 superblock with 8-byte offsets and lengths.
    pub fn serialize_v2(eof_address: u64, root_group_address: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SUPERBLOCK_V2_SIZE);
        buf.extend_from_slice(&HDF5_SIGNATURE);
        buf.extend_from_slice(&[2, 8, 8, 0]);
        write_sized(&mut buf, 0, 8);
        write_sized(&mut buf, UNDEF_ADDR, 8);
        write_sized(&mut buf, eof_address, 8);
        write_sized(&mut buf, root_group_address, 8);
        append_checksum(&mut buf);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_v0(offset_size: u8, root: u64) -> Vec<u8> {
        let mut buf = HDF5_SIGNATURE.to_vec();
        buf.extend_from_slice(&[0, 0, 0, 0, 0, offset_size, offset_size, 0]);
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        write_sized(&mut buf, 0, offset_size);
        write_sized(&mut buf, UNDEF_ADDR, offset_size);
        write_sized(&mut buf, 4096, offset_size);
        write_sized(&mut buf, UNDEF_ADDR, offset_size);
        write_sized(&mut buf, 0, offset_size);
        write_sized(&mut buf, root, offset_size);
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4 + 16]);
        buf
    }

    #[test]
    fn parse_v0_with_four_byte_offsets() {
        let data = build_v0(4, 96);
        let sb = Superblock::parse(&data, 0, true).unwrap();
        assert_eq!(sb.version, 0);
        assert_eq!(sb.offset_size, 4);
        assert_eq!(sb.eof_address, 4096);
        assert_eq!(sb.root_group_address, 96);
        assert_eq!(sb.group_leaf_node_k, Some(4));
        assert_eq!(sb.group_internal_node_k, Some(16));
    }

    #[test]
    fn v2_roundtrip() {
        let bytes = Superblock::serialize_v2(1234, 48);
        assert_eq!(bytes.len(), SUPERBLOCK_V2_SIZE);
        let sb = Superblock::parse(&bytes, 0, true).unwrap();
        assert_eq!(sb.version, 2);
        assert_eq!(sb.eof_address, 1234);
        assert_eq!(sb.root_group_address, 48);
        assert_eq!(sb.extension_address, None);
        assert_eq!(sb.base_address, 0);
    }

    #[test]
    fn v2_corruption_detected_only_when_verifying() {
        let mut bytes = Superblock::serialize_v2(1234, 48);
        bytes[30] ^= 0x01;
        assert!(matches!(
            Superblock::parse(&bytes, 0, true),
            Err(FormatError::ChecksumMismatch { .. })
        ));
        assert!(Superblock::parse(&bytes, 0, false).is_ok());
    }

    #[test]
    fn user_block_offset() {
        let mut data = vec![0u8; 512];
        data.extend_from_slice(&Superblock::serialize_v2(0, 48));
        let sb = Superblock::parse(&data, 512, true).unwrap();
        assert_eq!(sb.base_address, 512);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = Superblock::serialize_v2(0, 48);
        bytes[8] = 9;
        assert_eq!(
            Superblock::parse(&bytes, 0, false),
            Err(FormatError::UnsupportedVersion {
                structure: "superblock",
                version: 9
            })
        );
    }

    #[test]
    fn truncated_input() {
        let bytes = Superblock::serialize_v2(0, 48);
        assert!(matches!(
            Superblock::parse(&bytes[..20], 0, false),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }
}
