//! HDF5 file signature (magic bytes) detection.

use crate::error::FormatError;

/// The 8-byte HDF5 magic signature.
pub const HDF5_SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1A, b'\n'];

/// Locate the superblock signature.
///
/// A user block may precede the superblock, so the signature can sit at
/// offset 0 or at 512, 1024, 2048, ... bytes.
pub fn find_signature(data: &[u8]) -> Result<usize, FormatError> {
    core::iter::once(0usize)
        .chain(core::iter::successors(Some(512usize), |o| o.checked_mul(2)))
        .take_while(|&o| o.saturating_add(HDF5_SIGNATURE.len()) <= data.len())
        .find(|&o| data[o..o + HDF5_SIGNATURE.len()] == HDF5_SIGNATURE)
        .ok_or(FormatError::SignatureNotFound)
}

/// Whether `prefix` (the first bytes of a file) begins with the signature.
pub fn has_signature(prefix: &[u8]) -> bool {
    prefix.starts_with(&HDF5_SIGNATURE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_signature_at(len: usize, at: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        data[at..at + 8].copy_from_slice(&HDF5_SIGNATURE);
        data
    }

    #[test]
    fn found_at_valid_offsets() {
        assert_eq!(find_signature(&with_signature_at(64, 0)), Ok(0));
        assert_eq!(find_signature(&with_signature_at(1024, 512)), Ok(512));
        assert_eq!(find_signature(&with_signature_at(4096, 2048)), Ok(2048));
    }

    #[test]
    fn not_found_at_arbitrary_offset() {
        let data = with_signature_at(1024, 100);
        assert_eq!(find_signature(&data), Err(FormatError::SignatureNotFound));
    }

    #[test]
    fn not_found_in_short_or_empty_input() {
        assert_eq!(find_signature(&[]), Err(FormatError::SignatureNotFound));
        assert_eq!(
            find_signature(&[0x89, b'H', b'D']),
            Err(FormatError::SignatureNotFound)
        );
    }

    #[test]
    fn signature_at_prefix_offsets() {
        assert!(has_signature(&with_signature_at(8, 0)));
        assert!(!has_signature(b"\x89HDF"));
    }
}
