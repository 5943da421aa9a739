//! Little-endian field helpers shared by every decoder and encoder.
//!
//! HDF5 stores addresses and lengths with a per-file width (the superblock's
//! "size of offsets" and "size of lengths"), so most fields are read through
//! [`read_sized`] rather than a fixed-width accessor.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;

/// The undefined address: all bits set.
pub const UNDEF_ADDR: u64 = u64::MAX;

/// Fail with `UnexpectedEof` unless `data[pos..pos + needed]` is in bounds.
pub fn ensure_len(data: &[u8], pos: usize, needed: usize) -> Result<(), FormatError> {
    match pos.checked_add(needed) {
        Some(end) if end <= data.len() => Ok(()),
        _ => Err(FormatError::UnexpectedEof {
            expected: pos.saturating_add(needed),
            available: data.len(),
        }),
    }
}

pub fn validate_sizes(offset_size: u8, length_size: u8) -> Result<(), FormatError> {
    if !matches!(offset_size, 2 | 4 | 8) {
        return Err(FormatError::InvalidOffsetSize(offset_size));
    }
    if !matches!(length_size, 2 | 4 | 8) {
        return Err(FormatError::InvalidLengthSize(length_size));
    }
    Ok(())
}

/// Read an unsigned little-endian integer of `size` bytes (1..=8).
///
/// An all-ones address narrower than 8 bytes is widened to [`UNDEF_ADDR`].
pub fn read_sized(data: &[u8], pos: usize, size: u8) -> Result<u64, FormatError> {
    let s = size as usize;
    if s == 0 || s > 8 {
        return Err(FormatError::InvalidOffsetSize(size));
    }
    ensure_len(data, pos, s)?;
    let value = LittleEndian::read_uint(&data[pos..pos + s], s);
    if s < 8 && value == (1u64 << (8 * s)) - 1 {
        return Ok(UNDEF_ADDR);
    }
    Ok(value)
}

/// Like [`read_sized`] but never maps all-ones to [`UNDEF_ADDR`].
pub fn read_uint(data: &[u8], pos: usize, size: usize) -> Result<u64, FormatError> {
    if size == 0 || size > 8 {
        return Err(FormatError::Malformed(format!("integer width {size}")));
    }
    ensure_len(data, pos, size)?;
    Ok(LittleEndian::read_uint(&data[pos..pos + size], size))
}

pub fn read_u8(data: &[u8], pos: usize) -> Result<u8, FormatError> {
    ensure_len(data, pos, 1)?;
    Ok(data[pos])
}

pub fn read_u16(data: &[u8], pos: usize) -> Result<u16, FormatError> {
    ensure_len(data, pos, 2)?;
    Ok(LittleEndian::read_u16(&data[pos..pos + 2]))
}

pub fn read_u32(data: &[u8], pos: usize) -> Result<u32, FormatError> {
    ensure_len(data, pos, 4)?;
    Ok(LittleEndian::read_u32(&data[pos..pos + 4]))
}

pub fn read_u64(data: &[u8], pos: usize) -> Result<u64, FormatError> {
    ensure_len(data, pos, 8)?;
    Ok(LittleEndian::read_u64(&data[pos..pos + 8]))
}

/// Append `value` as a little-endian integer of `size` bytes.
pub fn write_sized(buf: &mut Vec<u8>, value: u64, size: u8) {
    let s = size as usize;
    let bytes = value.to_le_bytes();
    buf.extend_from_slice(&bytes[..s.min(8)]);
}

/// Round `x` up to the next multiple of `align` (a power of two).
pub fn align_up(x: u64, align: u64) -> u64 {
    if align <= 1 {
        return x;
    }
    (x + align - 1) & !(align - 1)
}

/// Round up to the next multiple of 8.
pub fn pad8(x: usize) -> usize {
    (x + 7) & !7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_sized_widths() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(read_sized(&data, 0, 2).unwrap(), 0x0201);
        assert_eq!(read_sized(&data, 0, 4).unwrap(), 0x0403_0201);
        assert_eq!(read_sized(&data, 0, 8).unwrap(), 0x0807_0605_0403_0201);
    }

    #[test]
    fn narrow_undefined_address_widens() {
        let data = [0xff; 4];
        assert_eq!(read_sized(&data, 0, 4).unwrap(), UNDEF_ADDR);
        assert_eq!(read_uint(&data, 0, 4).unwrap(), 0xffff_ffff);
    }

    #[test]
    fn eof_is_reported() {
        let err = read_u32(&[0u8; 3], 0).unwrap_err();
        assert_eq!(
            err,
            FormatError::UnexpectedEof {
                expected: 4,
                available: 3
            }
        );
        assert!(ensure_len(&[0u8; 3], usize::MAX, 2).is_err());
    }

    #[test]
    fn write_sized_truncates_to_width() {
        let mut buf = Vec::new();
        write_sized(&mut buf, 0x1122_3344, 2);
        write_sized(&mut buf, UNDEF_ADDR, 8);
        assert_eq!(&buf[..2], &[0x44, 0x33]);
        assert_eq!(&buf[2..], &[0xff; 8]);
    }

    #[test]
    fn alignment() {
        assert_eq!(align_up(13, 8), 16);
        assert_eq!(align_up(16, 8), 16);
        assert_eq!(align_up(13, 0), 13);
        assert_eq!(pad8(9), 16);
    }
}
