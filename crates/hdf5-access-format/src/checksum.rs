//! HDF5 metadata checksum: Jenkins lookup3 `hashlittle`.
//!
//! Version 2 superblocks, version 2 object headers and most other "new
//! style" metadata blocks end in a 4-byte lookup3 hash of everything that
//! precedes it in the block.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;

/// Jenkins lookup3 hash of `data` with a zero seed.
pub fn jenkins_lookup3(data: &[u8]) -> u32 {
    let mut a = 0xdead_beefu32.wrapping_add(data.len() as u32);
    let mut b = a;
    let mut c = a;

    if data.is_empty() {
        return c;
    }

    // Every 12-byte block but the last goes through `mix`; the last block
    // (1..=12 bytes, zero padded) goes through `final_mix`.
    let mut rest = data;
    while rest.len() > 12 {
        a = a.wrapping_add(LittleEndian::read_u32(&rest[0..4]));
        b = b.wrapping_add(LittleEndian::read_u32(&rest[4..8]));
        c = c.wrapping_add(LittleEndian::read_u32(&rest[8..12]));
        mix(&mut a, &mut b, &mut c);
        rest = &rest[12..];
    }

    let mut tail = [0u8; 12];
    tail[..rest.len()].copy_from_slice(rest);
    a = a.wrapping_add(LittleEndian::read_u32(&tail[0..4]));
    b = b.wrapping_add(LittleEndian::read_u32(&tail[4..8]));
    c = c.wrapping_add(LittleEndian::read_u32(&tail[8..12]));
    final_mix(&mut a, &mut b, &mut c);
    c
}

/// Check that the last four bytes of `block` are the lookup3 hash of the rest.
pub fn verify_trailing_checksum(block: &[u8]) -> Result<(), FormatError> {
    if block.len() < 4 {
        return Err(FormatError::UnexpectedEof {
            expected: 4,
            available: block.len(),
        });
    }
    let split = block.len() - 4;
    let expected = LittleEndian::read_u32(&block[split..]);
    let computed = jenkins_lookup3(&block[..split]);
    if expected != computed {
        return Err(FormatError::ChecksumMismatch { expected, computed });
    }
    Ok(())
}

/// Append the lookup3 hash of `buf` to `buf`.
pub fn append_checksum(buf: &mut Vec<u8>) {
    let sum = jenkins_lookup3(buf);
    buf.extend_from_slice(&sum.to_le_bytes());
}

fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(4);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(6);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(8);
    *b = b.wrapping_add(*a);
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(16);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(19);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(4);
    *b = b.wrapping_add(*a);
}

fn final_mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(14));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(11));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(25));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(16));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(4));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(14));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(24));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_seed() {
        assert_eq!(jenkins_lookup3(b""), 0xdead_beef);
    }

    #[test]
    fn reference_vector() {
        // Test vector published with lookup3.c.
        assert_eq!(
            jenkins_lookup3(b"Four score and seven years ago"),
            0x1777_0551
        );
    }

    #[test]
    fn every_tail_length_is_distinct() {
        let mut seen = std::collections::HashSet::new();
        for len in 0..=25 {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            assert!(seen.insert(jenkins_lookup3(&data)), "collision at {len}");
        }
    }

    #[test]
    fn append_then_verify() {
        let mut block = b"OHDR\x02\x00".to_vec();
        append_checksum(&mut block);
        verify_trailing_checksum(&block).unwrap();

        block[4] = 3;
        assert!(matches!(
            verify_trailing_checksum(&block),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }
}
