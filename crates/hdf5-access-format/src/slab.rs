//! Copying rectangular blocks between row-major element buffers.
//!
//! Chunk assembly, chunk splitting, extent changes and hyperslab I/O all
//! reduce to copying a block of `count` elements from one n-dimensional
//! buffer to another.

use crate::error::FormatError;

/// A row-major buffer view: its shape and the element width.
#[derive(Debug, Clone, Copy)]
pub struct Layout<'a> {
    pub dims: &'a [u64],
    pub element_size: usize,
}

/// Number of elements in an extent, `None` on overflow.
pub fn element_count(dims: &[u64]) -> Option<u64> {
    dims.iter().try_fold(1u64, |n, &d| n.checked_mul(d))
}

/// Bytes needed to hold an extent of `element_size` elements in memory.
pub fn byte_len(dims: &[u64], element_size: usize) -> Result<usize, FormatError> {
    element_count(dims)
        .and_then(|n| n.checked_mul(element_size as u64))
        .and_then(|n| usize::try_from(n).ok())
        .filter(|&n| n <= isize::MAX as usize)
        .ok_or_else(|| {
            FormatError::Malformed(format!(
                "extent {dims:?} of {element_size}-byte elements overflows the address space"
            ))
        })
}

/// A buffer of `len` bytes repeating `pattern`, or an error when the
/// allocation cannot be made.
pub fn filled_buffer(len: usize, pattern: &[u8]) -> Result<Vec<u8>, FormatError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| FormatError::AllocationFailed(len as u64))?;
    if pattern.iter().all(|&b| b == 0) {
        buf.resize(len, 0);
    } else {
        buf.extend(pattern.iter().copied().cycle().take(len));
    }
    Ok(buf)
}

impl Layout<'_> {
    fn byte_len(&self) -> Option<u64> {
        element_count(self.dims)?.checked_mul(self.element_size as u64)
    }

    fn offset_of(&self, index: &[u64]) -> usize {
        let mut linear = 0u64;
        for (i, d) in index.iter().zip(self.dims) {
            linear = linear * d + i;
        }
        linear as usize * self.element_size
    }
}

fn check(layout: &Layout<'_>, buf_len: usize, start: &[u64], count: &[u64]) -> Result<(), FormatError> {
    if start.len() != layout.dims.len() || count.len() != layout.dims.len() {
        return Err(FormatError::Malformed(format!(
            "block rank {} does not match buffer rank {}",
            start.len(),
            layout.dims.len()
        )));
    }
    let expected = layout.byte_len();
    if expected != Some(buf_len as u64) {
        return Err(FormatError::DataSizeMismatch {
            expected: expected.map_or(usize::MAX, |n| n as usize),
            actual: buf_len,
        });
    }
    for ((s, c), d) in start.iter().zip(count).zip(layout.dims) {
        if s.checked_add(*c).map_or(true, |end| end > *d) {
            return Err(FormatError::Malformed(format!(
                "block {s}+{c} exceeds extent {d}"
            )));
        }
    }
    Ok(())
}

/// Copy the `count` block at `src_start` in `src` to `dst_start` in `dst`.
pub fn copy_block(
    src: &[u8],
    src_layout: Layout<'_>,
    src_start: &[u64],
    dst: &mut [u8],
    dst_layout: Layout<'_>,
    dst_start: &[u64],
    count: &[u64],
) -> Result<(), FormatError> {
    if src_layout.element_size != dst_layout.element_size {
        return Err(FormatError::Malformed("element size mismatch".into()));
    }
    check(&src_layout, src.len(), src_start, count)?;
    check(&dst_layout, dst.len(), dst_start, count)?;
    if count.iter().any(|&c| c == 0) {
        return Ok(());
    }

    let rank = count.len();
    if rank == 0 {
        let n = src_layout.element_size;
        dst[..n].copy_from_slice(&src[..n]);
        return Ok(());
    }

    let row = count[rank - 1] as usize * src_layout.element_size;
    let mut index = vec![0u64; rank];
    let mut s_idx = vec![0u64; rank];
    let mut d_idx = vec![0u64; rank];
    loop {
        for d in 0..rank {
            s_idx[d] = src_start[d] + index[d];
            d_idx[d] = dst_start[d] + index[d];
        }
        let s = src_layout.offset_of(&s_idx);
        let t = dst_layout.offset_of(&d_idx);
        dst[t..t + row].copy_from_slice(&src[s..s + row]);

        // Odometer over every axis but the last.
        let mut axis = rank - 1;
        loop {
            if axis == 0 {
                return Ok(());
            }
            axis -= 1;
            index[axis] += 1;
            if index[axis] < count[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
}

/// Set every element of the `count` block at `start` in `dst` to `pattern`.
pub fn fill_block(
    dst: &mut [u8],
    layout: Layout<'_>,
    start: &[u64],
    count: &[u64],
    pattern: &[u8],
) -> Result<(), FormatError> {
    if pattern.len() != layout.element_size {
        return Err(FormatError::Malformed("fill pattern size mismatch".into()));
    }
    check(&layout, dst.len(), start, count)?;
    if count.iter().any(|&c| c == 0) {
        return Ok(());
    }
    let rank = count.len();
    if rank == 0 {
        dst[..pattern.len()].copy_from_slice(pattern);
        return Ok(());
    }

    let row = count[rank - 1] as usize;
    let mut index = vec![0u64; rank];
    let mut d_idx = vec![0u64; rank];
    loop {
        for d in 0..rank {
            d_idx[d] = start[d] + index[d];
        }
        let t = layout.offset_of(&d_idx);
        for element in dst[t..t + row * pattern.len()].chunks_exact_mut(pattern.len()) {
            element.copy_from_slice(pattern);
        }

        let mut axis = rank - 1;
        loop {
            if axis == 0 {
                return Ok(());
            }
            axis -= 1;
            index[axis] += 1;
            if index[axis] < count[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(range: std::ops::Range<u8>) -> Vec<u8> {
        range.collect()
    }

    #[test]
    fn copies_interior_block_2d() {
        // 4x5 source, take rows 1..3, cols 2..5
        let src = bytes(0..20);
        let mut dst = vec![0u8; 6];
        copy_block(
            &src,
            Layout { dims: &[4, 5], element_size: 1 },
            &[1, 2],
            &mut dst,
            Layout { dims: &[2, 3], element_size: 1 },
            &[0, 0],
            &[2, 3],
        )
        .unwrap();
        assert_eq!(dst, vec![7, 8, 9, 12, 13, 14]);
    }

    #[test]
    fn multi_byte_elements_3d() {
        let src: Vec<u8> = (0..8u16).flat_map(|v| v.to_le_bytes()).collect();
        let mut dst = vec![0u8; 2 * 27];
        copy_block(
            &src,
            Layout { dims: &[2, 2, 2], element_size: 2 },
            &[0, 0, 0],
            &mut dst,
            Layout { dims: &[3, 3, 3], element_size: 2 },
            &[1, 1, 1],
            &[2, 2, 2],
        )
        .unwrap();
        let at = |z: usize, y: usize, x: usize| {
            let i = 2 * (z * 9 + y * 3 + x);
            u16::from_le_bytes([dst[i], dst[i + 1]])
        };
        assert_eq!(at(1, 1, 1), 0);
        assert_eq!(at(1, 1, 2), 1);
        assert_eq!(at(2, 2, 2), 7);
        assert_eq!(at(0, 0, 0), 0);
    }

    #[test]
    fn out_of_bounds_block_is_rejected() {
        let src = bytes(0..4);
        let mut dst = vec![0u8; 4];
        let layout = Layout { dims: &[4], element_size: 1 };
        assert!(copy_block(&src, layout, &[2], &mut dst, layout, &[0], &[3]).is_err());
    }

    #[test]
    fn empty_block_is_a_no_op() {
        let src = bytes(0..4);
        let mut dst = vec![9u8; 4];
        let layout = Layout { dims: &[4], element_size: 1 };
        copy_block(&src, layout, &[0], &mut dst, layout, &[0], &[0]).unwrap();
        assert_eq!(dst, vec![9; 4]);
    }

    #[test]
    fn fill_block_sets_pattern() {
        let mut dst = vec![0u8; 12];
        let layout = Layout { dims: &[2, 3], element_size: 2 };
        fill_block(&mut dst, layout, &[1, 1], &[1, 2], &[0xab, 0xcd]).unwrap();
        assert_eq!(dst, vec![0, 0, 0, 0, 0, 0, 0, 0, 0xab, 0xcd, 0xab, 0xcd]);
    }

    #[test]
    fn overflowing_extents_are_errors() {
        assert_eq!(element_count(&[1 << 22, 1 << 22, 1 << 22]), None);
        assert!(byte_len(&[1 << 22, 1 << 22, 1 << 22], 4).is_err());
        assert_eq!(byte_len(&[3, 4], 2).unwrap(), 24);
        let layout = Layout { dims: &[u64::MAX, 4], element_size: 1 };
        let mut dst = vec![0u8; 4];
        assert!(fill_block(&mut dst, layout, &[0, 0], &[1, 1], &[1]).is_err());
    }

    #[test]
    fn filled_buffer_repeats_pattern() {
        assert_eq!(filled_buffer(6, &[1, 2]).unwrap(), vec![1, 2, 1, 2, 1, 2]);
        assert_eq!(filled_buffer(3, &[0]).unwrap(), vec![0; 3]);
        assert!(matches!(
            filled_buffer(isize::MAX as usize, &[0]),
            Err(FormatError::AllocationFailed(_))
        ));
    }
}
