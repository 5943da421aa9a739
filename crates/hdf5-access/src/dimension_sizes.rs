//! Dataset extents in up to four axes.
//!
//! `nx` varies fastest in memory and on disk. HDF5 lists dimensions slowest
//! first, so the native size array is the reverse of the declaration order:
//! `[nz, ny, nx]` for three axes and `[nt, nz, ny, nx]` for four.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};

/// Extent value meaning "may grow without bound".
pub const UNLIMITED: u64 = hdf5_access_format::dataspace::UNLIMITED;

/// One of the four axes of a [`DimensionSizes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
    T,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
            Axis::T => "t",
        })
    }
}

/// Extent of a dataset, `nx` fastest varying. `nt` is `None` for datasets
/// of three or fewer axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DimensionSizes {
    pub nx: u64,
    pub ny: u64,
    pub nz: u64,
    pub nt: Option<u64>,
}

impl DimensionSizes {
    pub const fn new(nx: u64, ny: u64, nz: u64) -> Self {
        DimensionSizes { nx, ny, nz, nt: None }
    }

    pub const fn new_4d(nx: u64, ny: u64, nz: u64, nt: u64) -> Self {
        DimensionSizes {
            nx,
            ny,
            nz,
            nt: Some(nt),
        }
    }

    pub fn is_4d(&self) -> bool {
        self.nt.is_some()
    }

    /// 3 or 4.
    pub fn rank(&self) -> usize {
        if self.is_4d() {
            4
        } else {
            3
        }
    }

    /// Axes present, fastest first.
    pub fn axes(&self) -> &'static [Axis] {
        if self.is_4d() {
            &[Axis::X, Axis::Y, Axis::Z, Axis::T]
        } else {
            &[Axis::X, Axis::Y, Axis::Z]
        }
    }

    /// Extent along `axis`; `None` for `T` on a 3-D size.
    pub fn axis(&self, axis: Axis) -> Option<u64> {
        match axis {
            Axis::X => Some(self.nx),
            Axis::Y => Some(self.ny),
            Axis::Z => Some(self.nz),
            Axis::T => self.nt,
        }
    }

    /// Copy with `axis` set to `value`. Setting `T` makes the size 4-D.
    pub fn with_axis(mut self, axis: Axis, value: u64) -> Self {
        match axis {
            Axis::X => self.nx = value,
            Axis::Y => self.ny = value,
            Axis::Z => self.nz = value,
            Axis::T => self.nt = Some(value),
        }
        self
    }

    /// Product of all present extents, saturating.
    pub fn element_count(&self) -> u64 {
        self.to_native()
            .iter()
            .fold(1u64, |acc, &d| acc.saturating_mul(d))
    }

    /// Native HDF5 size array, slowest first.
    pub fn to_native(&self) -> Vec<u64> {
        match self.nt {
            Some(nt) => vec![nt, self.nz, self.ny, self.nx],
            None => vec![self.nz, self.ny, self.nx],
        }
    }

    /// Inverse of [`to_native`](Self::to_native). Lower-rank arrays pad
    /// the missing slow axes with 1.
    pub fn from_native(dims: &[u64]) -> Result<Self> {
        Ok(match *dims {
            [] => DimensionSizes::new(1, 1, 1),
            [nx] => DimensionSizes::new(nx, 1, 1),
            [ny, nx] => DimensionSizes::new(nx, ny, 1),
            [nz, ny, nx] => DimensionSizes::new(nx, ny, nz),
            [nt, nz, ny, nx] => DimensionSizes::new_4d(nx, ny, nz, nt),
            _ => {
                return Err(Error::dimensions(
                    "dataset",
                    format!("rank {} exceeds the four supported axes", dims.len()),
                ))
            }
        })
    }

    /// Pairs of (axis, self, other) over the axes both sizes share.
    pub(crate) fn zip<'a>(
        &'a self,
        other: &'a DimensionSizes,
    ) -> impl Iterator<Item = (Axis, u64, u64)> + 'a {
        self.axes().iter().filter_map(move |&a| Some((a, self.axis(a)?, other.axis(a)?)))
    }
}

impl fmt::Display for DimensionSizes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: u64| {
            if v == UNLIMITED {
                "unlimited".to_string()
            } else {
                v.to_string()
            }
        };
        write!(f, "({}, {}, {}", show(self.nx), show(self.ny), show(self.nz))?;
        if let Some(nt) = self.nt {
            write!(f, ", {}", show(nt))?;
        }
        write!(f, ")")
    }
}

/// Component-wise order: `a <= b` iff every axis of `a` is `<=` the same
/// axis of `b`. Sizes of different rank, or that disagree in direction,
/// are unordered.
impl PartialOrd for DimensionSizes {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.rank() != other.rank() {
            return None;
        }
        let mut result = Ordering::Equal;
        for (_, a, b) in self.zip(other) {
            match (result, a.cmp(&b)) {
                (_, Ordering::Equal) => {}
                (Ordering::Equal, o) => result = o,
                (r, o) if r != o => return None,
                _ => {}
            }
        }
        Some(result)
    }
}
