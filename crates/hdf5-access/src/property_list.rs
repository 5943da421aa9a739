//! Property lists for opening files and creating datasets.

use crate::dimension_sizes::{Axis, DimensionSizes};

/// File access properties.
///
/// Controls whether the file may be modified, checksum validation on load,
/// and the alignment of raw data blocks in written files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAccessProps {
    /// Reject every mutation with `InvalidArgument`.
    pub read_only: bool,
    /// Validate lookup3 checksums of v2 metadata on load.
    pub verify_checksums: bool,
    /// Alignment in bytes of raw data blocks (a power of two).
    pub data_alignment: u64,
}

impl Default for FileAccessProps {
    fn default() -> Self {
        Self {
            read_only: false,
            verify_checksums: true,
            data_alignment: 8,
        }
    }
}

impl FileAccessProps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open without write access.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Skip checksum validation, to salvage damaged files.
    pub fn skip_checksums(mut self) -> Self {
        self.verify_checksums = false;
        self
    }

    /// Set raw data alignment in bytes.
    pub fn align(mut self, bytes: u64) -> Self {
        self.data_alignment = bytes;
        self
    }
}

/// Dataset creation properties.
///
/// Controls the growable axis, chunk shape and filters of a new dataset.
/// Unset chunk dimensions are derived from the sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetCreateProps {
    /// Axis that may be extended after creation.
    pub growable_axis: Option<Axis>,
    /// Chunk dimensions (forces chunked storage).
    pub chunk_dims: Option<DimensionSizes>,
    /// Deflate compression level (0-9, 0 disables).
    pub deflate_level: u32,
    /// Shuffle filter before compression.
    pub shuffle: bool,
}

impl DatasetCreateProps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Designate the growable axis.
    pub fn growable(mut self, axis: Axis) -> Self {
        self.growable_axis = Some(axis);
        self
    }

    /// Set chunk dimensions.
    pub fn chunk(mut self, dims: DimensionSizes) -> Self {
        self.chunk_dims = Some(dims);
        self
    }

    /// Set deflate compression level (0-9).
    pub fn deflate(mut self, level: u32) -> Self {
        self.deflate_level = level;
        self
    }

    /// Enable shuffle filter.
    pub fn shuffle(mut self) -> Self {
        self.shuffle = true;
        self
    }

    /// Whether the dataset must use chunked storage.
    pub(crate) fn needs_chunks(&self) -> bool {
        self.growable_axis.is_some()
            || self.chunk_dims.is_some()
            || self.deflate_level > 0
            || self.shuffle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_access_defaults() {
        let p = FileAccessProps::new();
        assert!(!p.read_only);
        assert!(p.verify_checksums);
        assert_eq!(p.data_alignment, 8);
        let p = p.read_only().skip_checksums().align(4096);
        assert!(p.read_only && !p.verify_checksums);
        assert_eq!(p.data_alignment, 4096);
    }

    #[test]
    fn dataset_builders() {
        let p = DatasetCreateProps::new();
        assert!(!p.needs_chunks());
        let p = p.growable(Axis::Z).deflate(4).shuffle();
        assert_eq!(p.growable_axis, Some(Axis::Z));
        assert_eq!(p.deflate_level, 4);
        assert!(p.shuffle && p.needs_chunks());
        assert!(DatasetCreateProps::new()
            .chunk(DimensionSizes::new(8, 8, 1))
            .needs_chunks());
    }
}
