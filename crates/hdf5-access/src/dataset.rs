//! Creating, opening and accessing n-dimensional datasets.
//!
//! A dataset has a logical extent (the elements that currently exist) and
//! an allocated extent (how far it may grow). Datasets whose two extents
//! agree and that are not compressed are stored contiguously. All others
//! are chunked, which the format requires for resizable or filtered data.

use std::fmt;

use hdf5_access_format::dataspace::Dataspace;
use hdf5_access_format::filter_pipeline::FilterPipeline;
use hdf5_access_format::slab::{byte_len, element_count};
use hdf5_access_format::{Dataset, Node, NodeId, ObjectTree, Storage};
use tracing::debug;

use crate::dimension_sizes::{Axis, DimensionSizes, UNLIMITED};
use crate::error::{Error, Result};
use crate::file::ContainerFile;
use crate::group::{validate_name, GroupHandle};
use crate::handle::{HandleGuard, HandleKind};
use crate::property_list::DatasetCreateProps;
use crate::types::{decode_elements, describe, encode_elements, MatrixDataType, MatrixElement};

/// Default chunk shapes are shrunk until a chunk holds at most this many bytes.
const MAX_DEFAULT_CHUNK_BYTES: u64 = 1 << 20;

const MAX_DEFLATE_LEVEL: u32 = 9;

impl<'f> GroupHandle<'f> {
    /// Create a dataset named `name`.
    ///
    /// The growable axis is the one whose allocated extent is [`UNLIMITED`],
    /// or failing that the only axis whose allocated extent exceeds the
    /// logical one. `compression_level` 0 disables deflate; 1 to 9 select
    /// its level.
    pub fn create_dataset(
        &self,
        name: &str,
        logical: DimensionSizes,
        allocated: DimensionSizes,
        data_type: MatrixDataType,
        compression_level: u32,
    ) -> Result<DatasetHandle<'f>> {
        let mut props = DatasetCreateProps::new().deflate(compression_level);
        if let Some(axis) = infer_growable_axis(&logical, &allocated) {
            props = props.growable(axis);
        }
        self.create_dataset_with(name, logical, allocated, data_type, &props)
    }

    /// Create a dataset with explicit creation properties.
    pub fn create_dataset_with(
        &self,
        name: &str,
        logical: DimensionSizes,
        allocated: DimensionSizes,
        data_type: MatrixDataType,
        props: &DatasetCreateProps,
    ) -> Result<DatasetHandle<'f>> {
        validate_name(name)?;
        self.file.check_writable()?;
        self.check_free(name)?;
        let path = self.child_path(name);

        let storage = plan_storage(&path, &logical, &allocated, data_type, props)?;
        let dataspace = Dataspace::simple(&logical.to_native(), Some(&allocated.to_native()));
        let dataset = Dataset::new(data_type.datatype(), dataspace, storage);
        let node = self
            .file
            .modify(|tree| Ok(tree.insert_child(self.node, name, Node::Dataset(dataset))?))?;
        debug!(
            path = %path,
            %logical,
            %allocated,
            %data_type,
            chunked = logical != allocated || props.needs_chunks(),
            "created dataset"
        );
        Ok(DatasetHandle::opened(self.file, node, path))
    }

    /// Open the child dataset named `name`. Soft links are followed.
    pub fn open_dataset(&self, name: &str) -> Result<DatasetHandle<'f>> {
        validate_name(name)?;
        let path = self.child_path(name);
        let node = {
            let tree = self.file.tree();
            let id = self.resolve_in(&tree, name)?;
            if tree.dataset(id).is_none() {
                return Err(Error::ObjectNotFound(format!("dataset '{path}'")));
            }
            id
        };
        Ok(DatasetHandle::opened(self.file, node, path))
    }

    /// Logical extent of the child dataset `name`.
    pub fn get_dataset_dimension_sizes(&self, name: &str) -> Result<DimensionSizes> {
        self.open_dataset(name)?.dimension_sizes()
    }

    /// Number of axes of the child dataset `name` as stored in the file.
    pub fn get_dataset_number_of_dimensions(&self, name: &str) -> Result<usize> {
        self.open_dataset(name)?.number_of_dimensions()
    }
}

fn infer_growable_axis(logical: &DimensionSizes, allocated: &DimensionSizes) -> Option<Axis> {
    if let Some((axis, _, _)) = logical.zip(allocated).find(|&(_, _, a)| a == UNLIMITED) {
        return Some(axis);
    }
    let mut larger = logical.zip(allocated).filter(|&(_, l, a)| a > l);
    match (larger.next(), larger.next()) {
        (Some((axis, _, _)), None) => Some(axis),
        _ => None,
    }
}

/// Validate the requested extents and pick the storage layout.
fn plan_storage(
    path: &str,
    logical: &DimensionSizes,
    allocated: &DimensionSizes,
    data_type: MatrixDataType,
    props: &DatasetCreateProps,
) -> Result<Storage> {
    if logical.rank() != allocated.rank() {
        return Err(Error::dimensions(
            path,
            format!("logical size {logical} and allocated size {allocated} differ in rank"),
        ));
    }
    if props.deflate_level > MAX_DEFLATE_LEVEL {
        return Err(Error::dimensions(
            path,
            format!(
                "compression level {} is outside 0..={MAX_DEFLATE_LEVEL}",
                props.deflate_level
            ),
        ));
    }
    let growable = props.growable_axis;
    if let Some(axis) = growable {
        if logical.axis(axis).is_none() {
            return Err(Error::dimensions(
                path,
                format!("growable axis {axis} is not an axis of {logical}"),
            ));
        }
    }
    for (axis, l, a) in logical.zip(allocated) {
        let is_growable = growable == Some(axis);
        if l == UNLIMITED {
            return Err(Error::dimensions(path, format!("logical {axis} extent is unlimited")));
        }
        if a == 0 || (l == 0 && !is_growable) {
            return Err(Error::dimensions(
                path,
                format!("{axis} extent is zero (logical {logical}, allocated {allocated})"),
            ));
        }
        if a == UNLIMITED {
            if !is_growable {
                return Err(Error::dimensions(
                    path,
                    format!("only the growable axis may be unlimited, not {axis}"),
                ));
            }
        } else if a < l {
            return Err(Error::dimensions(
                path,
                format!("allocated {axis} extent {a} is below logical extent {l}"),
            ));
        } else if a != l && !is_growable {
            return Err(Error::dimensions(
                path,
                format!("{axis} is not the growable axis, so its allocated extent {a} must equal {l}"),
            ));
        }
    }
    let element_size = data_type.element_size();
    fits_in_memory(path, &logical.to_native(), element_size)?;
    let reachable: Vec<u64> = logical
        .zip(allocated)
        .map(|(_, l, a)| if a == UNLIMITED { l } else { a })
        .collect();
    fits_in_memory(path, &reachable, element_size)?;

    if logical == allocated && !props.needs_chunks() {
        return Ok(Storage::Contiguous);
    }

    let chunk = match props.chunk_dims {
        Some(chunk) => {
            if chunk.rank() != logical.rank() {
                return Err(Error::dimensions(
                    path,
                    format!("chunk {chunk} and size {logical} differ in rank"),
                ));
            }
            for (axis, c, a) in chunk.zip(allocated) {
                if c == 0 || c == UNLIMITED || (a != UNLIMITED && c > a) {
                    return Err(Error::dimensions(
                        path,
                        format!("chunk {axis} extent {c} does not fit allocated size {allocated}"),
                    ));
                }
            }
            chunk
        }
        None => default_chunk(logical, growable, element_size),
    };
    let chunk_bytes = fits_in_memory(path, &chunk.to_native(), element_size)?;
    if chunk_bytes > u32::MAX as usize {
        return Err(Error::dimensions(path, format!("chunk {chunk} is larger than 4 GiB")));
    }

    let mut pipeline = FilterPipeline::new();
    if props.shuffle {
        pipeline = pipeline.with_shuffle(data_type.element_size() as u32);
    }
    if props.deflate_level > 0 {
        pipeline = pipeline.with_deflate(props.deflate_level);
    }
    Ok(Storage::Chunked {
        chunk_dims: chunk.to_native(),
        pipeline,
    })
}

/// Bytes an extent of `element_size` elements needs in memory, or
/// `InvalidDimensions` when that overflows.
fn fits_in_memory(path: &str, native: &[u64], element_size: usize) -> Result<usize> {
    byte_len(native, element_size).map_err(|_| {
        Error::dimensions(
            path,
            format!("{native:?} elements of {element_size} bytes overflow the address space"),
        )
    })
}

/// One element deep along the growable axis and the full logical extent
/// elsewhere, with the slowest axes halved until the chunk fits in
/// [`MAX_DEFAULT_CHUNK_BYTES`].
fn default_chunk(logical: &DimensionSizes, growable: Option<Axis>, element_size: usize) -> DimensionSizes {
    let mut chunk = *logical;
    for &axis in logical.axes() {
        let extent = if growable == Some(axis) {
            1
        } else {
            logical.axis(axis).unwrap_or(1).max(1)
        };
        chunk = chunk.with_axis(axis, extent);
    }
    let slowest_first: Vec<Axis> = chunk.axes().iter().rev().copied().collect();
    while chunk.element_count().saturating_mul(element_size as u64) > MAX_DEFAULT_CHUNK_BYTES {
        let Some(axis) = slowest_first
            .iter()
            .copied()
            .find(|&a| chunk.axis(a).unwrap_or(1) > 1)
        else {
            break;
        };
        let extent = chunk.axis(axis).unwrap_or(1);
        chunk = chunk.with_axis(axis, extent.div_ceil(2));
    }
    chunk
}

/// Drop leading padding from a [`DimensionSizes::to_native`] array so it
/// matches a dataset of `rank` axes. The dropped entries must equal `pad`.
fn fit_rank(native: Vec<u64>, rank: usize, pad: u64) -> Option<Vec<u64>> {
    if native.len() < rank {
        return None;
    }
    let extra = native.len() - rank;
    if native[..extra].iter().any(|&v| v != pad) {
        return None;
    }
    Some(native[extra..].to_vec())
}

// ---------------------------------------------------------------------------
// Dataset handle
// ---------------------------------------------------------------------------

/// An open dataset of a [`ContainerFile`].
pub struct DatasetHandle<'f> {
    pub(crate) file: &'f ContainerFile,
    pub(crate) node: NodeId,
    pub(crate) path: String,
    _guard: HandleGuard<'f>,
}

impl<'f> DatasetHandle<'f> {
    fn opened(file: &'f ContainerFile, node: NodeId, path: String) -> Self {
        let guard = HandleGuard::acquire(file, HandleKind::Dataset, &path);
        DatasetHandle {
            file,
            node,
            path,
            _guard: guard,
        }
    }

    /// Release this handle.
    pub fn close(self) {}

    /// Current logical extent.
    pub fn dimension_sizes(&self) -> Result<DimensionSizes> {
        let tree = self.file.tree();
        DimensionSizes::from_native(&self.dataset_in(&tree)?.dataspace.dimensions)
    }

    /// Maximum extent; [`UNLIMITED`] on an unlimited axis.
    pub fn allocated_dimension_sizes(&self) -> Result<DimensionSizes> {
        let tree = self.file.tree();
        DimensionSizes::from_native(self.dataset_in(&tree)?.dataspace.max_dims())
    }

    /// Number of axes as stored in the file.
    pub fn number_of_dimensions(&self) -> Result<usize> {
        let tree = self.file.tree();
        Ok(self.dataset_in(&tree)?.dataspace.rank())
    }

    pub fn element_count(&self) -> Result<u64> {
        let tree = self.file.tree();
        Ok(self.dataset_in(&tree)?.dataspace.num_elements()?)
    }

    /// Element kind of the stored data.
    pub fn read_matrix_data_type(&self) -> Result<MatrixDataType> {
        let tree = self.file.tree();
        let ds = self.dataset_in(&tree)?;
        MatrixDataType::from_datatype(&ds.datatype)
            .ok_or_else(|| Error::type_mismatch(&self.path, "a matrix element type", describe(&ds.datatype)))
    }

    /// Deflate level, 0 when uncompressed.
    pub fn compression_level(&self) -> Result<u32> {
        let tree = self.file.tree();
        Ok(match &self.dataset_in(&tree)?.storage {
            Storage::Chunked { pipeline, .. } => pipeline.deflate_level(),
            Storage::Contiguous => 0,
        })
    }

    pub fn is_chunked(&self) -> Result<bool> {
        let tree = self.file.tree();
        Ok(matches!(self.dataset_in(&tree)?.storage, Storage::Chunked { .. }))
    }

    /// Chunk shape, `None` for contiguous datasets.
    pub fn chunk_dimensions(&self) -> Result<Option<DimensionSizes>> {
        let tree = self.file.tree();
        match &self.dataset_in(&tree)?.storage {
            Storage::Chunked { chunk_dims, .. } => DimensionSizes::from_native(chunk_dims).map(Some),
            Storage::Contiguous => Ok(None),
        }
    }

    /// Change the logical extent within the allocated extent. Elements
    /// inside both the old and the new extent keep their coordinates; new
    /// elements hold the fill value.
    pub fn set_extent(&self, new_size: DimensionSizes) -> Result<()> {
        self.file.check_writable()?;
        let native = {
            let tree = self.file.tree();
            let ds = self.dataset_in(&tree)?;
            if !matches!(ds.storage, Storage::Chunked { .. }) {
                return Err(Error::dimensions(
                    &self.path,
                    "contiguous datasets have a fixed extent",
                ));
            }
            let rank = ds.dataspace.rank();
            let native = fit_rank(new_size.to_native(), rank, 1).ok_or_else(|| {
                Error::dimensions(&self.path, format!("{new_size} does not fit a dataset of {rank} axes"))
            })?;
            if native.iter().zip(ds.dataspace.max_dims()).any(|(n, m)| n > m) {
                let allocated = DimensionSizes::from_native(ds.dataspace.max_dims())?;
                return Err(Error::dimensions(
                    &self.path,
                    format!("{new_size} exceeds allocated size {allocated}"),
                ));
            }
            fits_in_memory(&self.path, &native, ds.element_size())?;
            native
        };
        self.file.modify(|tree| {
            let ds = tree
                .dataset_mut(self.node)
                .ok_or_else(|| self.missing())?;
            Ok(ds.resize(&native)?)
        })?;
        debug!(path = %self.path, %new_size, "resized dataset");
        Ok(())
    }

    /// Write `values` into the block of size `block` at `offset`.
    /// `values` is ordered with `nx` varying fastest.
    pub fn write_hyperslab<T: MatrixElement>(
        &self,
        offset: DimensionSizes,
        block: DimensionSizes,
        values: &[T],
    ) -> Result<()> {
        self.file.check_writable()?;
        let (start, count) = {
            let tree = self.file.tree();
            let ds = self.dataset_in(&tree)?;
            self.check_element::<T>(ds)?;
            self.selection(ds, &offset, &block)?
        };
        let expected = element_count(&count);
        if expected != Some(values.len() as u64) {
            return Err(Error::selection(
                &self.path,
                format!("{} values given for a block of {count:?} elements", values.len()),
            ));
        }
        let bytes = encode_elements(values);
        self.file.modify(|tree| {
            let ds = tree
                .dataset_mut(self.node)
                .ok_or_else(|| self.missing())?;
            Ok(ds.write_block(&start, &count, &bytes)?)
        })
    }

    /// Read the block of size `block` at `offset`, `nx` varying fastest.
    pub fn read_hyperslab<T: MatrixElement>(
        &self,
        offset: DimensionSizes,
        block: DimensionSizes,
    ) -> Result<Vec<T>> {
        let tree = self.file.tree();
        let ds = self.dataset_in(&tree)?;
        self.check_element::<T>(ds)?;
        let (start, count) = self.selection(ds, &offset, &block)?;
        Ok(decode_elements(&ds.read_block(&start, &count)?))
    }

    /// Every element of the logical extent, `nx` varying fastest.
    pub fn read_complete_dataset<T: MatrixElement>(&self) -> Result<Vec<T>> {
        let tree = self.file.tree();
        let ds = self.dataset_in(&tree)?;
        self.check_element::<T>(ds)?;
        Ok(decode_elements(&ds.read_all()?))
    }

    /// Replace every element of the logical extent.
    pub fn write_complete_dataset<T: MatrixElement>(&self, values: &[T]) -> Result<()> {
        self.file.check_writable()?;
        let expected = {
            let tree = self.file.tree();
            let ds = self.dataset_in(&tree)?;
            self.check_element::<T>(ds)?;
            ds.dataspace.num_elements()?
        };
        if values.len() as u64 != expected {
            return Err(Error::selection(
                &self.path,
                format!("{} values given for {expected} elements", values.len()),
            ));
        }
        let bytes = encode_elements(values);
        self.file.modify(|tree| {
            let ds = tree
                .dataset_mut(self.node)
                .ok_or_else(|| self.missing())?;
            Ok(ds.write_all(&bytes)?)
        })
    }

    /// Last component of the path.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Absolute path of this dataset.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn file(&self) -> &'f ContainerFile {
        self.file
    }

    pub(crate) fn dataset_in<'t>(&self, tree: &'t ObjectTree) -> Result<&'t Dataset> {
        tree.dataset(self.node).ok_or_else(|| self.missing())
    }

    fn missing(&self) -> Error {
        Error::ObjectNotFound(format!("dataset '{}'", self.path))
    }

    /// `T` must be the stored element kind; `u8` also reads text datasets.
    fn check_element<T: MatrixElement>(&self, ds: &Dataset) -> Result<()> {
        match MatrixDataType::from_datatype(&ds.datatype) {
            Some(stored) if stored == T::DATA_TYPE => Ok(()),
            Some(MatrixDataType::Char) if T::DATA_TYPE == MatrixDataType::UInt8 => Ok(()),
            _ => Err(Error::type_mismatch(&self.path, T::DATA_TYPE, describe(&ds.datatype))),
        }
    }

    /// Native (start, count) arrays of a hyperslab inside the logical extent.
    fn selection(
        &self,
        ds: &Dataset,
        offset: &DimensionSizes,
        block: &DimensionSizes,
    ) -> Result<(Vec<u64>, Vec<u64>)> {
        let dims = &ds.dataspace.dimensions;
        if offset.rank() != block.rank() {
            return Err(Error::selection(
                &self.path,
                format!("offset {offset} and block {block} differ in rank"),
            ));
        }
        let rank = dims.len();
        let start = fit_rank(offset.to_native(), rank, 0);
        let count = fit_rank(block.to_native(), rank, 1);
        let (Some(start), Some(count)) = (start, count) else {
            return Err(Error::selection(
                &self.path,
                format!("offset {offset} block {block} does not fit a dataset of {rank} axes"),
            ));
        };
        let inside = start
            .iter()
            .zip(&count)
            .zip(dims)
            .all(|((s, c), d)| s.checked_add(*c).is_some_and(|end| end <= *d));
        if !inside {
            let extent = DimensionSizes::from_native(dims)?;
            return Err(Error::selection(
                &self.path,
                format!("offset {offset} block {block} exceeds extent {extent}"),
            ));
        }
        Ok((start, count))
    }
}

impl fmt::Debug for DatasetHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetHandle")
            .field("path", &self.path)
            .field("node", &self.node)
            .finish()
    }
}
