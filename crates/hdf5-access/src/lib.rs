//! Typed access to HDF5 container files.
//!
//! Create and reopen containers, navigate groups, allocate n-dimensional
//! numeric datasets with separate logical and allocated extents, and attach
//! typed scalar, array and text attributes to groups and datasets. Every
//! group, dataset and attribute operation holds a scoped handle that is
//! released on every exit path.
//!
//! # Writing
//!
//! ```no_run
//! use hdf5_access::{ContainerFile, DimensionSizes, MatrixDataType, SELF};
//!
//! let file = ContainerFile::create("volume.h5")?;
//! {
//!     let root = file.root_group();
//!     let group = root.create_group("group")?;
//!     let size = DimensionSizes::new(100, 100, 100);
//!     group.create_dataset("data", size, size, MatrixDataType::Float, 0)?;
//!     group.write_string_attribute("data", "units", "kelvin")?;
//!     group.write_attribute(SELF, "frames", 73571u64)?;
//! }
//! file.close()?;
//! # Ok::<(), hdf5_access::Error>(())
//! ```
//!
//! # Reading
//!
//! ```no_run
//! use hdf5_access::{ContainerFile, MatrixDataType};
//!
//! let file = ContainerFile::open("volume.h5")?;
//! let root = file.root_group();
//! let data = root.open_group("group")?.open_dataset("data")?;
//! assert_eq!(data.read_matrix_data_type()?, MatrixDataType::Float);
//! println!("{}", data.dimension_sizes()?);
//! let units: String = data.read_string_attribute("units")?;
//! # Ok::<(), hdf5_access::Error>(())
//! ```

pub mod attribute;
pub mod dataset;
pub mod dimension_sizes;
pub mod error;
pub mod file;
pub mod group;
pub mod handle;
pub mod property_list;
pub mod types;

pub use attribute::{AttributeValue, FromAttributeValue, SELF};
pub use dataset::DatasetHandle;
pub use dimension_sizes::{Axis, DimensionSizes, UNLIMITED};
pub use error::{Error, ErrorKind, Result};
pub use file::ContainerFile;
pub use group::{GroupHandle, GroupInfo, ObjectKind};
pub use handle::{HandleGuard, HandleId, HandleKind};
pub use property_list::{DatasetCreateProps, FileAccessProps};
pub use types::{MatrixDataType, MatrixElement};
