//! Binary codec for the HDF5 container format.
//!
//! The low-level modules decode and encode individual structures
//! (superblock, object headers and their messages, B-trees, heaps).
//! [`tree::ObjectTree`] ties them together: it loads a complete file image
//! into an in-memory tree of groups and datasets, and
//! [`file_writer::write_file`] turns such a tree back into a file image.
//!
//! Files are written in the HDF5 1.8 format (version 2 superblock and
//! object headers). Reading also covers the older version 0/1 superblocks,
//! version 1 object headers and symbol-table groups.
//!
//! This crate does no I/O and no logging.

pub mod attribute;
pub mod btree_v1;
pub mod bytes;
pub mod checksum;
pub mod data_layout;
pub mod dataspace;
pub mod datatype;
pub mod error;
pub mod file_writer;
pub mod fill_value;
pub mod filter_pipeline;
pub mod filters;
pub mod global_heap;
pub mod link_info;
pub mod link_message;
pub mod local_heap;
pub mod message_type;
pub mod object_header;
pub mod object_header_writer;
pub mod signature;
pub mod slab;
pub mod superblock;
pub mod symbol_table;
pub mod tree;

pub use error::FormatError;
pub use tree::{Dataset, Group, Link, LinkRef, Node, NodeId, ObjectTree, RawData, Storage};
