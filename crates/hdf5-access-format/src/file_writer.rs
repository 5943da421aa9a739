//! Serialize an [`ObjectTree`] into a complete HDF5 file image.
//!
//! Object headers hold fixed-width addresses, so their encoded length does
//! not depend on where anything lands. The writer therefore encodes every
//! header once with placeholder addresses to learn its size, assigns final
//! addresses, and encodes again.
//!
//! Layout of the output: superblock, object headers (in breadth-first
//! order from the root), the global heap collection holding variable-length
//! strings, then raw data and chunk B-trees.

use std::collections::{BTreeMap, HashMap};

use crate::attribute::{AttributeData, AttributeMessage};
use crate::btree_v1::{chunk_node_size, chunk_tree_node_count, serialize_chunk_tree, ChunkRecord};
use crate::bytes::align_up;
use crate::data_layout::{ChunkIndexKind, DataLayout};
use crate::error::FormatError;
use crate::fill_value::{self, AllocTime};
use crate::filter_pipeline::FilterPipeline;
use crate::filters::compress_chunk;
use crate::global_heap::{GlobalHeapWriter, VlReference};
use crate::link_info::{serialize_group_info, LinkInfoMessage};
use crate::link_message::{LinkMessage, LinkTarget};
use crate::message_type::MessageType;
use crate::object_header_writer::{ObjectHeaderWriter, MSG_FLAG_CONSTANT};
use crate::slab::element_count;
use crate::superblock::{Superblock, SUPERBLOCK_V2_SIZE};
use crate::tree::{Dataset, Group, LinkRef, Node, NodeId, ObjectTree, RawData, Storage};

/// Alignment of object headers and B-tree nodes.
const METADATA_ALIGNMENT: u64 = 8;

/// Raw data of one dataset, ready to place.
enum Placed<'a> {
    Contiguous(&'a [u8]),
    /// Stored (filtered) chunks with their element offsets, and the chunk
    /// shape. Chunks holding only the fill value are left out.
    Chunked {
        chunks: Vec<(Vec<u64>, Vec<u8>)>,
        chunk_dims: Vec<u64>,
    },
}

/// Final addresses. Lookups that miss yield 0, which is what the sizing
/// pass wants.
#[derive(Default)]
struct Placement {
    headers: HashMap<NodeId, u64>,
    global_heap: u64,
    contiguous: HashMap<NodeId, u64>,
    chunks: HashMap<NodeId, Vec<u64>>,
    btrees: HashMap<NodeId, u64>,
}

impl Placement {
    fn header(&self, id: NodeId) -> u64 {
        self.headers.get(&id).copied().unwrap_or(0)
    }
}

/// (length, heap index) of every string of one attribute.
type StringRefs = Vec<(u32, u16)>;

struct Writer<'a> {
    tree: &'a ObjectTree,
    order: Vec<NodeId>,
    raw: HashMap<NodeId, Placed<'a>>,
    strings: HashMap<(NodeId, usize), StringRefs>,
    heap: GlobalHeapWriter,
}

/// Encode `tree` as a file. Raw data blocks start at multiples of
/// `data_alignment`.
pub fn write_file(tree: &ObjectTree, data_alignment: u64) -> Result<Vec<u8>, FormatError> {
    let data_alignment = data_alignment.max(1);
    if !data_alignment.is_power_of_two() {
        return Err(FormatError::Malformed(format!(
            "data alignment {data_alignment} is not a power of two"
        )));
    }
    let mut writer = Writer {
        tree,
        order: tree.reachable(),
        raw: HashMap::new(),
        strings: HashMap::new(),
        heap: GlobalHeapWriter::new(),
    };
    writer.prepare()?;

    // Sizing pass.
    let sizing = Placement::default();
    let header_lens = writer
        .order
        .iter()
        .map(|&id| writer.encode_header(id, &sizing).map(|h| h.len()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut placement = Placement::default();
    let mut cursor = SUPERBLOCK_V2_SIZE as u64;
    for (&id, &len) in writer.order.iter().zip(&header_lens) {
        cursor = align_up(cursor, METADATA_ALIGNMENT);
        placement.headers.insert(id, cursor);
        cursor += len as u64;
    }
    if !writer.heap.is_empty() {
        cursor = align_up(cursor, METADATA_ALIGNMENT);
        placement.global_heap = cursor;
        cursor += writer.heap.encoded_len() as u64;
    }
    for &id in &writer.order {
        match writer.raw.get(&id) {
            Some(Placed::Contiguous(bytes)) if !bytes.is_empty() => {
                cursor = align_up(cursor, data_alignment);
                placement.contiguous.insert(id, cursor);
                cursor += bytes.len() as u64;
            }
            Some(Placed::Chunked { chunks, chunk_dims }) if !chunks.is_empty() => {
                let mut addrs = Vec::with_capacity(chunks.len());
                for (_, stored) in chunks {
                    cursor = align_up(cursor, data_alignment);
                    addrs.push(cursor);
                    cursor += stored.len() as u64;
                }
                placement.chunks.insert(id, addrs);
                cursor = align_up(cursor, METADATA_ALIGNMENT);
                placement.btrees.insert(id, cursor);
                cursor += (chunk_tree_node_count(chunks.len()) * chunk_node_size(chunk_dims.len()))
                    as u64;
            }
            _ => {}
        }
    }
    let eof = cursor;

    let mut file = vec![0u8; eof as usize];
    let root_address = placement.header(tree.root());
    put(&mut file, 0, &Superblock::serialize_v2(eof, root_address));

    for (&id, &len) in writer.order.iter().zip(&header_lens) {
        let header = writer.encode_header(id, &placement)?;
        if header.len() != len {
            return Err(FormatError::Malformed(format!(
                "object header size changed between passes ({len} -> {})",
                header.len()
            )));
        }
        put(&mut file, placement.header(id), &header);
    }
    if !writer.heap.is_empty() {
        put(&mut file, placement.global_heap, &writer.heap.serialize());
    }
    for &id in &writer.order {
        match writer.raw.get(&id) {
            Some(Placed::Contiguous(bytes)) => {
                if let Some(&at) = placement.contiguous.get(&id) {
                    put(&mut file, at, bytes);
                }
            }
            Some(Placed::Chunked { chunks, chunk_dims }) if !chunks.is_empty() => {
                let addrs = placement.chunks.get(&id).map(Vec::as_slice).unwrap_or(&[]);
                let mut records = Vec::with_capacity(chunks.len());
                for ((offsets, stored), &at) in chunks.iter().zip(addrs) {
                    put(&mut file, at, stored);
                    records.push(ChunkRecord {
                        size: u32::try_from(stored.len()).map_err(|_| {
                            FormatError::Unsupported("chunk larger than 4 GiB".into())
                        })?,
                        filter_mask: 0,
                        offsets: offsets.clone(),
                        address: at,
                    });
                }
                let start = placement.btrees.get(&id).copied().unwrap_or(0);
                let (nodes, _) = serialize_chunk_tree(&records, chunk_dims, start)?;
                put(&mut file, start, &nodes);
            }
            _ => {}
        }
    }
    Ok(file)
}

fn put(file: &mut [u8], at: u64, bytes: &[u8]) {
    let at = at as usize;
    file[at..at + bytes.len()].copy_from_slice(bytes);
}

impl<'a> Writer<'a> {
    /// Filter dataset chunks and queue variable-length strings.
    fn prepare(&mut self) -> Result<(), FormatError> {
        let tree = self.tree;
        for &id in &self.order {
            let Some(node) = tree.node(id) else { continue };
            for (i, attr) in node.attributes().iter().enumerate() {
                if let AttributeData::VarStrings(strings) = &attr.data {
                    let mut refs = Vec::with_capacity(strings.len());
                    for s in strings {
                        let len = u32::try_from(s.len()).map_err(|_| {
                            FormatError::Unsupported("string longer than 4 GiB".into())
                        })?;
                        refs.push((len, self.heap.push(s)?));
                    }
                    self.strings.insert((id, i), refs);
                }
            }
            if let Node::Dataset(ds) = node {
                let placed = match (&ds.storage, &ds.raw) {
                    (Storage::Contiguous, RawData::Contiguous(Some(bytes))) => Placed::Contiguous(bytes),
                    (Storage::Contiguous, RawData::Contiguous(None)) => continue,
                    (
                        Storage::Chunked {
                            chunk_dims,
                            pipeline,
                        },
                        RawData::Chunks(chunks),
                    ) => Placed::Chunked {
                        chunks: stored_chunks(ds, chunks, pipeline)?,
                        chunk_dims: chunk_dims.clone(),
                    },
                    _ => {
                        return Err(FormatError::Malformed(format!(
                            "dataset {id} holds data that does not match its layout"
                        )))
                    }
                };
                self.raw.insert(id, placed);
            }
        }
        Ok(())
    }

    fn encode_header(&self, id: NodeId, at: &Placement) -> Result<Vec<u8>, FormatError> {
        let node = self
            .tree
            .node(id)
            .ok_or_else(|| FormatError::Malformed(format!("dangling node {id}")))?;
        let mut w = ObjectHeaderWriter::new();
        match node {
            Node::Group(g) => self.group_messages(&mut w, g, at),
            Node::Dataset(ds) => self.dataset_messages(&mut w, id, ds, at)?,
        }
        for (i, attr) in node.attributes().iter().enumerate() {
            let body = self.encode_attribute(attr, self.strings.get(&(id, i)), at)?;
            w.add_message(MessageType::Attribute, body);
        }
        w.serialize()
    }

    fn group_messages(&self, w: &mut ObjectHeaderWriter, group: &Group, at: &Placement) {
        w.add_message(MessageType::LinkInfo, LinkInfoMessage::serialize_compact());
        w.add_message(MessageType::GroupInfo, serialize_group_info());
        for link in &group.links {
            let target = match &link.target {
                LinkRef::Object(child) => LinkTarget::Hard(at.header(*child)),
                LinkRef::Soft(path) => LinkTarget::Soft(path.clone()),
                LinkRef::Other { link_type, info } => LinkTarget::Other {
                    link_type: *link_type,
                    info: info.clone(),
                },
            };
            let msg = LinkMessage {
                name: link.name.clone(),
                target,
                creation_order: None,
            };
            w.add_message(MessageType::Link, msg.serialize());
        }
    }

    fn dataset_messages(
        &self,
        w: &mut ObjectHeaderWriter,
        id: NodeId,
        ds: &Dataset,
        at: &Placement,
    ) -> Result<(), FormatError> {
        w.add_message(MessageType::Dataspace, ds.dataspace.serialize());
        w.add_message_with_flags(MessageType::Datatype, ds.datatype.serialize(), MSG_FLAG_CONSTANT);

        let (layout, alloc, pipeline) = match &ds.storage {
            Storage::Contiguous => (
                DataLayout::Contiguous {
                    address: at.contiguous.get(&id).copied(),
                    size: contiguous_size(ds)?,
                },
                AllocTime::Late,
                None,
            ),
            Storage::Chunked {
                chunk_dims,
                pipeline,
            } => {
                let mut dims = chunk_dims.clone();
                dims.push(ds.element_size() as u64);
                (
                    DataLayout::Chunked {
                        chunk_dims: dims,
                        index: ChunkIndexKind::BTreeV1,
                        address: at.btrees.get(&id).copied(),
                    },
                    AllocTime::Incremental,
                    (!pipeline.is_empty()).then_some(pipeline),
                )
            }
        };
        w.add_message_with_flags(MessageType::FillValue, fill_value::serialize(alloc), MSG_FLAG_CONSTANT);
        w.add_message(MessageType::DataLayout, layout.serialize()?);
        if let Some(p) = pipeline {
            w.add_message(MessageType::FilterPipeline, p.serialize());
        }
        Ok(())
    }

    fn encode_attribute(
        &self,
        attr: &AttributeMessage,
        refs: Option<&StringRefs>,
        at: &Placement,
    ) -> Result<Vec<u8>, FormatError> {
        match (&attr.data, refs) {
            (AttributeData::VarStrings(_), Some(refs)) => {
                let mut raw = Vec::with_capacity(refs.len() * 16);
                for &(length, index) in refs {
                    VlReference {
                        length,
                        collection: at.global_heap,
                        index: index as u32,
                    }
                    .encode(&mut raw);
                }
                Ok(attr.serialize_with(&raw))
            }
            _ => attr.serialize(),
        }
    }
}

/// Bytes a contiguous dataset occupies in the file, allocated or not.
fn contiguous_size(ds: &Dataset) -> Result<u64, FormatError> {
    element_count(&ds.dataspace.dimensions)
        .and_then(|n| n.checked_mul(ds.element_size() as u64))
        .ok_or_else(|| {
            FormatError::Malformed(format!(
                "extent {:?} overflows the file address space",
                ds.dataspace.dimensions
            ))
        })
}

/// Run every chunk that holds something other than the fill value through
/// the filter pipeline, in offset order.
fn stored_chunks(
    ds: &Dataset,
    chunks: &BTreeMap<Vec<u64>, Vec<u8>>,
    pipeline: &FilterPipeline,
) -> Result<Vec<(Vec<u64>, Vec<u8>)>, FormatError> {
    let element_size = ds.element_size().max(1);
    let pattern = ds.fill_pattern();
    let mut out = Vec::with_capacity(chunks.len());
    for (offsets, chunk) in chunks {
        if chunk.chunks_exact(element_size).all(|e| e == pattern.as_slice()) {
            continue;
        }
        out.push((offsets.clone(), compress_chunk(chunk, pipeline, ds.element_size())?));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeData;
    use crate::dataspace::{Dataspace, UNLIMITED};
    use crate::datatype::{CharacterSet, Datatype, StringPadding};
    use crate::tree::{Group, Link};

    fn f32_bytes(values: impl IntoIterator<Item = f32>) -> Vec<u8> {
        values.into_iter().flat_map(f32::to_le_bytes).collect()
    }

    fn u64_attr(name: &str, value: u64) -> AttributeMessage {
        AttributeMessage {
            name: name.into(),
            datatype: Datatype::integer(8, false),
            dataspace: Dataspace::scalar(),
            data: AttributeData::Raw(value.to_le_bytes().to_vec()),
        }
    }

    fn roundtrip(tree: &ObjectTree) -> ObjectTree {
        let bytes = write_file(tree, 8).unwrap();
        ObjectTree::load(&bytes, true).unwrap()
    }

    #[test]
    fn empty_file() {
        let bytes = write_file(&ObjectTree::new(), 8).unwrap();
        assert_eq!(&bytes[..8], &crate::signature::HDF5_SIGNATURE);
        let tree = ObjectTree::load(&bytes, true).unwrap();
        assert!(tree.group(tree.root()).unwrap().links.is_empty());
    }

    #[test]
    fn groups_datasets_and_attributes() {
        let mut tree = ObjectTree::new();
        let root = tree.root();
        let g = tree.insert_child(root, "group", Node::Group(Group::default())).unwrap();
        let mut ds = Dataset::new(
            Datatype::ieee_f32(),
            Dataspace::simple(&[2, 3], None),
            Storage::Contiguous,
        );
        ds.write_all(&f32_bytes((0..6).map(|i| i as f32 * 1.5))).unwrap();
        ds.attributes.push(u64_attr("count", 73571));
        tree.insert_child(g, "data", Node::Dataset(ds)).unwrap();
        tree.node_mut(g).unwrap().attributes_mut().push(u64_attr("level", 3));

        let back = roundtrip(&tree);
        let g2 = back.group(back.root()).unwrap().child("group").unwrap();
        let group = back.group(g2).unwrap();
        assert_eq!(group.attributes, vec![u64_attr("level", 3)]);
        let d2 = group.child("data").unwrap();
        let ds2 = back.dataset(d2).unwrap();
        assert_eq!(ds2.dataspace.dimensions, vec![2, 3]);
        assert_eq!(ds2.datatype, Datatype::ieee_f32());
        assert_eq!(ds2.read_all().unwrap(), f32_bytes((0..6).map(|i| i as f32 * 1.5)));
        assert_eq!(ds2.attributes, vec![u64_attr("count", 73571)]);
        assert_eq!(ds2.storage, Storage::Contiguous);
    }

    #[test]
    fn chunked_compressed_growable_dataset() {
        let mut tree = ObjectTree::new();
        let pipeline = FilterPipeline::new().with_shuffle(4).with_deflate(6);
        let mut ds = Dataset::new(
            Datatype::ieee_f32(),
            Dataspace::simple(&[5, 7], Some(&[UNLIMITED, 7])),
            Storage::Chunked {
                chunk_dims: vec![2, 4],
                pipeline: pipeline.clone(),
            },
        );
        // Leave the first row zero so at least one chunk stays unwritten.
        let values: Vec<f32> = (0..35).map(|i| if i < 14 { 0.0 } else { i as f32 }).collect();
        ds.write_all(&f32_bytes(values.iter().copied())).unwrap();
        tree.insert_child(tree.root(), "stream", Node::Dataset(ds)).unwrap();

        let back = roundtrip(&tree);
        let id = back.group(back.root()).unwrap().child("stream").unwrap();
        let ds2 = back.dataset(id).unwrap();
        assert_eq!(ds2.dataspace.dimensions, vec![5, 7]);
        assert_eq!(ds2.dataspace.max_dims(), &[UNLIMITED, 7]);
        assert_eq!(
            ds2.storage,
            Storage::Chunked {
                chunk_dims: vec![2, 4],
                pipeline
            }
        );
        assert_eq!(ds2.read_all().unwrap(), f32_bytes(values));
    }

    #[test]
    fn empty_growable_dataset_has_no_chunks() {
        let mut tree = ObjectTree::new();
        let ds = Dataset::new(
            Datatype::integer(2, false),
            Dataspace::simple(&[0, 4], Some(&[UNLIMITED, 4])),
            Storage::Chunked {
                chunk_dims: vec![1, 4],
                pipeline: FilterPipeline::new(),
            },
        );
        tree.insert_child(tree.root(), "empty", Node::Dataset(ds)).unwrap();
        let back = roundtrip(&tree);
        let id = back.group(back.root()).unwrap().child("empty").unwrap();
        let ds = back.dataset(id).unwrap();
        assert_eq!(ds.raw, RawData::Chunks(BTreeMap::new()));
        assert!(ds.read_all().unwrap().is_empty());
    }

    #[test]
    fn many_chunks_use_a_deeper_btree() {
        let mut tree = ObjectTree::new();
        let mut ds = Dataset::new(
            Datatype::integer(4, true),
            Dataspace::simple(&[300], None),
            Storage::Chunked {
                chunk_dims: vec![2],
                pipeline: FilterPipeline::new(),
            },
        );
        let expected: Vec<u8> = (1..=300i32).flat_map(i32::to_le_bytes).collect();
        ds.write_all(&expected).unwrap();
        tree.insert_child(tree.root(), "long", Node::Dataset(ds)).unwrap();
        let back = roundtrip(&tree);
        let id = back.group(back.root()).unwrap().child("long").unwrap();
        assert_eq!(back.dataset(id).unwrap().read_all().unwrap(), expected);
    }

    #[test]
    fn variable_length_strings_survive() {
        let mut tree = ObjectTree::new();
        let attr = AttributeMessage {
            name: "labels".into(),
            datatype: Datatype::VarString {
                padding: StringPadding::NullTerminate,
                charset: CharacterSet::Utf8,
            },
            dataspace: Dataspace::simple(&[3], None),
            data: AttributeData::VarStrings(vec![b"alpha".to_vec(), Vec::new(), "βeta".as_bytes().to_vec()]),
        };
        let root = tree.root();
        tree.node_mut(root).unwrap().attributes_mut().push(attr.clone());
        let back = roundtrip(&tree);
        assert_eq!(back.node(back.root()).unwrap().attributes(), &[attr]);
    }

    #[test]
    fn links_back_to_ancestors_and_soft_links() {
        let mut tree = ObjectTree::new();
        let root = tree.root();
        let g = tree.insert_child(root, "a", Node::Group(Group::default())).unwrap();
        if let Some(Node::Group(group)) = tree.node_mut(g) {
            group.links.push(Link {
                name: "up".into(),
                target: LinkRef::Object(root),
            });
            group.links.push(Link {
                name: "alias".into(),
                target: LinkRef::Soft("/a".into()),
            });
        }
        let back = roundtrip(&tree);
        let a = back.group(back.root()).unwrap().child("a").unwrap();
        let group = back.group(a).unwrap();
        assert_eq!(group.child("up"), Some(back.root()));
        assert_eq!(group.link("alias").unwrap().target, LinkRef::Soft("/a".into()));
    }

    #[test]
    fn data_alignment_and_user_block() {
        let mut tree = ObjectTree::new();
        let mut ds = Dataset::new(
            Datatype::integer(1, false),
            Dataspace::simple(&[16], None),
            Storage::Contiguous,
        );
        ds.write_all(&(0..16).collect::<Vec<u8>>()).unwrap();
        tree.insert_child(tree.root(), "bytes", Node::Dataset(ds)).unwrap();

        let bytes = write_file(&tree, 4096).unwrap();
        assert_eq!(bytes.len(), 4096 + 16);
        assert_eq!(&bytes[4096..], &(0..16).collect::<Vec<u8>>()[..]);
        assert!(write_file(&tree, 3000).is_err());

        let mut with_user_block = vec![0u8; 512];
        with_user_block.extend_from_slice(&bytes);
        let back = ObjectTree::load(&with_user_block, true).unwrap();
        let id = back.group(back.root()).unwrap().child("bytes").unwrap();
        assert_eq!(back.dataset(id).unwrap().read_all().unwrap(), (0..16).collect::<Vec<u8>>());
    }

    #[test]
    fn unwritten_storage_takes_no_file_space() {
        let mut tree = ObjectTree::new();
        let side = 1u64 << 20;
        let contiguous = Dataset::new(
            Datatype::integer(1, false),
            Dataspace::simple(&[side, side, side], None),
            Storage::Contiguous,
        );
        let mut chunked = Dataset::new(
            Datatype::integer(1, false),
            Dataspace::simple(&[side, side, side], None),
            Storage::Chunked {
                chunk_dims: vec![1, 4, 4],
                pipeline: FilterPipeline::new(),
            },
        );
        chunked.write_block(&[side - 1, 8, 8], &[1, 1, 1], &[7]).unwrap();
        let root = tree.root();
        tree.insert_child(root, "cube", Node::Dataset(contiguous)).unwrap();
        tree.insert_child(root, "sparse", Node::Dataset(chunked)).unwrap();

        let bytes = write_file(&tree, 8).unwrap();
        assert!(bytes.len() < 4096);
        let back = ObjectTree::load(&bytes, true).unwrap();
        let group = back.group(back.root()).unwrap();
        let cube = back.dataset(group.child("cube").unwrap()).unwrap();
        assert_eq!(cube.raw, RawData::Contiguous(None));
        assert_eq!(cube.read_block(&[5, 5, 5], &[1, 1, 2]).unwrap(), vec![0, 0]);
        let sparse = back.dataset(group.child("sparse").unwrap()).unwrap();
        match &sparse.raw {
            RawData::Chunks(chunks) => assert_eq!(chunks.keys().collect::<Vec<_>>(), vec![&vec![side - 1, 8, 8]]),
            other => panic!("unexpected storage {other:?}"),
        }
        assert_eq!(sparse.read_block(&[side - 1, 8, 7], &[1, 1, 2]).unwrap(), vec![0, 7]);
    }

    #[test]
    fn hostile_extent_is_rejected() {
        let mut tree = ObjectTree::new();
        let mut ds = Dataset::new(
            Datatype::integer(8, true),
            Dataspace::simple(&[0x1234], None),
            Storage::Contiguous,
        );
        ds.write_all(&vec![1u8; 0x1234 * 8]).unwrap();
        tree.insert_child(tree.root(), "long", Node::Dataset(ds)).unwrap();
        let mut bytes = write_file(&tree, 8).unwrap();

        // The dataspace message comes first in the header.
        let needle = 0x1234u64.to_le_bytes();
        let at = bytes.windows(8).position(|w| w == needle).unwrap();
        for huge in [1u64 << 62, 1 << 40] {
            bytes[at..at + 8].copy_from_slice(&huge.to_le_bytes());
            assert!(ObjectTree::load(&bytes, false).is_err());
        }
    }

    #[test]
    fn corrupt_header_fails_checksum() {
        let mut tree = ObjectTree::new();
        let root = tree.root();
        tree.node_mut(root).unwrap().attributes_mut().push(u64_attr("x", 1));
        let mut bytes = write_file(&tree, 8).unwrap();
        // Flip a byte of the attribute value inside the root header.
        let pos = bytes.len() - 8;
        bytes[pos] ^= 0xff;
        assert!(matches!(
            ObjectTree::load(&bytes, true),
            Err(FormatError::ChecksumMismatch { .. })
        ));
        assert!(ObjectTree::load(&bytes, false).is_ok());
    }
}
