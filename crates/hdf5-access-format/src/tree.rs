//! In-memory object tree of a whole HDF5 file, and its loader.
//!
//! Nodes live in an arena indexed by [`NodeId`]; groups refer to their
//! children by id, so hard links shared between groups (or pointing back
//! at an ancestor) load as a graph without duplication. Datasets hold only
//! the raw data that exists: the chunks that were written, or one buffer
//! for a contiguous dataset once it has been written.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::attribute::{AttributeData, AttributeMessage};
use crate::btree_v1::collect_chunks;
use crate::bytes::UNDEF_ADDR;
use crate::data_layout::{ChunkIndexKind, DataLayout};
use crate::dataspace::Dataspace;
use crate::datatype::{Datatype, DatatypeByteOrder};
use crate::error::FormatError;
use crate::fill_value;
use crate::filter_pipeline::FilterPipeline;
use crate::filters::decompress_chunk;
use crate::global_heap::{GlobalHeapCollection, VlReference};
use crate::link_info::LinkInfoMessage;
use crate::link_message::{LinkMessage, LinkTarget};
use crate::message_type::MessageType;
use crate::object_header::{HeaderMessage, ObjectHeader};
use crate::signature::find_signature;
use crate::slab::{byte_len, copy_block, element_count, fill_block, filled_buffer, Layout};
use crate::superblock::Superblock;
use crate::symbol_table::{read_entries, SymbolTableMessage};

/// Index of a node in an [`ObjectTree`].
pub type NodeId = usize;

/// Where a group entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRef {
    /// A group or dataset of this tree.
    Object(NodeId),
    /// A soft link, kept as its path.
    Soft(String),
    /// External or user-defined link, kept as raw bytes.
    Other { link_type: u8, info: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub target: LinkRef,
}

#[derive(Debug, Clone, Default)]
pub struct Group {
    /// Entries in link order.
    pub links: Vec<Link>,
    pub attributes: Vec<AttributeMessage>,
}

impl Group {
    pub fn link(&self, name: &str) -> Option<&Link> {
        self.links.iter().find(|l| l.name == name)
    }

    /// Id of the object behind a hard link named `name`.
    pub fn child(&self, name: &str) -> Option<NodeId> {
        match self.link(name)?.target {
            LinkRef::Object(id) => Some(id),
            _ => None,
        }
    }
}

/// How dataset elements are laid out in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    Contiguous,
    /// `chunk_dims` has one entry per dataset axis.
    Chunked {
        chunk_dims: Vec<u64>,
        pipeline: FilterPipeline,
    },
}

/// Element bytes of a dataset, little-endian and row-major. Elements that
/// were never written are not held and read as the fill value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawData {
    /// The whole current extent, or `None` before the first write.
    Contiguous(Option<Vec<u8>>),
    /// Unfiltered full-size chunks keyed by the offset of their first
    /// element. Elements of a chunk outside the extent hold the fill value.
    Chunks(BTreeMap<Vec<u64>, Vec<u8>>),
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub datatype: Datatype,
    pub dataspace: Dataspace,
    pub storage: Storage,
    /// User fill value; `None` means all zero bytes.
    pub fill_value: Option<Vec<u8>>,
    pub raw: RawData,
    pub attributes: Vec<AttributeMessage>,
}

impl Dataset {
    /// A dataset whose every element holds the (zero) fill value. Nothing
    /// is allocated until the first write.
    pub fn new(datatype: Datatype, dataspace: Dataspace, storage: Storage) -> Dataset {
        let raw = match storage {
            Storage::Contiguous => RawData::Contiguous(None),
            Storage::Chunked { .. } => RawData::Chunks(BTreeMap::new()),
        };
        Dataset {
            datatype,
            dataspace,
            storage,
            fill_value: None,
            raw,
            attributes: Vec::new(),
        }
    }

    pub fn element_size(&self) -> usize {
        self.datatype.element_size() as usize
    }

    /// One element's worth of fill bytes.
    pub fn fill_pattern(&self) -> Vec<u8> {
        match &self.fill_value {
            Some(v) if v.len() == self.element_size() => v.clone(),
            _ => vec![0; self.element_size()],
        }
    }

    fn chunk_shape(&self) -> Result<&[u64], FormatError> {
        match &self.storage {
            Storage::Chunked { chunk_dims, .. }
                if chunk_dims.len() == self.dataspace.rank() && chunk_dims.iter().all(|&c| c > 0) =>
            {
                Ok(chunk_dims)
            }
            Storage::Chunked { chunk_dims, .. } => Err(FormatError::Malformed(format!(
                "chunk shape {chunk_dims:?} does not fit dataspace {:?}",
                self.dataspace.dimensions
            ))),
            Storage::Contiguous => Err(FormatError::Malformed("dataset is not chunked".into())),
        }
    }

    fn check_block(&self, start: &[u64], count: &[u64]) -> Result<(), FormatError> {
        let dims = &self.dataspace.dimensions;
        if start.len() != dims.len() || count.len() != dims.len() {
            return Err(FormatError::Malformed(format!(
                "block of rank {} on a rank {} dataset",
                start.len(),
                dims.len()
            )));
        }
        for ((s, c), d) in start.iter().zip(count).zip(dims) {
            if s.checked_add(*c).map_or(true, |end| end > *d) {
                return Err(FormatError::Malformed(format!(
                    "block {s}+{c} exceeds extent {d}"
                )));
            }
        }
        Ok(())
    }

    /// Every element of the current extent.
    pub fn read_all(&self) -> Result<Vec<u8>, FormatError> {
        if self.dataspace.num_elements()? == 0 {
            return Ok(Vec::new());
        }
        let dims = self.dataspace.dimensions.clone();
        self.read_block(&vec![0; dims.len()], &dims)
    }

    /// The `count` block at `start`, row-major.
    pub fn read_block(&self, start: &[u64], count: &[u64]) -> Result<Vec<u8>, FormatError> {
        self.check_block(start, count)?;
        let element_size = self.element_size();
        let dims = &self.dataspace.dimensions;
        let mut out = filled_buffer(byte_len(count, element_size)?, &self.fill_pattern())?;
        let out_layout = Layout { dims: count, element_size };
        match &self.raw {
            RawData::Contiguous(None) => {}
            RawData::Contiguous(Some(bytes)) => copy_block(
                bytes,
                Layout { dims, element_size },
                start,
                &mut out,
                out_layout,
                &vec![0; count.len()],
                count,
            )?,
            RawData::Chunks(chunks) => {
                let chunk_dims = self.chunk_shape()?;
                for (offsets, chunk) in chunks {
                    let Some((from, len)) = intersect(offsets, chunk_dims, start, count) else {
                        continue;
                    };
                    copy_block(
                        chunk,
                        Layout { dims: chunk_dims, element_size },
                        &relative(&from, offsets),
                        &mut out,
                        out_layout,
                        &relative(&from, start),
                        &len,
                    )?;
                }
            }
        }
        Ok(out)
    }

    /// Replace every element of the current extent.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), FormatError> {
        let dims = self.dataspace.dimensions.clone();
        self.write_block(&vec![0; dims.len()], &dims, bytes)
    }

    /// Store the row-major `count` block `bytes` at `start`. Storage is
    /// allocated for the touched chunks only.
    pub fn write_block(&mut self, start: &[u64], count: &[u64], bytes: &[u8]) -> Result<(), FormatError> {
        self.check_block(start, count)?;
        let element_size = self.element_size();
        let expected = byte_len(count, element_size)?;
        if bytes.len() != expected {
            return Err(FormatError::DataSizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        if count.iter().any(|&c| c == 0) {
            return Ok(());
        }
        let pattern = self.fill_pattern();
        let dims = self.dataspace.dimensions.clone();
        let src_layout = Layout { dims: count, element_size };
        let chunk_dims = match self.storage {
            Storage::Chunked { .. } => self.chunk_shape()?.to_vec(),
            Storage::Contiguous => Vec::new(),
        };

        match &mut self.raw {
            RawData::Contiguous(slot) => {
                let buf = match slot.take() {
                    Some(buf) => buf,
                    None => filled_buffer(byte_len(&dims, element_size)?, &pattern)?,
                };
                let buf = slot.insert(buf);
                copy_block(
                    bytes,
                    src_layout,
                    &vec![0; count.len()],
                    buf,
                    Layout { dims: &dims, element_size },
                    start,
                    count,
                )
            }
            RawData::Chunks(chunks) => {
                let chunk_bytes = byte_len(&chunk_dims, element_size)?;
                let first: Vec<u64> = start.iter().zip(&chunk_dims).map(|(s, c)| s / c).collect();
                let last: Vec<u64> = start
                    .iter()
                    .zip(count)
                    .zip(&chunk_dims)
                    .map(|((s, n), c)| (s + n - 1) / c)
                    .collect();
                let mut index = first.clone();
                loop {
                    let offsets: Vec<u64> = index.iter().zip(&chunk_dims).map(|(i, c)| i * c).collect();
                    if let Some((from, len)) = intersect(&offsets, &chunk_dims, start, count) {
                        let src_start = relative(&from, start);
                        let dst_start = relative(&from, &offsets);
                        let chunk = match chunks.entry(offsets) {
                            Entry::Occupied(e) => e.into_mut(),
                            Entry::Vacant(e) => e.insert(filled_buffer(chunk_bytes, &pattern)?),
                        };
                        copy_block(
                            bytes,
                            src_layout,
                            &src_start,
                            chunk,
                            Layout { dims: &chunk_dims, element_size },
                            &dst_start,
                            &len,
                        )?;
                    }

                    // Odometer over the touched part of the chunk grid.
                    let mut axis = index.len();
                    loop {
                        if axis == 0 {
                            return Ok(());
                        }
                        axis -= 1;
                        index[axis] += 1;
                        if index[axis] <= last[axis] {
                            break;
                        }
                        index[axis] = first[axis];
                    }
                }
            }
        }
    }

    /// Change the current extent, keeping every element that lies inside
    /// both the old and the new extent at its coordinates.
    pub fn resize(&mut self, new_dims: &[u64]) -> Result<(), FormatError> {
        let old_dims = self.dataspace.dimensions.clone();
        if new_dims.len() != old_dims.len() {
            return Err(FormatError::Malformed(format!(
                "cannot resize a rank {} dataset to rank {}",
                old_dims.len(),
                new_dims.len()
            )));
        }
        let max = self.dataspace.max_dims().to_vec();
        if let Some((d, m)) = new_dims.iter().zip(&max).find(|(d, m)| d > m) {
            return Err(FormatError::Malformed(format!(
                "extent {d} exceeds maximum {m}"
            )));
        }
        let element_size = self.element_size();
        byte_len(new_dims, element_size)?;

        let pattern = self.fill_pattern();
        let overlap: Vec<u64> = old_dims.iter().zip(new_dims).map(|(a, b)| *a.min(b)).collect();
        let chunk_dims = match self.storage {
            Storage::Chunked { .. } => self.chunk_shape()?.to_vec(),
            Storage::Contiguous => Vec::new(),
        };
        match &mut self.raw {
            RawData::Contiguous(None) => {}
            RawData::Contiguous(Some(bytes)) => {
                let mut data = filled_buffer(byte_len(new_dims, element_size)?, &pattern)?;
                let zero = vec![0u64; new_dims.len()];
                copy_block(
                    bytes,
                    Layout { dims: &old_dims, element_size },
                    &zero,
                    &mut data,
                    Layout { dims: new_dims, element_size },
                    &zero,
                    &overlap,
                )?;
                *bytes = data;
            }
            RawData::Chunks(chunks) => {
                chunks.retain(|offsets, _| offsets.iter().zip(&overlap).all(|(o, e)| o < e));
                for (offsets, chunk) in chunks.iter_mut() {
                    clear_outside(chunk, offsets, &chunk_dims, &overlap, &pattern)?;
                }
            }
        }
        self.dataspace = Dataspace::simple(new_dims, Some(&max));
        Ok(())
    }
}

/// The part of the chunk at `offsets` that lies inside the `count` block
/// at `start`, as (first element, extent).
fn intersect(offsets: &[u64], chunk_dims: &[u64], start: &[u64], count: &[u64]) -> Option<(Vec<u64>, Vec<u64>)> {
    let mut from = Vec::with_capacity(offsets.len());
    let mut len = Vec::with_capacity(offsets.len());
    for (((o, c), s), n) in offsets.iter().zip(chunk_dims).zip(start).zip(count) {
        let lo = (*o).max(*s);
        let hi = o.saturating_add(*c).min(s.saturating_add(*n));
        if hi <= lo {
            return None;
        }
        from.push(lo);
        len.push(hi - lo);
    }
    Some((from, len))
}

fn relative(point: &[u64], origin: &[u64]) -> Vec<u64> {
    point.iter().zip(origin).map(|(p, o)| p - o).collect()
}

/// Reset the elements of the chunk at `offsets` that fall outside `extent`
/// to the fill value.
fn clear_outside(
    chunk: &mut [u8],
    offsets: &[u64],
    chunk_dims: &[u64],
    extent: &[u64],
    pattern: &[u8],
) -> Result<(), FormatError> {
    let layout = Layout {
        dims: chunk_dims,
        element_size: pattern.len(),
    };
    for axis in 0..chunk_dims.len() {
        let inside = extent[axis].saturating_sub(offsets[axis]).min(chunk_dims[axis]);
        if inside == chunk_dims[axis] {
            continue;
        }
        let mut start = vec![0u64; chunk_dims.len()];
        let mut count = chunk_dims.to_vec();
        start[axis] = inside;
        count[axis] = chunk_dims[axis] - inside;
        fill_block(chunk, layout, &start, &count, pattern)?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub enum Node {
    Group(Group),
    Dataset(Dataset),
}

impl Node {
    pub fn attributes(&self) -> &[AttributeMessage] {
        match self {
            Node::Group(g) => &g.attributes,
            Node::Dataset(d) => &d.attributes,
        }
    }

    pub fn attributes_mut(&mut self) -> &mut Vec<AttributeMessage> {
        match self {
            Node::Group(g) => &mut g.attributes,
            Node::Dataset(d) => &mut d.attributes,
        }
    }
}

/// A file's groups and datasets.
#[derive(Debug, Clone)]
pub struct ObjectTree {
    nodes: Vec<Node>,
    root: NodeId,
    dropped_attributes: Vec<String>,
}

impl Default for ObjectTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectTree {
    /// A tree holding only an empty root group.
    pub fn new() -> ObjectTree {
        ObjectTree {
            nodes: vec![Node::Group(Group::default())],
            root: 0,
            dropped_attributes: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn group(&self, id: NodeId) -> Option<&Group> {
        match self.nodes.get(id)? {
            Node::Group(g) => Some(g),
            Node::Dataset(_) => None,
        }
    }

    pub fn dataset(&self, id: NodeId) -> Option<&Dataset> {
        match self.nodes.get(id)? {
            Node::Dataset(d) => Some(d),
            Node::Group(_) => None,
        }
    }

    pub fn dataset_mut(&mut self, id: NodeId) -> Option<&mut Dataset> {
        match self.nodes.get_mut(id)? {
            Node::Dataset(d) => Some(d),
            Node::Group(_) => None,
        }
    }

    /// Attributes that were skipped on load because their values hold
    /// object references, as `path@name`.
    pub fn dropped_attributes(&self) -> &[String] {
        &self.dropped_attributes
    }

    /// Add `node` to the arena and link it into `parent` as `name`.
    ///
    /// The caller checks that `name` is free.
    pub fn insert_child(
        &mut self,
        parent: NodeId,
        name: &str,
        node: Node,
    ) -> Result<NodeId, FormatError> {
        if self.group(parent).is_none() {
            return Err(FormatError::Malformed(format!("node {parent} is not a group")));
        }
        let id = self.nodes.len();
        self.nodes.push(node);
        if let Some(Node::Group(g)) = self.nodes.get_mut(parent) {
            g.links.push(Link {
                name: name.to_string(),
                target: LinkRef::Object(id),
            });
        }
        Ok(id)
    }

    /// Ids reachable from the root through hard links, breadth first.
    pub fn reachable(&self) -> Vec<NodeId> {
        let mut seen = vec![false; self.nodes.len()];
        let mut order = Vec::new();
        let mut queue = VecDeque::from([self.root]);
        seen[self.root] = true;
        while let Some(id) = queue.pop_front() {
            order.push(id);
            if let Some(g) = self.group(id) {
                for link in &g.links {
                    if let LinkRef::Object(child) = link.target {
                        if child < seen.len() && !seen[child] {
                            seen[child] = true;
                            queue.push_back(child);
                        }
                    }
                }
            }
        }
        order
    }

    /// Decode a complete file image.
    pub fn load(file: &[u8], verify_checksums: bool) -> Result<ObjectTree, FormatError> {
        let sig = find_signature(file)?;
        let sb = Superblock::parse(file, sig, verify_checksums)?;
        let base = sb.base_address as usize;
        let mut loader = Loader {
            data: &file[base..],
            offset_size: sb.offset_size,
            length_size: sb.length_size,
            verify: verify_checksums,
            nodes: Vec::new(),
            by_address: HashMap::new(),
            queue: VecDeque::new(),
            heaps: HashMap::new(),
            dropped: Vec::new(),
        };
        let root = loader.node_for(sb.root_group_address, "/".to_string());
        while let Some((address, id, path)) = loader.queue.pop_front() {
            let node = loader.load_object(address, &path)?;
            loader.nodes[id] = node;
        }
        Ok(ObjectTree {
            nodes: loader.nodes,
            root,
            dropped_attributes: loader.dropped,
        })
    }
}

struct Loader<'a> {
    data: &'a [u8],
    offset_size: u8,
    length_size: u8,
    verify: bool,
    nodes: Vec<Node>,
    by_address: HashMap<u64, NodeId>,
    queue: VecDeque<(u64, NodeId, String)>,
    heaps: HashMap<u64, GlobalHeapCollection>,
    dropped: Vec<String>,
}

fn join(path: &str, name: &str) -> String {
    if path.ends_with('/') {
        format!("{path}{name}")
    } else {
        format!("{path}/{name}")
    }
}

fn unsupported_if_shared(msg: &HeaderMessage, what: &str) -> Result<(), FormatError> {
    if msg.is_shared() {
        return Err(FormatError::Unsupported(format!("shared {what} message")));
    }
    Ok(())
}

impl Loader<'_> {
    /// Id for the object at `address`, queueing it on first sight.
    fn node_for(&mut self, address: u64, path: String) -> NodeId {
        if let Some(&id) = self.by_address.get(&address) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(Node::Group(Group::default()));
        self.by_address.insert(address, id);
        self.queue.push_back((address, id, path));
        id
    }

    fn load_object(&mut self, address: u64, path: &str) -> Result<Node, FormatError> {
        if address == UNDEF_ADDR {
            return Err(FormatError::Malformed(format!("{path}: undefined object address")));
        }
        let header = ObjectHeader::parse(
            self.data,
            address as usize,
            self.offset_size,
            self.length_size,
            self.verify,
        )?;
        if let Some(info) = header.find(MessageType::AttributeInfo) {
            // Dense attribute storage: fractal heap address after the flags.
            let flags = info.data.get(1).copied().unwrap_or(0);
            let pos = 2 + if flags & 0x01 != 0 { 2 } else { 0 };
            let heap = crate::bytes::read_sized(&info.data, pos, self.offset_size)?;
            if heap != UNDEF_ADDR {
                return Err(FormatError::Unsupported(format!(
                    "{path}: dense attribute storage"
                )));
            }
        }
        let attributes = self.load_attributes(&header, path)?;

        if header.find(MessageType::DataLayout).is_some() {
            let mut dataset = self.load_dataset(&header, path)?;
            dataset.attributes = attributes;
            return Ok(Node::Dataset(dataset));
        }
        if header.find(MessageType::Datatype).is_some() {
            return Err(FormatError::Unsupported(format!("{path}: named datatype")));
        }
        let mut group = self.load_group(&header, path)?;
        group.attributes = attributes;
        Ok(Node::Group(group))
    }

    fn load_group(&mut self, header: &ObjectHeader, path: &str) -> Result<Group, FormatError> {
        let mut links = Vec::new();
        if let Some(msg) = header.find(MessageType::SymbolTable) {
            let table = SymbolTableMessage::parse(&msg.data, self.offset_size)?;
            for (name, target) in read_entries(self.data, table, self.offset_size, self.length_size)? {
                let target = self.link_ref(target, path, &name);
                links.push(Link { name, target });
            }
            return Ok(Group {
                links,
                attributes: Vec::new(),
            });
        }

        if let Some(msg) = header.find(MessageType::LinkInfo) {
            let info = LinkInfoMessage::parse(&msg.data, self.offset_size)?;
            if info.fractal_heap_address.is_some() {
                return Err(FormatError::Unsupported(format!("{path}: dense link storage")));
            }
        }
        let mut messages = header
            .all(MessageType::Link)
            .map(|m| LinkMessage::parse(&m.data, self.offset_size))
            .collect::<Result<Vec<_>, _>>()?;
        if messages.iter().all(|m| m.creation_order.is_some()) {
            messages.sort_by_key(|m| m.creation_order);
        }
        for msg in messages {
            let target = self.link_ref(msg.target, path, &msg.name);
            links.push(Link {
                name: msg.name,
                target,
            });
        }
        Ok(Group {
            links,
            attributes: Vec::new(),
        })
    }

    fn link_ref(&mut self, target: LinkTarget, path: &str, name: &str) -> LinkRef {
        match target {
            LinkTarget::Hard(address) => LinkRef::Object(self.node_for(address, join(path, name))),
            LinkTarget::Soft(p) => LinkRef::Soft(p),
            LinkTarget::Other { link_type, info } => LinkRef::Other { link_type, info },
        }
    }

    fn load_attributes(
        &mut self,
        header: &ObjectHeader,
        path: &str,
    ) -> Result<Vec<AttributeMessage>, FormatError> {
        let mut out = Vec::new();
        for msg in header.all(MessageType::Attribute) {
            let mut attr = AttributeMessage::parse(&msg.data, self.length_size)?;
            if matches!(attr.datatype, Datatype::VarString { .. }) {
                attr.data = self.resolve_strings(&attr)?;
            } else if attr.datatype.holds_addresses()? {
                self.dropped.push(format!("{path}@{}", attr.name));
                continue;
            } else if let AttributeData::Raw(raw) = &mut attr.data {
                to_little_endian(&mut attr.datatype, raw);
            }
            out.push(attr);
        }
        Ok(out)
    }

    fn resolve_strings(&mut self, attr: &AttributeMessage) -> Result<AttributeData, FormatError> {
        let AttributeData::Raw(raw) = &attr.data else {
            return Ok(attr.data.clone());
        };
        let width = 8 + self.offset_size as usize;
        let count = usize::try_from(attr.dataspace.num_elements()?)
            .ok()
            .filter(|n| n.checked_mul(width).map_or(false, |len| len <= raw.len()))
            .ok_or_else(|| {
                FormatError::Malformed(format!(
                    "attribute '{}' holds fewer string references than its dataspace",
                    attr.name
                ))
            })?;
        let mut strings = Vec::with_capacity(count);
        for i in 0..count {
            let r = VlReference::parse(raw, i * width, self.offset_size)?;
            if r.length == 0 || r.collection == UNDEF_ADDR || r.collection == 0 {
                strings.push(Vec::new());
                continue;
            }
            if !self.heaps.contains_key(&r.collection) {
                let heap = GlobalHeapCollection::parse(self.data, r.collection, self.length_size)?;
                self.heaps.insert(r.collection, heap);
            }
            let bytes = self
                .heaps
                .get(&r.collection)
                .and_then(|h| h.get(r.index as u16))
                .ok_or_else(|| {
                    FormatError::Malformed(format!(
                        "attribute '{}': missing global heap object {}",
                        attr.name, r.index
                    ))
                })?;
            let len = (r.length as usize).min(bytes.len());
            strings.push(bytes[..len].to_vec());
        }
        Ok(AttributeData::VarStrings(strings))
    }

    fn load_dataset(&mut self, header: &ObjectHeader, path: &str) -> Result<Dataset, FormatError> {
        let missing = |what: &str| FormatError::Malformed(format!("{path}: dataset without {what}"));
        let dt_msg = header.find(MessageType::Datatype).ok_or_else(|| missing("datatype"))?;
        unsupported_if_shared(dt_msg, "datatype")?;
        let mut datatype = Datatype::parse(&dt_msg.data)?;
        if datatype.holds_addresses()? {
            return Err(FormatError::Unsupported(format!(
                "{path}: dataset of variable-length or reference type"
            )));
        }
        let ds_msg = header.find(MessageType::Dataspace).ok_or_else(|| missing("dataspace"))?;
        unsupported_if_shared(ds_msg, "dataspace")?;
        let dataspace = Dataspace::parse(&ds_msg.data, self.length_size)?;
        if header.find(MessageType::ExternalFiles).is_some() {
            return Err(FormatError::Unsupported(format!("{path}: external storage")));
        }
        let layout_msg = header.find(MessageType::DataLayout).ok_or_else(|| missing("layout"))?;
        let layout = DataLayout::parse(&layout_msg.data, self.offset_size, self.length_size)?;
        let pipeline = match header.find(MessageType::FilterPipeline) {
            Some(m) => FilterPipeline::parse(&m.data)?,
            None => FilterPipeline::new(),
        };

        let element_size = datatype.element_size() as usize;
        let fill = match header.find(MessageType::FillValue) {
            Some(m) => fill_value::parse_value(&m.data)?,
            None => match header.find(MessageType::FillValueOld) {
                Some(m) => fill_value::parse_old_value(&m.data)?,
                None => None,
            },
        }
        .filter(|v| v.len() == element_size);

        let storage = match &layout {
            DataLayout::Chunked { chunk_dims, .. } => Storage::Chunked {
                chunk_dims: chunk_dims[..chunk_dims.len().saturating_sub(1)].to_vec(),
                pipeline: pipeline.clone(),
            },
            _ => Storage::Contiguous,
        };
        let mut dataset = Dataset::new(datatype.clone(), dataspace, storage);
        dataset.fill_value = fill;

        let total = if dataset.dataspace.num_elements()? == 0 {
            0
        } else {
            byte_len(&dataset.dataspace.dimensions, element_size)?
        };
        let too_short = |stored: u64| {
            FormatError::Malformed(format!(
                "{path}: storage holds {stored} bytes, extent needs {total}"
            ))
        };
        match layout {
            DataLayout::Compact(raw) => {
                if raw.len() < total {
                    return Err(too_short(raw.len() as u64));
                }
                dataset.raw = RawData::Contiguous(Some(raw[..total].to_vec()));
            }
            DataLayout::Contiguous { address: Some(a), size } => {
                if size < total as u64 {
                    return Err(too_short(size));
                }
                let start = usize::try_from(a).map_err(|_| {
                    FormatError::Malformed(format!("{path}: data address {a:#x} out of range"))
                })?;
                crate::bytes::ensure_len(self.data, start, total)?;
                dataset.raw = RawData::Contiguous(Some(self.data[start..start + total].to_vec()));
            }
            DataLayout::Contiguous { address: None, .. } => {}
            DataLayout::Chunked {
                chunk_dims,
                index,
                address,
            } => {
                let spatial = &chunk_dims[..chunk_dims.len().saturating_sub(1)];
                if spatial.len() != dataset.dataspace.rank() || spatial.iter().any(|&c| c == 0) {
                    return Err(FormatError::Malformed(format!(
                        "{path}: chunk rank does not match dataspace"
                    )));
                }
                if let Some(address) = address {
                    self.load_chunks(&mut dataset, spatial, index, address, &pipeline, path)?;
                }
            }
        }

        if let Some(fill) = dataset.fill_value.as_mut() {
            swap_bytes(&datatype, fill);
        }
        match &mut dataset.raw {
            RawData::Contiguous(Some(bytes)) => swap_bytes(&datatype, bytes),
            RawData::Contiguous(None) => {}
            RawData::Chunks(chunks) => {
                for chunk in chunks.values_mut() {
                    swap_bytes(&datatype, chunk);
                }
            }
        }
        mark_little_endian(&mut datatype);
        dataset.datatype = datatype;
        Ok(dataset)
    }

    /// Read every stored chunk of a dataset. Nothing is allocated beyond
    /// what the file holds, so a corrupt extent cannot exhaust memory.
    fn load_chunks(
        &mut self,
        dataset: &mut Dataset,
        chunk_dims: &[u64],
        index: ChunkIndexKind,
        address: u64,
        pipeline: &FilterPipeline,
        path: &str,
    ) -> Result<(), FormatError> {
        let element_size = dataset.element_size();
        let dims = dataset.dataspace.dimensions.clone();
        let chunk_bytes = byte_len(chunk_dims, element_size)?;
        if chunk_bytes == 0 {
            return Err(FormatError::Malformed(format!("{path}: zero-size chunks")));
        }
        let out_of_range =
            || FormatError::Malformed(format!("{path}: chunk address out of range"));
        let stored_at = |start: u64, size: usize| -> Result<Vec<u8>, FormatError> {
            let start = usize::try_from(start).map_err(|_| out_of_range())?;
            crate::bytes::ensure_len(self.data, start, size)?;
            Ok(self.data[start..start + size].to_vec())
        };

        // (offsets, stored bytes, filter mask)
        let mut stored: Vec<(Vec<u64>, Vec<u8>, u32)> = Vec::new();
        match index {
            ChunkIndexKind::BTreeV1 => {
                for rec in collect_chunks(self.data, address, self.offset_size, dims.len())? {
                    stored.push((rec.offsets, stored_at(rec.address, rec.size as usize)?, rec.filter_mask));
                }
            }
            ChunkIndexKind::SingleChunk {
                filtered_size,
                filter_mask,
            } => {
                let size = match filtered_size {
                    Some(s) => usize::try_from(s).map_err(|_| out_of_range())?,
                    None => chunk_bytes,
                };
                stored.push((vec![0; dims.len()], stored_at(address, size)?, filter_mask));
            }
            ChunkIndexKind::Implicit => {
                let grid: Vec<u64> = dims.iter().zip(chunk_dims).map(|(d, c)| d.div_ceil(*c)).collect();
                let count = element_count(&grid).ok_or_else(out_of_range)?;
                for linear in 0..count {
                    let mut rest = linear;
                    let mut offsets = vec![0u64; dims.len()];
                    for d in (0..dims.len()).rev() {
                        offsets[d] = (rest % grid[d]) * chunk_dims[d];
                        rest /= grid[d];
                    }
                    let start = linear
                        .checked_mul(chunk_bytes as u64)
                        .and_then(|o| o.checked_add(address))
                        .ok_or_else(out_of_range)?;
                    stored.push((offsets, stored_at(start, chunk_bytes)?, 0));
                }
            }
            other => {
                return Err(FormatError::Unsupported(format!(
                    "{path}: chunk index {other:?}"
                )))
            }
        }

        let pattern = dataset.fill_pattern();
        let mut chunks = BTreeMap::new();
        for (offsets, bytes, mask) in stored {
            if offsets.iter().zip(&dims).any(|(o, d)| o >= d) {
                continue;
            }
            if offsets.iter().zip(chunk_dims).any(|(o, c)| o % c != 0) {
                return Err(FormatError::Malformed(format!(
                    "{path}: chunk offset {offsets:?} is not on the chunk grid"
                )));
            }
            let mut chunk = decompress_chunk(&bytes, pipeline, mask, element_size, chunk_bytes + 4)?;
            if chunk.len() != chunk_bytes {
                return Err(FormatError::DataSizeMismatch {
                    expected: chunk_bytes,
                    actual: chunk.len(),
                });
            }
            clear_outside(&mut chunk, &offsets, chunk_dims, &dims, &pattern)?;
            chunks.insert(offsets, chunk);
        }
        dataset.raw = RawData::Chunks(chunks);
        Ok(())
    }
}

/// Byte-swap big-endian numeric values in place and mark them little-endian.
fn to_little_endian(datatype: &mut Datatype, bytes: &mut [u8]) {
    swap_bytes(datatype, bytes);
    mark_little_endian(datatype);
}

/// Reverse every element of `bytes` when `datatype` is big-endian.
fn swap_bytes(datatype: &Datatype, bytes: &mut [u8]) {
    let (size, order) = match datatype {
        Datatype::FixedPoint { size, byte_order, .. }
        | Datatype::FloatingPoint { size, byte_order, .. } => (*size as usize, *byte_order),
        _ => return,
    };
    if order == DatatypeByteOrder::LittleEndian || size <= 1 {
        return;
    }
    for element in bytes.chunks_exact_mut(size) {
        element.reverse();
    }
}

fn mark_little_endian(datatype: &mut Datatype) {
    if let Datatype::FixedPoint { byte_order, .. } | Datatype::FloatingPoint { byte_order, .. } = datatype {
        *byte_order = DatatypeByteOrder::LittleEndian;
    }
}
