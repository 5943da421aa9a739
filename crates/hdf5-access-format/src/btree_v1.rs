//! Version 1 B-trees ("TREE" nodes).
//!
//! Type 0 trees index the symbol nodes of an old-style group; type 1 trees
//! index the chunks of a chunked dataset. Both are read; only chunk trees
//! are written.

use std::collections::HashSet;

use crate::bytes::{ensure_len, read_sized, read_u16, read_u32, read_u64, write_sized, UNDEF_ADDR};
use crate::error::FormatError;

const TREE_SIGNATURE: [u8; 4] = *b"TREE";

/// Node type of a group tree.
pub const NODE_TYPE_GROUP: u8 = 0;
/// Node type of a chunk tree.
pub const NODE_TYPE_CHUNK: u8 = 1;

/// Half the maximum number of children per chunk tree node. Files with a
/// version 2 superblock always use this value.
pub const CHUNK_NODE_K: usize = 32;

/// Depth limit when walking trees from damaged files.
const MAX_DEPTH: usize = 64;

/// One chunk of a chunked dataset as referenced from a leaf node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Stored (possibly filtered) size in bytes.
    pub size: u32,
    /// Bit `i` set means filter `i` was skipped for this chunk.
    pub filter_mask: u32,
    /// Element offset of the chunk along each dataset axis.
    pub offsets: Vec<u64>,
    pub address: u64,
}

/// A decoded node. Keys are kept as raw bytes since their layout depends
/// on the tree type.
#[derive(Debug, Clone)]
struct Node<'a> {
    node_type: u8,
    level: u8,
    keys: Vec<&'a [u8]>,
    children: Vec<u64>,
}

fn key_size(node_type: u8, length_size: u8, rank: usize) -> usize {
    if node_type == NODE_TYPE_GROUP {
        length_size as usize
    } else {
        // chunk size, filter mask, then one offset per axis plus the
        // element dimension
        8 + 8 * (rank + 1)
    }
}

fn parse_node<'a>(
    data: &'a [u8],
    address: u64,
    offset_size: u8,
    length_size: u8,
    rank: usize,
) -> Result<Node<'a>, FormatError> {
    let pos = usize::try_from(address)
        .map_err(|_| FormatError::Malformed(format!("B-tree address {address:#x}")))?;
    let os = offset_size as usize;
    ensure_len(data, pos, 8 + 2 * os)?;
    if data[pos..pos + 4] != TREE_SIGNATURE {
        return Err(FormatError::InvalidSignature { expected: "TREE" });
    }
    let node_type = data[pos + 4];
    let level = data[pos + 5];
    let entries = read_u16(data, pos + 6)? as usize;
    if node_type > NODE_TYPE_CHUNK {
        return Err(FormatError::Malformed(format!("B-tree node type {node_type}")));
    }

    let ks = key_size(node_type, length_size, rank);
    let mut cursor = pos + 8 + 2 * os;
    ensure_len(data, cursor, entries * (ks + os) + ks)?;
    let mut keys = Vec::with_capacity(entries + 1);
    let mut children = Vec::with_capacity(entries);
    for _ in 0..entries {
        keys.push(&data[cursor..cursor + ks]);
        cursor += ks;
        children.push(read_sized(data, cursor, offset_size)?);
        cursor += os;
    }
    keys.push(&data[cursor..cursor + ks]);

    Ok(Node {
        node_type,
        level,
        keys,
        children,
    })
}

/// Walk a tree from `root`, calling `leaf` for every (left key, child)
/// pair of every level-0 node.
fn walk<'a>(
    data: &'a [u8],
    root: u64,
    expected_type: u8,
    offset_size: u8,
    length_size: u8,
    rank: usize,
    leaf: &mut dyn FnMut(&'a [u8], u64) -> Result<(), FormatError>,
) -> Result<(), FormatError> {
    let mut visited = HashSet::new();
    let mut stack = vec![(root, 0usize)];
    while let Some((address, depth)) = stack.pop() {
        if depth > MAX_DEPTH || !visited.insert(address) {
            return Err(FormatError::Malformed("B-tree contains a cycle".into()));
        }
        let node = parse_node(data, address, offset_size, length_size, rank)?;
        if node.node_type != expected_type {
            return Err(FormatError::Malformed(format!(
                "expected B-tree type {expected_type}, found {}",
                node.node_type
            )));
        }
        if node.level == 0 {
            for (key, &child) in node.keys.iter().zip(&node.children) {
                leaf(key, child)?;
            }
        } else {
            // Reverse so children come off the stack in key order.
            for &child in node.children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
    }
    Ok(())
}

/// Addresses of the symbol nodes under a group tree, in key order.
pub fn collect_symbol_nodes(
    data: &[u8],
    root: u64,
    offset_size: u8,
    length_size: u8,
) -> Result<Vec<u64>, FormatError> {
    let mut nodes = Vec::new();
    walk(data, root, NODE_TYPE_GROUP, offset_size, length_size, 0, &mut |_, child| {
        nodes.push(child);
        Ok(())
    })?;
    Ok(nodes)
}

/// Every chunk of a dataset of the given rank, in key order.
pub fn collect_chunks(
    data: &[u8],
    root: u64,
    offset_size: u8,
    rank: usize,
) -> Result<Vec<ChunkRecord>, FormatError> {
    let mut chunks = Vec::new();
    walk(data, root, NODE_TYPE_CHUNK, offset_size, 8, rank, &mut |key, address| {
        let offsets = (0..rank)
            .map(|d| read_u64(key, 8 + 8 * d))
            .collect::<Result<Vec<_>, _>>()?;
        chunks.push(ChunkRecord {
            size: read_u32(key, 0)?,
            filter_mask: read_u32(key, 4)?,
            offsets,
            address,
        });
        Ok(())
    })?;
    Ok(chunks)
}

/// Encoded size of one chunk tree node with room for `2K` children.
pub fn chunk_node_size(rank: usize) -> usize {
    let ks = key_size(NODE_TYPE_CHUNK, 8, rank);
    8 + 2 * 8 + (2 * CHUNK_NODE_K + 1) * ks + 2 * CHUNK_NODE_K * 8
}

/// Number of nodes needed to index `chunk_count` chunks.
pub fn chunk_tree_node_count(chunk_count: usize) -> usize {
    let fanout = 2 * CHUNK_NODE_K;
    let mut level = chunk_count.max(1).div_ceil(fanout);
    let mut total = level;
    while level > 1 {
        level = level.div_ceil(fanout);
        total += level;
    }
    total
}

/// Encoded key: size, mask, offsets, and a zero element-dimension offset.
fn encode_key(buf: &mut Vec<u8>, size: u32, mask: u32, offsets: &[u64]) {
    buf.extend_from_slice(&size.to_le_bytes());
    buf.extend_from_slice(&mask.to_le_bytes());
    for &o in offsets {
        buf.extend_from_slice(&o.to_le_bytes());
    }
    buf.extend_from_slice(&0u64.to_le_bytes());
}

struct PlannedNode {
    level: u8,
    /// (left key offsets, size, mask, child address)
    entries: Vec<(Vec<u64>, u32, u32, u64)>,
    /// Upper bound key of the last entry.
    last_key: Vec<u64>,
}

/// Serialize a chunk tree over `chunks` (sorted by offset) whose nodes are
/// placed back to back starting at `start`.
///
/// Returns the node bytes and the root address. Leaves come first, the
/// root last. Every node is padded to the full `2K` size.
pub fn serialize_chunk_tree(
    chunks: &[ChunkRecord],
    chunk_dims: &[u64],
    start: u64,
) -> Result<(Vec<u8>, u64), FormatError> {
    if chunks.is_empty() {
        return Err(FormatError::Malformed("chunk tree without chunks".into()));
    }
    let rank = chunk_dims.len();
    if chunks.iter().any(|c| c.offsets.len() != rank) {
        return Err(FormatError::Malformed("chunk offset rank mismatch".into()));
    }
    let fanout = 2 * CHUNK_NODE_K;
    let node_size = chunk_node_size(rank) as u64;

    let mut levels: Vec<Vec<PlannedNode>> = Vec::new();
    let leaves = chunks
        .chunks(fanout)
        .map(|group| {
            let last = &group[group.len() - 1];
            PlannedNode {
                level: 0,
                entries: group
                    .iter()
                    .map(|c| (c.offsets.clone(), c.size, c.filter_mask, c.address))
                    .collect(),
                last_key: last
                    .offsets
                    .iter()
                    .zip(chunk_dims)
                    .map(|(o, d)| o + d)
                    .collect(),
            }
        })
        .collect::<Vec<_>>();
    levels.push(leaves);

    let mut next_index = 0u64;
    let mut first_of_level = Vec::new();
    loop {
        let current = levels.last().map_or(0, Vec::len);
        first_of_level.push(next_index);
        next_index += current as u64;
        if current <= 1 {
            break;
        }
        let level_no = levels.len() as u8;
        let base = first_of_level[first_of_level.len() - 1];
        let below = &levels[levels.len() - 1];
        let parents = below
            .chunks(fanout)
            .enumerate()
            .map(|(g, group)| PlannedNode {
                level: level_no,
                entries: group
                    .iter()
                    .enumerate()
                    .map(|(i, child)| {
                        let addr = start + (base + (g * fanout + i) as u64) * node_size;
                        (child.entries[0].0.clone(), 0, 0, addr)
                    })
                    .collect(),
                last_key: group[group.len() - 1].last_key.clone(),
            })
            .collect::<Vec<_>>();
        levels.push(parents);
    }

    let mut buf = Vec::with_capacity(next_index as usize * node_size as usize);
    for (li, level) in levels.iter().enumerate() {
        let first = first_of_level[li];
        for (ni, node) in level.iter().enumerate() {
            let node_start = buf.len();
            let sibling = |i: Option<usize>| match i {
                Some(i) if i < level.len() => start + (first + i as u64) * node_size,
                _ => UNDEF_ADDR,
            };
            buf.extend_from_slice(&TREE_SIGNATURE);
            buf.push(NODE_TYPE_CHUNK);
            buf.push(node.level);
            buf.extend_from_slice(&(node.entries.len() as u16).to_le_bytes());
            write_sized(&mut buf, sibling(ni.checked_sub(1)), 8);
            write_sized(&mut buf, sibling(Some(ni + 1)), 8);
            for (offsets, size, mask, child) in &node.entries {
                encode_key(&mut buf, *size, *mask, offsets);
                write_sized(&mut buf, *child, 8);
            }
            encode_key(&mut buf, 0, 0, &node.last_key);
            buf.resize(node_start + node_size as usize, 0);
        }
    }

    let root = start + (next_index - 1) * node_size;
    Ok((buf, root))
}
