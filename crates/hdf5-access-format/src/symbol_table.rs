//! Old-style groups: the symbol table message (type 0x0011) and the symbol
//! nodes ("SNOD") its B-tree points at.

use crate::btree_v1::collect_symbol_nodes;
use crate::bytes::{ensure_len, read_sized, read_u16, read_u32};
use crate::error::FormatError;
use crate::link_message::LinkTarget;
use crate::local_heap::LocalHeap;

/// Symbol table entry cache type of a soft link; the scratch pad holds the
/// heap offset of the link value.
const CACHE_SOFT_LINK: u32 = 2;

/// Addresses held by a symbol table message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTableMessage {
    pub btree_address: u64,
    pub heap_address: u64,
}

impl SymbolTableMessage {
    pub fn parse(data: &[u8], offset_size: u8) -> Result<SymbolTableMessage, FormatError> {
        Ok(SymbolTableMessage {
            btree_address: read_sized(data, 0, offset_size)?,
            heap_address: read_sized(data, offset_size as usize, offset_size)?,
        })
    }
}

/// Resolve every (name, target) entry of an old-style group, in name
/// order. Entries are hard links except for soft links.
pub fn read_entries(
    data: &[u8],
    table: SymbolTableMessage,
    offset_size: u8,
    length_size: u8,
) -> Result<Vec<(String, LinkTarget)>, FormatError> {
    let heap = LocalHeap::parse(data, table.heap_address, offset_size, length_size)?;
    let os = offset_size as usize;
    // name offset, header address, cache type, reserved, 16-byte scratch pad
    let entry_size = 2 * os + 4 + 4 + 16;

    let mut entries = Vec::new();
    for node in collect_symbol_nodes(data, table.btree_address, offset_size, length_size)? {
        let pos = node as usize;
        ensure_len(data, pos, 8)?;
        if &data[pos..pos + 4] != b"SNOD" {
            return Err(FormatError::InvalidSignature { expected: "SNOD" });
        }
        let count = read_u16(data, pos + 6)? as usize;
        ensure_len(data, pos + 8, count * entry_size)?;
        for i in 0..count {
            let e = pos + 8 + i * entry_size;
            let name_offset = read_sized(data, e, offset_size)?;
            let address = read_sized(data, e + os, offset_size)?;
            let target = if read_u32(data, e + 2 * os)? == CACHE_SOFT_LINK {
                let value_offset = read_u32(data, e + 2 * os + 8)? as u64;
                LinkTarget::Soft(heap.read_string(data, value_offset)?)
            } else {
                LinkTarget::Hard(address)
            };
            entries.push((heap.read_string(data, name_offset)?, target));
        }
    }
    Ok(entries)
}
