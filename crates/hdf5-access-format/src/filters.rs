//! Chunk filters: zlib deflate (via `flate2`), byte shuffle and fletcher32.

use std::io::{Read, Write};

use crate::error::FormatError;
use crate::filter_pipeline::{FilterPipeline, FILTER_DEFLATE, FILTER_FLETCHER32, FILTER_SHUFFLE};

/// Run the pipeline forward over an uncompressed chunk.
pub fn compress_chunk(
    data: &[u8],
    pipeline: &FilterPipeline,
    element_size: usize,
) -> Result<Vec<u8>, FormatError> {
    let mut out = data.to_vec();
    for filter in &pipeline.filters {
        out = match filter.filter_id {
            FILTER_SHUFFLE => shuffle(&out, element_size),
            FILTER_DEFLATE => {
                let level = filter.client_data.first().copied().unwrap_or(6).min(9);
                deflate(&out, level)?
            }
            other => return Err(FormatError::Unsupported(format!("writing filter {other}"))),
        };
    }
    Ok(out)
}

/// Undo the pipeline over a stored chunk. Bit `i` of `filter_mask` set
/// means filter `i` was skipped when the chunk was written. No stage may
/// produce more than `limit` bytes.
pub fn decompress_chunk(
    stored: &[u8],
    pipeline: &FilterPipeline,
    filter_mask: u32,
    element_size: usize,
    limit: usize,
) -> Result<Vec<u8>, FormatError> {
    let mut out = stored.to_vec();
    for (i, filter) in pipeline.filters.iter().enumerate().rev() {
        if i < 32 && filter_mask & (1 << i) != 0 {
            continue;
        }
        out = match filter.filter_id {
            FILTER_SHUFFLE => unshuffle(&out, element_size),
            FILTER_DEFLATE => inflate(&out, limit)?,
            FILTER_FLETCHER32 => strip_fletcher32(&out)?,
            other => return Err(FormatError::Unsupported(format!("filter {other}"))),
        };
    }
    Ok(out)
}

fn deflate(data: &[u8], level: u32) -> Result<Vec<u8>, FormatError> {
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| FormatError::Filter(format!("deflate: {e}")))?;
    encoder
        .finish()
        .map_err(|e| FormatError::Filter(format!("deflate: {e}")))
}

fn inflate(data: &[u8], limit: usize) -> Result<Vec<u8>, FormatError> {
    let mut out = Vec::new();
    flate2::read::ZlibDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| FormatError::Filter(format!("inflate: {e}")))?;
    if out.len() > limit {
        return Err(FormatError::Filter(format!("inflated chunk exceeds {limit} bytes")));
    }
    Ok(out)
}

/// Group byte `j` of every element together. A trailing partial element
/// is left in place.
fn shuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 {
        return data.to_vec();
    }
    let n = data.len() / element_size;
    let mut out = data.to_vec();
    for (i, elem) in data.chunks_exact(element_size).enumerate() {
        for (j, &b) in elem.iter().enumerate() {
            out[j * n + i] = b;
        }
    }
    out
}

fn unshuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 {
        return data.to_vec();
    }
    let n = data.len() / element_size;
    let mut out = data.to_vec();
    for i in 0..n {
        for j in 0..element_size {
            out[i * element_size + j] = data[j * n + i];
        }
    }
    out
}

/// Verify and remove the trailing big-endian fletcher32 checksum.
fn strip_fletcher32(data: &[u8]) -> Result<Vec<u8>, FormatError> {
    if data.len() < 4 {
        return Err(FormatError::Filter("fletcher32: chunk shorter than checksum".into()));
    }
    let (payload, stored) = data.split_at(data.len() - 4);
    let stored = u32::from_be_bytes([stored[0], stored[1], stored[2], stored[3]]);
    let computed = fletcher32(payload);
    if stored != computed {
        return Err(FormatError::Filter(format!(
            "fletcher32 mismatch: stored {stored:#010x}, computed {computed:#010x}"
        )));
    }
    Ok(payload.to_vec())
}

fn fletcher32(data: &[u8]) -> u32 {
    let (mut sum1, mut sum2) = (0u32, 0u32);
    for word in data.chunks(2) {
        let hi = word[0] as u32;
        let lo = word.get(1).copied().unwrap_or(0) as u32;
        sum1 = (sum1 + ((hi << 8) | lo)) % 65535;
        sum2 = (sum2 + sum1) % 65535;
    }
    (sum2 << 16) | sum1
}
