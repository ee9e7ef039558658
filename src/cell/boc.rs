//! Bag-of-cells (BoC) serialization
//!
//! ## Layout
//!
//! ```text
//! magic u32 | flags:size u8 | off_bytes u8 | cells | roots | absent | tot_cells_size
//! | root indexes | [index] | cell data | [crc32c]
//! ```
//!
//! Each cell is `d1 d2 data refs`, where `d1 = refs + 8*exotic + 32*level`
//! and `d2 = floor(bits/8) + ceil(bits/8)`. A partial last byte carries a
//! completion tag (a single 1 bit followed by zeros).
//!
//! References must point to cells with a larger index, which makes the graph
//! acyclic by construction and lets us build it back to front.

use std::sync::Arc;

use base64::Engine as _;

use super::{Cell, CellError};

const BOC_MAGIC: u32 = 0xb5ee_9c72;
const FLAG_HAS_INDEX: u8 = 0x80;
const FLAG_HAS_CRC32C: u8 = 0x40;

/// Upper bound on cells accepted from one blob
pub const MAX_BOC_CELLS: usize = 4096;

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], CellError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(CellError::MalformedBoc("unexpected end of data"))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CellError> {
        Ok(self.take(1)?[0])
    }

    fn uint(&mut self, width: usize) -> Result<usize, CellError> {
        let mut value: usize = 0;
        for byte in self.take(width)? {
            value = (value << 8) | usize::from(*byte);
        }
        Ok(value)
    }
}

/// CRC-32C (Castagnoli), as used by the BoC checksum
pub fn crc32c(data: &[u8]) -> u32 {
    let mut crc = 0xffff_ffffu32;
    for byte in data {
        crc ^= u32::from(*byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0x82f6_3b78
            } else {
                crc >> 1
            };
        }
    }
    !crc
}

struct RawCell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<usize>,
}

/// Parse a BoC and return its first root cell
pub fn deserialize(bytes: &[u8]) -> Result<Arc<Cell>, CellError> {
    let mut r = Reader { bytes, pos: 0 };

    let magic = r.uint(4)? as u32;
    if magic != BOC_MAGIC {
        return Err(CellError::MalformedBoc("bad magic"));
    }

    let flags = r.u8()?;
    let has_index = flags & FLAG_HAS_INDEX != 0;
    let has_crc = flags & FLAG_HAS_CRC32C != 0;
    let ref_size = usize::from(flags & 0x07);
    if !(1..=4).contains(&ref_size) {
        return Err(CellError::MalformedBoc("invalid reference size"));
    }
    let off_size = usize::from(r.u8()?);
    if !(1..=8).contains(&off_size) {
        return Err(CellError::MalformedBoc("invalid offset size"));
    }

    let cell_count = r.uint(ref_size)?;
    let root_count = r.uint(ref_size)?;
    let _absent = r.uint(ref_size)?;
    let data_size = r.uint(off_size)?;

    if cell_count == 0 || cell_count > MAX_BOC_CELLS {
        return Err(CellError::MalformedBoc("cell count out of range"));
    }
    if root_count == 0 || root_count > cell_count {
        return Err(CellError::MalformedBoc("root count out of range"));
    }

    let mut roots = Vec::with_capacity(root_count);
    for _ in 0..root_count {
        let idx = r.uint(ref_size)?;
        if idx >= cell_count {
            return Err(CellError::MalformedBoc("root index out of range"));
        }
        roots.push(idx);
    }

    if has_index {
        r.take(
            cell_count
                .checked_mul(off_size)
                .ok_or(CellError::MalformedBoc("index size overflow"))?,
        )?;
    }

    let data_start = r.pos;
    let mut raw_cells = Vec::with_capacity(cell_count);
    for idx in 0..cell_count {
        raw_cells.push(read_raw_cell(&mut r, idx, cell_count, ref_size)?);
    }
    if r.pos - data_start != data_size {
        return Err(CellError::MalformedBoc("cell data size mismatch"));
    }

    if has_crc {
        let body_end = r.pos;
        let stored = r.take(4)?;
        let stored = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
        if crc32c(&bytes[..body_end]) != stored {
            return Err(CellError::ChecksumMismatch);
        }
    }

    // Children always have larger indexes, so build from the end.
    let mut built: Vec<Option<Arc<Cell>>> = vec![None; cell_count];
    for idx in (0..cell_count).rev() {
        let raw = &raw_cells[idx];
        let mut refs = Vec::with_capacity(raw.refs.len());
        for child in &raw.refs {
            let cell = built[*child]
                .clone()
                .ok_or(CellError::MalformedBoc("dangling reference"))?;
            refs.push(cell);
        }
        built[idx] = Some(Arc::new(Cell::new(raw.data.clone(), raw.bit_len, refs)?));
    }

    built[roots[0]]
        .clone()
        .ok_or(CellError::MalformedBoc("missing root"))
}

fn read_raw_cell(
    r: &mut Reader<'_>,
    idx: usize,
    cell_count: usize,
    ref_size: usize,
) -> Result<RawCell, CellError> {
    let d1 = r.u8()?;
    let d2 = r.u8()?;

    let ref_count = usize::from(d1 & 0x07);
    if ref_count > Cell::MAX_REFS {
        return Err(CellError::MalformedBoc("too many references"));
    }
    if d1 & 0x08 != 0 {
        return Err(CellError::MalformedBoc("exotic cells are not supported"));
    }
    if d1 & 0x10 != 0 {
        // stored hashes and depths: one (hash, depth) pair per level
        let levels = (d1 >> 5).count_ones() as usize + 1;
        r.take(levels * (32 + 2))?;
    }

    let data_len = usize::from(d2).div_ceil(2);
    let data = r.take(data_len)?.to_vec();
    let bit_len = if d2 % 2 == 0 {
        data_len * 8
    } else {
        let last = *data
            .last()
            .ok_or(CellError::MalformedBoc("empty padded cell"))?;
        if last == 0 {
            return Err(CellError::MalformedBoc("missing completion tag"));
        }
        data_len * 8 - (last.trailing_zeros() as usize + 1)
    };

    let mut refs = Vec::with_capacity(ref_count);
    for _ in 0..ref_count {
        let child = r.uint(ref_size)?;
        if child <= idx || child >= cell_count {
            return Err(CellError::MalformedBoc("reference out of order"));
        }
        refs.push(child);
    }

    Ok(RawCell {
        data,
        bit_len,
        refs,
    })
}

/// Serialize a single-root BoC with a CRC32C trailer
pub fn serialize(root: &Cell) -> Result<Vec<u8>, CellError> {
    // Pre-order numbering puts every parent before its children.
    let mut order: Vec<&Cell> = Vec::new();
    let mut stack: Vec<&Cell> = vec![root];
    while let Some(cell) = stack.pop() {
        order.push(cell);
        if order.len() > MAX_BOC_CELLS {
            return Err(CellError::MalformedBoc("too many cells"));
        }
        for child in cell.refs().iter().rev() {
            stack.push(child.as_ref());
        }
    }

    // In pre-order the first child sits right after its parent and each
    // sibling follows the previous sibling's whole subtree.
    let child_indexes: Vec<Vec<usize>> = order
        .iter()
        .enumerate()
        .map(|(idx, cell)| {
            let mut next = idx + 1;
            cell.refs()
                .iter()
                .map(|child| {
                    let at = next;
                    next += child.tree_size();
                    at
                })
                .collect()
        })
        .collect();

    let cell_count = order.len();
    let ref_size = bytes_needed(cell_count);

    let mut cell_data = Vec::new();
    for (idx, cell) in order.iter().enumerate() {
        let bits = cell.bit_len();
        cell_data.push(cell.refs().len() as u8);
        cell_data.push(((bits / 8) + bits.div_ceil(8)) as u8);
        let mut data = cell.data().to_vec();
        if bits % 8 != 0 {
            if let Some(last) = data.last_mut() {
                *last |= 1 << (7 - bits % 8);
            }
        }
        cell_data.extend_from_slice(&data);
        for child in &child_indexes[idx] {
            push_uint(&mut cell_data, *child, ref_size);
        }
    }

    let off_size = bytes_needed(cell_data.len());

    let mut out = Vec::with_capacity(cell_data.len() + 32);
    out.extend_from_slice(&BOC_MAGIC.to_be_bytes());
    out.push(FLAG_HAS_CRC32C | ref_size as u8);
    out.push(off_size as u8);
    push_uint(&mut out, cell_count, ref_size);
    push_uint(&mut out, 1, ref_size);
    push_uint(&mut out, 0, ref_size);
    push_uint(&mut out, cell_data.len(), off_size);
    push_uint(&mut out, 0, ref_size);
    out.extend_from_slice(&cell_data);
    let crc = crc32c(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

fn bytes_needed(value: usize) -> usize {
    let mut n = 1;
    while n < 8 && value >> (8 * n) != 0 {
        n += 1;
    }
    n
}

fn push_uint(out: &mut Vec<u8>, value: usize, width: usize) {
    for i in (0..width).rev() {
        out.push((value >> (8 * i)) as u8);
    }
}

/// Decode a base64 BoC (standard or URL-safe alphabet)
pub fn from_base64(encoded: &str) -> Result<Arc<Cell>, CellError> {
    let trimmed = encoded.trim();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(trimmed)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(trimmed))
        .map_err(|_| CellError::MalformedBoc("invalid base64"))?;
    deserialize(&bytes)
}

pub fn to_base64(root: &Cell) -> Result<String, CellError> {
    Ok(base64::engine::general_purpose::STANDARD.encode(serialize(root)?))
}
