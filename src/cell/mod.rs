//! TON cell model
//!
//! A cell is a bit-string of at most 1023 bits plus up to four references to
//! child cells. Message bodies and get-method results arrive as bag-of-cells
//! (BoC) blobs; [`boc`] turns those into a [`Cell`] tree, [`CellSlice`] reads
//! fields from it and [`decode`] interprets message bodies.
//!
//! Everything in this module treats its input as adversarial: reads are
//! bounds-checked and return [`CellError`] instead of panicking.

use std::sync::Arc;

use thiserror::Error;

pub mod boc;
pub mod builder;
pub mod decode;
pub mod slice;

pub use builder::CellBuilder;
pub use decode::{JettonNotification, MessageBody};
pub use slice::CellSlice;

/// Errors raised while reading or building cells
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellError {
    #[error("cell data exceeds {max} bits (got {bits})", max = Cell::MAX_BITS)]
    TooManyBits { bits: usize },

    #[error("cell has more than {max} references (got {refs})", max = Cell::MAX_REFS)]
    TooManyRefs { refs: usize },

    #[error("read of {needed} bits overflows slice ({remaining} remaining)")]
    NotEnoughBits { needed: usize, remaining: usize },

    #[error("no reference left to load")]
    NotEnoughRefs,

    #[error("integer width {0} is not supported")]
    UnsupportedWidth(usize),

    #[error("slice holds {0} bits which is not a whole number of bytes")]
    UnalignedBytes(usize),

    #[error("unsupported address tag {0:#04b}")]
    UnsupportedAddress(u8),

    #[error("snake chain longer than {0} cells")]
    ChainTooLong(usize),

    #[error("text is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed bag of cells: {0}")]
    MalformedBoc(&'static str),

    #[error("bag of cells checksum mismatch")]
    ChecksumMismatch,
}

/// An ordinary TON cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl Cell {
    pub const MAX_BITS: usize = 1023;
    pub const MAX_REFS: usize = 4;

    /// Create a cell from raw bytes holding `bit_len` bits (MSB first).
    ///
    /// Bits of `data` beyond `bit_len` are cleared so that two cells with the
    /// same logical content always compare equal.
    pub fn new(mut data: Vec<u8>, bit_len: usize, refs: Vec<Arc<Cell>>) -> Result<Self, CellError> {
        if bit_len > Self::MAX_BITS {
            return Err(CellError::TooManyBits { bits: bit_len });
        }
        if refs.len() > Self::MAX_REFS {
            return Err(CellError::TooManyRefs { refs: refs.len() });
        }

        let byte_len = bit_len.div_ceil(8);
        if data.len() < byte_len {
            return Err(CellError::NotEnoughBits {
                needed: bit_len,
                remaining: data.len() * 8,
            });
        }
        data.truncate(byte_len);
        let tail_bits = bit_len % 8;
        if tail_bits != 0 {
            if let Some(last) = data.last_mut() {
                *last &= 0xffu8 << (8 - tail_bits);
            }
        }

        Ok(Self {
            data,
            bit_len,
            refs,
        })
    }

    /// A cell with no data and no references
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            bit_len: 0,
            refs: Vec::new(),
        }
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn refs(&self) -> &[Arc<Cell>] {
        &self.refs
    }

    /// Start reading this cell from its first bit and first reference
    pub fn parse(&self) -> CellSlice<'_> {
        CellSlice::new(self)
    }

    /// Total number of cells in the tree rooted here (duplicates counted)
    pub fn tree_size(&self) -> usize {
        1 + self.refs.iter().map(|r| r.tree_size()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clears_trailing_bits() {
        let a = Cell::new(vec![0b1011_1111], 4, vec![]).unwrap();
        let b = Cell::new(vec![0b1011_0000], 4, vec![]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.data(), &[0b1011_0000]);
    }

    #[test]
    fn test_new_truncates_extra_bytes() {
        let cell = Cell::new(vec![0xff, 0xff, 0xff], 8, vec![]).unwrap();
        assert_eq!(cell.data(), &[0xff]);
    }

    #[test]
    fn test_new_rejects_oversized() {
        let data = vec![0u8; 128];
        assert_eq!(
            Cell::new(data, 1024, vec![]).unwrap_err(),
            CellError::TooManyBits { bits: 1024 }
        );
    }

    #[test]
    fn test_new_rejects_too_many_refs() {
        let child = Arc::new(Cell::empty());
        let refs = vec![child.clone(), child.clone(), child.clone(), child.clone(), child];
        assert_eq!(
            Cell::new(vec![], 0, refs).unwrap_err(),
            CellError::TooManyRefs { refs: 5 }
        );
    }

    #[test]
    fn test_new_rejects_short_data() {
        assert!(Cell::new(vec![0xff], 9, vec![]).is_err());
    }

    #[test]
    fn test_tree_size() {
        let leaf = Arc::new(Cell::empty());
        let mid = Arc::new(Cell::new(vec![], 0, vec![leaf.clone(), leaf]).unwrap());
        let root = Cell::new(vec![], 0, vec![mid]).unwrap();
        assert_eq!(root.tree_size(), 4);
    }
}
