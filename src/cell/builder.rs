//! Cell construction
//!
//! Used to build get-method arguments (an address slice) and, in tests, the
//! message bodies a wallet would send.

use std::sync::Arc;

use super::{Cell, CellError};
use crate::address::TonAddress;

use super::decode::{OP_TEXT_COMMENT, OP_TRANSFER_NOTIFICATION};

/// Appends bits and references, checked against the cell limits
#[derive(Debug, Clone, Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn remaining_bits(&self) -> usize {
        Cell::MAX_BITS - self.bit_len
    }

    fn ensure_capacity(&self, bits: usize) -> Result<(), CellError> {
        if self.bit_len + bits > Cell::MAX_BITS {
            return Err(CellError::TooManyBits {
                bits: self.bit_len + bits,
            });
        }
        Ok(())
    }

    fn push_bit(&mut self, bit: bool) {
        let pos = self.bit_len;
        if pos % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            let byte = self.data.len() - 1;
            self.data[byte] |= 1 << (7 - pos % 8);
        }
        self.bit_len += 1;
    }

    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self, CellError> {
        self.ensure_capacity(1)?;
        self.push_bit(bit);
        Ok(self)
    }

    pub fn store_u128(&mut self, value: u128, bits: usize) -> Result<&mut Self, CellError> {
        if bits > 128 || (bits < 128 && value >> bits != 0) {
            return Err(CellError::UnsupportedWidth(bits));
        }
        self.ensure_capacity(bits)?;
        for i in (0..bits).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
        Ok(self)
    }

    pub fn store_uint(&mut self, value: u64, bits: usize) -> Result<&mut Self, CellError> {
        if bits > 64 {
            return Err(CellError::UnsupportedWidth(bits));
        }
        self.store_u128(u128::from(value), bits)
    }

    pub fn store_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, CellError> {
        self.ensure_capacity(bytes.len() * 8)?;
        for byte in bytes {
            self.store_uint(u64::from(*byte), 8)?;
        }
        Ok(self)
    }

    /// Store a `VarUInteger 16` amount
    pub fn store_coins(&mut self, amount: u128) -> Result<&mut Self, CellError> {
        let len = (128 - amount.leading_zeros() as usize).div_ceil(8);
        if len > 15 {
            return Err(CellError::UnsupportedWidth(len * 8));
        }
        self.store_uint(len as u64, 4)?;
        self.store_u128(amount, len * 8)
    }

    /// Store a `MsgAddress`: `addr_std` for `Some`, `addr_none` for `None`
    pub fn store_address(&mut self, address: Option<&TonAddress>) -> Result<&mut Self, CellError> {
        match address {
            None => self.store_uint(0, 2),
            Some(addr) => {
                self.ensure_capacity(2 + 1 + 8 + 256)?;
                self.store_uint(0b10, 2)?;
                self.store_bit(false)?;
                self.store_uint(u64::from(addr.workchain as u8), 8)?;
                self.store_bytes(&addr.hash)
            }
        }
    }

    pub fn store_ref(&mut self, cell: impl Into<Arc<Cell>>) -> Result<&mut Self, CellError> {
        if self.refs.len() >= Cell::MAX_REFS {
            return Err(CellError::TooManyRefs {
                refs: self.refs.len() + 1,
            });
        }
        self.refs.push(cell.into());
        Ok(self)
    }

    pub fn build(&self) -> Result<Cell, CellError> {
        Cell::new(self.data.clone(), self.bit_len, self.refs.clone())
    }
}

/// Encode `text` as a comment body: 32-bit zero op code, then the UTF-8 bytes
/// in snake format (each full cell continues in its first reference).
pub fn comment_cell(text: &str) -> Result<Cell, CellError> {
    let bytes = text.as_bytes();
    let root_capacity = (Cell::MAX_BITS - 32) / 8;
    let tail_capacity = Cell::MAX_BITS / 8;

    let (head, mut rest) = bytes.split_at(bytes.len().min(root_capacity));
    let mut chunks = Vec::new();
    while !rest.is_empty() {
        let (chunk, tail) = rest.split_at(rest.len().min(tail_capacity));
        chunks.push(chunk);
        rest = tail;
    }

    // Build the chain from the tail up so each cell can reference the next.
    let mut next: Option<Cell> = None;
    for chunk in chunks.into_iter().rev() {
        let mut b = CellBuilder::new();
        b.store_bytes(chunk)?;
        if let Some(child) = next.take() {
            b.store_ref(child)?;
        }
        next = Some(b.build()?);
    }

    let mut root = CellBuilder::new();
    root.store_uint(u64::from(OP_TEXT_COMMENT), 32)?;
    root.store_bytes(head)?;
    if let Some(child) = next {
        root.store_ref(child)?;
    }
    root.build()
}

/// Encode a jetton `transfer_notification` body.
///
/// A forward payload, when given, is stored by reference.
pub fn transfer_notification_cell(
    query_id: u64,
    amount: u128,
    sender: Option<&TonAddress>,
    forward_payload: Option<Cell>,
) -> Result<Cell, CellError> {
    let mut b = CellBuilder::new();
    b.store_uint(u64::from(OP_TRANSFER_NOTIFICATION), 32)?
        .store_uint(query_id, 64)?
        .store_coins(amount)?
        .store_address(sender)?;
    match forward_payload {
        Some(payload) => {
            b.store_bit(true)?.store_ref(payload)?;
        }
        None => {
            b.store_bit(false)?;
        }
    }
    b.build()
}
