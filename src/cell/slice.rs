//! Bounds-checked reader over a cell's bits and references

use super::{Cell, CellError};
use crate::address::TonAddress;

/// Cursor over one cell. Reads consume bits and references in order.
#[derive(Debug, Clone)]
pub struct CellSlice<'a> {
    cell: &'a Cell,
    bit_pos: usize,
    ref_pos: usize,
}

impl<'a> CellSlice<'a> {
    pub fn new(cell: &'a Cell) -> Self {
        Self {
            cell,
            bit_pos: 0,
            ref_pos: 0,
        }
    }

    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len() - self.bit_pos
    }

    pub fn remaining_refs(&self) -> usize {
        self.cell.refs().len() - self.ref_pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0 && self.remaining_refs() == 0
    }

    fn ensure_bits(&self, needed: usize) -> Result<(), CellError> {
        let remaining = self.remaining_bits();
        if needed > remaining {
            return Err(CellError::NotEnoughBits { needed, remaining });
        }
        Ok(())
    }

    fn bit_at(&self, pos: usize) -> bool {
        let byte = self.cell.data()[pos / 8];
        (byte >> (7 - pos % 8)) & 1 == 1
    }

    pub fn load_bit(&mut self) -> Result<bool, CellError> {
        self.ensure_bits(1)?;
        let bit = self.bit_at(self.bit_pos);
        self.bit_pos += 1;
        Ok(bit)
    }

    pub fn skip_bits(&mut self, bits: usize) -> Result<(), CellError> {
        self.ensure_bits(bits)?;
        self.bit_pos += bits;
        Ok(())
    }

    /// Load an unsigned big-endian integer of up to 128 bits
    pub fn load_u128(&mut self, bits: usize) -> Result<u128, CellError> {
        if bits > 128 {
            return Err(CellError::UnsupportedWidth(bits));
        }
        self.ensure_bits(bits)?;
        let mut value: u128 = 0;
        for i in 0..bits {
            value = (value << 1) | u128::from(self.bit_at(self.bit_pos + i));
        }
        self.bit_pos += bits;
        Ok(value)
    }

    /// Load an unsigned big-endian integer of up to 64 bits
    pub fn load_uint(&mut self, bits: usize) -> Result<u64, CellError> {
        if bits > 64 {
            return Err(CellError::UnsupportedWidth(bits));
        }
        // fits: width checked above
        Ok(self.load_u128(bits)? as u64)
    }

    pub fn load_u8(&mut self) -> Result<u8, CellError> {
        Ok(self.load_uint(8)? as u8)
    }

    pub fn load_u32(&mut self) -> Result<u32, CellError> {
        Ok(self.load_uint(32)? as u32)
    }

    /// Load a `VarUInteger 16` (TL-B `Coins`): 4-bit byte length, then the value
    pub fn load_coins(&mut self) -> Result<u128, CellError> {
        let len = self.load_uint(4)? as usize;
        self.load_u128(len * 8)
    }

    pub fn load_bytes(&mut self, len: usize) -> Result<Vec<u8>, CellError> {
        self.ensure_bits(len * 8)?;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.load_u8()?);
        }
        Ok(out)
    }

    /// Load every remaining data bit as bytes; fails if not byte aligned
    pub fn load_remaining_bytes(&mut self) -> Result<Vec<u8>, CellError> {
        let remaining = self.remaining_bits();
        if remaining % 8 != 0 {
            return Err(CellError::UnalignedBytes(remaining));
        }
        self.load_bytes(remaining / 8)
    }

    pub fn load_ref(&mut self) -> Result<&'a Cell, CellError> {
        let cell: &'a Cell = self.cell;
        let child = cell
            .refs()
            .get(self.ref_pos)
            .ok_or(CellError::NotEnoughRefs)?;
        self.ref_pos += 1;
        Ok(child.as_ref())
    }

    /// Load a `MsgAddress`.
    ///
    /// `addr_none` yields `None`; `addr_std` yields the address (an anycast
    /// prefix is skipped); external and variable-length forms are rejected.
    pub fn load_address(&mut self) -> Result<Option<TonAddress>, CellError> {
        let tag = self.load_uint(2)? as u8;
        match tag {
            0b00 => Ok(None),
            0b10 => {
                if self.load_bit()? {
                    let depth = self.load_uint(5)? as usize;
                    self.skip_bits(depth)?;
                }
                let workchain = self.load_u8()? as i8;
                let raw = self.load_bytes(32)?;
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&raw);
                Ok(Some(TonAddress::new(workchain, hash)))
            }
            other => Err(CellError::UnsupportedAddress(other)),
        }
    }
}
