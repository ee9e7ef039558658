//! TON Address Encoding
//!
//! Addresses reach the watcher in two textual forms:
//!
//! ```text
//! raw:      <workchain>:<64 hex chars>          e.g. 0:b113a994...621dfe
//! friendly: base64(tag | workchain | hash | crc16)   48 chars, 36 bytes
//! ```
//!
//! The friendly tag encodes the bounceable flag (`0x11` bounceable, `0x51`
//! non-bounceable) with `0x80` set for testnet-only addresses. Two addresses
//! are the same account when workchain and hash match, whatever the flags, so
//! all comparisons go through [`TonAddress`].

use base64::Engine as _;
use eyre::{eyre, Result};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Friendly Format Constants
// ============================================================================

const TAG_BOUNCEABLE: u8 = 0x11;
const TAG_NON_BOUNCEABLE: u8 = 0x51;
const TAG_TESTNET: u8 = 0x80;

const FRIENDLY_LEN: usize = 36;

// ============================================================================
// Address Structure
// ============================================================================

/// A standard (`addr_std`) TON account address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TonAddress {
    pub workchain: i8,
    pub hash: [u8; 32],
}

impl TonAddress {
    pub fn new(workchain: i8, hash: [u8; 32]) -> Self {
        Self { workchain, hash }
    }

    /// Parse either the raw or the friendly form
    pub fn parse(addr: &str) -> Result<Self> {
        let addr = addr.trim();
        if addr.contains(':') {
            Self::from_raw(addr)
        } else {
            Self::from_friendly(addr)
        }
    }

    /// Parse `<workchain>:<hex hash>` (hex is case-insensitive)
    pub fn from_raw(addr: &str) -> Result<Self> {
        let (wc, hash_hex) = addr
            .split_once(':')
            .ok_or_else(|| eyre!("Raw address must be <workchain>:<hash>: {}", addr))?;

        let workchain: i8 = wc
            .parse()
            .map_err(|_| eyre!("Invalid workchain in address: {}", addr))?;

        let bytes = hex::decode(hash_hex).map_err(|e| eyre!("Invalid hex in address: {}", e))?;
        let hash: [u8; 32] = bytes
            .try_into()
            .map_err(|_| eyre!("Address hash must be 32 bytes: {}", addr))?;

        Ok(Self { workchain, hash })
    }

    /// Parse the 48-character base64 form (standard or URL-safe alphabet)
    pub fn from_friendly(addr: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE
            .decode(addr)
            .or_else(|_| base64::engine::general_purpose::STANDARD.decode(addr))
            .map_err(|_| eyre!("Invalid base64 in address: {}", addr))?;

        if bytes.len() != FRIENDLY_LEN {
            return Err(eyre!(
                "Friendly address must decode to {} bytes, got {}",
                FRIENDLY_LEN,
                bytes.len()
            ));
        }

        let tag = bytes[0] & !TAG_TESTNET;
        if tag != TAG_BOUNCEABLE && tag != TAG_NON_BOUNCEABLE {
            return Err(eyre!("Unknown address tag: 0x{:02x}", bytes[0]));
        }

        let expected = crc16(&bytes[..34]);
        let actual = u16::from_be_bytes([bytes[34], bytes[35]]);
        if expected != actual {
            return Err(eyre!("Address checksum mismatch: {}", addr));
        }

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[2..34]);
        Ok(Self {
            workchain: bytes[1] as i8,
            hash,
        })
    }

    // ============================================================================
    // Serialization
    // ============================================================================

    /// Lowercase `<workchain>:<hex>`, the normalised form used for storage
    /// and comparison
    pub fn to_raw(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.hash))
    }

    /// URL-safe friendly form
    pub fn to_friendly(&self, bounceable: bool, testnet: bool) -> String {
        let mut tag = if bounceable {
            TAG_BOUNCEABLE
        } else {
            TAG_NON_BOUNCEABLE
        };
        if testnet {
            tag |= TAG_TESTNET;
        }

        let mut bytes = Vec::with_capacity(FRIENDLY_LEN);
        bytes.push(tag);
        bytes.push(self.workchain as u8);
        bytes.extend_from_slice(&self.hash);
        let crc = crc16(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());

        base64::engine::general_purpose::URL_SAFE.encode(bytes)
    }
}

impl FromStr for TonAddress {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for TonAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_raw())
    }
}

/// Compare two textual addresses in any supported form.
///
/// Unparseable input never matches.
pub fn same_address(a: &str, b: &str) -> bool {
    match (TonAddress::parse(a), TonAddress::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// CRC-16/XMODEM
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= u16::from(*byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}
