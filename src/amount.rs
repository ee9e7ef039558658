//! Assets and amount scaling
//!
//! Chain amounts are integers in each asset's base unit (nanoton for TON,
//! 10^-6 for USDT). Intents store human-scale decimals, so every received
//! amount is scaled with [`AssetScales`] before comparison.

use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, Signed, Zero};
use eyre::{eyre, Result};
use std::fmt;

/// Largest tolerance accepted by configuration (2%)
pub const MAX_TOLERANCE_BPS: u32 = 200;

const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Asset {
    /// Native coin
    Ton,
    /// Tether USD jetton
    Usdt,
}

impl Asset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Asset::Ton => "TON",
            Asset::Usdt => "USDT",
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decimal places of each asset's base unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetScales {
    pub ton_decimals: u32,
    pub usdt_decimals: u32,
}

impl Default for AssetScales {
    fn default() -> Self {
        Self {
            ton_decimals: 9,
            usdt_decimals: 6,
        }
    }
}

impl AssetScales {
    pub fn decimals(&self, asset: Asset) -> u32 {
        match asset {
            Asset::Ton => self.ton_decimals,
            Asset::Usdt => self.usdt_decimals,
        }
    }

    /// Convert base units into a decimal amount, exactly
    pub fn to_decimal(&self, asset: Asset, units: u128) -> BigDecimal {
        BigDecimal::new(BigInt::from(units), i64::from(self.decimals(asset)))
    }
}

/// Accepted relative deviation between expected and received amounts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tolerance {
    bps: u32,
}

impl Tolerance {
    pub fn from_bps(bps: u32) -> Result<Self> {
        if bps > MAX_TOLERANCE_BPS {
            return Err(eyre!(
                "Amount tolerance {} bps exceeds maximum of {} bps",
                bps,
                MAX_TOLERANCE_BPS
            ));
        }
        Ok(Self { bps })
    }

    pub fn bps(&self) -> u32 {
        self.bps
    }

    /// `|received - expected| / expected <= bps / 10000`.
    ///
    /// A non-positive expected amount never matches.
    pub fn accepts(&self, expected: &BigDecimal, received: &BigDecimal) -> bool {
        if !expected.is_positive() {
            return false;
        }
        let deviation = (received - expected).abs() * BigDecimal::from(BPS_DENOMINATOR);
        deviation <= expected * BigDecimal::from(self.bps)
    }
}

/// Relative deviation in basis points, for logs and review records
pub fn deviation_bps(expected: &BigDecimal, received: &BigDecimal) -> Option<BigDecimal> {
    if expected.is_zero() {
        return None;
    }
    let ratio = (received - expected).abs() * BigDecimal::from(BPS_DENOMINATOR) / expected;
    Some(ratio.with_scale(2))
}
