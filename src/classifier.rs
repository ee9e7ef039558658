//! Transaction classification
//!
//! Turns a raw account transaction into at most one inbound transfer.
//! Jetton notifications become USDT transfers attributed to the sending jetton
//! wallet; anything else carrying native value becomes a TON transfer. Every
//! other transaction (outgoing, bounced, aborted, zero-value) is dropped.
//!
//! Value sent to an undeployed account arrives on an aborted transaction, so
//! the deposit address must be an active contract
//! (see [`crate::scanner::Scanner::check_deposit_account`]).

use bigdecimal::BigDecimal;
use tracing::trace;

use crate::address::TonAddress;
use crate::amount::{Asset, AssetScales};
use crate::cell::{boc, MessageBody};
use crate::chain::RawTransaction;

/// A normalised inbound transfer to the watched address
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTransfer {
    pub tx_hash: String,
    pub lt: u64,
    /// Unix time of the transaction
    pub utime: i64,
    pub asset: Asset,
    /// Amount in base units as seen on chain
    pub units: u128,
    /// Amount scaled by the asset's decimals
    pub amount: BigDecimal,
    /// Payer: message source for TON, claimed previous owner for USDT
    pub sender: Option<TonAddress>,
    /// For USDT, the jetton wallet that sent the notification. This is the
    /// address that must be authenticated, never `sender`.
    pub source_wallet: Option<TonAddress>,
    /// Comment text, trimmed
    pub memo: Option<String>,
}

pub fn classify(
    tx: &RawTransaction,
    watched: &TonAddress,
    scales: &AssetScales,
) -> Option<DecodedTransfer> {
    if tx.description.aborted {
        trace!(lt = tx.lt, "Skipping aborted transaction");
        return None;
    }

    let msg = tx.in_msg.as_ref()?;
    if msg.bounced == Some(true) {
        trace!(lt = tx.lt, "Skipping bounced message");
        return None;
    }

    let destination = msg
        .destination
        .as_deref()
        .and_then(|d| TonAddress::parse(d).ok())?;
    if destination != *watched {
        return None;
    }

    // external messages have no source
    let source = msg.source.as_deref().and_then(|s| TonAddress::parse(s).ok());

    let body = match msg.body_b64() {
        None => MessageBody::Empty,
        Some(encoded) => match boc::from_base64(encoded) {
            Ok(cell) => MessageBody::decode(&cell),
            Err(e) => {
                trace!(lt = tx.lt, error = %e, "Undecodable message body");
                MessageBody::Unknown { opcode: None }
            }
        },
    };

    let memo = body
        .comment()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string);

    let (asset, units, sender, source_wallet) = match &body {
        MessageBody::JettonNotify(notification) => {
            // a notification only means something coming from a contract
            if source.is_none() {
                return None;
            }
            (Asset::Usdt, notification.amount, notification.sender, source)
        }
        _ => {
            let value = msg.value.unwrap_or(0);
            if value == 0 {
                return None;
            }
            (Asset::Ton, value, source, None)
        }
    };

    Some(DecodedTransfer {
        tx_hash: tx.hash.clone(),
        lt: tx.lt,
        utime: tx.now,
        asset,
        units,
        amount: scales.to_decimal(asset, units),
        sender,
        source_wallet,
        memo,
    })
}
