//! Persistence seams
//!
//! The reconciliation engine and the scanner talk to storage through
//! [`IntentStore`] and [`CursorStore`]. Production uses Postgres
//! ([`crate::db::PgStore`]); tests and dry runs use [`memory::MemoryStore`].
//!
//! The one-way gate lives here: [`IntentStore::complete_intent`] must only
//! transition a row that is still `pending` and must report whether it did.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::address::TonAddress;
use crate::amount::Asset;

pub mod memory;

pub use memory::MemoryStore;

/// Payment intent status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentStatus {
    Pending,
    Completed,
    /// Set by operators only, never by the watcher
    Failed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Completed => "completed",
            IntentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(IntentStatus::Pending),
            "completed" => Ok(IntentStatus::Completed),
            "failed" => Ok(IntentStatus::Failed),
            other => Err(eyre!("Unknown intent status: {}", other)),
        }
    }
}

/// A payment intent still waiting for its deposit
#[derive(Debug, Clone, PartialEq)]
pub struct PendingIntent {
    pub id: i64,
    pub user_id: i64,
    pub tier: String,
    pub duration_days: i32,
    pub memo: String,
    pub expected_ton: Option<BigDecimal>,
    pub expected_usdt: Option<BigDecimal>,
    pub created_at: DateTime<Utc>,
}

impl PendingIntent {
    /// Expected amount for `asset`; `None` when the intent does not accept it
    pub fn expected(&self, asset: Asset) -> Option<&BigDecimal> {
        match asset {
            Asset::Ton => self.expected_ton.as_ref(),
            Asset::Usdt => self.expected_usdt.as_ref(),
        }
    }
}

/// Transfer metadata attached to an intent on completion
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub tx_hash: String,
    pub lt: u64,
    pub asset: Asset,
    pub amount: BigDecimal,
    /// Raw form of the paying address
    pub sender: Option<String>,
}

/// Why a transfer matching an intent was held for review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewReason {
    /// Jetton wallet not minted by the canonical master
    CounterfeitToken,
    /// Amount outside the configured tolerance
    AmountMismatch,
    /// Intent has no expected amount for the transferred asset
    AssetNotAccepted,
    /// The jetton wallet could not be queried, so it was not trusted
    VerificationUnavailable,
}

impl ReviewReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewReason::CounterfeitToken => "counterfeit_token",
            ReviewReason::AmountMismatch => "amount_mismatch",
            ReviewReason::AssetNotAccepted => "asset_not_accepted",
            ReviewReason::VerificationUnavailable => "verification_unavailable",
        }
    }
}

impl fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReviewReason {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "counterfeit_token" => Ok(ReviewReason::CounterfeitToken),
            "amount_mismatch" => Ok(ReviewReason::AmountMismatch),
            "asset_not_accepted" => Ok(ReviewReason::AssetNotAccepted),
            "verification_unavailable" => Ok(ReviewReason::VerificationUnavailable),
            other => Err(eyre!("Unknown review reason: {}", other)),
        }
    }
}

/// One held transfer, recorded once per (intent, transaction)
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewFlag {
    pub intent_id: i64,
    pub tx_hash: String,
    pub lt: u64,
    pub reason: ReviewReason,
    pub asset: Asset,
    pub amount: BigDecimal,
    pub sender: Option<String>,
    pub detail: String,
}

#[async_trait]
pub trait IntentStore: Send + Sync {
    /// The pending intent carrying exactly `memo`, if any
    async fn find_pending_by_memo(&self, memo: &str) -> Result<Option<PendingIntent>>;

    /// Move a pending intent to completed. Returns `false` when the intent
    /// was no longer pending, in which case nothing was written.
    async fn complete_intent(&self, intent_id: i64, receipt: &Receipt) -> Result<bool>;

    /// Record a held transfer. Returns `false` when this (intent, tx) pair
    /// was already flagged.
    async fn flag_for_review(&self, flag: &ReviewFlag) -> Result<bool>;

    /// Remember that activation failed after the intent was completed
    async fn record_activation_error(&self, intent_id: i64, error: &str) -> Result<()>;
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get_cursor(&self, address: &str) -> Result<Option<u64>>;

    /// Store `lt` if it is greater than the stored value. Returns whether
    /// the cursor moved.
    async fn advance_cursor(&self, address: &str, lt: u64) -> Result<bool>;

    /// `received_lt` of the most recently completed intent
    async fn latest_completed_lt(&self) -> Result<Option<u64>>;
}

/// Resume watermark of one watched address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCursor {
    pub address: String,
    pub last_lt: u64,
}

/// Reads and advances the scan cursor of watched addresses
#[derive(Clone)]
pub struct CursorTracker {
    store: Arc<dyn CursorStore>,
}

impl CursorTracker {
    pub fn new(store: Arc<dyn CursorStore>) -> Self {
        Self { store }
    }

    /// Stored cursor, else the lt of the last completed intent, else 0
    pub async fn load(&self, address: &TonAddress) -> Result<ScanCursor> {
        let key = address.to_raw();
        if let Some(last_lt) = self.store.get_cursor(&key).await? {
            debug!(address = %key, last_lt, "Resuming from stored cursor");
            return Ok(ScanCursor {
                address: key,
                last_lt,
            });
        }

        let last_lt = self.store.latest_completed_lt().await?.unwrap_or(0);
        info!(
            address = %key,
            last_lt,
            "No stored cursor, starting from last completed payment"
        );
        Ok(ScanCursor {
            address: key,
            last_lt,
        })
    }

    /// Persist `lt` if it moves the cursor forward
    pub async fn advance(&self, address: &TonAddress, lt: u64) -> Result<bool> {
        let key = address.to_raw();
        let moved = self.store.advance_cursor(&key, lt).await?;
        if moved {
            debug!(address = %key, lt, "Cursor advanced");
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            IntentStatus::Pending,
            IntentStatus::Completed,
            IntentStatus::Failed,
        ] {
            assert_eq!(IntentStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(IntentStatus::from_str("expired").is_err());
    }

    #[test]
    fn test_review_reason_strings() {
        assert_eq!(ReviewReason::CounterfeitToken.to_string(), "counterfeit_token");
        assert_eq!(
            ReviewReason::from_str("amount_mismatch").unwrap(),
            ReviewReason::AmountMismatch
        );
        assert_eq!(
            ReviewReason::from_str("verification_unavailable").unwrap(),
            ReviewReason::VerificationUnavailable
        );
    }

    #[tokio::test]
    async fn test_cursor_cold_start_defaults_to_zero() {
        let store = Arc::new(MemoryStore::new());
        let tracker = CursorTracker::new(store);
        let addr = TonAddress::new(0, [1; 32]);
        assert_eq!(tracker.load(&addr).await.unwrap().last_lt, 0);
    }

    #[tokio::test]
    async fn test_cursor_cold_start_uses_last_completion() {
        let store = Arc::new(MemoryStore::new());
        let id = store.insert_intent(memory::NewIntent::ton(7, "PAY_00000001", "1.0"));
        let receipt = Receipt {
            tx_hash: "h".into(),
            lt: 4242,
            asset: Asset::Ton,
            amount: BigDecimal::from(1),
            sender: None,
        };
        assert!(store.complete_intent(id, &receipt).await.unwrap());

        let tracker = CursorTracker::new(store);
        let addr = TonAddress::new(0, [1; 32]);
        assert_eq!(tracker.load(&addr).await.unwrap().last_lt, 4242);
    }

    #[tokio::test]
    async fn test_cursor_only_moves_forward() {
        let store = Arc::new(MemoryStore::new());
        let tracker = CursorTracker::new(store.clone());
        let addr = TonAddress::new(0, [1; 32]);

        assert!(tracker.advance(&addr, 500).await.unwrap());
        assert!(!tracker.advance(&addr, 400).await.unwrap());
        assert!(!tracker.advance(&addr, 500).await.unwrap());
        assert_eq!(tracker.load(&addr).await.unwrap().last_lt, 500);
        assert!(tracker.advance(&addr, 501).await.unwrap());
    }
}
