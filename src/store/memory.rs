//! In-memory store for tests and dry runs
//!
//! Mirrors the Postgres semantics: completion is conditional on `pending`,
//! review flags are unique per (intent, tx) and cursors never regress.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use eyre::Result;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use super::{
    CursorStore, IntentStatus, IntentStore, PendingIntent, Receipt, ReviewFlag, ReviewReason,
};

/// Fields supplied by the checkout flow
#[derive(Debug, Clone)]
pub struct NewIntent {
    pub user_id: i64,
    pub tier: String,
    pub duration_days: i32,
    pub memo: String,
    pub expected_ton: Option<BigDecimal>,
    pub expected_usdt: Option<BigDecimal>,
}

impl NewIntent {
    /// A 30-day `pro` intent payable in TON
    pub fn ton(user_id: i64, memo: &str, expected: &str) -> Self {
        Self {
            user_id,
            tier: "pro".to_string(),
            duration_days: 30,
            memo: memo.to_string(),
            expected_ton: BigDecimal::from_str(expected).ok(),
            expected_usdt: None,
        }
    }

    /// A 30-day `pro` intent payable in USDT
    pub fn usdt(user_id: i64, memo: &str, expected: &str) -> Self {
        Self {
            expected_ton: None,
            expected_usdt: BigDecimal::from_str(expected).ok(),
            ..Self::ton(user_id, memo, "0")
        }
    }
}

/// Full state of one stored intent
#[derive(Debug, Clone)]
pub struct IntentRecord {
    pub intent: PendingIntent,
    pub status: IntentStatus,
    pub receipt: Option<Receipt>,
    pub completed_at: Option<DateTime<Utc>>,
    pub review_reason: Option<ReviewReason>,
    pub activation_error: Option<String>,
}

#[derive(Default)]
struct State {
    next_id: i64,
    intents: HashMap<i64, IntentRecord>,
    reviews: Vec<ReviewFlag>,
    review_keys: HashSet<(i64, String)>,
    cursors: HashMap<String, u64>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // a panicking test thread must not wedge the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_intent(&self, new: NewIntent) -> i64 {
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        let intent = PendingIntent {
            id,
            user_id: new.user_id,
            tier: new.tier,
            duration_days: new.duration_days,
            memo: new.memo,
            expected_ton: new.expected_ton,
            expected_usdt: new.expected_usdt,
            created_at: Utc::now(),
        };
        state.intents.insert(
            id,
            IntentRecord {
                intent,
                status: IntentStatus::Pending,
                receipt: None,
                completed_at: None,
                review_reason: None,
                activation_error: None,
            },
        );
        id
    }

    /// Mark an intent failed, as an operator would
    pub fn fail_intent(&self, id: i64) -> bool {
        let mut state = self.state();
        match state.intents.get_mut(&id) {
            Some(record) if record.status == IntentStatus::Pending => {
                record.status = IntentStatus::Failed;
                true
            }
            _ => false,
        }
    }

    pub fn intent(&self, id: i64) -> Option<IntentRecord> {
        self.state().intents.get(&id).cloned()
    }

    pub fn reviews(&self) -> Vec<ReviewFlag> {
        self.state().reviews.clone()
    }

    pub fn cursor(&self, address: &str) -> Option<u64> {
        self.state().cursors.get(address).copied()
    }
}

#[async_trait]
impl IntentStore for MemoryStore {
    async fn find_pending_by_memo(&self, memo: &str) -> Result<Option<PendingIntent>> {
        Ok(self
            .state()
            .intents
            .values()
            .find(|r| r.status == IntentStatus::Pending && r.intent.memo == memo)
            .map(|r| r.intent.clone()))
    }

    async fn complete_intent(&self, intent_id: i64, receipt: &Receipt) -> Result<bool> {
        let mut state = self.state();
        match state.intents.get_mut(&intent_id) {
            Some(record) if record.status == IntentStatus::Pending => {
                record.status = IntentStatus::Completed;
                record.receipt = Some(receipt.clone());
                record.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn flag_for_review(&self, flag: &ReviewFlag) -> Result<bool> {
        let mut state = self.state();
        if !state
            .review_keys
            .insert((flag.intent_id, flag.tx_hash.clone()))
        {
            return Ok(false);
        }
        state.reviews.push(flag.clone());
        if let Some(record) = state.intents.get_mut(&flag.intent_id) {
            if record.status == IntentStatus::Pending {
                record.review_reason = Some(flag.reason);
            }
        }
        Ok(true)
    }

    async fn record_activation_error(&self, intent_id: i64, error: &str) -> Result<()> {
        if let Some(record) = self.state().intents.get_mut(&intent_id) {
            record.activation_error = Some(error.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn get_cursor(&self, address: &str) -> Result<Option<u64>> {
        Ok(self.cursor(address))
    }

    async fn advance_cursor(&self, address: &str, lt: u64) -> Result<bool> {
        let mut state = self.state();
        match state.cursors.get_mut(address) {
            Some(current) if lt <= *current => Ok(false),
            Some(current) => {
                *current = lt;
                Ok(true)
            }
            None => {
                state.cursors.insert(address.to_string(), lt);
                Ok(true)
            }
        }
    }

    async fn latest_completed_lt(&self) -> Result<Option<u64>> {
        Ok(self
            .state()
            .intents
            .values()
            .filter(|r| r.status == IntentStatus::Completed)
            .max_by_key(|r| r.completed_at)
            .and_then(|r| r.receipt.as_ref().map(|rc| rc.lt)))
    }
}
