//! Shared fixtures for the end-to-end tests: a scripted chain, recording
//! hooks and a scanner wired to the in-memory store.

#![allow(dead_code)]

use async_trait::async_trait;
use eyre::{eyre, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deposit_watcher::address::TonAddress;
use deposit_watcher::amount::{AssetScales, Tolerance};
use deposit_watcher::authenticity::AuthenticityValidator;
use deposit_watcher::cell::builder::{comment_cell, transfer_notification_cell};
use deposit_watcher::cell::{boc, CellBuilder};
use deposit_watcher::chain::types::MessageContent;
use deposit_watcher::chain::{
    AccountStatus, ChainClient, GetMethodResult, RawMessage, RawTransaction, StackEntry,
};
use deposit_watcher::hooks::{Notifier, SubscriptionActivator};
use deposit_watcher::reconcile::ReconciliationEngine;
use deposit_watcher::scanner::{Scanner, ScannerConfig};
use deposit_watcher::store::{
    CursorTracker, IntentStore, MemoryStore, PendingIntent, Receipt, ReviewFlag,
};

pub const USDT_MASTER: &str = "0:b113a994b5024a16719f69139328eb759596c38a25f59028b146fecdc3621dfe";

pub fn deposit() -> TonAddress {
    TonAddress::new(0, [0xd0; 32])
}

pub fn usdt_master() -> TonAddress {
    TonAddress::parse(USDT_MASTER).unwrap()
}

pub fn payer() -> TonAddress {
    TonAddress::new(0, [0x0a; 32])
}

// ============================================================================
// Scripted chain
// ============================================================================

#[derive(Default)]
pub struct MockChain {
    transactions: Mutex<Vec<RawTransaction>>,
    get_methods: Mutex<HashMap<(TonAddress, String), GetMethodResult>>,
    ignore_after_lt: bool,
}

impl MockChain {
    /// A chain that returns its whole history regardless of `after_lt`
    pub fn ignoring_after_lt() -> Self {
        Self {
            ignore_after_lt: true,
            ..Self::default()
        }
    }

    pub fn push(&self, tx: RawTransaction) {
        let mut txs = self.transactions.lock().unwrap();
        txs.push(tx);
        txs.sort_by_key(|tx| tx.lt);
    }

    pub fn respond(&self, address: TonAddress, method: &str, result: GetMethodResult) {
        self.get_methods
            .lock()
            .unwrap()
            .insert((address, method.to_string()), result);
    }

    /// Make `wallet` report `master` as its jetton master
    pub fn jetton_wallet(&self, wallet: TonAddress, owner: TonAddress, master: TonAddress) {
        self.respond(wallet, "get_wallet_data", wallet_data(&owner, &master));
    }

    /// Make `wallet` the deposit address's genuine USDT wallet: it reports
    /// the canonical master, and the master derives it for the deposit
    pub fn canonical_wallet(&self, wallet: TonAddress) {
        self.jetton_wallet(wallet, deposit(), usdt_master());
        self.respond(
            usdt_master(),
            "get_wallet_address",
            GetMethodResult {
                gas_used: 0,
                exit_code: 0,
                stack: vec![address_entry(&wallet)],
            },
        );
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_transactions(
        &self,
        _account: &TonAddress,
        after_lt: u64,
        limit: u32,
    ) -> Result<Vec<RawTransaction>> {
        let ignore = self.ignore_after_lt;
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .filter(|tx| ignore || tx.lt > after_lt)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn run_get_method(
        &self,
        address: &TonAddress,
        method: &str,
        _stack: Vec<StackEntry>,
    ) -> Result<GetMethodResult> {
        self.get_methods
            .lock()
            .unwrap()
            .get(&(*address, method.to_string()))
            .cloned()
            .ok_or_else(|| eyre!("exit code -13: account not initialized"))
    }

    async fn get_account_status(&self, _account: &TonAddress) -> Result<AccountStatus> {
        Ok(AccountStatus::Active)
    }
}

fn address_entry(addr: &TonAddress) -> StackEntry {
    let mut b = CellBuilder::new();
    b.store_address(Some(addr)).unwrap();
    let mut entry = StackEntry::slice(&b.build().unwrap()).unwrap();
    entry.kind = "cell".to_string();
    entry
}

pub fn wallet_data(owner: &TonAddress, master: &TonAddress) -> GetMethodResult {
    GetMethodResult {
        gas_used: 0,
        exit_code: 0,
        stack: vec![
            StackEntry {
                kind: "num".to_string(),
                value: serde_json::json!("0x3b9aca00"),
            },
            address_entry(owner),
            address_entry(master),
            StackEntry {
                kind: "cell".to_string(),
                value: serde_json::json!("te6cckEBAQEAAgAAAEysuc0="),
            },
        ],
    }
}

// ============================================================================
// Transactions
// ============================================================================

fn transaction(lt: u64, source: &TonAddress, value: u128, body: Option<String>) -> RawTransaction {
    RawTransaction {
        hash: format!("hash-{}", lt),
        lt,
        now: 1_700_000_000 + lt as i64,
        in_msg: Some(RawMessage {
            source: Some(source.to_raw()),
            destination: Some(deposit().to_friendly(false, false)),
            value: Some(value),
            bounced: Some(false),
            message_content: Some(MessageContent { body }),
        }),
        ..RawTransaction::default()
    }
}

/// Plain TON transfer, optionally with a text comment
pub fn ton_transfer(lt: u64, nanoton: u128, comment: Option<&str>) -> RawTransaction {
    let body = comment.map(|text| boc::to_base64(&comment_cell(text).unwrap()).unwrap());
    transaction(lt, &payer(), nanoton, body)
}

/// Jetton transfer notification sent by `jetton_wallet`
pub fn jetton_transfer(
    lt: u64,
    jetton_wallet: &TonAddress,
    units: u128,
    comment: Option<&str>,
) -> RawTransaction {
    let payload = comment.map(|text| comment_cell(text).unwrap());
    let body = transfer_notification_cell(lt, units, Some(&payer()), payload).unwrap();
    transaction(
        lt,
        jetton_wallet,
        1_000_000,
        Some(boc::to_base64(&body).unwrap()),
    )
}

// ============================================================================
// Recording hooks
// ============================================================================

#[derive(Default)]
pub struct RecordingActivator {
    pub activations: Mutex<Vec<(i64, String, i32)>>,
}

impl RecordingActivator {
    pub fn count(&self) -> usize {
        self.activations.lock().unwrap().len()
    }
}

#[async_trait]
impl SubscriptionActivator for RecordingActivator {
    async fn activate_subscription(&self, user_id: i64, tier: &str, duration_days: i32) -> Result<()> {
        self.activations
            .lock()
            .unwrap()
            .push((user_id, tier.to_string(), duration_days));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub users: Mutex<Vec<(i64, String)>>,
    pub admins: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_user(&self, user_id: i64, text: &str) -> Result<()> {
        self.users.lock().unwrap().push((user_id, text.to_string()));
        Ok(())
    }

    async fn notify_admins(&self, text: &str) -> Result<()> {
        self.admins.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Fails memo lookups for one memo while armed
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    pub failing_memo: Mutex<Option<String>>,
}

#[async_trait]
impl IntentStore for FlakyStore {
    async fn find_pending_by_memo(&self, memo: &str) -> Result<Option<PendingIntent>> {
        if self.failing_memo.lock().unwrap().as_deref() == Some(memo) {
            return Err(eyre!("connection reset by peer"));
        }
        self.inner.find_pending_by_memo(memo).await
    }

    async fn complete_intent(&self, intent_id: i64, receipt: &Receipt) -> Result<bool> {
        self.inner.complete_intent(intent_id, receipt).await
    }

    async fn flag_for_review(&self, flag: &ReviewFlag) -> Result<bool> {
        self.inner.flag_for_review(flag).await
    }

    async fn record_activation_error(&self, intent_id: i64, error: &str) -> Result<()> {
        self.inner.record_activation_error(intent_id, error).await
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub chain: Arc<MockChain>,
    pub store: Arc<MemoryStore>,
    pub activator: Arc<RecordingActivator>,
    pub notifier: Arc<RecordingNotifier>,
    pub scanner: Scanner,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(MockChain::default(), store.clone(), store)
    }

    pub fn with_chain(chain: MockChain) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(chain, store.clone(), store)
    }

    pub fn with_intent_store(intents: Arc<dyn IntentStore>, store: Arc<MemoryStore>) -> Self {
        Self::build(MockChain::default(), intents, store)
    }

    fn build(chain: MockChain, intents: Arc<dyn IntentStore>, store: Arc<MemoryStore>) -> Self {
        let chain = Arc::new(chain);
        let activator = Arc::new(RecordingActivator::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let validator = AuthenticityValidator::new(chain.clone(), usdt_master())
            .with_derivation_check(deposit());
        let engine = ReconciliationEngine::new(
            intents,
            validator,
            activator.clone(),
            notifier.clone(),
            Tolerance::from_bps(200).unwrap(),
        );
        let scanner = Scanner::new(
            ScannerConfig {
                deposit_address: deposit(),
                page_size: 10,
                max_pages: 4,
                poll_interval: Duration::from_millis(10),
            },
            chain.clone(),
            CursorTracker::new(store.clone()),
            engine,
            AssetScales::default(),
        );

        Self {
            chain,
            store,
            activator,
            notifier,
            scanner,
        }
    }

    pub fn cursor(&self) -> Option<u64> {
        self.store.cursor(&deposit().to_raw())
    }
}
