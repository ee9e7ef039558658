//! Scan loop
//!
//! Each cycle pages through the deposit address's history past the cursor,
//! classifies and reconciles every transaction in `lt` order, then moves the
//! cursor over the longest prefix that was fully handled. A transaction whose
//! reconciliation failed pins the cursor so it is revisited next cycle; the
//! transactions after it are still processed, which is safe because
//! completion is idempotent.

use eyre::{bail, Result, WrapErr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::address::TonAddress;
use crate::amount::AssetScales;
use crate::chain::{AccountStatus, ChainClient, RawTransaction, MAX_PAGE_SIZE};
use crate::classifier::classify;
use crate::metrics;
use crate::reconcile::{ReconcileOutcome, ReconciliationEngine};
use crate::store::CursorTracker;

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub deposit_address: TonAddress,
    /// Transactions requested per page
    pub page_size: u32,
    /// Page cap per cycle; a backlog is drained over several cycles
    pub max_pages: u32,
    pub poll_interval: Duration,
}

/// Summary of one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Transactions past the cursor
    pub fetched: usize,
    /// Transactions that classified as inbound transfers
    pub transfers: usize,
    pub completed: usize,
    pub flagged: usize,
    pub skipped: usize,
    /// Transfers whose reconciliation failed
    pub errors: usize,
    pub cursor_before: u64,
    pub cursor_after: u64,
}

pub struct Scanner {
    config: ScannerConfig,
    chain: Arc<dyn ChainClient>,
    tracker: CursorTracker,
    engine: ReconciliationEngine,
    scales: AssetScales,
}

impl Scanner {
    pub fn new(
        config: ScannerConfig,
        chain: Arc<dyn ChainClient>,
        tracker: CursorTracker,
        engine: ReconciliationEngine,
        scales: AssetScales,
    ) -> Self {
        Self {
            config,
            chain,
            tracker,
            engine,
            scales,
        }
    }

    /// Refuse to watch an address that is not a deployed contract. Value sent
    /// to an undeployed account lands on an aborted transaction, which the
    /// classifier drops, so such payments would never be reconciled.
    pub async fn check_deposit_account(&self) -> Result<()> {
        let address = &self.config.deposit_address;
        let status = self
            .chain
            .get_account_status(address)
            .await
            .wrap_err("Failed to check deposit account state")?;
        if status != AccountStatus::Active {
            bail!(
                "Deposit address {} is {}, expected an active contract",
                address,
                status.as_str()
            );
        }
        info!(address = %address, "Deposit account is active");
        Ok(())
    }

    /// Main run loop
    pub async fn run(&mut self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        info!(
            address = %self.config.deposit_address,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Deposit scanner starting..."
        );

        let mut cursor: Option<u64> = None;
        // first cycle runs immediately
        let mut delay = Duration::ZERO;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = tokio::time::sleep(delay) => {
                    delay = self.config.poll_interval;
                    match self.cycle(cursor).await {
                        Ok(report) => {
                            metrics::record_cycle(true);
                            metrics::record_successful_poll();
                            if report.fetched > 0 {
                                info!(
                                    fetched = report.fetched,
                                    transfers = report.transfers,
                                    completed = report.completed,
                                    flagged = report.flagged,
                                    errors = report.errors,
                                    cursor = report.cursor_after,
                                    "Scan cycle complete"
                                );
                            }
                            cursor = Some(report.cursor_after);
                        }
                        Err(e) => {
                            metrics::record_cycle(false);
                            metrics::record_error("scan_cycle");
                            error!(error = %e, "Error scanning deposit address");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn cycle(&mut self, cursor: Option<u64>) -> Result<ScanReport> {
        let cursor = match cursor {
            Some(lt) => lt,
            None => {
                let loaded = self
                    .tracker
                    .load(&self.config.deposit_address)
                    .await
                    .wrap_err("Failed to load scan cursor")?;
                metrics::set_cursor(loaded.last_lt);
                loaded.last_lt
            }
        };
        self.scan_once(cursor).await
    }

    /// Run one cycle from `cursor`; the report carries the cursor to use
    /// next. Errors mean the cursor did not move (the history could not be
    /// fetched or the new cursor could not be stored).
    pub async fn scan_once(&mut self, cursor: u64) -> Result<ScanReport> {
        self.engine.begin_cycle();

        let transactions = self.fetch_since(cursor).await?;
        metrics::record_transactions_seen(transactions.len());

        let mut report = ScanReport {
            fetched: transactions.len(),
            cursor_before: cursor,
            cursor_after: cursor,
            ..ScanReport::default()
        };

        let mut blocked = false;
        for tx in &transactions {
            let handled = self.process(tx, &mut report).await;
            if !handled && !blocked {
                warn!(lt = tx.lt, tx = %tx.hash, "Cursor held before failed transaction");
                blocked = true;
            }
            if !blocked {
                report.cursor_after = tx.lt;
            }
        }

        if report.cursor_after > cursor {
            self.tracker
                .advance(&self.config.deposit_address, report.cursor_after)
                .await
                .wrap_err("Failed to advance scan cursor")?;
            metrics::set_cursor(report.cursor_after);
        }

        Ok(report)
    }

    /// Returns `false` when the transaction must be revisited
    async fn process(&mut self, tx: &RawTransaction, report: &mut ScanReport) -> bool {
        let transfer = match classify(tx, &self.config.deposit_address, &self.scales) {
            Some(transfer) => transfer,
            None => return true,
        };

        report.transfers += 1;
        metrics::record_transfer(transfer.asset.as_str());
        debug!(
            lt = transfer.lt,
            asset = %transfer.asset,
            amount = %transfer.amount,
            memo = ?transfer.memo,
            "Inbound transfer"
        );

        match self.engine.reconcile(&transfer).await {
            Ok(ReconcileOutcome::Completed { .. }) => report.completed += 1,
            Ok(ReconcileOutcome::Flagged { .. }) => report.flagged += 1,
            Ok(_) => report.skipped += 1,
            Err(e) => {
                report.errors += 1;
                metrics::record_error("reconcile");
                error!(
                    lt = transfer.lt,
                    tx = %transfer.tx_hash,
                    error = %e,
                    "Failed to reconcile transfer"
                );
                return false;
            }
        }
        true
    }

    /// Transactions with `lt > cursor` in ascending order, at most
    /// `max_pages` pages of them
    async fn fetch_since(&self, cursor: u64) -> Result<Vec<RawTransaction>> {
        let page_size = self.config.page_size.clamp(1, MAX_PAGE_SIZE);
        let mut after = cursor;
        let mut collected: Vec<RawTransaction> = Vec::new();

        for page in 0..self.config.max_pages.max(1) {
            let batch = self
                .chain
                .get_transactions(&self.config.deposit_address, after, page_size)
                .await
                .wrap_err_with(|| format!("Failed to fetch transactions after lt {}", after))?;

            let count = batch.len();
            debug!(page, after, count, "Fetched transaction page");

            let Some(last) = batch.iter().map(|tx| tx.lt).max() else {
                break;
            };
            collected.extend(batch.into_iter().filter(|tx| tx.lt > cursor));
            if last <= after || count < page_size as usize {
                break;
            }
            after = last;
        }

        collected.sort_by_key(|tx| tx.lt);
        collected.dedup_by_key(|tx| tx.lt);
        Ok(collected)
    }
}
