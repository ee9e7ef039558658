//! Prometheus metrics for the deposit watcher
//!
//! Exposed on the /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_int_counter, register_int_gauge, CounterVec,
    Gauge, IntCounter, IntGauge,
};

lazy_static! {
    // Scan loop
    pub static ref SCAN_CYCLES: CounterVec = register_counter_vec!(
        "deposit_watcher_scan_cycles_total",
        "Total number of scan cycles by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref TRANSACTIONS_SEEN: IntCounter = register_int_counter!(
        "deposit_watcher_transactions_seen_total",
        "Transactions fetched beyond the cursor"
    ).unwrap();

    pub static ref CURSOR_LT: IntGauge = register_int_gauge!(
        "deposit_watcher_cursor_lt",
        "Logical time of the scan cursor"
    ).unwrap();

    pub static ref LAST_SUCCESSFUL_POLL: Gauge = register_gauge!(
        "deposit_watcher_last_successful_poll_timestamp",
        "Unix timestamp of the last completed scan cycle"
    ).unwrap();

    // Transfers and reconciliation
    pub static ref TRANSFERS: CounterVec = register_counter_vec!(
        "deposit_watcher_transfers_total",
        "Inbound transfers decoded, by asset",
        &["asset"]
    ).unwrap();

    pub static ref OUTCOMES: CounterVec = register_counter_vec!(
        "deposit_watcher_reconcile_outcomes_total",
        "Reconciliation outcomes",
        &["outcome"]
    ).unwrap();

    pub static ref FLAGGED: CounterVec = register_counter_vec!(
        "deposit_watcher_flagged_total",
        "Transfers held for manual review, by reason",
        &["reason"]
    ).unwrap();

    pub static ref AUTHENTICITY_CHECKS: CounterVec = register_counter_vec!(
        "deposit_watcher_authenticity_checks_total",
        "Jetton wallet authenticity checks (cache misses only)",
        &["result"]
    ).unwrap();

    // Errors
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "deposit_watcher_errors_total",
        "Total number of errors",
        &["type"]
    ).unwrap();

    pub static ref UP: Gauge = register_gauge!(
        "deposit_watcher_up",
        "Whether the watcher is up (1) or down (0)"
    ).unwrap();
}

pub fn record_cycle(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    SCAN_CYCLES.with_label_values(&[outcome]).inc();
}

pub fn record_transactions_seen(count: usize) {
    TRANSACTIONS_SEEN.inc_by(count as u64);
}

pub fn set_cursor(lt: u64) {
    CURSOR_LT.set(i64::try_from(lt).unwrap_or(i64::MAX));
}

pub fn record_successful_poll() {
    LAST_SUCCESSFUL_POLL.set(chrono::Utc::now().timestamp() as f64);
}

pub fn record_transfer(asset: &str) {
    TRANSFERS.with_label_values(&[asset]).inc();
}

pub fn record_outcome(outcome: &str) {
    OUTCOMES.with_label_values(&[outcome]).inc();
}

pub fn record_flagged(reason: &str) {
    FLAGGED.with_label_values(&[reason]).inc();
}

pub fn record_authenticity_check(valid: bool) {
    let result = if valid { "valid" } else { "invalid" };
    AUTHENTICITY_CHECKS.with_label_values(&[result]).inc();
}

pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
