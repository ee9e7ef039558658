//! TON deposit watcher - Library interface
//!
//! Re-exports internal modules for use in integration tests.

pub mod address;
pub mod amount;
pub mod api;
pub mod authenticity;
pub mod cell;
pub mod chain;
pub mod classifier;
pub mod config;
pub mod cycle_cache;
pub mod db;
pub mod hooks;
pub mod metrics;
pub mod reconcile;
pub mod scanner;
pub mod store;
