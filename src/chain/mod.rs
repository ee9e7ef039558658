//! Chain access
//!
//! The scanner and the authenticity validator only need paged account
//! history, read-only get-method execution and the account's lifecycle
//! state. [`ChainClient`] keeps
//! them behind a trait so the pipeline can run against a scripted chain in
//! tests.

use async_trait::async_trait;
use eyre::Result;

use crate::address::TonAddress;

pub mod retry;
pub mod toncenter;
pub mod types;

pub use toncenter::TonCenterClient;
pub use types::{AccountStatus, GetMethodResult, RawMessage, RawTransaction, StackEntry};

/// toncenter's hard cap on `limit`
pub const MAX_PAGE_SIZE: u32 = 100;

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Transactions of `account` with `lt > after_lt`, oldest first, at most
    /// `limit` of them.
    async fn get_transactions(
        &self,
        account: &TonAddress,
        after_lt: u64,
        limit: u32,
    ) -> Result<Vec<RawTransaction>>;

    /// Execute a get-method against the latest state of `address`
    async fn run_get_method(
        &self,
        address: &TonAddress,
        method: &str,
        stack: Vec<StackEntry>,
    ) -> Result<GetMethodResult>;

    async fn get_account_status(&self, account: &TonAddress) -> Result<AccountStatus>;
}
