//! Jetton wallet authenticity
//!
//! Anyone can deploy a token contract whose wallets emit a
//! `transfer_notification` to our deposit address with any amount and memo.
//! A notification is only trusted when the *sending jetton wallet* reports
//! the canonical USDT master as its minter.
//!
//! # Verification Flow
//!
//! 1. Run `get_wallet_data` on the sending wallet:
//!    `(balance, owner, master, wallet_code)`.
//! 2. Parse `master` (stack item 2) and compare it with the canonical master
//!    configured for the network.
//! 3. Optionally (derivation check) require `owner` to be the deposit address
//!    and ask the canonical master for `get_wallet_address(owner)`, which
//!    must return the sending wallet itself.
//!
//! Every failure along the way (RPC error, non-zero exit code, short stack,
//! malformed cell, mismatch) yields an invalid result. There is no
//! "unknown" outcome. An RPC error is still marked `unavailable` so the
//! review record can tell a timed-out lookup from a forged wallet.

use eyre::{eyre, Result, WrapErr};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::address::TonAddress;
use crate::cell::CellBuilder;
use crate::chain::{ChainClient, GetMethodResult, StackEntry};
use crate::cycle_cache::{CycleCache, DEFAULT_CYCLE_CACHE_SIZE};
use crate::metrics;

/// Stack index of the jetton master in `get_wallet_data`
const WALLET_DATA_MASTER_INDEX: usize = 2;
/// Stack index of the owner in `get_wallet_data`
const WALLET_DATA_OWNER_INDEX: usize = 1;

/// Outcome of validating one jetton wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticityResult {
    pub wallet: TonAddress,
    pub is_valid: bool,
    /// The chain could not be queried; implies `!is_valid`
    pub unavailable: bool,
    /// Why the wallet was rejected
    pub reason: Option<String>,
}

impl AuthenticityResult {
    fn valid(wallet: TonAddress) -> Self {
        Self {
            wallet,
            is_valid: true,
            unavailable: false,
            reason: None,
        }
    }

    fn invalid(wallet: TonAddress, rejection: Rejection) -> Self {
        let (unavailable, report) = match rejection {
            Rejection::Unavailable(e) => (true, e),
            Rejection::Invalid(e) => (false, e),
        };
        Self {
            wallet,
            is_valid: false,
            unavailable,
            reason: Some(format!("{:#}", report)),
        }
    }
}

/// Why a wallet was not authenticated
#[derive(Debug)]
enum Rejection {
    /// A get-method call did not return
    Unavailable(eyre::Report),
    /// The chain answered and the answer does not match
    Invalid(eyre::Report),
}

impl From<eyre::Report> for Rejection {
    fn from(e: eyre::Report) -> Self {
        Rejection::Invalid(e)
    }
}

pub struct AuthenticityValidator {
    chain: Arc<dyn ChainClient>,
    canonical_master: TonAddress,
    /// Deposit address, set when the derivation cross-check is enabled
    derivation_owner: Option<TonAddress>,
    cache: CycleCache<TonAddress, AuthenticityResult>,
}

impl AuthenticityValidator {
    pub fn new(chain: Arc<dyn ChainClient>, canonical_master: TonAddress) -> Self {
        Self {
            chain,
            canonical_master,
            derivation_owner: None,
            cache: CycleCache::new(DEFAULT_CYCLE_CACHE_SIZE),
        }
    }

    /// Also require the wallet to be the canonical wallet of `owner`
    pub fn with_derivation_check(mut self, owner: TonAddress) -> Self {
        self.derivation_owner = Some(owner);
        self
    }

    /// Forget every result from the previous scan cycle
    pub fn begin_cycle(&mut self) {
        self.cache.begin_cycle();
    }

    pub async fn validate(&mut self, wallet: &TonAddress) -> AuthenticityResult {
        if let Some(cached) = self.cache.get(wallet) {
            debug!(wallet = %wallet, valid = cached.is_valid, "Authenticity cache hit");
            return cached;
        }

        let result = match self.check(wallet).await {
            Ok(()) => AuthenticityResult::valid(*wallet),
            Err(rejection) => {
                let result = AuthenticityResult::invalid(*wallet, rejection);
                warn!(
                    wallet = %wallet,
                    canonical_master = %self.canonical_master,
                    unavailable = result.unavailable,
                    reason = result.reason.as_deref().unwrap_or_default(),
                    "Jetton wallet failed authenticity check"
                );
                result
            }
        };

        metrics::record_authenticity_check(result.is_valid);
        self.cache.insert(*wallet, result.clone());
        result
    }

    async fn check(&self, wallet: &TonAddress) -> Result<(), Rejection> {
        let data = self
            .chain
            .run_get_method(wallet, "get_wallet_data", vec![])
            .await
            .wrap_err("get_wallet_data call failed")
            .map_err(Rejection::Unavailable)?;
        ensure_success(&data, "get_wallet_data")?;

        let master = stack_address(&data, WALLET_DATA_MASTER_INDEX)
            .wrap_err("Invalid master address in get_wallet_data")?;
        if master != self.canonical_master {
            return Err(Rejection::Invalid(eyre!(
                "wallet reports master {} instead of {}",
                master,
                self.canonical_master
            )));
        }

        if let Some(owner) = self.derivation_owner {
            let reported_owner = stack_address(&data, WALLET_DATA_OWNER_INDEX)
                .wrap_err("Invalid owner address in get_wallet_data")?;
            if reported_owner != owner {
                return Err(Rejection::Invalid(eyre!(
                    "wallet owner is {} instead of {}",
                    reported_owner,
                    owner
                )));
            }

            let derived = self.derive_wallet(&owner).await?;
            if derived != *wallet {
                return Err(Rejection::Invalid(eyre!(
                    "canonical master derives wallet {} for {}, not {}",
                    derived,
                    owner,
                    wallet
                )));
            }
        }

        debug!(wallet = %wallet, "Jetton wallet authenticated");
        Ok(())
    }

    async fn derive_wallet(&self, owner: &TonAddress) -> Result<TonAddress, Rejection> {
        let mut arg = CellBuilder::new();
        arg.store_address(Some(owner)).map_err(eyre::Report::from)?;
        let arg = StackEntry::slice(&arg.build().map_err(eyre::Report::from)?)
            .map_err(eyre::Report::from)?;

        let result = self
            .chain
            .run_get_method(&self.canonical_master, "get_wallet_address", vec![arg])
            .await
            .wrap_err("get_wallet_address call failed")
            .map_err(Rejection::Unavailable)?;
        ensure_success(&result, "get_wallet_address")?;

        Ok(stack_address(&result, 0).wrap_err("Invalid address in get_wallet_address")?)
    }
}

/// TVM exit codes 0 and 1 both mean success
fn ensure_success(result: &GetMethodResult, method: &str) -> Result<()> {
    if result.exit_code != 0 && result.exit_code != 1 {
        return Err(eyre!("{} exited with code {}", method, result.exit_code));
    }
    Ok(())
}

fn stack_address(result: &GetMethodResult, index: usize) -> Result<TonAddress> {
    let entry = result
        .stack
        .get(index)
        .ok_or_else(|| eyre!("stack has {} entries, need {}", result.stack.len(), index + 1))?;
    let cell = entry.as_cell()?;
    let address = cell.parse().load_address()?;
    address.ok_or_else(|| eyre!("address is addr_none"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{AccountStatus, RawTransaction};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn master() -> TonAddress {
        TonAddress::new(0, [0xaa; 32])
    }

    fn deposit() -> TonAddress {
        TonAddress::new(0, [0xd0; 32])
    }

    fn wallet() -> TonAddress {
        TonAddress::new(0, [0x1e; 32])
    }

    fn address_entry(addr: Option<&TonAddress>) -> StackEntry {
        let mut b = CellBuilder::new();
        b.store_address(addr).unwrap();
        let mut entry = StackEntry::slice(&b.build().unwrap()).unwrap();
        entry.kind = "cell".to_string();
        entry
    }

    fn num(value: &str) -> StackEntry {
        StackEntry {
            kind: "num".to_string(),
            value: serde_json::json!(value),
        }
    }

    fn wallet_data(owner: &TonAddress, master: &TonAddress) -> GetMethodResult {
        GetMethodResult {
            gas_used: 0,
            exit_code: 0,
            stack: vec![
                num("0x0"),
                address_entry(Some(owner)),
                address_entry(Some(master)),
                StackEntry {
                    kind: "cell".to_string(),
                    value: serde_json::json!("te6cckEBAQEAAgAAAEysuc0="),
                },
            ],
        }
    }

    /// Scripted get-method responses keyed by (address, method)
    #[derive(Default)]
    struct ScriptedChain {
        responses: Mutex<HashMap<(TonAddress, String), Result<GetMethodResult, String>>>,
        calls: Mutex<Vec<(TonAddress, String)>>,
    }

    impl ScriptedChain {
        fn respond(&self, addr: TonAddress, method: &str, result: Result<GetMethodResult, String>) {
            self.responses
                .lock()
                .unwrap()
                .insert((addr, method.to_string()), result);
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChainClient for ScriptedChain {
        async fn get_transactions(
            &self,
            _account: &TonAddress,
            _after_lt: u64,
            _limit: u32,
        ) -> Result<Vec<RawTransaction>> {
            Ok(vec![])
        }

        async fn run_get_method(
            &self,
            address: &TonAddress,
            method: &str,
            _stack: Vec<StackEntry>,
        ) -> Result<GetMethodResult> {
            self.calls
                .lock()
                .unwrap()
                .push((*address, method.to_string()));
            match self
                .responses
                .lock()
                .unwrap()
                .get(&(*address, method.to_string()))
            {
                Some(Ok(result)) => Ok(result.clone()),
                Some(Err(e)) => Err(eyre!("{}", e)),
                None => Err(eyre!("no scripted response")),
            }
        }

        async fn get_account_status(&self, _account: &TonAddress) -> Result<AccountStatus> {
            Ok(AccountStatus::Active)
        }
    }

    fn validator(chain: &Arc<ScriptedChain>) -> AuthenticityValidator {
        AuthenticityValidator::new(chain.clone(), master())
    }

    #[tokio::test]
    async fn test_canonical_wallet_is_valid() {
        let chain = Arc::new(ScriptedChain::default());
        chain.respond(wallet(), "get_wallet_data", Ok(wallet_data(&deposit(), &master())));

        let mut v = validator(&chain);
        v.begin_cycle();
        let result = v.validate(&wallet()).await;
        assert!(result.is_valid);
        assert_eq!(result.reason, None);
    }

    #[tokio::test]
    async fn test_foreign_master_is_invalid() {
        let forged = TonAddress::new(0, [0xbb; 32]);
        let chain = Arc::new(ScriptedChain::default());
        chain.respond(wallet(), "get_wallet_data", Ok(wallet_data(&deposit(), &forged)));

        let mut v = validator(&chain);
        v.begin_cycle();
        let result = v.validate(&wallet()).await;
        assert!(!result.is_valid);
        assert!(result.reason.unwrap().contains("instead of"));
    }

    #[tokio::test]
    async fn test_rpc_failure_fails_closed() {
        let chain = Arc::new(ScriptedChain::default());
        chain.respond(wallet(), "get_wallet_data", Err("connection refused".into()));

        let mut v = validator(&chain);
        v.begin_cycle();
        let result = v.validate(&wallet()).await;
        assert!(!result.is_valid);
        assert!(result.unavailable);
        assert!(result.reason.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_code_fails_closed() {
        let chain = Arc::new(ScriptedChain::default());
        let mut data = wallet_data(&deposit(), &master());
        data.exit_code = -13;
        chain.respond(wallet(), "get_wallet_data", Ok(data));

        let mut v = validator(&chain);
        v.begin_cycle();
        let result = v.validate(&wallet()).await;
        assert!(!result.is_valid);
        // the chain answered, so this is a rejection rather than an outage
        assert!(!result.unavailable);
    }

    #[tokio::test]
    async fn test_short_stack_fails_closed() {
        let chain = Arc::new(ScriptedChain::default());
        let mut data = wallet_data(&deposit(), &master());
        data.stack.truncate(2);
        chain.respond(wallet(), "get_wallet_data", Ok(data));

        let mut v = validator(&chain);
        v.begin_cycle();
        assert!(!v.validate(&wallet()).await.is_valid);
    }

    #[tokio::test]
    async fn test_malformed_master_cell_fails_closed() {
        let chain = Arc::new(ScriptedChain::default());
        let mut data = wallet_data(&deposit(), &master());
        data.stack[2] = StackEntry {
            kind: "cell".to_string(),
            value: serde_json::json!("bm90IGEgYm9j"),
        };
        chain.respond(wallet(), "get_wallet_data", Ok(data.clone()));

        let mut v = validator(&chain);
        v.begin_cycle();
        assert!(!v.validate(&wallet()).await.is_valid);

        data.stack[2] = address_entry(None);
        chain.respond(wallet(), "get_wallet_data", Ok(data));
        v.begin_cycle();
        assert!(!v.validate(&wallet()).await.is_valid);
    }

    #[tokio::test]
    async fn test_cached_within_cycle_only() {
        let chain = Arc::new(ScriptedChain::default());
        chain.respond(wallet(), "get_wallet_data", Ok(wallet_data(&deposit(), &master())));

        let mut v = validator(&chain);
        v.begin_cycle();
        assert!(v.validate(&wallet()).await.is_valid);
        assert!(v.validate(&wallet()).await.is_valid);
        assert_eq!(chain.call_count(), 1);

        v.begin_cycle();
        assert!(v.validate(&wallet()).await.is_valid);
        assert_eq!(chain.call_count(), 2);
    }

    #[tokio::test]
    async fn test_derivation_check() {
        let chain = Arc::new(ScriptedChain::default());
        chain.respond(wallet(), "get_wallet_data", Ok(wallet_data(&deposit(), &master())));
        chain.respond(
            master(),
            "get_wallet_address",
            Ok(GetMethodResult {
                gas_used: 0,
                exit_code: 0,
                stack: vec![address_entry(Some(&wallet()))],
            }),
        );

        let mut v = validator(&chain).with_derivation_check(deposit());
        v.begin_cycle();
        assert!(v.validate(&wallet()).await.is_valid);
    }

    #[tokio::test]
    async fn test_derivation_mismatch_is_invalid() {
        let chain = Arc::new(ScriptedChain::default());
        chain.respond(wallet(), "get_wallet_data", Ok(wallet_data(&deposit(), &master())));
        chain.respond(
            master(),
            "get_wallet_address",
            Ok(GetMethodResult {
                gas_used: 0,
                exit_code: 0,
                stack: vec![address_entry(Some(&TonAddress::new(0, [0x99; 32])))],
            }),
        );

        let mut v = validator(&chain).with_derivation_check(deposit());
        v.begin_cycle();
        let result = v.validate(&wallet()).await;
        assert!(!result.is_valid);
        assert!(!result.unavailable);
    }

    #[tokio::test]
    async fn test_derivation_lookup_failure_is_unavailable() {
        let chain = Arc::new(ScriptedChain::default());
        chain.respond(wallet(), "get_wallet_data", Ok(wallet_data(&deposit(), &master())));
        chain.respond(master(), "get_wallet_address", Err("timed out".into()));

        let mut v = validator(&chain).with_derivation_check(deposit());
        v.begin_cycle();
        let result = v.validate(&wallet()).await;
        assert!(!result.is_valid);
        assert!(result.unavailable);
    }

    #[tokio::test]
    async fn test_derivation_owner_mismatch_is_invalid() {
        let stranger = TonAddress::new(0, [0x55; 32]);
        let chain = Arc::new(ScriptedChain::default());
        chain.respond(wallet(), "get_wallet_data", Ok(wallet_data(&stranger, &master())));

        let mut v = validator(&chain).with_derivation_check(deposit());
        v.begin_cycle();
        assert!(!v.validate(&wallet()).await.is_valid);
        assert_eq!(chain.call_count(), 1);
    }
}
