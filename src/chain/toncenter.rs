//! toncenter v3 HTTP client
//!
//! Every request walks the configured base URLs in order; a transient failure
//! on one endpoint falls through to the next, and a full pass of failures is
//! retried with backoff (see [`super::retry`]).

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use super::retry::{classify_error, classify_status, with_retry, ErrorClass, RetryConfig};
use super::types::{
    AccountState, AccountStatus, GetMethodRequest, GetMethodResult, StackEntry,
    TransactionsResponse,
};
use super::{ChainClient, RawTransaction, MAX_PAGE_SIZE};
use crate::address::TonAddress;

/// Parse a comma-separated URL list into individual trimmed URLs
pub fn parse_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub struct TonCenterClient {
    base_urls: Vec<String>,
    api_key: Option<String>,
    client: Client,
    retry: RetryConfig,
}

impl TonCenterClient {
    pub fn new(
        base_urls: Vec<String>,
        api_key: Option<String>,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self> {
        if base_urls.is_empty() {
            return Err(eyre!("At least one toncenter URL is required"));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .wrap_err("Failed to build HTTP client")?;

        Ok(Self {
            base_urls,
            api_key,
            client,
            retry,
        })
    }

    /// Send one request, classifying failures so the retry layer can tell
    /// rate limits and outages from bad requests.
    async fn send_once<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let request = match &self.api_key {
            Some(key) => request.header("X-API-Key", key),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| eyre!("toncenter connection error: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(200).collect();
            return Err(match classify_status(status) {
                ErrorClass::Transient => {
                    eyre!("toncenter temporarily unavailable: {} {}", status, body)
                }
                ErrorClass::Permanent => eyre!("toncenter request failed: {} {}", status, body),
            });
        }

        response
            .json::<T>()
            .await
            .wrap_err("Failed to decode toncenter response")
    }

    /// Try each base URL in turn, then retry the whole pass with backoff
    async fn request<T, F>(&self, what: &str, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&Client, &str) -> RequestBuilder + Sync,
    {
        let this = self;
        let build = &build;
        with_retry(&self.retry, what, move |attempt| async move {
            let mut last_error = None;
            for base in &this.base_urls {
                match this.send_once::<T>(build(&this.client, base)).await {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        if classify_error(&format!("{:#}", e)) == ErrorClass::Permanent {
                            return Err(e);
                        }
                        warn!(
                            endpoint = %base,
                            request = what,
                            attempt,
                            error = %e,
                            "toncenter endpoint failed, trying next"
                        );
                        last_error = Some(e);
                    }
                }
            }
            Err(last_error.unwrap_or_else(|| eyre!("No toncenter URL configured")))
        })
        .await
    }
}

#[async_trait]
impl ChainClient for TonCenterClient {
    async fn get_transactions(
        &self,
        account: &TonAddress,
        after_lt: u64,
        limit: u32,
    ) -> Result<Vec<RawTransaction>> {
        let account_raw = account.to_raw();
        let start_lt = after_lt.saturating_add(1).to_string();
        let limit = limit.clamp(1, MAX_PAGE_SIZE).to_string();

        let page: TransactionsResponse = self
            .request("transactions", |client, base| {
                client.get(format!("{}/transactions", base)).query(&[
                    ("account", account_raw.as_str()),
                    ("start_lt", start_lt.as_str()),
                    ("sort", "asc"),
                    ("limit", limit.as_str()),
                    ("offset", "0"),
                ])
            })
            .await
            .wrap_err_with(|| format!("Failed to fetch transactions for {}", account))?;

        debug!(
            account = %account,
            after_lt,
            count = page.transactions.len(),
            "Fetched transactions"
        );

        Ok(page
            .transactions
            .into_iter()
            .filter(|tx| tx.lt > after_lt)
            .collect())
    }

    async fn run_get_method(
        &self,
        address: &TonAddress,
        method: &str,
        stack: Vec<StackEntry>,
    ) -> Result<GetMethodResult> {
        let body = GetMethodRequest {
            address: address.to_raw(),
            method,
            stack,
        };

        self.request("runGetMethod", |client, base| {
            client.post(format!("{}/runGetMethod", base)).json(&body)
        })
        .await
        .wrap_err_with(|| format!("Failed to run {} on {}", method, address))
    }

    async fn get_account_status(&self, account: &TonAddress) -> Result<AccountStatus> {
        let account_raw = account.to_raw();
        let state: AccountState = self
            .request("account", |client, base| {
                client
                    .get(format!("{}/account", base))
                    .query(&[("address", account_raw.as_str())])
            })
            .await
            .wrap_err_with(|| format!("Failed to fetch account state of {}", account))?;
        Ok(state.status)
    }
}
