use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::address::TonAddress;
use crate::amount::{AssetScales, Tolerance, MAX_TOLERANCE_BPS};
use crate::chain::toncenter::parse_urls;
use crate::chain::MAX_PAGE_SIZE;

/// Canonical USDT jetton master on mainnet
pub const MAINNET_USDT_MASTER: &str =
    "0:b113a994b5024a16719f69139328eb759596c38a25f59028b146fecdc3621dfe";

/// TON network the watcher runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn default_toncenter_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://toncenter.com/api/v3",
            Network::Testnet => "https://testnet.toncenter.com/api/v3",
        }
    }

    pub fn is_testnet(&self) -> bool {
        matches!(self, Network::Testnet)
    }
}

impl FromStr for Network {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(eyre!("TON_NETWORK must be mainnet or testnet, got {}", other)),
        }
    }
}

/// Main configuration for the watcher
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub network: Network,
    /// toncenter base URLs, primary first
    pub toncenter_urls: Vec<String>,
    pub toncenter_api_key: Option<String>,
    pub deposit_address: TonAddress,
    pub usdt_master: TonAddress,
    pub verify_wallet_derivation: bool,
    pub poll_interval_ms: u64,
    pub page_size: u32,
    pub max_pages_per_cycle: u32,
    pub tolerance_bps: u32,
    pub ton_decimals: u32,
    pub usdt_decimals: u32,
    pub telegram_bot_token: Option<String>,
    pub admin_chat_ids: Vec<i64>,
    pub api_port: u16,
    pub log_json: bool,
}

/// Custom Debug that redacts credentials to prevent accidental log leakage.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"<redacted>")
            .field("network", &self.network)
            .field("toncenter_urls", &self.toncenter_urls)
            .field(
                "toncenter_api_key",
                &self.toncenter_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("deposit_address", &self.deposit_address.to_raw())
            .field("usdt_master", &self.usdt_master.to_raw())
            .field("verify_wallet_derivation", &self.verify_wallet_derivation)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("page_size", &self.page_size)
            .field("max_pages_per_cycle", &self.max_pages_per_cycle)
            .field("tolerance_bps", &self.tolerance_bps)
            .field("ton_decimals", &self.ton_decimals)
            .field("usdt_decimals", &self.usdt_decimals)
            .field(
                "telegram_bot_token",
                &self.telegram_bot_token.as_ref().map(|_| "<redacted>"),
            )
            .field("admin_chat_ids", &self.admin_chat_ids)
            .field("api_port", &self.api_port)
            .field("log_json", &self.log_json)
            .finish()
    }
}

/// Default functions
fn default_poll_interval() -> u64 {
    20_000
}

fn default_page_size() -> u32 {
    50
}

fn default_max_pages() -> u32 {
    4
}

fn default_tolerance_bps() -> u32 {
    MAX_TOLERANCE_BPS
}

fn default_api_port() -> u16 {
    9090
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    fn load_from_env() -> Result<Self> {
        let network = match non_empty("TON_NETWORK") {
            Some(raw) => raw.parse()?,
            None => Network::Mainnet,
        };

        let toncenter_urls = match non_empty("TONCENTER_URL") {
            Some(raw) => parse_urls(&raw),
            None => vec![network.default_toncenter_url().to_string()],
        };

        let deposit_address = required("DEPOSIT_ADDRESS")?
            .parse::<TonAddress>()
            .wrap_err("DEPOSIT_ADDRESS must be a valid TON address")?;

        let usdt_master = match non_empty("USDT_MASTER_ADDRESS") {
            Some(raw) => raw
                .parse::<TonAddress>()
                .wrap_err("USDT_MASTER_ADDRESS must be a valid TON address")?,
            None if network.is_testnet() => {
                return Err(eyre!(
                    "USDT_MASTER_ADDRESS environment variable is required on testnet"
                ))
            }
            None => MAINNET_USDT_MASTER.parse()?,
        };

        let admin_chat_ids = match non_empty("ADMIN_CHAT_IDS") {
            Some(raw) => parse_chat_ids(&raw)?,
            None => Vec::new(),
        };

        let config = Config {
            database_url: required("DATABASE_URL")?,
            network,
            toncenter_urls,
            toncenter_api_key: non_empty("TONCENTER_API_KEY"),
            deposit_address,
            usdt_master,
            verify_wallet_derivation: parse_or("VERIFY_WALLET_DERIVATION", true)?,
            poll_interval_ms: parse_or("POLL_INTERVAL_MS", default_poll_interval())?,
            page_size: parse_or("PAGE_SIZE", default_page_size())?,
            max_pages_per_cycle: parse_or("MAX_PAGES_PER_CYCLE", default_max_pages())?,
            tolerance_bps: parse_or("AMOUNT_TOLERANCE_BPS", default_tolerance_bps())?,
            ton_decimals: parse_or("TON_DECIMALS", AssetScales::default().ton_decimals)?,
            usdt_decimals: parse_or("USDT_DECIMALS", AssetScales::default().usdt_decimals)?,
            telegram_bot_token: non_empty("TELEGRAM_BOT_TOKEN"),
            admin_chat_ids,
            api_port: parse_or("API_PORT", default_api_port())?,
            log_json: non_empty("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(eyre!("DATABASE_URL cannot be empty"));
        }

        if self.toncenter_urls.is_empty() {
            return Err(eyre!("TONCENTER_URL cannot be empty"));
        }
        for url in &self.toncenter_urls {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(eyre!("TONCENTER_URL entry is not an http(s) URL: {}", url));
            }
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(eyre!("PAGE_SIZE must be between 1 and {}", MAX_PAGE_SIZE));
        }
        if self.max_pages_per_cycle == 0 {
            return Err(eyre!("MAX_PAGES_PER_CYCLE must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(eyre!("POLL_INTERVAL_MS must be greater than 0"));
        }

        // same bound Tolerance enforces, reported at startup
        Tolerance::from_bps(self.tolerance_bps).wrap_err("Invalid AMOUNT_TOLERANCE_BPS")?;

        if self.ton_decimals > 18 || self.usdt_decimals > 18 {
            return Err(eyre!("asset decimals cannot exceed 18"));
        }

        if self.deposit_address == self.usdt_master {
            return Err(eyre!("DEPOSIT_ADDRESS cannot be the USDT master"));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tolerance(&self) -> Result<Tolerance> {
        Tolerance::from_bps(self.tolerance_bps)
    }

    pub fn scales(&self) -> AssetScales {
        AssetScales {
            ton_decimals: self.ton_decimals,
            usdt_decimals: self.usdt_decimals,
        }
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(name: &str) -> Result<String> {
    non_empty(name).ok_or_else(|| eyre!("{} environment variable is required", name))
}

fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match non_empty(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| eyre!("{} has invalid value {:?}: {}", name, raw, e)),
        None => Ok(default),
    }
}

fn parse_chat_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| eyre!("ADMIN_CHAT_IDS entry is not a chat id: {}", s))
        })
        .collect()
}
