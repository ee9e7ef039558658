use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use deposit_watcher::api::{self, AppState};
use deposit_watcher::authenticity::AuthenticityValidator;
use deposit_watcher::chain::retry::RetryConfig;
use deposit_watcher::chain::{ChainClient, TonCenterClient};
use deposit_watcher::config::Config;
use deposit_watcher::db::{self, PgStore};
use deposit_watcher::hooks::{LogNotifier, Notifier, PgSubscriptionActivator, TelegramNotifier};
use deposit_watcher::metrics;
use deposit_watcher::reconcile::ReconciliationEngine;
use deposit_watcher::scanner::{Scanner, ScannerConfig};
use deposit_watcher::store::CursorTracker;

const TONCENTER_TIMEOUT: Duration = Duration::from_secs(15);

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    // .env must be applied before the subscriber reads RUST_LOG / LOG_FORMAT
    let config = Config::load()?;
    init_logging(config.log_json);

    tracing::info!("Starting TON deposit watcher");
    tracing::info!(
        network = ?config.network,
        deposit_address = %config.deposit_address.to_friendly(false, config.network.is_testnet()),
        usdt_master = %config.usdt_master,
        toncenter = ?config.toncenter_urls,
        tolerance_bps = config.tolerance_bps,
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database connected");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let store = Arc::new(PgStore::new(pool.clone()));

    let chain: Arc<dyn ChainClient> = Arc::new(TonCenterClient::new(
        config.toncenter_urls.clone(),
        config.toncenter_api_key.clone(),
        TONCENTER_TIMEOUT,
        RetryConfig::default(),
    )?);

    let mut validator = AuthenticityValidator::new(chain.clone(), config.usdt_master);
    if config.verify_wallet_derivation {
        validator = validator.with_derivation_check(config.deposit_address);
    } else {
        tracing::warn!(
            "VERIFY_WALLET_DERIVATION disabled, jetton wallets are trusted on their own get_wallet_data"
        );
    }

    let notifier: Arc<dyn Notifier> = match &config.telegram_bot_token {
        Some(token) => Arc::new(TelegramNotifier::new(
            token.clone(),
            config.admin_chat_ids.clone(),
        )?),
        None => {
            tracing::warn!("TELEGRAM_BOT_TOKEN not set, notifications are logged only");
            Arc::new(LogNotifier)
        }
    };

    let engine = ReconciliationEngine::new(
        store.clone(),
        validator,
        Arc::new(PgSubscriptionActivator::new(pool.clone())),
        notifier,
        config.tolerance()?,
    );

    let mut scanner = Scanner::new(
        ScannerConfig {
            deposit_address: config.deposit_address,
            page_size: config.page_size,
            max_pages: config.max_pages_per_cycle,
            poll_interval: config.poll_interval(),
        },
        chain,
        CursorTracker::new(store),
        engine,
        config.scales(),
    );
    scanner.check_deposit_account().await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let api_state = AppState::new(pool.clone(), config.deposit_address.to_raw());
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_addr, api_state).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    if let Err(e) = scanner.run(shutdown_rx).await {
        tracing::error!(error = %e, "Scanner error");
    }

    metrics::UP.set(0.0);
    pool.close().await;
    tracing::info!("TON deposit watcher stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,deposit_watcher=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
