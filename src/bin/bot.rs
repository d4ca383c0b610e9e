//! yordamchi bot binary.
//!
//! Long-polls the Telegram Bot API and answers with the configured
//! chat-completion provider.
//!
//! # Environment Variables
//!
//! - `BOT_TOKEN` - Telegram bot token (required)
//! - `MISTRAL_API_KEY` / `OPENAI_API_KEY` - Key of the selected provider
//! - `DATABASE_URL` - PostgreSQL connection string; in-memory store when unset
//! - `PORT` - Enables the `/health` probe on this port
//! - `RUST_LOG` - Tracing filter (default: "info,yordamchi=debug")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin yordamchi
//! # list the models available to the configured key:
//! cargo run --bin yordamchi -- models
//! ```

use std::sync::Arc;

use anyhow::Context;
use yordamchi::bot::notifier::run_inactive_notifier;
use yordamchi::bot::{BotContext, Dispatcher};
use yordamchi::config::BotConfig;
use yordamchi::llms::{build_provider, RequestGate};
use yordamchi::ocr::OcrClient;
use yordamchi::server::{self, HealthState};
use yordamchi::storage::{MemoryStore, UserStore};
use yordamchi::telegram::{TelegramApi, TelegramClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,yordamchi=debug".into()),
        )
        .init();

    let config = BotConfig::from_env().context("invalid configuration")?;
    let llm = build_provider(&config.llm);

    if std::env::args().nth(1).as_deref() == Some("models") {
        let models = llm.list_models().await.context("listing models failed")?;
        for model in models {
            println!("{}", model);
        }
        return Ok(());
    }

    let store = open_store(&config).await?;
    store
        .migrate(config.admin_id, config.superadmin_id)
        .await
        .context("store migration failed")?;

    let api: Arc<dyn TelegramApi> = Arc::new(TelegramClient::new(&config.telegram_api_url, &config.bot_token));
    api.delete_webhook(true).await.context("deleteWebhook failed")?;

    let gate = Arc::new(RequestGate::from_config(Arc::clone(&llm), &config.llm, config.stream.chunk_size));
    let ocr = Arc::new(OcrClient::new(config.ocr.clone()));
    let health_port = config.health_port;

    tracing::info!(
        provider = llm.provider(),
        model = llm.model(),
        streaming = config.llm.streaming,
        "yordamchi starting"
    );
    let ctx = Arc::new(BotContext::new(config, api, gate, ocr, store));

    let notifier = tokio::spawn(run_inactive_notifier(Arc::clone(&ctx)));
    let probe = health_port.map(|port| {
        let state = HealthState::new(Arc::clone(&llm));
        tokio::spawn(async move {
            if let Err(e) = server::serve(port, state).await {
                tracing::error!(error = %e, "health probe stopped");
            }
        })
    });

    let dispatched = Dispatcher::new(Arc::clone(&ctx)).run_until(shutdown_signal()).await;

    notifier.abort();
    if let Some(probe) = probe {
        probe.abort();
    }
    tracing::info!(dispatched, "yordamchi stopped");
    Ok(())
}

/// Postgres when `DATABASE_URL` is set and the feature is built in.
async fn open_store(config: &BotConfig) -> anyhow::Result<Arc<dyn UserStore>> {
    match config.database_url.as_deref() {
        #[cfg(feature = "postgres")]
        Some(url) => {
            tracing::info!("connecting to PostgreSQL");
            let store = yordamchi::storage::pg_store::PgStore::connect(url)
                .await
                .context("failed to connect to PostgreSQL")?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => {
            tracing::warn!("DATABASE_URL set but built without the postgres feature; using memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        None => {
            tracing::info!("DATABASE_URL not set; using memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl-C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
