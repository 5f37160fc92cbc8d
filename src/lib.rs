//! Parley: web translation assistant.
//! Resolves translations through a per-user glossary, a shared content cache
//! and a live LLM provider, and tracks monthly usage per user.
//! Main library: component wiring, tracing setup and the HTTP server.

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod metrics;
pub mod server;
pub mod translate;
pub mod usage;

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use auth::HeaderIdentity;
use clock::{Clock, SystemClock};
use config::Config;
use db::Database;
use metrics::MetricsRegistry;
use translate::cache::MemoryCache;
use translate::glossary::Glossary;
use translate::openai::OpenAiClient;
use translate::provider::TranslationProvider;
use translate::sqlite_cache::SqliteCache;
use translate::TranslationService;
use usage::UsageTracker;

/// Shared application state handed to every request handler.
pub struct AppContext {
    pub translation_service: Arc<TranslationService>,
    pub glossary: Arc<Glossary>,
    pub usage: Arc<UsageTracker>,
    pub metrics: Arc<MetricsRegistry>,
    pub identity: HeaderIdentity,
}

impl AppContext {
    /// Wire the components over one database.
    pub fn new(
        config: &Config,
        db: Arc<Database>,
        provider: Option<Arc<dyn TranslationProvider>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let glossary = Arc::new(Glossary::new(Arc::clone(&db)));
        let usage = Arc::new(UsageTracker::new(Arc::clone(&db), clock));

        let translation_service = Arc::new(TranslationService::new(
            provider,
            MemoryCache::new(config.cache_capacity),
            SqliteCache::new(Arc::clone(&db)),
            Arc::clone(&glossary),
            Arc::clone(&usage),
            Arc::clone(&metrics),
            config.provider_timeout,
        ));

        Self {
            translation_service,
            glossary,
            usage,
            metrics,
            identity: HeaderIdentity::new(config.user_header.clone()),
        }
    }
}

/// Load configuration, open the store and serve the HTTP API until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("parley=debug,tower_http=info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("parley starting");
    if let Ok(path) = dotenv {
        info!(path = %path.display(), "loaded environment file");
    }

    let config = Config::from_env().context("invalid configuration")?;
    let db = Arc::new(Database::open(&config.db_path).context("failed to open database")?);

    let provider: Option<Arc<dyn TranslationProvider>> = match &config.provider {
        Some(provider_config) => match OpenAiClient::new(provider_config, config.provider_timeout) {
            Ok(client) => {
                info!(
                    model = %provider_config.model,
                    base_url = %provider_config.base_url,
                    "translation provider initialized"
                );
                Some(Arc::new(client) as Arc<dyn TranslationProvider>)
            }
            Err(e) => {
                warn!(error = %e, "translation provider init failed, serving glossary and cache only");
                None
            }
        },
        None => {
            warn!("OPENAI_API_KEY not set, serving glossary and cache only");
            None
        }
    };

    let ctx = Arc::new(AppContext::new(&config, db, provider, Arc::new(SystemClock)));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("shutdown requested");
                    shutdown.cancel();
                }
                Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
            }
        });
    }

    server::serve(ctx, config.bind_addr, shutdown)
        .await
        .context("HTTP server error")?;

    info!("parley stopped");
    Ok(())
}
