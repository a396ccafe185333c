mod cache;
mod config;
mod db;
mod errors;
mod models;
mod questionnaire;
mod routes;
mod state;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cache::HistoryCache;
use crate::config::{Config, StoreBackend};
use crate::db::create_pool;
use crate::questionnaire::memory::MemoryStore;
use crate::questionnaire::postgres::PgTemplateStore;
use crate::questionnaire::service::TemplateService;
use crate::questionnaire::store::TemplateStore;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Questionnaire API v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn TemplateStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres backend")?;
            Arc::new(PgTemplateStore::new(create_pool(url).await?))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory template store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let cache = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            info!("Redis history cache enabled");
            HistoryCache::redis(client)
        }
        None => {
            info!("REDIS_URL not set, caching version history in process");
            HistoryCache::local()
        }
    };

    let state = AppState::new(TemplateService::new(store, cache), config.clone());

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
