//! Ticketdesk gateway server

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ticketdesk_api::{
    routes::create_router,
    store::{AiMessageStore, InMemoryAiMessageStore, PgAiMessageStore},
    AppState, Config,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ticketdesk_api=debug,tower_http=info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn AiMessageStore>> {
    match &config.database_url {
        Some(url) => {
            let pool = ticketdesk_shared::db::create_pool(url, config.database_max_connections)
                .await
                .context("failed to connect to database")?;
            ticketdesk_shared::db::run_migrations(&pool)
                .await
                .context("failed to run migrations")?;
            tracing::info!("Using Postgres AI message store");
            Ok(Arc::new(PgAiMessageStore::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, AI messages are kept in memory only");
            Ok(Arc::new(InMemoryAiMessageStore::new()))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = ?e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("invalid configuration")?;
    let bind_address = config.bind_address.clone();

    tracing::info!(
        bind_address = %bind_address,
        llm_base_url = %config.llm_base_url,
        default_model = %config.llm_default_model,
        "Starting Ticketdesk gateway"
    );

    let store = build_store(&config).await?;
    let state = AppState::new(config, store).context("failed to build completion client")?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    tracing::info!(address = %bind_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}
