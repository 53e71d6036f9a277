use std::sync::Arc;

use axum::Router;
use handover::{Exchange, InMemoryStorage, ServerConfig, http};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "handover=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(
        bind = %config.bind_addr,
        sibling_policy = ?config.exchange.sibling_policy,
        allow_messages_on_rejected = config.exchange.allow_messages_on_rejected,
        "Starting handover"
    );

    let app = build_app(&config).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            shutdown.cancel();
        }
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

#[cfg(feature = "postgres")]
async fn build_app(config: &ServerConfig) -> anyhow::Result<Router> {
    use handover::{PoolProvider, PostgresStorage, ReplicatedPools};

    let Some(url) = config.database_url.as_deref() else {
        return Ok(in_memory_app(config));
    };

    let pools = ReplicatedPools::connect(url, config.database_replica_url.as_deref()).await?;
    handover::migrator().run(pools.write()).await?;
    tracing::info!(replica = pools.has_replica(), "Using Postgres storage");

    let exchange = Exchange::new(Arc::new(PostgresStorage::new(pools)))
        .with_config(config.exchange.clone());
    Ok(http::router(exchange))
}

#[cfg(not(feature = "postgres"))]
async fn build_app(config: &ServerConfig) -> anyhow::Result<Router> {
    if config.database_url.is_some() {
        tracing::warn!("DATABASE_URL is set but the postgres feature is disabled; ignoring it");
    }
    Ok(in_memory_app(config))
}

fn in_memory_app(config: &ServerConfig) -> Router {
    tracing::info!("Using in-memory storage; state is lost on restart");
    let exchange = Exchange::new(Arc::new(InMemoryStorage::new()))
        .with_config(config.exchange.clone());
    http::router(exchange)
}
