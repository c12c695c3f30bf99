mod ads;
mod auth;
mod best_effort;
mod config;
mod db;
mod errors;
mod images;
mod models;
mod routes;
mod social_graph;
mod state;
mod storage;
#[cfg(test)]
mod testing;
mod tweets;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::ads::HttpAdsLedger;
use crate::config::Config;
use crate::db::create_pool;
use crate::images::{ImageResolver, RedisImageCache, S3ImageStore};
use crate::routes::build_router;
use crate::social_graph::http::HttpSocialGraph;
use crate::social_graph::{CircuitBreaker, CircuitBreakerConfig, GuardedSocialGraph};
use crate::state::AppState;
use crate::storage::PgTweetStore;
use crate::tweets::TweetService;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tweet service v{}", env!("CARGO_PKG_VERSION"));

    let db = create_pool(&config.database_url).await?;
    let store = Arc::new(PgTweetStore::new(db));

    let redis = redis::Client::open(config.redis_url.clone())
        .context("Invalid REDIS_URL")?;
    let image_cache = RedisImageCache::connect(redis)
        .await
        .context("Failed to connect to Redis")?;
    let s3 = build_s3_client(&config).await;
    let images = Arc::new(ImageResolver::new(
        Arc::new(image_cache),
        Arc::new(S3ImageStore::new(s3, config.s3_bucket.clone())),
        config.image_cache_ttl,
    ));
    info!("Image cache and store initialized");

    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::fail_fast(
        "SocialGraph",
        config.breaker_open_for,
    )));
    let remote = HttpSocialGraph::new(&config.social_graph_url, config.remote_timeout)?;
    let graph = Arc::new(GuardedSocialGraph::new(Arc::new(remote), breaker.clone()));
    info!(url = %config.social_graph_url, "Social graph client initialized");

    let ads = Arc::new(HttpAdsLedger::new(
        &config.ads_ledger_url,
        config.remote_timeout,
    )?);

    let state = AppState {
        service: Arc::new(TweetService::new(store, graph, images, ads)),
        breaker,
        config: config.clone(),
    };

    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "tweet-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    // MinIO serves buckets under the path, not a subdomain
    let s3_config = aws_sdk_s3::config::Builder::from(&s3_config)
        .force_path_style(true)
        .build();
    aws_sdk_s3::Client::from_conf(s3_config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
