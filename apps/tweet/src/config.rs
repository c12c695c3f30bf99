use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub social_graph_url: String,
    pub ads_ledger_url: String,
    pub secret_key: String,
    pub port: u16,
    pub rust_log: String,
    /// Upper bound for every call to a remote collaborator.
    pub remote_timeout: Duration,
    /// How long the social graph breaker stays open before allowing a probe.
    pub breaker_open_for: Duration,
    pub image_cache_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            social_graph_url: require_env("SOCIAL_GRAPH_URL")?,
            ads_ledger_url: require_env("ADS_LEDGER_URL")?,
            secret_key: require_env("SECRET_KEY")?,
            port: parse_env("PORT", 8000)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            remote_timeout: Duration::from_millis(parse_env("REMOTE_TIMEOUT_MS", 2000)?),
            breaker_open_for: Duration::from_secs(parse_env("BREAKER_OPEN_SECS", 5)?),
            image_cache_ttl: Duration::from_secs(parse_env("IMAGE_CACHE_TTL_SECS", 30)?),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}
