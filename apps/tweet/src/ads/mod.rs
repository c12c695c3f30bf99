//! Notifications to the ads ledger, which keeps per-ad statistics.
//! Callers treat every notification as best-effort.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::models::TargetGroup;
use crate::social_graph::http::AUTH_USERNAME_HEADER;

#[derive(Debug, Error)]
pub enum AdsLedgerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ads ledger returned status {status}: {message}")]
    Api { status: u16, message: String },
}

/// Metadata of a freshly published ad.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdCreated {
    pub tweet_id: Uuid,
    pub posted_by: String,
    pub target_group: TargetGroup,
    pub recipients: usize,
}

#[async_trait]
pub trait AdsLedger: Send + Sync {
    async fn ad_created(&self, auth: &AuthUser, ad: &AdCreated) -> Result<(), AdsLedgerError>;
    async fn ad_liked(&self, auth: &AuthUser, tweet_id: Uuid) -> Result<(), AdsLedgerError>;
    async fn ad_unliked(&self, auth: &AuthUser, tweet_id: Uuid) -> Result<(), AdsLedgerError>;
}

#[derive(Clone)]
pub struct HttpAdsLedger {
    client: Client,
    base_url: Url,
}

impl HttpAdsLedger {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid ads ledger URL '{base_url}'"))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build ads ledger HTTP client")?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AdsLedgerError> {
        self.base_url.join(path).map_err(|e| AdsLedgerError::Api {
            status: 0,
            message: format!("bad endpoint '{path}': {e}"),
        })
    }

    async fn send(&self, request: RequestBuilder, auth: &AuthUser) -> Result<(), AdsLedgerError> {
        let response = request
            .header(AUTH_USERNAME_HEADER, &auth.username)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AdsLedgerError::Api {
                status: status.as_u16(),
                message,
            });
        }
        debug!("Ads ledger accepted notification ({status})");
        Ok(())
    }
}

#[async_trait]
impl AdsLedger for HttpAdsLedger {
    async fn ad_created(&self, auth: &AuthUser, ad: &AdCreated) -> Result<(), AdsLedgerError> {
        let url = self.endpoint("ads")?;
        self.send(self.client.post(url).json(ad), auth).await
    }

    async fn ad_liked(&self, auth: &AuthUser, tweet_id: Uuid) -> Result<(), AdsLedgerError> {
        let url = self.endpoint(&format!("ads/{tweet_id}/likes"))?;
        self.send(self.client.post(url), auth).await
    }

    async fn ad_unliked(&self, auth: &AuthUser, tweet_id: Uuid) -> Result<(), AdsLedgerError> {
        let url = self.endpoint(&format!("ads/{tweet_id}/likes/{}", auth.username))?;
        self.send(self.client.delete(url), auth).await
    }
}
