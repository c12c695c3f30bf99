use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::debug;

use super::{SocialGraph, SocialGraphError};
use crate::auth::AuthUser;
use crate::models::TargetGroup;

/// Header carrying the requester's username to the social graph service.
pub const AUTH_USERNAME_HEADER: &str = "X-Auth-Username";

#[derive(Debug, Deserialize)]
struct VisibilityResponse {
    visibility: bool,
}

#[derive(Debug, Deserialize)]
struct UsernamesResponse {
    usernames: Vec<String>,
}

/// JSON-over-HTTP transport for the social graph service.
/// Every request is bounded by the client timeout.
#[derive(Clone)]
pub struct HttpSocialGraph {
    client: Client,
    base_url: Url,
}

impl HttpSocialGraph {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid social graph URL '{base_url}'"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Social graph URL '{base_url}' cannot be used as a base");
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build social graph HTTP client")?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("social-graph").extend(segments);
        }
        url
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        auth: &AuthUser,
    ) -> Result<T, SocialGraphError> {
        let response = request
            .header(AUTH_USERNAME_HEADER, &auth.username)
            .send()
            .await
            .map_err(|e| SocialGraphError::Unavailable(e.to_string()))?;
        let response = check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SocialGraphError::Unavailable(format!("malformed response: {e}")))
    }
}

async fn check_status(response: Response) -> Result<Response, SocialGraphError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    debug!("Social graph returned {status}: {body}");
    if status.is_server_error() || status.as_u16() == 429 {
        Err(SocialGraphError::Unavailable(format!("status {status}: {body}")))
    } else {
        Err(SocialGraphError::Rejected {
            status: status.as_u16(),
            message: body,
        })
    }
}

#[async_trait]
impl SocialGraph for HttpSocialGraph {
    async fn check_visibility(
        &self,
        auth: &AuthUser,
        target: &str,
    ) -> Result<bool, SocialGraphError> {
        let url = self.endpoint(&["visibility", target]);
        let response: VisibilityResponse = self.send(self.client.get(url), auth).await?;
        Ok(response.visibility)
    }

    async fn followers(&self, auth: &AuthUser) -> Result<BTreeSet<String>, SocialGraphError> {
        let url = self.endpoint(&["followers"]);
        let response: UsernamesResponse = self.send(self.client.get(url), auth).await?;
        Ok(response.usernames.into_iter().collect())
    }

    async fn target_group_members(
        &self,
        auth: &AuthUser,
        group: &TargetGroup,
    ) -> Result<BTreeSet<String>, SocialGraphError> {
        let url = self.endpoint(&["target-group"]);
        let response: UsernamesResponse =
            self.send(self.client.post(url).json(group), auth).await?;
        Ok(response.usernames.into_iter().collect())
    }
}
