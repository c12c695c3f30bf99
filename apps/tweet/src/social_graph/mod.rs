//! Client side of the social graph service: who may see whom, who follows whom, and which
//! users fall into an ad target group.
//!
//! Every call made by the rest of the crate goes through `GuardedSocialGraph`, which wraps the
//! transport client in the shared circuit breaker.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::TargetGroup;

pub mod circuit_breaker;
pub mod http;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use circuit_breaker::{BreakerError, TripsBreaker};

#[derive(Debug, Clone, Error)]
pub enum SocialGraphError {
    /// Transport failure, timeout, 5xx, or an open breaker. Safe to retry later.
    #[error("social graph unavailable: {0}")]
    Unavailable(String),

    /// The service answered but refused the request.
    #[error("social graph rejected the request (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

impl SocialGraphError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SocialGraphError::Unavailable(_))
    }
}

impl TripsBreaker for SocialGraphError {
    fn trips_breaker(&self) -> bool {
        self.is_retryable()
    }
}

impl From<SocialGraphError> for AppError {
    fn from(err: SocialGraphError) -> Self {
        match err {
            SocialGraphError::Unavailable(msg) => AppError::ServiceUnavailable(msg),
            SocialGraphError::Rejected { status: 404, message } => AppError::NotFound(message),
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

/// Queries answered by the social graph service. Every call carries the requester's identity.
#[async_trait]
pub trait SocialGraph: Send + Sync {
    /// Whether `auth` may see content posted by `target`.
    async fn check_visibility(&self, auth: &AuthUser, target: &str)
        -> Result<bool, SocialGraphError>;

    /// Usernames following `auth`.
    async fn followers(&self, auth: &AuthUser) -> Result<BTreeSet<String>, SocialGraphError>;

    /// Usernames matching an ad's demographic target.
    async fn target_group_members(
        &self,
        auth: &AuthUser,
        group: &TargetGroup,
    ) -> Result<BTreeSet<String>, SocialGraphError>;
}

/// A `SocialGraph` whose calls all pass through one shared circuit breaker.
pub struct GuardedSocialGraph {
    inner: Arc<dyn SocialGraph>,
    breaker: Arc<CircuitBreaker>,
}

impl GuardedSocialGraph {
    pub fn new(inner: Arc<dyn SocialGraph>, breaker: Arc<CircuitBreaker>) -> Self {
        GuardedSocialGraph { inner, breaker }
    }
}

fn unguard<T>(result: Result<T, BreakerError<SocialGraphError>>) -> Result<T, SocialGraphError> {
    result.map_err(|e| match e {
        BreakerError::Open(name) => {
            SocialGraphError::Unavailable(format!("circuit breaker '{name}' is open"))
        }
        BreakerError::Inner(inner) => inner,
    })
}

#[async_trait]
impl SocialGraph for GuardedSocialGraph {
    async fn check_visibility(
        &self,
        auth: &AuthUser,
        target: &str,
    ) -> Result<bool, SocialGraphError> {
        // Everyone sees their own posts; no need to ask.
        if auth.username == target {
            return Ok(true);
        }
        unguard(
            self.breaker
                .execute(|| self.inner.check_visibility(auth, target))
                .await,
        )
    }

    async fn followers(&self, auth: &AuthUser) -> Result<BTreeSet<String>, SocialGraphError> {
        unguard(self.breaker.execute(|| self.inner.followers(auth)).await)
    }

    async fn target_group_members(
        &self,
        auth: &AuthUser,
        group: &TargetGroup,
    ) -> Result<BTreeSet<String>, SocialGraphError> {
        unguard(
            self.breaker
                .execute(|| self.inner.target_group_members(auth, group))
                .await,
        )
    }
}
