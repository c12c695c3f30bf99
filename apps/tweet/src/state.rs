use std::sync::Arc;

use crate::config::Config;
use crate::social_graph::CircuitBreaker;
use crate::tweets::TweetService;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TweetService>,
    /// The breaker guarding the social graph, exposed for health reporting.
    pub breaker: Arc<CircuitBreaker>,
    pub config: Config,
}
