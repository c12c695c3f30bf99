use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Liveness plus the current state of the social graph breaker.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "tweet",
        "breaker": {
            "name": state.breaker.name(),
            "state": state.breaker.state().to_string()
        }
    }))
}
