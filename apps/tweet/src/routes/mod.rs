pub mod health;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::state::AppState;
use crate::tweets::handlers;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/tweets/", post(handlers::handle_create_tweet))
        .route("/tweets/ads", post(handlers::handle_create_ad))
        .route("/tweets/image", post(handlers::handle_save_image))
        .route("/tweets/feed", get(handlers::handle_home_feed))
        .route("/tweets/feed/:username", put(handlers::handle_backfill_feed))
        .route("/tweets/profile/:username", get(handlers::handle_timeline))
        .route("/tweets/:id/like", put(handlers::handle_like))
        .route("/tweets/:id/unlike", put(handlers::handle_unlike))
        .route("/tweets/:id/likes", get(handlers::handle_likes_by_tweet))
        .route("/tweets/:id/retweet", post(handlers::handle_retweet))
        .with_state(state)
}
