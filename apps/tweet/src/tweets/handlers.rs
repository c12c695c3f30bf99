use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{Like, NewAd, NewTweet, TweetView};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub before_id: Option<String>,
}

impl PageQuery {
    fn before(&self) -> Result<Option<Uuid>, AppError> {
        match self.before_id.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => parse_id(raw).map(Some),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSaved {
    pub image_id: String,
}

#[derive(Serialize)]
pub struct FeedBackfilled {
    pub copied: u64,
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::Validation(format!("'{raw}' is not a tweet id")))
}

/// POST /tweets/
pub async fn handle_create_tweet(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<NewTweet>,
) -> Result<(StatusCode, Json<TweetView>), AppError> {
    let view = state.service.create_tweet(&auth, &req).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// POST /tweets/ads
pub async fn handle_create_ad(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<NewAd>,
) -> Result<(StatusCode, Json<TweetView>), AppError> {
    let view = state.service.create_ad(&auth, &req).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// PUT /tweets/:id/like
pub async fn handle_like(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Like>, AppError> {
    let like = state.service.create_like(&auth, parse_id(&id)?).await?;
    Ok(Json(like))
}

/// PUT /tweets/:id/unlike
pub async fn handle_unlike(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.service.delete_like(&auth, parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /tweets/:id/likes
pub async fn handle_likes_by_tweet(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<Like>>, AppError> {
    let likes = state.service.likes_by_tweet(parse_id(&id)?).await?;
    Ok(Json(likes))
}

/// POST /tweets/:id/retweet
pub async fn handle_retweet(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<TweetView>), AppError> {
    let view = state.service.retweet(&auth, parse_id(&id)?).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /tweets/profile/:username
pub async fn handle_timeline(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(username): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<TweetView>>, AppError> {
    let views = state
        .service
        .timeline(&auth, &username, page.before()?)
        .await?;
    Ok(Json(views))
}

/// GET /tweets/feed
pub async fn handle_home_feed(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<TweetView>>, AppError> {
    let views = state.service.home_feed(&auth, page.before()?).await?;
    Ok(Json(views))
}

/// POST /tweets/image
/// Expects a multipart form with the image bytes in the `image` field.
pub async fn handle_save_image(
    State(state): State<AppState>,
    _auth: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ImageSaved>), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("malformed upload: {e}")))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("malformed upload: {e}")))?;
        let image_id = state.service.save_image(bytes).await?;
        return Ok((StatusCode::CREATED, Json(ImageSaved { image_id })));
    }
    Err(AppError::Validation(
        "upload has no 'image' field".to_string(),
    ))
}

/// PUT /tweets/feed/:username
pub async fn handle_backfill_feed(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<FeedBackfilled>, AppError> {
    let copied = state.service.backfill_feed(&auth, &username).await?;
    Ok(Json(FeedBackfilled { copied }))
}
