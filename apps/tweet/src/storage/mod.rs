//! Persistence for timelines, feeds and likes.
//!
//! Rows are keyed the way they are read: a timeline row by (author, tweet id), a feed row by
//! (recipient, tweet id), a like by (tweet id, username). Every insert is an upsert on that key,
//! so writing the same row twice leaves exactly one copy.

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Like, Tweet};

pub mod postgres;

pub use postgres::PgTweetStore;

/// Timeline and feed pages never hold more entries than this.
pub const PAGE_SIZE: i64 = 20;

#[async_trait]
pub trait TweetStore: Send + Sync {
    async fn insert_timeline_entry(&self, tweet: &Tweet) -> Result<(), AppError>;

    async fn insert_feed_entry(&self, recipient: &str, tweet: &Tweet) -> Result<(), AppError>;

    /// Newest first, strictly older than `before` when given.
    async fn query_timeline_entries(
        &self,
        author: &str,
        before: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Tweet>, AppError>;

    /// Newest first, strictly older than `before` when given.
    async fn query_feed_entries(
        &self,
        recipient: &str,
        before: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Tweet>, AppError>;

    /// Returns `true` if the like did not exist before.
    async fn insert_like(&self, like: &Like) -> Result<bool, AppError>;

    /// Returns `true` if a like was removed.
    async fn delete_like(&self, like: &Like) -> Result<bool, AppError>;

    async fn count_likes(&self, tweet_id: Uuid) -> Result<i64, AppError>;

    async fn liked_by_user(&self, tweet_id: Uuid, username: &str) -> Result<bool, AppError>;

    async fn likes_by_tweet(&self, tweet_id: Uuid) -> Result<Vec<Like>, AppError>;

    async fn find_tweet_by_id(&self, tweet_id: Uuid) -> Result<Option<Tweet>, AppError>;

    async fn is_ad(&self, tweet_id: Uuid) -> Result<bool, AppError> {
        Ok(self
            .find_tweet_by_id(tweet_id)
            .await?
            .map(|t| t.ad)
            .unwrap_or(false))
    }

    /// Copies every timeline entry of `author` into the feed of `recipient`.
    /// Returns the number of entries copied.
    async fn copy_timeline_into_feed(&self, author: &str, recipient: &str)
        -> Result<u64, AppError>;
}
