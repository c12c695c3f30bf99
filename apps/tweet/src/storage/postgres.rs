use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::TweetStore;
use crate::errors::AppError;
use crate::models::{Like, Tweet};

const TWEET_COLUMNS: &str = "tweet_id, posted_by, text, image_id, retweet, original_posted_by, ad";

/// `TweetStore` backed by PostgreSQL.
#[derive(Clone)]
pub struct PgTweetStore {
    pool: PgPool,
}

impl PgTweetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TweetStore for PgTweetStore {
    async fn insert_timeline_entry(&self, tweet: &Tweet) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO timeline_by_user
                (tweet_id, posted_by, text, image_id, retweet, original_posted_by, ad)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (posted_by, tweet_id) DO UPDATE SET
                text = EXCLUDED.text,
                image_id = EXCLUDED.image_id,
                retweet = EXCLUDED.retweet,
                original_posted_by = EXCLUDED.original_posted_by,
                ad = EXCLUDED.ad
            "#,
        )
        .bind(tweet.id)
        .bind(&tweet.posted_by)
        .bind(&tweet.text)
        .bind(&tweet.image_id)
        .bind(tweet.retweet)
        .bind(&tweet.original_posted_by)
        .bind(tweet.ad)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_feed_entry(&self, recipient: &str, tweet: &Tweet) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO feed_by_user
                (username, tweet_id, posted_by, text, image_id, retweet, original_posted_by, ad)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (username, tweet_id) DO UPDATE SET
                posted_by = EXCLUDED.posted_by,
                text = EXCLUDED.text,
                image_id = EXCLUDED.image_id,
                retweet = EXCLUDED.retweet,
                original_posted_by = EXCLUDED.original_posted_by,
                ad = EXCLUDED.ad
            "#,
        )
        .bind(recipient)
        .bind(tweet.id)
        .bind(&tweet.posted_by)
        .bind(&tweet.text)
        .bind(&tweet.image_id)
        .bind(tweet.retweet)
        .bind(&tweet.original_posted_by)
        .bind(tweet.ad)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query_timeline_entries(
        &self,
        author: &str,
        before: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Tweet>, AppError> {
        let sql = format!(
            "SELECT {TWEET_COLUMNS} FROM timeline_by_user \
             WHERE posted_by = $1 AND ($2::uuid IS NULL OR tweet_id < $2) \
             ORDER BY tweet_id DESC LIMIT $3"
        );
        let rows = sqlx::query_as::<_, Tweet>(&sql)
            .bind(author)
            .bind(before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn query_feed_entries(
        &self,
        recipient: &str,
        before: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Tweet>, AppError> {
        let sql = format!(
            "SELECT {TWEET_COLUMNS} FROM feed_by_user \
             WHERE username = $1 AND ($2::uuid IS NULL OR tweet_id < $2) \
             ORDER BY tweet_id DESC LIMIT $3"
        );
        let rows = sqlx::query_as::<_, Tweet>(&sql)
            .bind(recipient)
            .bind(before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn insert_like(&self, like: &Like) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT INTO likes (tweet_id, username) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(like.tweet_id)
        .bind(&like.username)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_like(&self, like: &Like) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM likes WHERE tweet_id = $1 AND username = $2")
            .bind(like.tweet_id)
            .bind(&like.username)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn count_likes(&self, tweet_id: Uuid) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM likes WHERE tweet_id = $1")
            .bind(tweet_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn liked_by_user(&self, tweet_id: Uuid, username: &str) -> Result<bool, AppError> {
        let liked: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM likes WHERE tweet_id = $1 AND username = $2)",
        )
        .bind(tweet_id)
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(liked)
    }

    async fn likes_by_tweet(&self, tweet_id: Uuid) -> Result<Vec<Like>, AppError> {
        let likes = sqlx::query_as::<_, Like>(
            "SELECT username, tweet_id FROM likes WHERE tweet_id = $1 ORDER BY username",
        )
        .bind(tweet_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(likes)
    }

    async fn find_tweet_by_id(&self, tweet_id: Uuid) -> Result<Option<Tweet>, AppError> {
        let sql = format!("SELECT {TWEET_COLUMNS} FROM timeline_by_user WHERE tweet_id = $1");
        let tweet = sqlx::query_as::<_, Tweet>(&sql)
            .bind(tweet_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tweet)
    }

    async fn is_ad(&self, tweet_id: Uuid) -> Result<bool, AppError> {
        let ad: Option<bool> =
            sqlx::query_scalar("SELECT ad FROM timeline_by_user WHERE tweet_id = $1")
                .bind(tweet_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(ad.unwrap_or(false))
    }

    async fn copy_timeline_into_feed(
        &self,
        author: &str,
        recipient: &str,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO feed_by_user
                (username, tweet_id, posted_by, text, image_id, retweet, original_posted_by, ad)
            SELECT $2, tweet_id, posted_by, text, image_id, retweet, original_posted_by, ad
            FROM timeline_by_user
            WHERE posted_by = $1
            ON CONFLICT (username, tweet_id) DO NOTHING
            "#,
        )
        .bind(author)
        .bind(recipient)
        .execute(&self.pool)
        .await?;

        info!(
            "Copied {} timeline entries of {author} into the feed of {recipient}",
            result.rows_affected()
        );
        Ok(result.rows_affected())
    }
}
