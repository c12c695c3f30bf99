use base64::prelude::*;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::AppError;

pub const MAX_TEXT_CHARS: usize = 280;

/// A post as stored in a timeline or feed row. Retweets and ads share this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Tweet {
    #[sqlx(rename = "tweet_id")]
    pub id: Uuid,
    pub posted_by: String,
    pub text: Option<String>,
    pub image_id: Option<String>,
    pub retweet: bool,
    pub original_posted_by: Option<String>,
    pub ad: bool,
}

impl Tweet {
    /// A fresh post by `author`. The id is a UUIDv7, so ids sort by creation time.
    pub fn new_post(author: &str, content: TweetContent, ad: bool) -> Self {
        let (text, image_id) = content.into_parts();
        Tweet {
            id: Uuid::now_v7(),
            posted_by: author.to_string(),
            text,
            image_id,
            retweet: false,
            original_posted_by: None,
            ad,
        }
    }

    /// A retweet of `self` by `retweeter`, copying the content of the original.
    pub fn retweet_by(&self, retweeter: &str) -> Self {
        Tweet {
            id: Uuid::now_v7(),
            posted_by: retweeter.to_string(),
            text: self.text.clone(),
            image_id: self.image_id.clone(),
            retweet: true,
            original_posted_by: Some(self.posted_by.clone()),
            ad: false,
        }
    }

    /// Creation time embedded in the id; the epoch for ids that carry no timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.id
            .get_timestamp()
            .and_then(|ts| {
                let (secs, nanos) = ts.to_unix();
                DateTime::from_timestamp(secs as i64, nanos)
            })
            .unwrap_or_default()
    }
}

/// Validated tweet content: exactly one of text or an image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TweetContent {
    Text(String),
    Image(String),
}

impl TweetContent {
    fn into_parts(self) -> (Option<String>, Option<String>) {
        match self {
            TweetContent::Text(text) => (Some(text), None),
            TweetContent::Image(image_id) => (None, Some(image_id)),
        }
    }
}

/// Body of `POST /tweets/`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTweet {
    pub text: Option<String>,
    pub image_id: Option<String>,
}

impl NewTweet {
    pub fn validate(&self) -> Result<TweetContent, AppError> {
        let text = self
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let image_id = self
            .image_id
            .as_deref()
            .map(str::trim)
            .filter(|i| !i.is_empty());

        match (text, image_id) {
            (Some(_), Some(_)) => Err(AppError::Validation(
                "a tweet carries either text or an image, not both".to_string(),
            )),
            (None, None) => Err(AppError::Validation(
                "a tweet needs either text or an image".to_string(),
            )),
            (Some(text), None) => {
                let chars = text.chars().count();
                if chars > MAX_TEXT_CHARS {
                    return Err(AppError::Validation(format!(
                        "tweet text is {chars} characters, the limit is {MAX_TEXT_CHARS}"
                    )));
                }
                Ok(TweetContent::Text(text.to_string()))
            }
            (None, Some(image_id)) => Ok(TweetContent::Image(image_id.to_string())),
        }
    }
}

/// Demographic filter selecting ad recipients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroup {
    pub town: String,
    pub gender: String,
    pub min_age: i32,
    pub max_age: i32,
}

impl TargetGroup {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.min_age < 0 {
            return Err(AppError::Validation(
                "target group minAge must not be negative".to_string(),
            ));
        }
        if self.min_age >= self.max_age {
            return Err(AppError::Validation(format!(
                "target group minAge ({}) must be lower than maxAge ({})",
                self.min_age, self.max_age
            )));
        }
        Ok(())
    }
}

/// Body of `POST /tweets/ads`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAd {
    pub tweet: NewTweet,
    pub target_group: TargetGroup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    pub username: String,
    pub tweet_id: Uuid,
}

/// Read-side projection of a tweet for one viewer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TweetView {
    #[serde(flatten)]
    pub tweet: Tweet,
    pub timestamp: DateTime<Utc>,
    pub likes_count: i64,
    pub liked_by_me: bool,
    #[serde(serialize_with = "serialize_image")]
    pub image: Option<Bytes>,
}

impl TweetView {
    /// A view with nothing resolved yet.
    pub fn bare(tweet: Tweet) -> Self {
        TweetView {
            timestamp: tweet.created_at(),
            tweet,
            likes_count: 0,
            liked_by_me: false,
            image: None,
        }
    }
}

fn serialize_image<S: Serializer>(image: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error> {
    match image {
        Some(bytes) => serializer.serialize_some(&BASE64_STANDARD.encode(bytes)),
        None => serializer.serialize_none(),
    }
}
