//! Image attachments: a short-lived cache in front of a durable object store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::best_effort::best_effort;
use crate::errors::AppError;

pub mod redis_cache;
pub mod s3_store;

pub use redis_cache::RedisImageCache;
pub use s3_store::S3ImageStore;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image cache error: {0}")]
    Cache(String),

    #[error("image store error: {0}")]
    Store(String),
}

impl From<ImageError> for AppError {
    fn from(err: ImageError) -> Self {
        AppError::Storage(err.to_string())
    }
}

#[async_trait]
pub trait ImageCache: Send + Sync {
    async fn get(&self, image_id: &str) -> Result<Option<Bytes>, ImageError>;
    async fn put(&self, image_id: &str, image: Bytes, ttl: Duration) -> Result<(), ImageError>;
    async fn exists(&self, image_id: &str) -> Result<bool, ImageError>;
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn get(&self, image_id: &str) -> Result<Option<Bytes>, ImageError>;
    async fn put(&self, image_id: &str, image: Bytes) -> Result<(), ImageError>;
    async fn exists(&self, image_id: &str) -> Result<bool, ImageError>;
}

/// Resolves image bytes cache-first, falling back to the durable store and refilling the cache.
pub struct ImageResolver {
    cache: Arc<dyn ImageCache>,
    store: Arc<dyn ImageStore>,
    ttl: Duration,
}

impl ImageResolver {
    pub fn new(cache: Arc<dyn ImageCache>, store: Arc<dyn ImageStore>, ttl: Duration) -> Self {
        Self { cache, store, ttl }
    }

    pub async fn resolve(&self, image_id: &str) -> Result<Option<Bytes>, ImageError> {
        if let Some(Some(image)) = best_effort("image cache read", self.cache.get(image_id)).await
        {
            return Ok(Some(image));
        }

        let image = self.store.get(image_id).await?;
        if let Some(image) = &image {
            best_effort(
                "image cache fill",
                self.cache.put(image_id, image.clone(), self.ttl),
            )
            .await;
        }
        Ok(image)
    }

    pub async fn exists(&self, image_id: &str) -> Result<bool, ImageError> {
        if best_effort("image cache lookup", self.cache.exists(image_id))
            .await
            .unwrap_or(false)
        {
            return Ok(true);
        }
        self.store.exists(image_id).await
    }

    /// Stores an uploaded image under a fresh id and returns the id.
    pub async fn save(&self, image: Bytes) -> Result<String, ImageError> {
        let image_id = Uuid::new_v4().to_string();
        self.store.put(&image_id, image.clone()).await?;
        best_effort("image cache fill", self.cache.put(&image_id, image, self.ttl)).await;
        info!("Stored image {image_id}");
        Ok(image_id)
    }
}
