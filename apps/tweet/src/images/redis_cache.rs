use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{ImageCache, ImageError};

/// Image cache in Redis under `images:<id>`, each entry expiring after its TTL.
///
/// Holds one multiplexed connection for the whole process; the manager reconnects on its own
/// after a broken connection, and each call works on a cheap clone of it.
#[derive(Clone)]
pub struct RedisImageCache {
    conn: ConnectionManager,
}

impl RedisImageCache {
    pub async fn connect(client: redis::Client) -> redis::RedisResult<Self> {
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

fn cache_key(image_id: &str) -> String {
    format!("images:{image_id}")
}

fn cache_error(e: redis::RedisError) -> ImageError {
    ImageError::Cache(e.to_string())
}

#[async_trait]
impl ImageCache for RedisImageCache {
    async fn get(&self, image_id: &str) -> Result<Option<Bytes>, ImageError> {
        let mut conn = self.conn.clone();
        let image: Option<Vec<u8>> = conn.get(cache_key(image_id)).await.map_err(cache_error)?;
        Ok(image.map(Bytes::from))
    }

    async fn put(&self, image_id: &str, image: Bytes, ttl: Duration) -> Result<(), ImageError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(cache_key(image_id), image.to_vec(), ttl.as_secs().max(1))
            .await
            .map_err(cache_error)
    }

    async fn exists(&self, image_id: &str) -> Result<bool, ImageError> {
        let mut conn = self.conn.clone();
        conn.exists(cache_key(image_id)).await.map_err(cache_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_is_namespaced() {
        assert_eq!(cache_key("abc"), "images:abc");
    }

    #[tokio::test]
    async fn test_connect_opens_connection_up_front() {
        // nothing listens on port 1, so the shared connection cannot be established
        let client = redis::Client::open("redis://127.0.0.1:1/").unwrap();
        assert!(RedisImageCache::connect(client).await.is_err());
    }
}
