use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;

use super::{ImageError, ImageStore};

/// Durable image storage in an S3 (or MinIO) bucket under `images/<id>`.
#[derive(Clone)]
pub struct S3ImageStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ImageStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

fn object_key(image_id: &str) -> String {
    format!("images/{image_id}")
}

#[async_trait]
impl ImageStore for S3ImageStore {
    async fn get(&self, image_id: &str) -> Result<Option<Bytes>, ImageError> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(object_key(image_id))
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let e = e.into_service_error();
                if e.is_no_such_key() {
                    return Ok(None);
                }
                return Err(ImageError::Store(format!("S3 download failed: {e}")));
            }
        };

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| ImageError::Store(format!("S3 body read failed: {e}")))?;
        Ok(Some(body.into_bytes()))
    }

    async fn put(&self, image_id: &str, image: Bytes) -> Result<(), ImageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(object_key(image_id))
            .body(ByteStream::from(image))
            .send()
            .await
            .map_err(|e| ImageError::Store(format!("S3 upload failed: {e}")))?;
        Ok(())
    }

    async fn exists(&self, image_id: &str) -> Result<bool, ImageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(object_key(image_id))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let e = e.into_service_error();
                if e.is_not_found() {
                    Ok(false)
                } else {
                    Err(ImageError::Store(format!("S3 lookup failed: {e}")))
                }
            }
        }
    }
}
