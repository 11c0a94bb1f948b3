// src/services/storage.rs

use std::{collections::HashMap, sync::RwLock, time::Duration};

use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Region},
    error::DisplayErrorContext,
    presigning::PresigningConfig,
    primitives::ByteStream,
};

use crate::{config::S3Settings, error::AppError};

/// Object storage for chapter files.
///
/// Calls happen outside database transactions. Callers record their intent
/// (`upload_status`, `pending_object_deletions`) before touching the store.
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), AppError>;

    async fn delete_object(&self, key: &str) -> Result<(), AppError>;

    /// Short-lived GET URL for a stored object.
    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, AppError>;
}

/// S3 (or S3-compatible) backed storage.
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub async fn from_settings(settings: &S3Settings) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder
                .endpoint_url(endpoint.as_str())
                .force_path_style(true);
        }

        tracing::info!(bucket = %settings.bucket, region = %settings.region, "S3 storage configured");

        Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket.clone(),
        }
    }
}

#[async_trait]
impl FileStorage for S3Storage {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), AppError> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| AppError::internal("Failed to upload object", DisplayErrorContext(&e)))?;

        tracing::info!(key, size, "Object uploaded");
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), AppError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::internal("Failed to delete object", DisplayErrorContext(&e)))?;

        tracing::info!(key, "Object deleted");
        Ok(())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, AppError> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| AppError::internal("Invalid presigning config", e))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| AppError::internal("Failed to presign object", DisplayErrorContext(&e)))?;

        Ok(request.uri().to_string())
    }
}

/// Process-local storage used for development and tests.
#[derive(Default)]
pub struct MemoryStorage {
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .read()
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }
}

#[async_trait]
impl FileStorage for MemoryStorage {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), AppError> {
        let mut objects = self
            .objects
            .write()
            .map_err(|e| AppError::internal("Storage lock poisoned", e))?;
        objects.insert(key.to_string(), (body, content_type.to_string()));
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), AppError> {
        let mut objects = self
            .objects
            .write()
            .map_err(|e| AppError::internal("Storage lock poisoned", e))?;
        objects.remove(key);
        Ok(())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, AppError> {
        if !self.contains(key) {
            return Err(AppError::NotFound("File not found".to_string()));
        }
        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        Ok(format!("memory://{}?expires={}", key, expires))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage_lifecycle() {
        let storage = MemoryStorage::new();
        storage
            .put_object("topic-1/chapter-1.pdf", b"%PDF-1.4".to_vec(), "application/pdf")
            .await
            .unwrap();
        assert!(storage.contains("topic-1/chapter-1.pdf"));

        let url = storage
            .signed_url("topic-1/chapter-1.pdf", Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(url.starts_with("memory://topic-1/chapter-1.pdf?expires="));

        storage.delete_object("topic-1/chapter-1.pdf").await.unwrap();
        assert!(!storage.contains("topic-1/chapter-1.pdf"));
    }

    #[tokio::test]
    async fn test_memory_storage_signed_url_missing_object() {
        let storage = MemoryStorage::new();
        let result = storage.signed_url("nope.pdf", Duration::from_secs(60)).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
