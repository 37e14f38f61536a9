use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::BlobStore;
use crate::config::S3Config;
use crate::error::{AppError, AppResult};

fn new_media_key() -> String {
    format!("media/{}", Uuid::new_v4())
}

#[derive(Clone)]
pub struct S3BlobStore {
    client: Arc<Client>,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: Arc<Client>, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Default credential chain plus the configured region and optional
    /// S3-compatible endpoint (MinIO in local setups).
    pub async fn from_config(config: &S3Config) -> Self {
        use aws_sdk_s3::config::Region;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let aws_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .force_path_style(config.endpoint.is_some())
            .build();

        Self::new(Arc::new(Client::from_conf(s3_config)), config.bucket.clone())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn release_media(&self, media_ref: &str) -> AppResult<()> {
        // DeleteObject succeeds for missing keys.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(media_ref)
            .send()
            .await
            .map_err(|e| AppError::MediaRelease(format!("{}: {}", media_ref, e)))?;

        Ok(())
    }

    async fn upload_media(&self, bytes: Vec<u8>, content_type: &str) -> AppResult<String> {
        let key = new_media_key();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| AppError::StoreUnavailable(format!("s3 upload failed: {}", e)))?;

        Ok(key)
    }
}

/// In-process object store with failure injection for release retries.
#[derive(Debug, Default)]
pub struct LocalBlobStore {
    objects: DashMap<String, Vec<u8>>,
    failures_remaining: AtomicU32,
}

impl LocalBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` releases fail.
    pub fn fail_next_releases(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn contains(&self, media_ref: &str) -> bool {
        self.objects.contains_key(media_ref)
    }

    pub fn insert(&self, media_ref: impl Into<String>, bytes: Vec<u8>) {
        self.objects.insert(media_ref.into(), bytes);
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn release_media(&self, media_ref: &str) -> AppResult<()> {
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::MediaRelease(format!("{}: injected failure", media_ref)));
        }
        self.objects.remove(media_ref);
        Ok(())
    }

    async fn upload_media(&self, bytes: Vec<u8>, _content_type: &str) -> AppResult<String> {
        let key = new_media_key();
        self.objects.insert(key.clone(), bytes);
        Ok(key)
    }
}
