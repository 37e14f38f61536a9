//! External collaborators consumed by the deletion core
//!
//! Each seam is a trait with a production implementation (S3, Redis, HTTP)
//! and an in-process one used when the backing service is not configured.

pub mod blob;
pub mod notifier;
pub mod permission;
pub mod presence;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::RealtimeEvent;

pub use blob::{LocalBlobStore, S3BlobStore};
pub use notifier::{InProcessNotifier, NoopNotifier, RedisNotifier};
pub use permission::{AllowAllPermissions, HttpPermissionService};
pub use presence::{RedisPresence, StaticPresence};

/// Media object storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Release a stored object. Releasing a missing object succeeds.
    async fn release_media(&self, media_ref: &str) -> AppResult<()>;

    /// Store bytes and return the new media reference.
    async fn upload_media(&self, bytes: Vec<u8>, content_type: &str) -> AppResult<String>;
}

/// Real-time fan-out
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic: &str, event: &RealtimeEvent) -> AppResult<()>;
}

#[async_trait]
pub trait PresenceService: Send + Sync {
    async fn is_online(&self, user_id: Uuid) -> AppResult<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDecision {
    pub allowed: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Follow/block graph owner
#[async_trait]
pub trait PermissionService: Send + Sync {
    async fn can_message(&self, from: Uuid, to: Uuid) -> AppResult<PermissionDecision>;
}
