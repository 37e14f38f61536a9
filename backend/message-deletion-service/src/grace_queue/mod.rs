//! Grace / deferred delete queue
//!
//! Per-recipient FIFO of shared transitions that an offline participant has
//! not yet received. A drain reads a snapshot, replays it and then removes
//! exactly the entries it read, so anything enqueued meanwhile survives.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::policy::Transition;

pub use self::memory::InMemoryGraceQueue;
pub use self::redis::RedisGraceQueue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraceEntry {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub recipient_id: Uuid,
    pub actor_id: Uuid,
    pub message_ids: Vec<Uuid>,
    pub transition: Transition,
    pub enqueued_at: DateTime<Utc>,
}

impl GraceEntry {
    pub fn new(
        conversation_id: Uuid,
        recipient_id: Uuid,
        actor_id: Uuid,
        message_ids: Vec<Uuid>,
        transition: Transition,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            recipient_id,
            actor_id,
            message_ids,
            transition,
            enqueued_at,
        }
    }
}

/// Snapshot of a recipient's queue head
#[derive(Debug, Clone, Default)]
pub struct PendingBatch {
    /// Decodable entries in enqueue order
    pub entries: Vec<GraceEntry>,
    /// Raw slots read, including undecodable ones. Pass this to `acknowledge`.
    pub len: usize,
}

#[async_trait]
pub trait GraceQueue: Send + Sync {
    async fn enqueue(&self, entry: GraceEntry) -> AppResult<()>;

    /// Oldest `limit` entries for `recipient_id`, without removing them.
    async fn pending(&self, recipient_id: Uuid, limit: usize) -> AppResult<PendingBatch>;

    /// Remove the first `count` entries.
    async fn acknowledge(&self, recipient_id: Uuid, count: usize) -> AppResult<()>;
}
