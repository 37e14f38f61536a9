//! Conversation ledger
//!
//! Participants, admin roles, the denormalized last-message pointer and the
//! per-participant unread counters. The deletion core only reads the counters;
//! the compose and read-receipt paths mutate them.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Conversation, LastMessage};

pub use memory::InMemoryLedger;
pub use postgres::PgConversationLedger;

/// Decide whether a recomputed pointer may replace the current one.
///
/// A pointer may move backwards in time only when the message it points at
/// was itself just invalidated; otherwise a newer concurrent write wins.
pub fn may_replace(
    current: Option<&LastMessage>,
    candidate: Option<&LastMessage>,
    invalidated: &[Uuid],
) -> bool {
    let Some(current) = current else {
        return candidate.is_some();
    };
    if invalidated.contains(&current.message_id) {
        return candidate != Some(current);
    }
    match candidate {
        Some(candidate) => candidate != current && candidate.time >= current.time,
        None => false,
    }
}

#[async_trait]
pub trait ConversationLedger: Send + Sync {
    async fn create(&self, conversation: Conversation) -> AppResult<()>;

    async fn get(&self, id: Uuid) -> AppResult<Option<Conversation>>;

    /// Active 1:1 conversation between exactly these two users.
    async fn find_direct(&self, a: Uuid, b: Uuid) -> AppResult<Option<Conversation>>;

    /// Guarded pointer write. Returns true when the pointer changed.
    async fn replace_last_message(
        &self,
        id: Uuid,
        candidate: Option<LastMessage>,
        invalidated: &[Uuid],
    ) -> AppResult<bool>;

    /// Compose path: advance the pointer if newer and bump everyone else's unread counter.
    async fn record_new_message(&self, id: Uuid, message: &LastMessage, sender_id: Uuid) -> AppResult<()>;

    /// Read-receipt path; saturates at zero.
    async fn decrement_unread(&self, id: Uuid, user_id: Uuid, by: i64) -> AppResult<()>;
}
