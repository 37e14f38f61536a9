//! Message store
//!
//! Every mutating method is a single atomic field-level primitive (add to set,
//! set if unset). Callers never read a whole record, modify it and write it
//! back, so concurrent deleters on the same message cannot lose each other's
//! updates.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{MediaRelease, Message};

pub use memory::InMemoryMessageStore;
pub use postgres::PgMessageStore;

/// Whose view a read path computes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    /// A specific participant; their private hide markers apply.
    User(Uuid),
    /// Any participant without private hide markers. Used for the shared
    /// conversation summary.
    Public,
}

/// Shared exclusion predicate for page, count and summary queries
#[derive(Debug, Clone, Copy)]
pub struct VisibilityQuery {
    pub conversation_id: Uuid,
    pub viewer: Viewer,
    pub now: DateTime<Utc>,
    pub sender_exception: bool,
}

impl VisibilityQuery {
    pub fn for_user(
        conversation_id: Uuid,
        viewer_id: Uuid,
        now: DateTime<Utc>,
        sender_exception: bool,
    ) -> Self {
        Self {
            conversation_id,
            viewer: Viewer::User(viewer_id),
            now,
            sender_exception,
        }
    }

    pub fn public(conversation_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            conversation_id,
            viewer: Viewer::Public,
            now,
            sender_exception: false,
        }
    }

    pub fn viewer_id(&self) -> Option<Uuid> {
        match self.viewer {
            Viewer::User(id) => Some(id),
            Viewer::Public => None,
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        if message.conversation_id != self.conversation_id {
            return false;
        }
        match self.viewer {
            Viewer::User(viewer_id) => message.is_visible_to(viewer_id, self.now, self.sender_exception),
            Viewer::Public => message.is_publicly_visible(self.now),
        }
    }
}

/// Result of the set-if-unset hard delete primitive
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HardDeleteOutcome {
    /// False when another writer got there first
    pub applied: bool,
    /// Media detached by this call; the caller owns its release
    pub media_ref: Option<String>,
}

/// Operator cleanup selection
#[derive(Debug, Clone, Copy)]
pub struct PurgeCriteria {
    pub soft_deleted_before: DateTime<Utc>,
    /// Also drop hard-deleted rows with no outstanding media release
    pub include_hard_deleted: bool,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Compose path entry point.
    async fn insert(&self, message: Message) -> AppResult<()>;

    async fn get(&self, id: Uuid) -> AppResult<Option<Message>>;

    /// Messages of one conversation among `ids`. Unknown ids are omitted.
    async fn get_many(&self, conversation_id: Uuid, ids: &[Uuid]) -> AppResult<Vec<Message>>;

    /// Visible messages, newest first.
    async fn list_visible(&self, query: &VisibilityQuery, offset: u64, limit: u64) -> AppResult<Vec<Message>>;

    async fn count_visible(&self, query: &VisibilityQuery) -> AppResult<u64>;

    async fn latest_visible(&self, query: &VisibilityQuery) -> AppResult<Option<Message>>;

    /// Visible messages not sent by and not yet read by the query's viewer.
    async fn count_unread_visible(&self, query: &VisibilityQuery) -> AppResult<u64>;

    /// Add-to-set on `deleted_by`. Returns false if the user already had an entry.
    async fn add_deleted_for(&self, id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> AppResult<bool>;

    async fn mark_deleted_for_everyone(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<bool>;

    async fn mark_soft_deleted(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<bool>;

    /// Set-if-unset; detaches the media reference atomically.
    async fn mark_hard_deleted(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<HardDeleteOutcome>;

    /// Applies only when no earlier deadline exists.
    async fn set_auto_delete(&self, id: Uuid, expires_at: DateTime<Utc>) -> AppResult<bool>;

    /// Detach the media reference of a live message.
    async fn take_media_ref(&self, id: Uuid) -> AppResult<Option<String>>;

    async fn record_read(&self, id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> AppResult<bool>;

    /// Expired disappearing messages not yet hard-deleted.
    async fn find_expired(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Uuid>>;

    async fn save_media_release(&self, id: Uuid, release: MediaRelease) -> AppResult<()>;

    /// Pending, non-exhausted releases whose next attempt is due.
    async fn due_media_releases(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<(Uuid, MediaRelease)>>;

    async fn clear_media_release(&self, id: Uuid) -> AppResult<()>;

    /// Physically remove rows. Returns the number removed.
    async fn purge(&self, criteria: &PurgeCriteria) -> AppResult<u64>;
}
