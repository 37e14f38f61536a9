use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mode recorded in a per-user hide marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    ForMe,
}

impl DeleteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteMode::ForMe => "for_me",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedByEntry {
    pub user_id: Uuid,
    pub delete_mode: DeleteMode,
    pub deleted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoDelete {
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionMetadata {
    pub hard_deleted: bool,
    pub hard_deleted_at: Option<DateTime<Utc>>,
    pub deleted_for_everyone: bool,
    pub deleted_for_everyone_at: Option<DateTime<Utc>>,
    pub soft_deleted: bool,
    pub soft_deleted_at: Option<DateTime<Utc>>,
}

/// Blob release still owed for a hard-deleted message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRelease {
    pub media_ref: String,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    /// Retries used up; kept for operators, never retried again
    pub exhausted: bool,
}

/// Message record: immutable facts plus mutable deletion overlay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub media_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deletion: DeletionMetadata,
    pub deleted_by: Vec<DeletedByEntry>,
    pub auto_delete: Option<AutoDelete>,
    pub read_by: Vec<ReadReceipt>,
    pub media_release: Option<MediaRelease>,
}

/// Visibility of one message from one viewer's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Visible,
    HiddenForMe,
    HiddenForEveryone,
    SoftDeleted,
    HardDeleted,
    PendingAutoDelete(DateTime<Utc>),
}

impl Message {
    pub fn new(
        conversation_id: Uuid,
        sender_id: Uuid,
        content: impl Into<String>,
        media_ref: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content: content.into(),
            media_ref,
            created_at,
            deletion: DeletionMetadata::default(),
            deleted_by: Vec::new(),
            auto_delete: None,
            read_by: Vec::new(),
            media_release: None,
        }
    }

    pub fn is_deleted_for(&self, user_id: Uuid) -> bool {
        self.deleted_by.iter().any(|e| e.user_id == user_id)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.auto_delete
            .map(|a| a.expires_at <= now)
            .unwrap_or(false)
    }

    /// Hard-deleted, or past its disappearing deadline.
    pub fn is_gone(&self, now: DateTime<Utc>) -> bool {
        self.deletion.hard_deleted || self.is_expired(now)
    }

    pub fn is_read_by(&self, user_id: Uuid) -> bool {
        self.read_by.iter().any(|r| r.user_id == user_id)
    }

    /// Whether anyone other than the sender has read the message.
    pub fn seen_by_others(&self) -> bool {
        self.read_by.iter().any(|r| r.user_id != self.sender_id)
    }

    pub fn visibility_state(
        &self,
        viewer_id: Uuid,
        now: DateTime<Utc>,
        sender_exception: bool,
    ) -> VisibilityState {
        if self.is_gone(now) {
            return VisibilityState::HardDeleted;
        }
        if self.deletion.soft_deleted {
            return VisibilityState::SoftDeleted;
        }
        if self.deletion.deleted_for_everyone
            && !(sender_exception && self.sender_id == viewer_id)
        {
            return VisibilityState::HiddenForEveryone;
        }
        if self.is_deleted_for(viewer_id) {
            return VisibilityState::HiddenForMe;
        }
        match self.auto_delete {
            Some(a) => VisibilityState::PendingAutoDelete(a.expires_at),
            None => VisibilityState::Visible,
        }
    }

    /// The exclusion predicate applied on every read path.
    pub fn is_visible_to(&self, viewer_id: Uuid, now: DateTime<Utc>, sender_exception: bool) -> bool {
        matches!(
            self.visibility_state(viewer_id, now, sender_exception),
            VisibilityState::Visible | VisibilityState::PendingAutoDelete(_)
        )
    }

    /// Visible to a participant that has not hidden it privately; drives the
    /// shared conversation summary.
    pub fn is_publicly_visible(&self, now: DateTime<Utc>) -> bool {
        !self.is_gone(now) && !self.deletion.soft_deleted && !self.deletion.deleted_for_everyone
    }
}

/// Message as delivered to one viewer. Other users' hide markers never leave
/// the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub media_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Only ever true in the sender's own audit view
    pub deleted_for_everyone: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub read_by_viewer: bool,
}

impl MessageView {
    pub fn project(message: &Message, viewer_id: Uuid) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content.clone(),
            media_ref: message.media_ref.clone(),
            created_at: message.created_at,
            deleted_for_everyone: message.deletion.deleted_for_everyone
                && message.sender_id == viewer_id,
            expires_at: message.auto_delete.map(|a| a.expires_at),
            read_by_viewer: message.is_read_by(viewer_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn message(sender: Uuid) -> Message {
        Message::new(Uuid::new_v4(), sender, "hello", None, Utc::now())
    }

    #[test]
    fn test_hide_for_me_only_affects_that_user() {
        let sender = Uuid::new_v4();
        let other = Uuid::new_v4();
        let now = Utc::now();
        let mut m = message(sender);
        m.deleted_by.push(DeletedByEntry {
            user_id: other,
            delete_mode: DeleteMode::ForMe,
            deleted_at: now,
        });

        assert!(!m.is_visible_to(other, now, true));
        assert!(m.is_visible_to(sender, now, true));
        assert_eq!(m.visibility_state(other, now, true), VisibilityState::HiddenForMe);
    }

    #[test]
    fn test_sender_exception_for_recalled_message() {
        let sender = Uuid::new_v4();
        let other = Uuid::new_v4();
        let now = Utc::now();
        let mut m = message(sender);
        m.deletion.deleted_for_everyone = true;

        assert!(m.is_visible_to(sender, now, true));
        assert!(!m.is_visible_to(sender, now, false));
        assert!(!m.is_visible_to(other, now, true));
        assert!(MessageView::project(&m, sender).deleted_for_everyone);
        assert!(!MessageView::project(&m, other).deleted_for_everyone);
    }

    #[test]
    fn test_expired_message_is_gone_before_sweep() {
        let sender = Uuid::new_v4();
        let now = Utc::now();
        let mut m = message(sender);
        m.auto_delete = Some(AutoDelete {
            expires_at: now - Duration::seconds(1),
        });

        assert!(!m.deletion.hard_deleted);
        assert!(!m.is_visible_to(sender, now, true));
        assert_eq!(m.visibility_state(sender, now, true), VisibilityState::HardDeleted);
    }

    #[test]
    fn test_hard_delete_wins_over_everything() {
        let sender = Uuid::new_v4();
        let now = Utc::now();
        let mut m = message(sender);
        m.deletion.deleted_for_everyone = true;
        m.deletion.soft_deleted = true;
        m.deletion.hard_deleted = true;

        assert_eq!(m.visibility_state(sender, now, true), VisibilityState::HardDeleted);
        assert!(!m.is_publicly_visible(now));
    }

    #[test]
    fn test_seen_by_others_ignores_sender_receipt() {
        let sender = Uuid::new_v4();
        let mut m = message(sender);
        m.read_by.push(ReadReceipt {
            user_id: sender,
            read_at: Utc::now(),
        });
        assert!(!m.seen_by_others());

        m.read_by.push(ReadReceipt {
            user_id: Uuid::new_v4(),
            read_at: Utc::now(),
        });
        assert!(m.seen_by_others());
    }
}
