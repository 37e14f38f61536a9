//! Deletion policy engine
//!
//! Pure decision logic: given an operation, the acting user, the conversation
//! and a message, decide whether the operation is permitted and which state
//! transition it resolves to. Nothing in here touches storage.
//!
//! Strength order of the shared states is
//! `HardDeleted > SoftDeleted > HiddenForEveryone > Visible`. A decision never
//! resolves to a transition that would weaken a message; operations aimed at a
//! message that already sits at or above their target state resolve to
//! [`Decision::AlreadySatisfied`] so retries stay idempotent.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Conversation, Message};

/// Longest disappearing-message timer accepted (one year).
pub const MAX_AUTO_DELETE_SECS: i64 = 365 * 24 * 60 * 60;

/// Expiry instant of a timer started at `from`. None when the duration is
/// not positive or exceeds [`MAX_AUTO_DELETE_SECS`].
pub fn auto_delete_expiry(from: DateTime<Utc>, duration_secs: i64) -> Option<DateTime<Utc>> {
    if !(1..=MAX_AUTO_DELETE_SECS).contains(&duration_secs) {
        return None;
    }
    Duration::try_seconds(duration_secs).and_then(|d| from.checked_add_signed(d))
}

/// State change applied to one message record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    HideForMe,
    DeleteForEveryone,
    SoftDelete,
    HardDelete,
    SetAutoDelete { expires_at: DateTime<Utc> },
    ReleaseMedia,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::HideForMe => "hide_for_me",
            Transition::DeleteForEveryone => "delete_for_everyone",
            Transition::SoftDelete => "soft_delete",
            Transition::HardDelete => "hard_delete",
            Transition::SetAutoDelete { .. } => "set_auto_delete",
            Transition::ReleaseMedia => "release_media",
        }
    }

    /// Changes what other participants see, so it fans out and may be queued.
    pub fn is_shared(&self) -> bool {
        !matches!(self, Transition::HideForMe)
    }

    /// Can make the conversation's last message stale.
    pub fn affects_summary(&self) -> bool {
        matches!(
            self,
            Transition::DeleteForEveryone | Transition::SoftDelete | Transition::HardDelete
        )
    }
}

/// Operation requested against one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOp {
    DeleteForMe,
    DeleteForEveryone,
    HardDelete,
    SoftDelete,
    SetAutoDelete { duration_secs: i64 },
    AdminDelete,
    UnsentDelete,
    MediaDelete,
}

impl PolicyOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyOp::DeleteForMe => "delete_for_me",
            PolicyOp::DeleteForEveryone => "delete_for_everyone",
            PolicyOp::HardDelete => "hard_delete",
            PolicyOp::SoftDelete => "soft_delete",
            PolicyOp::SetAutoDelete { .. } => "auto_delete",
            PolicyOp::AdminDelete => "admin_delete",
            PolicyOp::UnsentDelete => "unsent_delete",
            PolicyOp::MediaDelete => "media_delete",
        }
    }
}

/// Modes accepted by bulk-delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkMode {
    ForMe,
    ForEveryone,
    Hard,
    Soft,
}

impl BulkMode {
    pub fn op(&self) -> PolicyOp {
        match self {
            BulkMode::ForMe => PolicyOp::DeleteForMe,
            BulkMode::ForEveryone => PolicyOp::DeleteForEveryone,
            BulkMode::Hard => PolicyOp::HardDelete,
            BulkMode::Soft => PolicyOp::SoftDelete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Apply(Transition),
    AlreadySatisfied,
}

/// Why a single message was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Denial {
    Forbidden { detail: String },
    WindowExpired { created_at: DateTime<Utc>, window_secs: i64 },
    AlreadySeen,
    NoMedia,
    InvalidDuration,
    NotFound,
}

impl Denial {
    fn forbidden(detail: &str) -> Self {
        Denial::Forbidden {
            detail: detail.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Denial::Forbidden { .. } => "forbidden",
            Denial::WindowExpired { .. } => "window_expired",
            Denial::AlreadySeen => "already_seen",
            Denial::NoMedia => "no_media",
            Denial::InvalidDuration => "invalid_duration",
            Denial::NotFound => "not_found",
        }
    }
}

impl From<Denial> for AppError {
    fn from(denial: Denial) -> Self {
        match denial {
            Denial::Forbidden { detail } => AppError::AccessDenied(detail),
            Denial::WindowExpired {
                created_at,
                window_secs,
            } => AppError::WindowExpired {
                created_at,
                window_secs,
            },
            Denial::AlreadySeen => {
                AppError::BadRequest("message has already been seen by a recipient".into())
            }
            Denial::NoMedia => AppError::BadRequest("message has no media attached".into()),
            Denial::InvalidDuration => {
                AppError::BadRequest(format!(
                    "auto-delete duration must be between 1 and {} seconds",
                    MAX_AUTO_DELETE_SECS
                ))
            }
            Denial::NotFound => AppError::NotFound("message".into()),
        }
    }
}

/// Inputs shared by every decision within one request
#[derive(Debug, Clone)]
pub struct PolicyContext<'a> {
    pub conversation: &'a Conversation,
    pub actor_id: Uuid,
    pub now: DateTime<Utc>,
    pub window_secs: i64,
}

impl<'a> PolicyContext<'a> {
    fn is_sender(&self, message: &Message) -> bool {
        message.sender_id == self.actor_id
    }

    fn is_admin(&self) -> bool {
        self.conversation.is_admin(self.actor_id)
    }

    /// Owner, or a main/secondary admin of a group conversation.
    fn can_moderate(&self, message: &Message) -> bool {
        self.is_sender(message) || self.is_admin()
    }

    fn within_window(&self, message: &Message) -> bool {
        self.now - message.created_at <= Duration::seconds(self.window_secs)
    }
}

/// Conversation-level gate evaluated once per request.
pub fn authorize_request(op: PolicyOp, conversation: &Conversation, actor_id: Uuid) -> Result<(), Denial> {
    if !conversation.is_participant(actor_id) {
        return Err(Denial::forbidden("actor is not a participant of the conversation"));
    }
    if op == PolicyOp::AdminDelete {
        if !conversation.is_group_chat {
            return Err(Denial::forbidden("admin delete is only available in group chats"));
        }
        if !conversation.is_admin(actor_id) {
            return Err(Denial::forbidden("admin delete requires a group admin"));
        }
    }
    Ok(())
}

/// Decide the transition for one message.
pub fn authorize(op: PolicyOp, ctx: &PolicyContext<'_>, message: &Message) -> Result<Decision, Denial> {
    if message.conversation_id != ctx.conversation.id {
        return Err(Denial::NotFound);
    }

    // Gone for everybody: every destructive intent is already met.
    if message.is_gone(ctx.now) {
        return Ok(Decision::AlreadySatisfied);
    }

    let d = &message.deletion;
    match op {
        PolicyOp::DeleteForMe => {
            if message.is_deleted_for(ctx.actor_id) || d.soft_deleted {
                return Ok(Decision::AlreadySatisfied);
            }
            if d.deleted_for_everyone && !ctx.is_sender(message) {
                return Ok(Decision::AlreadySatisfied);
            }
            Ok(Decision::Apply(Transition::HideForMe))
        }
        PolicyOp::DeleteForEveryone => {
            if !ctx.can_moderate(message) {
                return Err(Denial::forbidden(
                    "only the sender or a group admin may delete for everyone",
                ));
            }
            if d.deleted_for_everyone || d.soft_deleted {
                return Ok(Decision::AlreadySatisfied);
            }
            if !ctx.is_admin() && !ctx.within_window(message) {
                return Err(Denial::WindowExpired {
                    created_at: message.created_at,
                    window_secs: ctx.window_secs,
                });
            }
            Ok(Decision::Apply(Transition::DeleteForEveryone))
        }
        PolicyOp::AdminDelete => {
            if !ctx.is_admin() {
                return Err(Denial::forbidden("admin delete requires a group admin"));
            }
            if d.deleted_for_everyone || d.soft_deleted {
                return Ok(Decision::AlreadySatisfied);
            }
            Ok(Decision::Apply(Transition::DeleteForEveryone))
        }
        PolicyOp::HardDelete => {
            if !ctx.can_moderate(message) {
                return Err(Denial::forbidden(
                    "only the sender or a group admin may hard delete",
                ));
            }
            Ok(Decision::Apply(Transition::HardDelete))
        }
        PolicyOp::SoftDelete => {
            if !ctx.is_sender(message) {
                return Err(Denial::forbidden("only the sender may soft delete"));
            }
            if d.soft_deleted {
                return Ok(Decision::AlreadySatisfied);
            }
            Ok(Decision::Apply(Transition::SoftDelete))
        }
        PolicyOp::SetAutoDelete { duration_secs } => {
            if duration_secs <= 0 {
                return Err(Denial::InvalidDuration);
            }
            if !ctx.is_sender(message) {
                return Err(Denial::forbidden(
                    "auto-delete can only be set on your own messages",
                ));
            }
            let Some(expires_at) = auto_delete_expiry(ctx.now, duration_secs) else {
                return Err(Denial::InvalidDuration);
            };
            // Timers only ever shorten.
            if let Some(existing) = message.auto_delete {
                if existing.expires_at <= expires_at {
                    return Ok(Decision::AlreadySatisfied);
                }
            }
            Ok(Decision::Apply(Transition::SetAutoDelete { expires_at }))
        }
        PolicyOp::UnsentDelete => {
            if !ctx.is_sender(message) {
                return Err(Denial::forbidden("only the sender may delete unsent messages"));
            }
            if d.deleted_for_everyone || d.soft_deleted {
                return Ok(Decision::AlreadySatisfied);
            }
            if message.seen_by_others() {
                return Err(Denial::AlreadySeen);
            }
            Ok(Decision::Apply(Transition::DeleteForEveryone))
        }
        PolicyOp::MediaDelete => {
            if !ctx.is_sender(message) {
                return Err(Denial::forbidden("only the sender may delete attached media"));
            }
            if message.media_ref.is_none() {
                return Err(Denial::NoMedia);
            }
            Ok(Decision::Apply(Transition::ReleaseMedia))
        }
    }
}
