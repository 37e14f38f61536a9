use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::message::Message;

/// Conversation ledger record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participants: Vec<Uuid>,
    pub is_group_chat: bool,
    /// Primary admin (group chats only)
    pub group_admin: Option<Uuid>,
    /// Secondary admins (group chats only)
    pub group_admins: Vec<Uuid>,
    pub last_message_id: Option<Uuid>,
    pub last_message_content: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread_counts: HashMap<Uuid, i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn direct(a: Uuid, b: Uuid, created_at: DateTime<Utc>) -> Self {
        Self::build(vec![a, b], false, None, created_at)
    }

    pub fn group(admin: Uuid, members: Vec<Uuid>, created_at: DateTime<Utc>) -> Self {
        let mut participants = vec![admin];
        for m in members {
            if !participants.contains(&m) {
                participants.push(m);
            }
        }
        Self::build(participants, true, Some(admin), created_at)
    }

    fn build(
        participants: Vec<Uuid>,
        is_group_chat: bool,
        group_admin: Option<Uuid>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let unread_counts = participants.iter().map(|p| (*p, 0)).collect();
        Self {
            id: Uuid::new_v4(),
            participants,
            is_group_chat,
            group_admin,
            group_admins: Vec::new(),
            last_message_id: None,
            last_message_content: None,
            last_message_time: None,
            unread_counts,
            is_active: true,
            created_at,
        }
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }

    /// Main or secondary admin of a group chat. Direct chats have no admins.
    pub fn is_admin(&self, user_id: Uuid) -> bool {
        self.is_group_chat
            && (self.group_admin == Some(user_id) || self.group_admins.contains(&user_id))
    }

    pub fn unread_for(&self, user_id: Uuid) -> i64 {
        self.unread_counts.get(&user_id).copied().unwrap_or(0)
    }

    pub fn other_participants(&self, user_id: Uuid) -> impl Iterator<Item = Uuid> + '_ {
        self.participants.iter().copied().filter(move |p| *p != user_id)
    }

    pub fn last_message(&self) -> Option<LastMessage> {
        match (self.last_message_id, self.last_message_time) {
            (Some(message_id), Some(time)) => Some(LastMessage {
                message_id,
                content: self.last_message_content.clone().unwrap_or_default(),
                time,
            }),
            _ => None,
        }
    }
}

/// Denormalized last-message pointer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub message_id: Uuid,
    pub content: String,
    pub time: DateTime<Utc>,
}

impl From<&Message> for LastMessage {
    fn from(m: &Message) -> Self {
        Self {
            message_id: m.id,
            content: m.content.clone(),
            time: m.created_at,
        }
    }
}

/// Per-viewer listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: Uuid,
    pub participants: Vec<Uuid>,
    pub is_group_chat: bool,
    pub last_message: Option<LastMessage>,
    pub unread_count: i64,
}
