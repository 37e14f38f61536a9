//! Conversation creation and the compose-path hook that feeds new messages
//! into the store and ledger.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::Backends;
use crate::error::{AppError, AppResult};
use crate::models::{AutoDelete, Conversation, LastMessage, Message};
use crate::policy::{auto_delete_expiry, MAX_AUTO_DELETE_SECS};

#[derive(Debug, Clone, Deserialize)]
pub struct OpenConversation {
    pub participant_ids: Vec<Uuid>,
    #[serde(default)]
    pub is_group_chat: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestMessage {
    pub content: String,
    #[serde(default)]
    pub media_ref: Option<String>,
    /// Disappearing-message timer set at send time
    #[serde(default)]
    pub auto_delete_secs: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

pub struct ConversationService {
    backends: Backends,
}

impl ConversationService {
    pub fn new(backends: Backends) -> Self {
        Self { backends }
    }

    /// Create a conversation, or return the existing direct chat between the
    /// two users. Every other participant must accept messages from the actor.
    pub async fn open_conversation(&self, actor_id: Uuid, request: OpenConversation) -> AppResult<Conversation> {
        let mut others: Vec<Uuid> = Vec::with_capacity(request.participant_ids.len());
        for id in request.participant_ids {
            if id != actor_id && !others.contains(&id) {
                others.push(id);
            }
        }

        if others.is_empty() {
            return Err(AppError::BadRequest("at least one other participant is required".into()));
        }
        if !request.is_group_chat && others.len() != 1 {
            return Err(AppError::BadRequest("a direct chat has exactly two participants".into()));
        }

        if !request.is_group_chat {
            if let Some(existing) = self.backends.ledger.find_direct(actor_id, others[0]).await? {
                return Ok(existing);
            }
        }

        for other in &others {
            let decision = self.backends.permissions.can_message(actor_id, *other).await?;
            if !decision.allowed {
                return Err(AppError::AccessDenied(
                    decision
                        .reason
                        .unwrap_or_else(|| format!("not permitted to message {}", other)),
                ));
            }
        }

        let now = self.backends.clock.now();
        let conversation = if request.is_group_chat {
            Conversation::group(actor_id, others, now)
        } else {
            Conversation::direct(actor_id, others[0], now)
        };
        self.backends.ledger.create(conversation.clone()).await?;

        tracing::info!(
            conversation_id = %conversation.id,
            actor_id = %actor_id,
            participants = conversation.participants.len(),
            is_group_chat = conversation.is_group_chat,
            "conversation opened"
        );

        Ok(conversation)
    }

    /// Store a message produced by the compose path and advance the ledger.
    pub async fn ingest_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        request: IngestMessage,
    ) -> AppResult<Message> {
        let conversation = self
            .backends
            .ledger
            .get(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("conversation {}", conversation_id)))?;
        if !conversation.is_participant(sender_id) {
            return Err(AppError::AccessDenied(
                "sender is not a participant of the conversation".into(),
            ));
        }
        if !conversation.is_active {
            return Err(AppError::BadRequest("conversation is inactive".into()));
        }

        let now = self.backends.clock.now();
        let created_at = request.created_at.unwrap_or(now);
        let mut message = Message::new(
            conversation_id,
            sender_id,
            request.content,
            request.media_ref,
            created_at,
        );
        if let Some(secs) = request.auto_delete_secs {
            let expires_at = auto_delete_expiry(created_at, secs).ok_or_else(|| {
                AppError::BadRequest(format!(
                    "auto-delete duration must be between 1 and {} seconds",
                    MAX_AUTO_DELETE_SECS
                ))
            })?;
            message.auto_delete = Some(AutoDelete { expires_at });
        }

        self.backends.store.insert(message.clone()).await?;
        self.backends
            .ledger
            .record_new_message(conversation_id, &LastMessage::from(&message), sender_id)
            .await?;

        Ok(message)
    }
}
