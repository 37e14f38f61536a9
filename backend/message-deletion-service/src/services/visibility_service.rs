//! Read paths: visible message pages, per-viewer conversation summaries and
//! read receipts. Every query goes through [`VisibilityQuery`] so page,
//! count and summary agree on what a viewer can see.

use serde::Serialize;
use uuid::Uuid;

use super::Backends;
use crate::config::DeletionPolicyConfig;
use crate::error::{AppError, AppResult};
use crate::models::{Conversation, ConversationSummary, LastMessage, MessageView};
use crate::store::VisibilityQuery;

#[derive(Debug, Clone, Serialize)]
pub struct MessagePage {
    /// Chronological order
    pub messages: Vec<MessageView>,
    pub total_visible_count: u64,
    pub page: u32,
    pub limit: u32,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MarkReadOutcome {
    pub read_count: usize,
}

pub struct VisibilityService {
    backends: Backends,
    policy: DeletionPolicyConfig,
}

impl VisibilityService {
    pub fn new(backends: Backends, policy: DeletionPolicyConfig) -> Self {
        Self { backends, policy }
    }

    async fn participant_view(&self, conversation_id: Uuid, viewer_id: Uuid) -> AppResult<Conversation> {
        let conversation = self
            .backends
            .ledger
            .get(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("conversation {}", conversation_id)))?;

        if !conversation.is_participant(viewer_id) {
            return Err(AppError::AccessDenied(
                "viewer is not a participant of the conversation".into(),
            ));
        }
        Ok(conversation)
    }

    fn query(&self, conversation_id: Uuid, viewer_id: Uuid) -> VisibilityQuery {
        VisibilityQuery::for_user(
            conversation_id,
            viewer_id,
            self.backends.clock.now(),
            self.policy.sender_sees_recalled,
        )
    }

    /// Page numbering starts at 1; `limit` is clamped to `1..=max_page_size`.
    pub async fn list_visible_messages(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> AppResult<MessagePage> {
        self.participant_view(conversation_id, viewer_id).await?;

        let page = page.unwrap_or(1).max(1);
        let limit = limit
            .unwrap_or(self.policy.default_page_size)
            .clamp(1, self.policy.max_page_size.max(1));
        let offset = u64::from(page - 1) * u64::from(limit);

        // One instant for both queries so the count matches the page.
        let query = self.query(conversation_id, viewer_id);
        let total_visible_count = self.backends.store.count_visible(&query).await?;
        let mut rows = self
            .backends
            .store
            .list_visible(&query, offset, u64::from(limit))
            .await?;
        rows.reverse();

        Ok(MessagePage {
            has_more: offset + (rows.len() as u64) < total_visible_count,
            messages: rows
                .iter()
                .map(|m| MessageView::project(m, viewer_id))
                .collect(),
            total_visible_count,
            page,
            limit,
        })
    }

    /// Conversation as this viewer sees it: last message and unread count are
    /// recomputed against the viewer's visibility, not read from the cache.
    pub async fn conversation_summary(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
    ) -> AppResult<ConversationSummary> {
        let conversation = self.participant_view(conversation_id, viewer_id).await?;
        let query = self.query(conversation_id, viewer_id);

        let last_message = self
            .backends
            .store
            .latest_visible(&query)
            .await?
            .as_ref()
            .map(LastMessage::from);
        let visible_unread = self.backends.store.count_unread_visible(&query).await?;
        let counter = conversation.unread_for(viewer_id).max(0);

        Ok(ConversationSummary {
            conversation_id,
            participants: conversation.participants,
            is_group_chat: conversation.is_group_chat,
            last_message,
            unread_count: counter.min(visible_unread as i64),
        })
    }

    /// Record read receipts for messages the viewer can see and did not send.
    pub async fn mark_read(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
        message_ids: &[Uuid],
    ) -> AppResult<MarkReadOutcome> {
        self.participant_view(conversation_id, viewer_id).await?;
        let query = self.query(conversation_id, viewer_id);
        let messages = self
            .backends
            .store
            .get_many(conversation_id, message_ids)
            .await?;

        let mut read_count = 0;
        for message in messages
            .iter()
            .filter(|m| m.sender_id != viewer_id && query.matches(m))
        {
            if self
                .backends
                .store
                .record_read(message.id, viewer_id, query.now)
                .await?
            {
                read_count += 1;
            }
        }

        if read_count > 0 {
            self.backends
                .ledger
                .decrement_unread(conversation_id, viewer_id, read_count as i64)
                .await?;
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            viewer_id = %viewer_id,
            read_count,
            "read receipts recorded"
        );

        Ok(MarkReadOutcome { read_count })
    }
}
