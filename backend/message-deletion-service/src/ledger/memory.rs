use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{may_replace, ConversationLedger};
use crate::error::AppResult;
use crate::models::{Conversation, LastMessage};

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    conversations: DashMap<Uuid, Conversation>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_pointer(conv: &mut Conversation, pointer: Option<LastMessage>) {
        match pointer {
            Some(p) => {
                conv.last_message_id = Some(p.message_id);
                conv.last_message_content = Some(p.content);
                conv.last_message_time = Some(p.time);
            }
            None => {
                conv.last_message_id = None;
                conv.last_message_content = None;
                conv.last_message_time = None;
            }
        }
    }
}

#[async_trait]
impl ConversationLedger for InMemoryLedger {
    async fn create(&self, conversation: Conversation) -> AppResult<()> {
        self.conversations
            .entry(conversation.id)
            .or_insert(conversation);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        Ok(self.conversations.get(&id).map(|c| c.value().clone()))
    }

    async fn find_direct(&self, a: Uuid, b: Uuid) -> AppResult<Option<Conversation>> {
        Ok(self
            .conversations
            .iter()
            .find(|c| {
                let c = c.value();
                c.is_active
                    && !c.is_group_chat
                    && c.participants.len() == 2
                    && c.is_participant(a)
                    && c.is_participant(b)
            })
            .map(|c| c.value().clone()))
    }

    async fn replace_last_message(
        &self,
        id: Uuid,
        candidate: Option<LastMessage>,
        invalidated: &[Uuid],
    ) -> AppResult<bool> {
        let Some(mut conv) = self.conversations.get_mut(&id) else {
            return Ok(false);
        };
        let current = conv.last_message();
        if !may_replace(current.as_ref(), candidate.as_ref(), invalidated) {
            return Ok(false);
        }
        Self::set_pointer(&mut conv, candidate);
        Ok(true)
    }

    async fn record_new_message(&self, id: Uuid, message: &LastMessage, sender_id: Uuid) -> AppResult<()> {
        if let Some(mut conv) = self.conversations.get_mut(&id) {
            let newer = conv
                .last_message_time
                .map(|t| t <= message.time)
                .unwrap_or(true);
            if newer {
                Self::set_pointer(&mut conv, Some(message.clone()));
            }
            let others: Vec<Uuid> = conv.other_participants(sender_id).collect();
            for p in others {
                *conv.unread_counts.entry(p).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    async fn decrement_unread(&self, id: Uuid, user_id: Uuid, by: i64) -> AppResult<()> {
        if let Some(mut conv) = self.conversations.get_mut(&id) {
            let counter = conv.unread_counts.entry(user_id).or_insert(0);
            *counter = (*counter - by).max(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_unread_counters_follow_compose_and_reads() {
        let ledger = InMemoryLedger::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let conv = Conversation::direct(a, b, Utc::now());
        let id = conv.id;
        ledger.create(conv).await.unwrap();

        let msg = LastMessage {
            message_id: Uuid::new_v4(),
            content: "hello".into(),
            time: Utc::now(),
        };
        ledger.record_new_message(id, &msg, a).await.unwrap();
        ledger.record_new_message(id, &msg, a).await.unwrap();
        ledger.decrement_unread(id, b, 5).await.unwrap();

        let conv = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(conv.unread_for(a), 0);
        assert_eq!(conv.unread_for(b), 0);
        assert_eq!(conv.last_message(), Some(msg));
    }

    #[tokio::test]
    async fn test_stale_recompute_does_not_overwrite_newer_pointer() {
        let ledger = InMemoryLedger::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let conv = Conversation::direct(a, b, Utc::now());
        let id = conv.id;
        ledger.create(conv).await.unwrap();

        let newest = LastMessage {
            message_id: Uuid::new_v4(),
            content: "newest".into(),
            time: Utc::now(),
        };
        let stale = LastMessage {
            message_id: Uuid::new_v4(),
            content: "stale".into(),
            time: Utc::now() - Duration::minutes(1),
        };
        ledger.record_new_message(id, &newest, a).await.unwrap();

        let changed = ledger
            .replace_last_message(id, Some(stale), &[Uuid::new_v4()])
            .await
            .unwrap();

        assert!(!changed);
        assert_eq!(ledger.get(id).await.unwrap().unwrap().last_message(), Some(newest));
        assert!(ledger.find_direct(b, a).await.unwrap().is_some());
    }
}
