use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::{HardDeleteOutcome, MessageStore, PurgeCriteria, VisibilityQuery};
use crate::error::AppResult;
use crate::models::{AutoDelete, DeleteMode, DeletedByEntry, MediaRelease, Message, ReadReceipt};

/// Process-local store. Each record lives in a `DashMap` shard, so every
/// mutation closure below runs under that record's write lock.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: DashMap<Uuid, Message>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn update<T>(&self, id: Uuid, default: T, f: impl FnOnce(&mut Message) -> T) -> T {
        match self.messages.get_mut(&id) {
            Some(mut entry) => f(entry.value_mut()),
            None => default,
        }
    }

    /// Matching messages, newest first.
    fn visible(&self, query: &VisibilityQuery) -> Vec<Message> {
        let mut rows: Vec<Message> = self
            .messages
            .iter()
            .filter(|e| query.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, message: Message) -> AppResult<()> {
        self.messages.entry(message.id).or_insert(message);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.messages.get(&id).map(|e| e.value().clone()))
    }

    async fn get_many(&self, conversation_id: Uuid, ids: &[Uuid]) -> AppResult<Vec<Message>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.messages.get(id).map(|e| e.value().clone()))
            .filter(|m| m.conversation_id == conversation_id)
            .collect())
    }

    async fn list_visible(&self, query: &VisibilityQuery, offset: u64, limit: u64) -> AppResult<Vec<Message>> {
        Ok(self
            .visible(query)
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count_visible(&self, query: &VisibilityQuery) -> AppResult<u64> {
        Ok(self.messages.iter().filter(|e| query.matches(e.value())).count() as u64)
    }

    async fn latest_visible(&self, query: &VisibilityQuery) -> AppResult<Option<Message>> {
        Ok(self.visible(query).into_iter().next())
    }

    async fn count_unread_visible(&self, query: &VisibilityQuery) -> AppResult<u64> {
        let Some(viewer_id) = query.viewer_id() else {
            return Ok(0);
        };
        Ok(self
            .messages
            .iter()
            .filter(|e| {
                let m = e.value();
                query.matches(m) && m.sender_id != viewer_id && !m.is_read_by(viewer_id)
            })
            .count() as u64)
    }

    async fn add_deleted_for(&self, id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> AppResult<bool> {
        Ok(self.update(id, false, |m| {
            if m.is_deleted_for(user_id) {
                return false;
            }
            m.deleted_by.push(DeletedByEntry {
                user_id,
                delete_mode: DeleteMode::ForMe,
                deleted_at: at,
            });
            true
        }))
    }

    async fn mark_deleted_for_everyone(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<bool> {
        Ok(self.update(id, false, |m| {
            if m.deletion.hard_deleted || m.deletion.deleted_for_everyone {
                return false;
            }
            m.deletion.deleted_for_everyone = true;
            m.deletion.deleted_for_everyone_at = Some(at);
            true
        }))
    }

    async fn mark_soft_deleted(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<bool> {
        Ok(self.update(id, false, |m| {
            if m.deletion.hard_deleted || m.deletion.soft_deleted {
                return false;
            }
            m.deletion.soft_deleted = true;
            m.deletion.soft_deleted_at = Some(at);
            true
        }))
    }

    async fn mark_hard_deleted(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<HardDeleteOutcome> {
        Ok(self.update(id, HardDeleteOutcome::default(), |m| {
            if m.deletion.hard_deleted {
                return HardDeleteOutcome::default();
            }
            m.deletion.hard_deleted = true;
            m.deletion.hard_deleted_at = Some(at);
            m.content.clear();
            HardDeleteOutcome {
                applied: true,
                media_ref: m.media_ref.take(),
            }
        }))
    }

    async fn set_auto_delete(&self, id: Uuid, expires_at: DateTime<Utc>) -> AppResult<bool> {
        Ok(self.update(id, false, |m| {
            if m.deletion.hard_deleted {
                return false;
            }
            match m.auto_delete {
                Some(existing) if existing.expires_at <= expires_at => false,
                _ => {
                    m.auto_delete = Some(AutoDelete { expires_at });
                    true
                }
            }
        }))
    }

    async fn take_media_ref(&self, id: Uuid) -> AppResult<Option<String>> {
        Ok(self.update(id, None, |m| m.media_ref.take()))
    }

    async fn record_read(&self, id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> AppResult<bool> {
        Ok(self.update(id, false, |m| {
            if m.is_read_by(user_id) {
                return false;
            }
            m.read_by.push(ReadReceipt {
                user_id,
                read_at: at,
            });
            true
        }))
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Uuid>> {
        let mut expired: Vec<(DateTime<Utc>, Uuid)> = self
            .messages
            .iter()
            .filter(|e| !e.value().deletion.hard_deleted && e.value().is_expired(now))
            .filter_map(|e| e.value().auto_delete.map(|a| (a.expires_at, e.value().id)))
            .collect();
        expired.sort();
        Ok(expired
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, id)| id)
            .collect())
    }

    async fn save_media_release(&self, id: Uuid, release: MediaRelease) -> AppResult<()> {
        self.update(id, (), |m| m.media_release = Some(release));
        Ok(())
    }

    async fn due_media_releases(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<(Uuid, MediaRelease)>> {
        let mut due: Vec<(Uuid, MediaRelease)> = self
            .messages
            .iter()
            .filter_map(|e| {
                e.value()
                    .media_release
                    .clone()
                    .filter(|r| !r.exhausted && r.next_attempt_at <= now)
                    .map(|r| (e.value().id, r))
            })
            .collect();
        due.sort_by_key(|(_, r)| r.next_attempt_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn clear_media_release(&self, id: Uuid) -> AppResult<()> {
        self.update(id, (), |m| m.media_release = None);
        Ok(())
    }

    async fn purge(&self, criteria: &PurgeCriteria) -> AppResult<u64> {
        let mut purged = 0u64;
        self.messages.retain(|_, m| {
            let soft_expired = m.deletion.soft_deleted
                && m.deletion
                    .soft_deleted_at
                    .map(|at| at < criteria.soft_deleted_before)
                    .unwrap_or(false);
            let hard_expired = criteria.include_hard_deleted
                && m.deletion.hard_deleted
                && m.media_release.is_none()
                && m.deletion
                    .hard_deleted_at
                    .map(|at| at < criteria.soft_deleted_before)
                    .unwrap_or(false);
            if soft_expired || hard_expired {
                purged += 1;
                return false;
            }
            true
        });
        Ok(purged)
    }
}
