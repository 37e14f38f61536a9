use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use uuid::Uuid;

use super::{GraceEntry, GraceQueue, PendingBatch};
use crate::error::AppResult;

#[derive(Debug, Default)]
struct RecipientQueue {
    entries: VecDeque<GraceEntry>,
    /// Head entries expired since the last snapshot; already gone, so
    /// `acknowledge` must not count them again.
    expired_since_snapshot: usize,
}

impl RecipientQueue {
    fn expire_before(&mut self, cutoff: DateTime<Utc>) {
        while self
            .entries
            .front()
            .is_some_and(|e| e.enqueued_at < cutoff)
        {
            self.entries.pop_front();
            self.expired_since_snapshot += 1;
        }
    }
}

/// Process-local grace queue. Entries older than the TTL are dropped from the
/// head whenever a newer entry arrives for the same recipient.
#[derive(Debug, Default)]
pub struct InMemoryGraceQueue {
    queues: DashMap<Uuid, RecipientQueue>,
    ttl: Option<Duration>,
}

impl InMemoryGraceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl_secs: i64) -> Self {
        Self {
            queues: DashMap::new(),
            ttl: Duration::try_seconds(ttl_secs).filter(|ttl| *ttl > Duration::zero()),
        }
    }

    pub fn len(&self, recipient_id: Uuid) -> usize {
        self.queues
            .get(&recipient_id)
            .map(|q| q.entries.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl GraceQueue for InMemoryGraceQueue {
    async fn enqueue(&self, entry: GraceEntry) -> AppResult<()> {
        let mut queue = self.queues.entry(entry.recipient_id).or_default();
        if let Some(cutoff) = self
            .ttl
            .and_then(|ttl| entry.enqueued_at.checked_sub_signed(ttl))
        {
            queue.expire_before(cutoff);
        }
        queue.entries.push_back(entry);
        Ok(())
    }

    async fn pending(&self, recipient_id: Uuid, limit: usize) -> AppResult<PendingBatch> {
        let entries: Vec<GraceEntry> = match self.queues.get_mut(&recipient_id) {
            Some(mut q) => {
                q.expired_since_snapshot = 0;
                q.entries.iter().take(limit).cloned().collect()
            }
            None => Vec::new(),
        };
        let len = entries.len();
        Ok(PendingBatch { entries, len })
    }

    async fn acknowledge(&self, recipient_id: Uuid, count: usize) -> AppResult<()> {
        if let Some(mut q) = self.queues.get_mut(&recipient_id) {
            let n = count
                .saturating_sub(q.expired_since_snapshot)
                .min(q.entries.len());
            q.entries.drain(..n);
            q.expired_since_snapshot = 0;
        }
        self.queues.remove_if(&recipient_id, |_, q| q.entries.is_empty());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Transition;

    fn entry(recipient: Uuid) -> GraceEntry {
        entry_at(recipient, Utc::now())
    }

    fn entry_at(recipient: Uuid, enqueued_at: DateTime<Utc>) -> GraceEntry {
        GraceEntry::new(
            Uuid::new_v4(),
            recipient,
            Uuid::new_v4(),
            vec![Uuid::new_v4()],
            Transition::DeleteForEveryone,
            enqueued_at,
        )
    }

    #[tokio::test]
    async fn test_acknowledge_keeps_entries_enqueued_after_snapshot() {
        let queue = InMemoryGraceQueue::new();
        let recipient = Uuid::new_v4();
        let first = entry(recipient);
        queue.enqueue(first.clone()).await.unwrap();

        let batch = queue.pending(recipient, 100).await.unwrap();
        let late = entry(recipient);
        queue.enqueue(late.clone()).await.unwrap();
        queue.acknowledge(recipient, batch.len).await.unwrap();

        assert_eq!(batch.entries, vec![first]);
        let rest = queue.pending(recipient, 100).await.unwrap();
        assert_eq!(rest.entries, vec![late]);
    }

    #[tokio::test]
    async fn test_entries_older_than_ttl_are_dropped_on_enqueue() {
        let queue = InMemoryGraceQueue::with_ttl(3600);
        let recipient = Uuid::new_v4();
        let start = Utc::now();

        queue.enqueue(entry_at(recipient, start)).await.unwrap();
        queue.enqueue(entry_at(recipient, start + Duration::minutes(30))).await.unwrap();
        let fresh = entry_at(recipient, start + Duration::minutes(90));
        queue.enqueue(fresh.clone()).await.unwrap();

        assert_eq!(queue.len(recipient), 2);
        let batch = queue.pending(recipient, 100).await.unwrap();
        assert_eq!(batch.entries.last(), Some(&fresh));
    }

    #[tokio::test]
    async fn test_expiry_during_drain_keeps_unreplayed_entries() {
        let queue = InMemoryGraceQueue::with_ttl(3600);
        let recipient = Uuid::new_v4();
        let start = Utc::now();
        queue.enqueue(entry_at(recipient, start)).await.unwrap();
        queue.enqueue(entry_at(recipient, start + Duration::minutes(50))).await.unwrap();

        let batch = queue.pending(recipient, 100).await.unwrap();
        // Arrives mid-drain and expires the snapshot's first entry.
        let late = entry_at(recipient, start + Duration::minutes(70));
        queue.enqueue(late.clone()).await.unwrap();
        queue.acknowledge(recipient, batch.len).await.unwrap();

        let rest = queue.pending(recipient, 100).await.unwrap();
        assert_eq!(rest.entries, vec![late]);
    }
}
