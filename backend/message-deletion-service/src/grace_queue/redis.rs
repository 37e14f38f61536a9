use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use super::{GraceEntry, GraceQueue, PendingBatch};
use crate::error::AppResult;

/// Key pattern for a recipient's deferred deletions
fn queue_key(recipient_id: Uuid) -> String {
    format!("grace:queue:{}", recipient_id)
}

/// Redis list per recipient. RPUSH on enqueue, LRANGE to read, LTRIM to ack.
#[derive(Clone)]
pub struct RedisGraceQueue {
    conn: ConnectionManager,
    /// Entries older than this are dropped with the key
    ttl_secs: i64,
}

impl RedisGraceQueue {
    pub fn new(conn: ConnectionManager, ttl_secs: i64) -> Self {
        Self { conn, ttl_secs }
    }
}

#[async_trait]
impl GraceQueue for RedisGraceQueue {
    async fn enqueue(&self, entry: GraceEntry) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let key = queue_key(entry.recipient_id);
        let json = serde_json::to_string(&entry)?;

        conn.rpush::<_, _, ()>(&key, json).await?;
        conn.expire::<_, ()>(&key, self.ttl_secs).await?;

        Ok(())
    }

    async fn pending(&self, recipient_id: Uuid, limit: usize) -> AppResult<PendingBatch> {
        if limit == 0 {
            return Ok(PendingBatch::default());
        }
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .lrange(queue_key(recipient_id), 0, limit as isize - 1)
            .await?;

        let len = raw.len();
        let entries = raw
            .into_iter()
            .filter_map(|json| match serde_json::from_str::<GraceEntry>(&json) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(recipient_id = %recipient_id, error = %e, "dropping malformed grace entry");
                    None
                }
            })
            .collect();

        Ok(PendingBatch { entries, len })
    }

    async fn acknowledge(&self, recipient_id: Uuid, count: usize) -> AppResult<()> {
        if count == 0 {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.ltrim::<_, ()>(queue_key(recipient_id), count as isize, -1)
            .await?;
        Ok(())
    }
}
