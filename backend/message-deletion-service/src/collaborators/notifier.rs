use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::broadcast;

use super::Notifier;
use crate::error::AppResult;
use crate::models::RealtimeEvent;

/// Redis PUBLISH on `conversation:{id}` / `user:{id}` channels.
#[derive(Clone)]
pub struct RedisNotifier {
    conn: ConnectionManager,
}

impl RedisNotifier {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn publish(&self, topic: &str, event: &RealtimeEvent) -> AppResult<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(topic, payload).await?;
        Ok(())
    }
}

/// Single-process fan-out. Subscribers receive `(topic, event)` pairs.
#[derive(Debug, Clone)]
pub struct InProcessNotifier {
    tx: broadcast::Sender<(String, RealtimeEvent)>,
}

impl InProcessNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(String, RealtimeEvent)> {
        self.tx.subscribe()
    }
}

impl Default for InProcessNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Notifier for InProcessNotifier {
    async fn publish(&self, topic: &str, event: &RealtimeEvent) -> AppResult<()> {
        // No subscribers is not an error.
        let _ = self.tx.send((topic.to_string(), event.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn publish(&self, topic: &str, event: &RealtimeEvent) -> AppResult<()> {
        tracing::trace!(topic, ?event, "realtime fan-out disabled");
        Ok(())
    }
}
