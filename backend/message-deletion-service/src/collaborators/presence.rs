use async_trait::async_trait;
use dashmap::DashSet;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use super::PresenceService;
use crate::error::AppResult;

fn presence_key(user_id: Uuid) -> String {
    format!("presence:user:{}", user_id)
}

/// Reads the heartbeat key the websocket gateway maintains.
#[derive(Clone)]
pub struct RedisPresence {
    conn: ConnectionManager,
}

impl RedisPresence {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl PresenceService for RedisPresence {
    async fn is_online(&self, user_id: Uuid) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let online: bool = conn.exists(presence_key(user_id)).await?;
        Ok(online)
    }
}

/// Explicit online set. Anyone not marked online is treated as offline.
#[derive(Debug, Default)]
pub struct StaticPresence {
    online: DashSet<Uuid>,
}

impl StaticPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, user_id: Uuid, online: bool) {
        if online {
            self.online.insert(user_id);
        } else {
            self.online.remove(&user_id);
        }
    }
}

#[async_trait]
impl PresenceService for StaticPresence {
    async fn is_online(&self, user_id: Uuid) -> AppResult<bool> {
        Ok(self.online.contains(&user_id))
    }
}
