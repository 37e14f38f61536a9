use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use super::ConversationLedger;
use crate::error::AppResult;
use crate::models::{Conversation, LastMessage};

#[derive(Debug, sqlx::FromRow)]
struct ConversationRow {
    id: Uuid,
    is_group_chat: bool,
    group_admin: Option<Uuid>,
    last_message_id: Option<Uuid>,
    last_message_content: Option<String>,
    last_message_time: Option<DateTime<Utc>>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ParticipantRow {
    user_id: Uuid,
    unread_count: i64,
}

#[derive(Clone)]
pub struct PgConversationLedger {
    pool: PgPool,
}

impl PgConversationLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationLedger for PgConversationLedger {
    async fn create(&self, conversation: Conversation) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, is_group_chat, group_admin, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(conversation.id)
        .bind(conversation.is_group_chat)
        .bind(conversation.group_admin)
        .bind(conversation.is_active)
        .bind(conversation.created_at)
        .execute(&mut *tx)
        .await?;

        for user_id in &conversation.participants {
            sqlx::query(
                r#"
                INSERT INTO conversation_participants (conversation_id, user_id, unread_count, joined_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (conversation_id, user_id) DO NOTHING
                "#,
            )
            .bind(conversation.id)
            .bind(user_id)
            .bind(conversation.unread_for(*user_id))
            .bind(conversation.created_at)
            .execute(&mut *tx)
            .await?;
        }

        for user_id in &conversation.group_admins {
            sqlx::query(
                r#"
                INSERT INTO conversation_admins (conversation_id, user_id)
                VALUES ($1, $2)
                ON CONFLICT (conversation_id, user_id) DO NOTHING
                "#,
            )
            .bind(conversation.id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        let Some(row) = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT id, is_group_chat, group_admin, last_message_id, last_message_content,
                   last_message_time, is_active, created_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let participants = sqlx::query_as::<_, ParticipantRow>(
            r#"
            SELECT user_id, unread_count
            FROM conversation_participants
            WHERE conversation_id = $1
            ORDER BY joined_at, user_id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let group_admins: Vec<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM conversation_admins WHERE conversation_id = $1",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let unread_counts: HashMap<Uuid, i64> = participants
            .iter()
            .map(|p| (p.user_id, p.unread_count))
            .collect();

        Ok(Some(Conversation {
            id: row.id,
            participants: participants.into_iter().map(|p| p.user_id).collect(),
            is_group_chat: row.is_group_chat,
            group_admin: row.group_admin,
            group_admins,
            last_message_id: row.last_message_id,
            last_message_content: row.last_message_content,
            last_message_time: row.last_message_time,
            unread_counts,
            is_active: row.is_active,
            created_at: row.created_at,
        }))
    }

    async fn find_direct(&self, a: Uuid, b: Uuid) -> AppResult<Option<Conversation>> {
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT c.id
            FROM conversations c
            WHERE c.is_group_chat = FALSE
              AND c.is_active = TRUE
              AND EXISTS (SELECT 1 FROM conversation_participants p WHERE p.conversation_id = c.id AND p.user_id = $1)
              AND EXISTS (SELECT 1 FROM conversation_participants p WHERE p.conversation_id = c.id AND p.user_id = $2)
              AND (SELECT COUNT(*) FROM conversation_participants p WHERE p.conversation_id = c.id) = 2
            ORDER BY c.created_at
            LIMIT 1
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_optional(&self.pool)
        .await?;

        match id {
            Some(id) => self.get(id).await,
            None => Ok(None),
        }
    }

    async fn replace_last_message(
        &self,
        id: Uuid,
        candidate: Option<LastMessage>,
        invalidated: &[Uuid],
    ) -> AppResult<bool> {
        let result = match candidate {
            Some(candidate) => {
                sqlx::query(
                    r#"
                    UPDATE conversations
                    SET last_message_id = $2, last_message_content = $3, last_message_time = $4
                    WHERE id = $1
                      AND last_message_id IS DISTINCT FROM $2
                      AND (last_message_id IS NULL
                           OR last_message_id = ANY($5)
                           OR last_message_time <= $4)
                    "#,
                )
                .bind(id)
                .bind(candidate.message_id)
                .bind(&candidate.content)
                .bind(candidate.time)
                .bind(invalidated)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE conversations
                    SET last_message_id = NULL, last_message_content = NULL, last_message_time = NULL
                    WHERE id = $1 AND last_message_id = ANY($2)
                    "#,
                )
                .bind(id)
                .bind(invalidated)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }

    async fn record_new_message(&self, id: Uuid, message: &LastMessage, sender_id: Uuid) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE conversations
            SET last_message_id = $2, last_message_content = $3, last_message_time = $4
            WHERE id = $1 AND (last_message_time IS NULL OR last_message_time <= $4)
            "#,
        )
        .bind(id)
        .bind(message.message_id)
        .bind(&message.content)
        .bind(message.time)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE conversation_participants
            SET unread_count = unread_count + 1
            WHERE conversation_id = $1 AND user_id <> $2
            "#,
        )
        .bind(id)
        .bind(sender_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn decrement_unread(&self, id: Uuid, user_id: Uuid, by: i64) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE conversation_participants
            SET unread_count = GREATEST(unread_count - $3, 0)
            WHERE conversation_id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(by)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
