use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use super::{HardDeleteOutcome, MessageStore, PurgeCriteria, VisibilityQuery};
use crate::error::AppResult;
use crate::models::{
    AutoDelete, DeleteMode, DeletedByEntry, DeletionMetadata, MediaRelease, Message, ReadReceipt,
};

const MESSAGE_COLUMNS: &str = r#"
    m.id, m.conversation_id, m.sender_id, m.content, m.media_ref, m.created_at,
    m.hard_deleted, m.hard_deleted_at, m.deleted_for_everyone, m.deleted_for_everyone_at,
    m.soft_deleted, m.soft_deleted_at, m.auto_delete_expires_at,
    m.media_release_ref, m.media_release_attempts, m.media_release_next_at,
    m.media_release_last_error, m.media_release_exhausted
"#;

/// Binds: $1 conversation, $2 now, $3 sender exception, $4 viewer (NULL = public view).
///
/// Page, count and summary queries all embed this one predicate so a viewer's
/// total can never drift from the rows they are served.
const VISIBLE_PREDICATE: &str = r#"
    m.conversation_id = $1
    AND m.hard_deleted = FALSE
    AND m.soft_deleted = FALSE
    AND (m.auto_delete_expires_at IS NULL OR m.auto_delete_expires_at > $2)
    AND (m.deleted_for_everyone = FALSE OR ($3 AND m.sender_id = $4))
    AND ($4::uuid IS NULL OR NOT EXISTS (
        SELECT 1 FROM message_deletions d WHERE d.message_id = m.id AND d.user_id = $4
    ))
"#;

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: String,
    media_ref: Option<String>,
    created_at: DateTime<Utc>,
    hard_deleted: bool,
    hard_deleted_at: Option<DateTime<Utc>>,
    deleted_for_everyone: bool,
    deleted_for_everyone_at: Option<DateTime<Utc>>,
    soft_deleted: bool,
    soft_deleted_at: Option<DateTime<Utc>>,
    auto_delete_expires_at: Option<DateTime<Utc>>,
    media_release_ref: Option<String>,
    media_release_attempts: i32,
    media_release_next_at: Option<DateTime<Utc>>,
    media_release_last_error: Option<String>,
    media_release_exhausted: bool,
}

impl MessageRow {
    fn media_release(&self) -> Option<MediaRelease> {
        let media_ref = self.media_release_ref.clone()?;
        Some(MediaRelease {
            media_ref,
            attempts: self.media_release_attempts.max(0) as u32,
            next_attempt_at: self.media_release_next_at.unwrap_or(self.created_at),
            last_error: self.media_release_last_error.clone(),
            exhausted: self.media_release_exhausted,
        })
    }

    fn into_message(self, deleted_by: Vec<DeletedByEntry>, read_by: Vec<ReadReceipt>) -> Message {
        let media_release = self.media_release();
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            content: self.content,
            media_ref: self.media_ref,
            created_at: self.created_at,
            deletion: DeletionMetadata {
                hard_deleted: self.hard_deleted,
                hard_deleted_at: self.hard_deleted_at,
                deleted_for_everyone: self.deleted_for_everyone,
                deleted_for_everyone_at: self.deleted_for_everyone_at,
                soft_deleted: self.soft_deleted,
                soft_deleted_at: self.soft_deleted_at,
            },
            deleted_by,
            auto_delete: self
                .auto_delete_expires_at
                .map(|expires_at| AutoDelete { expires_at }),
            read_by,
            media_release,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DeletionRow {
    message_id: Uuid,
    user_id: Uuid,
    deleted_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ReadRow {
    message_id: Uuid,
    user_id: Uuid,
    read_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct MediaReleaseRow {
    id: Uuid,
    media_release_ref: String,
    media_release_attempts: i32,
    media_release_next_at: Option<DateTime<Utc>>,
    media_release_last_error: Option<String>,
}

/// PostgreSQL-backed message store
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attach hide markers and read receipts to a batch of rows, preserving order.
    async fn hydrate(&self, rows: Vec<MessageRow>) -> AppResult<Vec<Message>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let deletions = sqlx::query_as::<_, DeletionRow>(
            r#"
            SELECT message_id, user_id, deleted_at
            FROM message_deletions
            WHERE message_id = ANY($1)
            ORDER BY deleted_at
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let reads = sqlx::query_as::<_, ReadRow>(
            r#"
            SELECT message_id, user_id, read_at
            FROM message_reads
            WHERE message_id = ANY($1)
            ORDER BY read_at
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut deleted_by: HashMap<Uuid, Vec<DeletedByEntry>> = HashMap::new();
        for d in deletions {
            deleted_by.entry(d.message_id).or_default().push(DeletedByEntry {
                user_id: d.user_id,
                delete_mode: DeleteMode::ForMe,
                deleted_at: d.deleted_at,
            });
        }

        let mut read_by: HashMap<Uuid, Vec<ReadReceipt>> = HashMap::new();
        for r in reads {
            read_by.entry(r.message_id).or_default().push(ReadReceipt {
                user_id: r.user_id,
                read_at: r.read_at,
            });
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let id = row.id;
                row.into_message(
                    deleted_by.remove(&id).unwrap_or_default(),
                    read_by.remove(&id).unwrap_or_default(),
                )
            })
            .collect())
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert(&self, message: Message) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, content, media_ref, created_at, auto_delete_expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(&message.media_ref)
        .bind(message.created_at)
        .bind(message.auto_delete.map(|a| a.expires_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Message>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = $1");
        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.into_iter().next()),
            None => Ok(None),
        }
    }

    async fn get_many(&self, conversation_id: Uuid, ids: &[Uuid]) -> AppResult<Vec<Message>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.conversation_id = $1 AND m.id = ANY($2)"
        );
        let rows = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(conversation_id)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        self.hydrate(rows).await
    }

    async fn list_visible(&self, query: &VisibilityQuery, offset: u64, limit: u64) -> AppResult<Vec<Message>> {
        let sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages m
            WHERE {VISIBLE_PREDICATE}
            ORDER BY m.created_at DESC, m.id DESC
            LIMIT $5 OFFSET $6
            "#
        );
        let rows = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(query.conversation_id)
            .bind(query.now)
            .bind(query.sender_exception)
            .bind(query.viewer_id())
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        self.hydrate(rows).await
    }

    async fn count_visible(&self, query: &VisibilityQuery) -> AppResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM messages m WHERE {VISIBLE_PREDICATE}");
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(query.conversation_id)
            .bind(query.now)
            .bind(query.sender_exception)
            .bind(query.viewer_id())
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as u64)
    }

    async fn latest_visible(&self, query: &VisibilityQuery) -> AppResult<Option<Message>> {
        Ok(self.list_visible(query, 0, 1).await?.into_iter().next())
    }

    async fn count_unread_visible(&self, query: &VisibilityQuery) -> AppResult<u64> {
        if query.viewer_id().is_none() {
            return Ok(0);
        }
        let sql = format!(
            r#"
            SELECT COUNT(*) FROM messages m
            WHERE {VISIBLE_PREDICATE}
              AND m.sender_id <> $4
              AND NOT EXISTS (
                  SELECT 1 FROM message_reads r WHERE r.message_id = m.id AND r.user_id = $4
              )
            "#
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(query.conversation_id)
            .bind(query.now)
            .bind(query.sender_exception)
            .bind(query.viewer_id())
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as u64)
    }

    async fn add_deleted_for(&self, id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO message_deletions (message_id, user_id, delete_mode, deleted_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (message_id, user_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(DeleteMode::ForMe.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_deleted_for_everyone(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET deleted_for_everyone = TRUE, deleted_for_everyone_at = $2
            WHERE id = $1 AND deleted_for_everyone = FALSE AND hard_deleted = FALSE
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_soft_deleted(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET soft_deleted = TRUE, soft_deleted_at = $2
            WHERE id = $1 AND soft_deleted = FALSE AND hard_deleted = FALSE
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_hard_deleted(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<HardDeleteOutcome> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            r#"
            WITH target AS (
                SELECT id, media_ref FROM messages
                WHERE id = $1 AND hard_deleted = FALSE
                FOR UPDATE
            )
            UPDATE messages m
            SET hard_deleted = TRUE, hard_deleted_at = $2, media_ref = NULL, content = ''
            FROM target
            WHERE m.id = target.id
            RETURNING target.media_ref
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((media_ref,)) => HardDeleteOutcome {
                applied: true,
                media_ref,
            },
            None => HardDeleteOutcome::default(),
        })
    }

    async fn set_auto_delete(&self, id: Uuid, expires_at: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET auto_delete_expires_at = $2
            WHERE id = $1
              AND hard_deleted = FALSE
              AND (auto_delete_expires_at IS NULL OR auto_delete_expires_at > $2)
            "#,
        )
        .bind(id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn take_media_ref(&self, id: Uuid) -> AppResult<Option<String>> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            r#"
            WITH target AS (
                SELECT id, media_ref FROM messages
                WHERE id = $1 AND media_ref IS NOT NULL
                FOR UPDATE
            )
            UPDATE messages m
            SET media_ref = NULL
            FROM target
            WHERE m.id = target.id
            RETURNING target.media_ref
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(media_ref,)| media_ref))
    }

    async fn record_read(&self, id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO message_reads (message_id, user_id, read_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id, user_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM messages
            WHERE hard_deleted = FALSE
              AND auto_delete_expires_at IS NOT NULL
              AND auto_delete_expires_at <= $1
            ORDER BY auto_delete_expires_at
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn save_media_release(&self, id: Uuid, release: MediaRelease) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE messages
            SET media_release_ref = $2,
                media_release_attempts = $3,
                media_release_next_at = $4,
                media_release_last_error = $5,
                media_release_exhausted = $6
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&release.media_ref)
        .bind(release.attempts as i32)
        .bind(release.next_attempt_at)
        .bind(&release.last_error)
        .bind(release.exhausted)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn due_media_releases(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<(Uuid, MediaRelease)>> {
        let rows = sqlx::query_as::<_, MediaReleaseRow>(
            r#"
            SELECT id, media_release_ref, media_release_attempts,
                   media_release_next_at, media_release_last_error
            FROM messages
            WHERE media_release_ref IS NOT NULL
              AND media_release_exhausted = FALSE
              AND (media_release_next_at IS NULL OR media_release_next_at <= $1)
            ORDER BY media_release_next_at NULLS FIRST
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.id,
                    MediaRelease {
                        media_ref: r.media_release_ref,
                        attempts: r.media_release_attempts.max(0) as u32,
                        next_attempt_at: r.media_release_next_at.unwrap_or(now),
                        last_error: r.media_release_last_error,
                        exhausted: false,
                    },
                )
            })
            .collect())
    }

    async fn clear_media_release(&self, id: Uuid) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE messages
            SET media_release_ref = NULL,
                media_release_attempts = 0,
                media_release_next_at = NULL,
                media_release_last_error = NULL,
                media_release_exhausted = FALSE
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge(&self, criteria: &PurgeCriteria) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM messages
            WHERE (soft_deleted = TRUE AND soft_deleted_at < $1)
               OR ($2 AND hard_deleted = TRUE AND hard_deleted_at < $1 AND media_release_ref IS NULL)
            "#,
        )
        .bind(criteria.soft_deleted_before)
        .bind(criteria.include_hard_deleted)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
