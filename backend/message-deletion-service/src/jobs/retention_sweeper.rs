//! Retention sweep background job
//!
//! Each cycle:
//! - hard-deletes disappearing messages whose timer ran out (read paths
//!   already hide them; this reclaims content and media)
//! - retries blob releases that failed during an earlier hard delete, with
//!   exponential backoff, until they succeed or run out of attempts
//!
//! Physical purging of tombstones is operator-triggered through
//! [`RetentionSweeper::server_cleanup`] and never runs from the loop.
//!
//! A failure on one message is recorded in the [`SweepReport`] and the
//! sweep moves on.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::RetentionConfig;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::services::DeletionService;
use crate::store::{MessageStore, PurgeCriteria};

#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    /// None when a whole stage failed before reaching individual messages
    pub message_id: Option<Uuid>,
    pub stage: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub media_released: usize,
    pub media_retry_failed: usize,
    pub media_exhausted: usize,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    fn fail(&mut self, message_id: Option<Uuid>, stage: &'static str, error: impl ToString) {
        self.failures.push(SweepFailure {
            message_id,
            stage,
            error: error.to_string(),
        });
    }

    fn status(&self) -> &'static str {
        if self.failures.is_empty() {
            "success"
        } else {
            "partial"
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CleanupOptions {
    /// Retention threshold; defaults to the configured soft-delete retention
    #[serde(default)]
    pub older_than_days: Option<i64>,
    #[serde(default)]
    pub include_hard_deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub purged_count: u64,
    pub cutoff: DateTime<Utc>,
}

pub struct RetentionSweeper {
    deletion: Arc<DeletionService>,
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(
        deletion: Arc<DeletionService>,
        store: Arc<dyn MessageStore>,
        clock: Arc<dyn Clock>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            deletion,
            store,
            clock,
            config,
        }
    }

    /// Run until the task is dropped.
    pub async fn start(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.sweep_interval_secs);
        tracing::info!(
            interval_secs = interval.as_secs(),
            batch_size = self.config.batch_size,
            "Starting retention sweeper"
        );

        loop {
            sleep(interval).await;
            self.run_once().await;
        }
    }

    pub async fn run_once(&self) -> SweepReport {
        let started = Instant::now();
        let mut report = SweepReport::default();

        self.expire_disappearing(&mut report).await;
        self.retry_media_releases(&mut report).await;

        metrics::record_sweep_run(report.status());
        metrics::record_sweep_duration(started.elapsed());

        if report.failures.is_empty() {
            tracing::debug!(
                expired = report.expired,
                media_released = report.media_released,
                duration_ms = started.elapsed().as_millis(),
                "Retention sweep completed"
            );
        } else {
            tracing::warn!(
                expired = report.expired,
                media_released = report.media_released,
                failures = report.failures.len(),
                duration_ms = started.elapsed().as_millis(),
                "Retention sweep completed with failures"
            );
        }

        report
    }

    async fn expire_disappearing(&self, report: &mut SweepReport) {
        let now = self.clock.now();
        let ids = match self.store.find_expired(now, self.config.batch_size).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "failed to list expired messages");
                report.fail(None, "expire", e);
                return;
            }
        };

        for id in ids {
            let result: AppResult<bool> = async {
                match self.store.get(id).await? {
                    Some(message) => self.deletion.expire_message(&message).await,
                    None => Ok(false),
                }
            }
            .await;

            match result {
                Ok(true) => report.expired += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(message_id = %id, error = %e, "failed to expire message");
                    report.fail(Some(id), "expire", e);
                }
            }
        }
    }

    async fn retry_media_releases(&self, report: &mut SweepReport) {
        let now = self.clock.now();
        let due = match self.store.due_media_releases(now, self.config.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(error = %e, "failed to list pending media releases");
                report.fail(None, "media_release", e);
                return;
            }
        };

        for (message_id, release) in due {
            let exhausts = release.attempts.saturating_add(1) >= self.config.media_release_max_attempts;
            match self.deletion.retry_media_release(message_id, release).await {
                Ok(_) => report.media_released += 1,
                Err(e) => {
                    report.media_retry_failed += 1;
                    if exhausts {
                        report.media_exhausted += 1;
                    }
                    report.fail(Some(message_id), "media_release", e);
                }
            }
        }
    }

    /// Operator-invoked purge of tombstones older than the retention threshold.
    pub async fn server_cleanup(&self, options: CleanupOptions) -> AppResult<CleanupReport> {
        let days = options
            .older_than_days
            .unwrap_or(self.config.soft_delete_retention_days)
            .max(0);
        let cutoff = ChronoDuration::try_days(days)
            .and_then(|age| self.clock.now().checked_sub_signed(age))
            .ok_or_else(|| {
                AppError::BadRequest(format!("older_than_days out of range: {}", days))
            })?;

        let purged_count = self
            .store
            .purge(&PurgeCriteria {
                soft_deleted_before: cutoff,
                include_hard_deleted: options.include_hard_deleted,
            })
            .await?;

        tracing::info!(
            purged_count,
            cutoff = %cutoff,
            include_hard_deleted = options.include_hard_deleted,
            "Server cleanup completed"
        );

        Ok(CleanupReport {
            purged_count,
            cutoff,
        })
    }
}
