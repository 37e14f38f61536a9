//! Deletion service
//!
//! Runs every deletion operation through the same pipeline:
//! load the conversation, authorize each message with the policy engine,
//! commit the resulting transitions through the store's atomic primitives,
//! refresh the shared summary, then fan out to online participants and queue
//! the transition for offline ones.
//!
//! Single-purpose operations are all-or-nothing on authorization: the first
//! refused message fails the whole request before anything is written.
//! Bulk delete instead skips refused messages and reports them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::Backends;
use crate::config::{DeletionPolicyConfig, RetentionConfig};
use crate::error::{AppError, AppResult};
use crate::grace_queue::GraceEntry;
use crate::metrics;
use crate::models::events::{conversation_topic, user_topic};
use crate::models::{Conversation, LastMessage, MediaRelease, Message, RealtimeEvent};
use crate::policy::{
    self, BulkMode, Decision, Denial, PolicyContext, PolicyOp, Transition, MAX_AUTO_DELETE_SECS,
};
use crate::store::VisibilityQuery;

/// Bound on pointer recomputations per refresh under concurrent deletes.
const SUMMARY_REFRESH_ATTEMPTS: usize = 4;

/// Entries replayed per drain call
const DRAIN_BATCH_SIZE: usize = 1000;

/// A message a bulk request did not touch, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedMessage {
    pub message_id: Uuid,
    /// Stable reason code (`forbidden`, `window_expired`, `not_found`, ...)
    pub reason: String,
    pub detail: String,
}

impl SkippedMessage {
    fn new(message_id: Uuid, denial: Denial) -> Self {
        let reason = denial.code().to_string();
        let detail = AppError::from(denial).to_string();
        Self {
            message_id,
            reason,
            detail,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeletionOutcome {
    /// Messages whose state this call changed
    pub message_ids: Vec<Uuid>,
    /// Messages already at or beyond the requested state
    pub already_satisfied: Vec<Uuid>,
    pub skipped: Vec<SkippedMessage>,
    /// Offline recipients a grace entry was queued for
    pub queued_for: Vec<Uuid>,
}

impl DeletionOutcome {
    pub fn deleted_count(&self) -> usize {
        self.message_ids.len()
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BulkOptions {
    #[serde(default)]
    pub window_override_secs: Option<i64>,
    #[serde(default = "default_true")]
    pub delete_media: bool,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            window_override_secs: None,
            delete_media: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct MediaDeleteOptions {
    /// Also hard-delete the message itself
    #[serde(default)]
    pub delete_message: bool,
    /// Drop only the actor's copy; the stored object is kept for other participants
    #[serde(default)]
    pub delete_local_only: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MediaDeleteOutcome {
    pub media_released: bool,
    pub message_deleted: bool,
    pub hidden_for_actor: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GraceOutcome {
    pub queued: bool,
    pub deleted_count: usize,
    pub queued_for: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DrainOutcome {
    /// Message ids replayed for the recipient
    pub applied_count: usize,
    pub entries_drained: usize,
}

pub(crate) fn default_true() -> bool {
    true
}

/// Who receives queued copies of a shared transition
#[derive(Debug, Clone, Copy)]
enum Fanout<'a> {
    /// Every other participant the presence service reports offline
    OfflineParticipants,
    /// Exactly these recipients, if they are participants and offline
    Recipients(&'a [Uuid]),
}

struct Request<'a> {
    op: PolicyOp,
    conversation_id: Uuid,
    actor_id: Uuid,
    message_ids: &'a [Uuid],
    window_secs: i64,
    /// Refusals fail the whole request instead of being skipped
    strict: bool,
    release_media: bool,
    fanout: Fanout<'a>,
}

struct Plan {
    conversation: Conversation,
    now: DateTime<Utc>,
    apply: Vec<(Uuid, Transition)>,
    satisfied: Vec<Uuid>,
    skipped: Vec<SkippedMessage>,
}

pub struct DeletionService {
    backends: Backends,
    policy: DeletionPolicyConfig,
    retention: RetentionConfig,
}

impl DeletionService {
    pub fn new(backends: Backends, policy: DeletionPolicyConfig, retention: RetentionConfig) -> Self {
        Self {
            backends,
            policy,
            retention,
        }
    }

    pub fn policy(&self) -> &DeletionPolicyConfig {
        &self.policy
    }

    pub async fn delete_for_me(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        message_ids: &[Uuid],
    ) -> AppResult<DeletionOutcome> {
        self.execute(self.request(PolicyOp::DeleteForMe, conversation_id, actor_id, message_ids))
            .await
    }

    pub async fn delete_for_everyone(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        message_ids: &[Uuid],
        window_override_secs: Option<i64>,
    ) -> AppResult<DeletionOutcome> {
        let mut req = self.request(PolicyOp::DeleteForEveryone, conversation_id, actor_id, message_ids);
        req.window_secs = self.policy.effective_window_secs(window_override_secs);
        self.execute(req).await
    }

    /// `delete_media = false` detaches the media reference without releasing the object.
    pub async fn hard_delete(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        message_ids: &[Uuid],
        delete_media: bool,
    ) -> AppResult<DeletionOutcome> {
        let mut req = self.request(PolicyOp::HardDelete, conversation_id, actor_id, message_ids);
        req.release_media = delete_media;
        self.execute(req).await
    }

    pub async fn soft_delete(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        message_ids: &[Uuid],
    ) -> AppResult<DeletionOutcome> {
        self.execute(self.request(PolicyOp::SoftDelete, conversation_id, actor_id, message_ids))
            .await
    }

    pub async fn set_auto_delete(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        message_ids: &[Uuid],
        duration_secs: i64,
    ) -> AppResult<DeletionOutcome> {
        if !(1..=MAX_AUTO_DELETE_SECS).contains(&duration_secs) {
            return Err(Denial::InvalidDuration.into());
        }
        self.execute(self.request(
            PolicyOp::SetAutoDelete { duration_secs },
            conversation_id,
            actor_id,
            message_ids,
        ))
        .await
    }

    pub async fn admin_delete(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        message_ids: &[Uuid],
    ) -> AppResult<DeletionOutcome> {
        self.execute(self.request(PolicyOp::AdminDelete, conversation_id, actor_id, message_ids))
            .await
    }

    pub async fn unsent_delete(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        message_ids: &[Uuid],
    ) -> AppResult<DeletionOutcome> {
        self.execute(self.request(PolicyOp::UnsentDelete, conversation_id, actor_id, message_ids))
            .await
    }

    /// Each message is validated against the mode's own rule; refusals are reported, not fatal.
    pub async fn bulk_delete(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        message_ids: &[Uuid],
        mode: BulkMode,
        options: BulkOptions,
    ) -> AppResult<DeletionOutcome> {
        let mut req = self.request(mode.op(), conversation_id, actor_id, message_ids);
        req.strict = false;
        req.release_media = options.delete_media;
        req.window_secs = self.policy.effective_window_secs(options.window_override_secs);
        self.execute(req).await
    }

    /// Delete for everyone and queue the transition for the listed recipients
    /// that are offline. Online recipients get the regular fan-out event.
    pub async fn grace_delete(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        message_ids: &[Uuid],
        recipient_ids: &[Uuid],
    ) -> AppResult<GraceOutcome> {
        let mut req = self.request(PolicyOp::DeleteForEveryone, conversation_id, actor_id, message_ids);
        req.fanout = Fanout::Recipients(recipient_ids);
        let outcome = self.execute(req).await?;

        Ok(GraceOutcome {
            queued: !outcome.queued_for.is_empty(),
            deleted_count: outcome.deleted_count(),
            queued_for: outcome.queued_for,
        })
    }

    pub async fn delete_media(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        message_id: Uuid,
        options: MediaDeleteOptions,
    ) -> AppResult<MediaDeleteOutcome> {
        let conversation = self.load_conversation(conversation_id).await?;
        policy::authorize_request(PolicyOp::MediaDelete, &conversation, actor_id)?;

        let now = self.backends.clock.now();
        let Some(message) = self
            .backends
            .store
            .get_many(conversation_id, &[message_id])
            .await?
            .into_iter()
            .next()
        else {
            return Ok(MediaDeleteOutcome::default());
        };

        let ctx = self.context(&conversation, actor_id, now, self.policy.delete_window_secs);
        if policy::authorize(PolicyOp::MediaDelete, &ctx, &message)? == Decision::AlreadySatisfied {
            return Ok(MediaDeleteOutcome::default());
        }

        let mut outcome = MediaDeleteOutcome::default();

        if options.delete_local_only {
            outcome.hidden_for_actor = self
                .commit(message_id, Transition::HideForMe, actor_id, now, false)
                .await?;
            if outcome.hidden_for_actor {
                self.announce(&conversation, actor_id, Transition::HideForMe, &[message_id], Fanout::OfflineParticipants, now)
                    .await;
            }
            return Ok(outcome);
        }

        outcome.media_released = self
            .commit(message_id, Transition::ReleaseMedia, actor_id, now, true)
            .await?;

        let mut transition = Transition::ReleaseMedia;
        if options.delete_message {
            outcome.message_deleted = self
                .commit(message_id, Transition::HardDelete, actor_id, now, true)
                .await?;
            transition = Transition::HardDelete;
            self.refresh_summary(conversation_id, &[message_id]).await?;
        }

        if outcome.media_released || outcome.message_deleted {
            metrics::record_deletions(PolicyOp::MediaDelete.as_str(), 1);
            self.announce(&conversation, actor_id, transition, &[message_id], Fanout::OfflineParticipants, now)
                .await;
        }

        tracing::info!(
            conversation_id = %conversation_id,
            actor_id = %actor_id,
            message_id = %message_id,
            media_released = outcome.media_released,
            message_deleted = outcome.message_deleted,
            "media delete processed"
        );

        Ok(outcome)
    }

    /// Replay a recipient's queued transitions in enqueue order, then remove
    /// exactly the entries that were read.
    pub async fn drain_grace_queue(&self, recipient_id: Uuid) -> AppResult<DrainOutcome> {
        let batch = self
            .backends
            .grace
            .pending(recipient_id, DRAIN_BATCH_SIZE)
            .await?;
        let now = self.backends.clock.now();
        let mut applied_count = 0;

        for entry in &batch.entries {
            let still_member = self
                .backends
                .ledger
                .get(entry.conversation_id)
                .await?
                .map(|c| c.is_participant(recipient_id))
                .unwrap_or(false);
            if !still_member {
                tracing::debug!(
                    recipient_id = %recipient_id,
                    conversation_id = %entry.conversation_id,
                    "dropping grace entry for former participant"
                );
                continue;
            }

            for message_id in &entry.message_ids {
                self.commit(*message_id, entry.transition, entry.actor_id, now, true)
                    .await?;
            }
            if entry.transition.affects_summary() {
                self.refresh_summary(entry.conversation_id, &entry.message_ids)
                    .await?;
            }

            let event = RealtimeEvent::DeferredDeletion {
                conversation_id: entry.conversation_id,
                message_ids: entry.message_ids.clone(),
                transition: entry.transition,
                enqueued_at: entry.enqueued_at,
            };
            self.publish(&user_topic(recipient_id), &event).await;
            applied_count += entry.message_ids.len();
        }

        self.backends.grace.acknowledge(recipient_id, batch.len).await?;
        metrics::record_grace_drained(batch.len as u64);

        if batch.len > 0 {
            tracing::info!(
                recipient_id = %recipient_id,
                entries = batch.len,
                applied_count,
                "grace queue drained"
            );
        }

        Ok(DrainOutcome {
            applied_count,
            entries_drained: batch.len,
        })
    }

    /// Hard-delete a disappearing message whose timer ran out. Used by the retention sweep.
    pub async fn expire_message(&self, message: &Message) -> AppResult<bool> {
        let now = self.backends.clock.now();
        let applied = self
            .commit(message.id, Transition::HardDelete, message.sender_id, now, true)
            .await?;
        self.refresh_summary(message.conversation_id, &[message.id])
            .await?;

        if applied {
            let event = RealtimeEvent::MessageDeleted {
                conversation_id: message.conversation_id,
                message_ids: vec![message.id],
                transition: Transition::HardDelete,
                actor_id: message.sender_id,
                timestamp: now,
            };
            self.publish(&conversation_topic(message.conversation_id), &event)
                .await;
        }
        Ok(applied)
    }

    /// Retry a pending blob release. Returns true once the release succeeded.
    pub async fn retry_media_release(&self, message_id: Uuid, release: MediaRelease) -> AppResult<bool> {
        match self.backends.blobs.release_media(&release.media_ref).await {
            Ok(()) => {
                self.backends.store.clear_media_release(message_id).await?;
                Ok(true)
            }
            Err(e) => {
                let now = self.backends.clock.now();
                let attempts = release.attempts.saturating_add(1);
                let exhausted = attempts >= self.retention.media_release_max_attempts;
                metrics::record_media_release_failure();
                if exhausted {
                    tracing::error!(
                        message_id = %message_id,
                        media_ref = %release.media_ref,
                        attempts,
                        error = %e,
                        "media release exhausted its retries"
                    );
                } else {
                    tracing::warn!(
                        message_id = %message_id,
                        media_ref = %release.media_ref,
                        attempts,
                        error = %e,
                        "media release retry failed"
                    );
                }
                self.backends
                    .store
                    .save_media_release(
                        message_id,
                        MediaRelease {
                            media_ref: release.media_ref,
                            attempts,
                            next_attempt_at: now + self.retention.media_release_backoff(release.attempts),
                            last_error: Some(e.to_string()),
                            exhausted,
                        },
                    )
                    .await?;
                Err(e)
            }
        }
    }

    fn request<'a>(
        &self,
        op: PolicyOp,
        conversation_id: Uuid,
        actor_id: Uuid,
        message_ids: &'a [Uuid],
    ) -> Request<'a> {
        Request {
            op,
            conversation_id,
            actor_id,
            message_ids,
            window_secs: self.policy.delete_window_secs,
            strict: true,
            release_media: true,
            fanout: Fanout::OfflineParticipants,
        }
    }

    fn context<'a>(
        &self,
        conversation: &'a Conversation,
        actor_id: Uuid,
        now: DateTime<Utc>,
        window_secs: i64,
    ) -> PolicyContext<'a> {
        PolicyContext {
            conversation,
            actor_id,
            now,
            window_secs,
        }
    }

    async fn load_conversation(&self, conversation_id: Uuid) -> AppResult<Conversation> {
        self.backends
            .ledger
            .get(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("conversation {}", conversation_id)))
    }

    async fn execute(&self, req: Request<'_>) -> AppResult<DeletionOutcome> {
        let plan = self.plan(&req).await?;
        let op = req.op.as_str();

        let mut outcome = DeletionOutcome {
            already_satisfied: plan.satisfied,
            skipped: plan.skipped,
            ..Default::default()
        };

        for (message_id, t) in &plan.apply {
            if self
                .commit(*message_id, *t, req.actor_id, plan.now, req.release_media)
                .await?
            {
                outcome.message_ids.push(*message_id);
            } else {
                // Lost a race with a concurrent writer; the target state holds.
                outcome.already_satisfied.push(*message_id);
            }
        }

        let touched: Vec<Uuid> = outcome
            .message_ids
            .iter()
            .chain(outcome.already_satisfied.iter())
            .copied()
            .collect();

        if op_affects_summary(req.op) && !touched.is_empty() {
            self.refresh_summary(req.conversation_id, &touched).await?;
        }

        let transition = plan
            .apply
            .first()
            .map(|(_, t)| *t)
            .or_else(|| nominal_transition(req.op));
        if let Some(transition) = transition {
            let announced = match req.fanout {
                Fanout::OfflineParticipants => outcome.message_ids.clone(),
                Fanout::Recipients(_) => touched.clone(),
            };
            if !announced.is_empty() {
                outcome.queued_for = self
                    .announce(&plan.conversation, req.actor_id, transition, &announced, req.fanout, plan.now)
                    .await;
            }
        }

        for skipped in &outcome.skipped {
            metrics::record_skipped(&skipped.reason);
        }
        metrics::record_deletions(op, outcome.message_ids.len() as u64);

        tracing::info!(
            operation = op,
            conversation_id = %req.conversation_id,
            actor_id = %req.actor_id,
            applied = outcome.message_ids.len(),
            already_satisfied = outcome.already_satisfied.len(),
            skipped = outcome.skipped.len(),
            "deletion request processed"
        );

        Ok(outcome)
    }

    async fn plan(&self, req: &Request<'_>) -> AppResult<Plan> {
        let conversation = self.load_conversation(req.conversation_id).await?;
        policy::authorize_request(req.op, &conversation, req.actor_id)?;

        let ids = dedup(req.message_ids);
        if ids.is_empty() {
            return Err(AppError::BadRequest("message_ids must not be empty".into()));
        }
        if ids.len() > self.policy.max_batch_size {
            return Err(AppError::BadRequest(format!(
                "at most {} message ids per request",
                self.policy.max_batch_size
            )));
        }

        let now = self.backends.clock.now();
        let messages = self
            .backends
            .store
            .get_many(req.conversation_id, &ids)
            .await?;
        let ctx = self.context(&conversation, req.actor_id, now, req.window_secs);

        let mut apply = Vec::new();
        let mut satisfied = Vec::new();
        let mut skipped = Vec::new();

        for id in ids {
            let decision = match messages.iter().find(|m| m.id == id) {
                Some(message) => policy::authorize(req.op, &ctx, message),
                None => Err(Denial::NotFound),
            };
            match decision {
                Ok(Decision::Apply(t)) => apply.push((id, t)),
                Ok(Decision::AlreadySatisfied) => satisfied.push(id),
                // A stale id on a single-purpose delete is success with zero effect.
                Err(Denial::NotFound) if req.strict => satisfied.push(id),
                Err(denial) if req.strict => return Err(denial.into()),
                Err(denial) => skipped.push(SkippedMessage::new(id, denial)),
            }
        }

        Ok(Plan {
            conversation,
            now,
            apply,
            satisfied,
            skipped,
        })
    }

    /// Apply one transition through the store's atomic primitives.
    /// Returns false when the message was already in the target state.
    async fn commit(
        &self,
        message_id: Uuid,
        transition: Transition,
        actor_id: Uuid,
        now: DateTime<Utc>,
        release_media: bool,
    ) -> AppResult<bool> {
        let store = &self.backends.store;
        match transition {
            Transition::HideForMe => store.add_deleted_for(message_id, actor_id, now).await,
            Transition::DeleteForEveryone => store.mark_deleted_for_everyone(message_id, now).await,
            Transition::SoftDelete => store.mark_soft_deleted(message_id, now).await,
            Transition::SetAutoDelete { expires_at } => store.set_auto_delete(message_id, expires_at).await,
            Transition::HardDelete => {
                let outcome = store.mark_hard_deleted(message_id, now).await?;
                if let (Some(media_ref), true) = (outcome.media_ref, release_media) {
                    self.release_or_schedule(message_id, media_ref, now).await;
                }
                Ok(outcome.applied)
            }
            Transition::ReleaseMedia => match store.take_media_ref(message_id).await? {
                Some(media_ref) => {
                    self.release_or_schedule(message_id, media_ref, now).await;
                    Ok(true)
                }
                None => Ok(false),
            },
        }
    }

    /// Release a detached blob. A failure never fails the visibility
    /// transition; it is recorded for the retention sweep instead.
    async fn release_or_schedule(&self, message_id: Uuid, media_ref: String, now: DateTime<Utc>) {
        let Err(e) = self.backends.blobs.release_media(&media_ref).await else {
            return;
        };

        metrics::record_media_release_failure();
        tracing::warn!(
            message_id = %message_id,
            media_ref = %media_ref,
            error = %e,
            "media release failed, scheduling retry"
        );

        let release = MediaRelease {
            media_ref,
            attempts: 1,
            next_attempt_at: now + self.retention.media_release_backoff(0),
            last_error: Some(e.to_string()),
            exhausted: false,
        };
        if let Err(e) = self.backends.store.save_media_release(message_id, release).await {
            tracing::error!(message_id = %message_id, error = %e, "failed to record pending media release");
        }
    }

    /// Recompute the shared last-message pointer from the store.
    ///
    /// Two refreshes can each read a candidate that the other one is about to
    /// hide. After writing, the stored pointer is checked against the store; a
    /// pointer that is no longer publicly visible is itself invalidated and the
    /// recomputation runs again.
    async fn refresh_summary(&self, conversation_id: Uuid, invalidated: &[Uuid]) -> AppResult<()> {
        let mut invalidated = invalidated.to_vec();

        for _ in 0..SUMMARY_REFRESH_ATTEMPTS {
            let query = VisibilityQuery::public(conversation_id, self.backends.clock.now());
            let latest = self.backends.store.latest_visible(&query).await?;
            let candidate = latest.as_ref().map(LastMessage::from);

            let changed = self
                .backends
                .ledger
                .replace_last_message(conversation_id, candidate, &invalidated)
                .await?;
            if changed {
                tracing::debug!(conversation_id = %conversation_id, "conversation summary recomputed");
            }

            let Some(current) = self
                .backends
                .ledger
                .get(conversation_id)
                .await?
                .and_then(|c| c.last_message())
            else {
                return Ok(());
            };
            let query = VisibilityQuery::public(conversation_id, self.backends.clock.now());
            let still_visible = self
                .backends
                .store
                .get(current.message_id)
                .await?
                .is_some_and(|m| query.matches(&m));
            if still_visible {
                return Ok(());
            }

            tracing::debug!(
                conversation_id = %conversation_id,
                message_id = %current.message_id,
                "summary points at a hidden message, recomputing"
            );
            invalidated = vec![current.message_id];
        }

        tracing::warn!(
            conversation_id = %conversation_id,
            "conversation summary still stale after {} attempts",
            SUMMARY_REFRESH_ATTEMPTS
        );
        Ok(())
    }

    /// Publish the change and queue it for offline recipients. Failures here
    /// are logged; the transition has already committed.
    async fn announce(
        &self,
        conversation: &Conversation,
        actor_id: Uuid,
        transition: Transition,
        message_ids: &[Uuid],
        fanout: Fanout<'_>,
        now: DateTime<Utc>,
    ) -> Vec<Uuid> {
        let event = RealtimeEvent::MessageDeleted {
            conversation_id: conversation.id,
            message_ids: message_ids.to_vec(),
            transition,
            actor_id,
            timestamp: now,
        };

        // A private hide only syncs the actor's other sessions.
        if !transition.is_shared() {
            self.publish(&user_topic(actor_id), &event).await;
            return Vec::new();
        }

        self.publish(&conversation_topic(conversation.id), &event).await;

        let candidates: Vec<Uuid> = match fanout {
            Fanout::OfflineParticipants => conversation.other_participants(actor_id).collect(),
            Fanout::Recipients(ids) => dedup(ids)
                .into_iter()
                .filter(|id| *id != actor_id && conversation.is_participant(*id))
                .collect(),
        };

        let presence = futures::future::join_all(
            candidates
                .iter()
                .map(|id| self.backends.presence.is_online(*id)),
        )
        .await;

        let mut queued_for = Vec::new();
        for (recipient_id, lookup) in candidates.into_iter().zip(presence) {
            let online = match lookup {
                Ok(online) => online,
                Err(e) => {
                    tracing::warn!(recipient_id = %recipient_id, error = %e, "presence lookup failed, treating as offline");
                    false
                }
            };
            if online {
                continue;
            }

            let entry = GraceEntry::new(
                conversation.id,
                recipient_id,
                actor_id,
                message_ids.to_vec(),
                transition,
                now,
            );
            match self.backends.grace.enqueue(entry).await {
                Ok(()) => queued_for.push(recipient_id),
                Err(e) => tracing::error!(
                    recipient_id = %recipient_id,
                    conversation_id = %conversation.id,
                    error = %e,
                    "failed to queue deferred deletion"
                ),
            }
        }

        metrics::record_grace_enqueued(queued_for.len() as u64);
        queued_for
    }

    async fn publish(&self, topic: &str, event: &RealtimeEvent) {
        if let Err(e) = self.backends.notifier.publish(topic, event).await {
            tracing::warn!(topic, error = %e, "realtime publish failed");
        }
    }
}

fn op_affects_summary(op: PolicyOp) -> bool {
    matches!(
        op,
        PolicyOp::DeleteForEveryone
            | PolicyOp::AdminDelete
            | PolicyOp::UnsentDelete
            | PolicyOp::HardDelete
            | PolicyOp::SoftDelete
    )
}

/// Transition an operation resolves to when no message needed applying.
fn nominal_transition(op: PolicyOp) -> Option<Transition> {
    match op {
        PolicyOp::DeleteForMe => Some(Transition::HideForMe),
        PolicyOp::DeleteForEveryone | PolicyOp::AdminDelete | PolicyOp::UnsentDelete => {
            Some(Transition::DeleteForEveryone)
        }
        PolicyOp::HardDelete => Some(Transition::HardDelete),
        PolicyOp::SoftDelete => Some(Transition::SoftDelete),
        PolicyOp::MediaDelete => Some(Transition::ReleaseMedia),
        PolicyOp::SetAutoDelete { .. } => None,
    }
}

/// Order-preserving dedup.
fn dedup(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{LocalBlobStore, StaticPresence};
    use crate::store::MessageStore;
    use chrono::Duration;
    use std::sync::Arc;

    struct Harness {
        service: DeletionService,
        backends: Backends,
        blobs: Arc<LocalBlobStore>,
        presence: Arc<StaticPresence>,
    }

    fn harness() -> Harness {
        let blobs = Arc::new(LocalBlobStore::new());
        let presence = Arc::new(StaticPresence::new());
        let mut backends = Backends::in_memory();
        backends.blobs = blobs.clone();
        backends.presence = presence.clone();
        Harness {
            service: DeletionService::new(
                backends.clone(),
                DeletionPolicyConfig::default(),
                RetentionConfig::default(),
            ),
            backends,
            blobs,
            presence,
        }
    }

    async fn direct_chat(h: &Harness) -> (Uuid, Uuid, Uuid) {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let conv = Conversation::direct(a, b, Utc::now());
        let id = conv.id;
        h.backends.ledger.create(conv).await.unwrap();
        (id, a, b)
    }

    async fn send(h: &Harness, conv: Uuid, sender: Uuid, media: Option<&str>) -> Uuid {
        let m = Message::new(conv, sender, "hello", media.map(String::from), Utc::now());
        let id = m.id;
        h.backends.store.insert(m).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_single_purpose_request_is_all_or_nothing() {
        let h = harness();
        let (conv, a, b) = direct_chat(&h).await;
        let mine = send(&h, conv, a, None).await;
        let theirs = send(&h, conv, b, None).await;

        let err = h
            .service
            .delete_for_everyone(conv, a, &[mine, theirs], None)
            .await
            .unwrap_err();

        assert_eq!(err.code(), "access_denied");
        let m = h.backends.store.get(mine).await.unwrap().unwrap();
        assert!(!m.deletion.deleted_for_everyone);
    }

    #[tokio::test]
    async fn test_failed_release_is_scheduled_and_transition_holds() {
        let h = harness();
        let (conv, a, _) = direct_chat(&h).await;
        h.blobs.insert("media/x.jpg", vec![0]);
        let id = send(&h, conv, a, Some("media/x.jpg")).await;
        h.blobs.fail_next_releases(1);

        let outcome = h.service.hard_delete(conv, a, &[id], true).await.unwrap();

        assert_eq!(outcome.deleted_count(), 1);
        let m = h.backends.store.get(id).await.unwrap().unwrap();
        assert!(m.deletion.hard_deleted);
        let pending = m.media_release.unwrap();
        assert_eq!(pending.attempts, 1);
        assert_eq!(pending.media_ref, "media/x.jpg");
        assert!(h.blobs.contains("media/x.jpg"));
    }

    #[tokio::test]
    async fn test_offline_participant_gets_grace_entry() {
        let h = harness();
        let (conv, a, b) = direct_chat(&h).await;
        let id = send(&h, conv, a, None).await;

        let outcome = h.service.delete_for_everyone(conv, a, &[id], None).await.unwrap();
        assert_eq!(outcome.queued_for, vec![b]);

        let drained = h.service.drain_grace_queue(b).await.unwrap();
        assert_eq!(drained.applied_count, 1);
        assert_eq!(h.service.drain_grace_queue(b).await.unwrap().applied_count, 0);
    }

    #[tokio::test]
    async fn test_online_participant_is_not_queued() {
        let h = harness();
        let (conv, a, b) = direct_chat(&h).await;
        h.presence.set_online(b, true);
        let id = send(&h, conv, a, None).await;

        let outcome = h.service.soft_delete(conv, a, &[id]).await.unwrap();

        assert_eq!(outcome.deleted_count(), 1);
        assert!(outcome.queued_for.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_is_zero_effect() {
        let h = harness();
        let (conv, a, _) = direct_chat(&h).await;

        let outcome = h
            .service
            .hard_delete(conv, a, &[Uuid::new_v4()], true)
            .await
            .unwrap();

        assert_eq!(outcome.deleted_count(), 0);
        assert_eq!(outcome.already_satisfied.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_backoff_then_exhaustion() {
        let h = harness();
        let (conv, a, _) = direct_chat(&h).await;
        let id = send(&h, conv, a, None).await;
        h.blobs.fail_next_releases(10);
        let mut release = MediaRelease {
            media_ref: "media/y".into(),
            attempts: 3,
            next_attempt_at: Utc::now() - Duration::seconds(1),
            last_error: None,
            exhausted: false,
        };

        assert!(h.service.retry_media_release(id, release.clone()).await.is_err());
        let saved = h.backends.store.get(id).await.unwrap().unwrap().media_release.unwrap();
        assert_eq!(saved.attempts, 4);
        assert!(!saved.exhausted);

        release.attempts = 4;
        assert!(h.service.retry_media_release(id, release).await.is_err());
        let saved = h.backends.store.get(id).await.unwrap().unwrap().media_release.unwrap();
        assert!(saved.exhausted);
    }
}
