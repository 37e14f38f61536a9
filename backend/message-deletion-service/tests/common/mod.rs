#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use message_deletion_service::clock::Clock;
use message_deletion_service::collaborators::{InProcessNotifier, LocalBlobStore, StaticPresence};
use message_deletion_service::config::{AppConfig, Config, DeletionPolicyConfig, RetentionConfig};
use message_deletion_service::grace_queue::InMemoryGraceQueue;
use message_deletion_service::ledger::ConversationLedger;
use message_deletion_service::models::{Conversation, Message};
use message_deletion_service::services::{Backends, IngestMessage};
use message_deletion_service::state::AppState;

pub const OPERATOR_TOKEN: &str = "test-operator-token";

/// Clock the tests move by hand
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap() = at;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub fn test_config() -> Config {
    Config {
        app: AppConfig {
            env: "test".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: None,
        redis: None,
        policy: DeletionPolicyConfig::default(),
        retention: RetentionConfig::default(),
        s3: None,
        permission_service_url: None,
        admin_api_token: Some(OPERATOR_TOKEN.to_string()),
    }
}

/// In-memory service with handles on the collaborators tests need to steer
pub struct TestApp {
    pub state: AppState,
    pub clock: Arc<FixedClock>,
    pub blobs: Arc<LocalBlobStore>,
    pub presence: Arc<StaticPresence>,
    pub notifier: Arc<InProcessNotifier>,
    pub grace: Arc<InMemoryGraceQueue>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        Self::build(config, None)
    }

    /// Default harness over a caller-supplied conversation ledger
    pub fn with_ledger(ledger: Arc<dyn ConversationLedger>) -> Self {
        Self::build(test_config(), Some(ledger))
    }

    fn build(config: Config, ledger: Option<Arc<dyn ConversationLedger>>) -> Self {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));
        let blobs = Arc::new(LocalBlobStore::new());
        let presence = Arc::new(StaticPresence::new());
        let notifier = Arc::new(InProcessNotifier::default());
        let grace = Arc::new(InMemoryGraceQueue::with_ttl(
            config.retention.grace_queue_ttl_secs,
        ));

        let mut backends = Backends::in_memory();
        backends.clock = clock.clone();
        backends.blobs = blobs.clone();
        backends.presence = presence.clone();
        backends.notifier = notifier.clone();
        backends.grace = grace.clone();
        if let Some(ledger) = ledger {
            backends.ledger = ledger;
        }

        Self {
            state: AppState::from_backends(config, backends),
            clock,
            blobs,
            presence,
            notifier,
            grace,
        }
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn backends(&self) -> &Backends {
        &self.state.backends
    }

    pub async fn direct_chat(&self) -> (Uuid, Uuid, Uuid) {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let conv = Conversation::direct(a, b, self.clock.now());
        let id = conv.id;
        self.backends().ledger.create(conv).await.unwrap();
        (id, a, b)
    }

    /// Group with one admin and the given number of plain members
    pub async fn group_chat(&self, members: usize) -> (Uuid, Uuid, Vec<Uuid>) {
        let admin = Uuid::new_v4();
        let members: Vec<Uuid> = (0..members).map(|_| Uuid::new_v4()).collect();
        let conv = Conversation::group(admin, members.clone(), self.clock.now());
        let id = conv.id;
        self.backends().ledger.create(conv).await.unwrap();
        (id, admin, members)
    }

    /// Send through the compose hook; the clock moves one second after each message.
    pub async fn send(&self, conversation_id: Uuid, sender_id: Uuid, content: &str) -> Uuid {
        self.send_with(conversation_id, sender_id, content, None, None).await
    }

    pub async fn send_with(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
        media_ref: Option<&str>,
        auto_delete_secs: Option<i64>,
    ) -> Uuid {
        if let Some(media) = media_ref {
            self.blobs.insert(media, vec![1, 2, 3]);
        }
        let message = self
            .state
            .conversations
            .ingest_message(
                conversation_id,
                sender_id,
                IngestMessage {
                    content: content.to_string(),
                    media_ref: media_ref.map(String::from),
                    auto_delete_secs,
                    created_at: None,
                },
            )
            .await
            .unwrap();
        self.clock.advance(Duration::seconds(1));
        message.id
    }

    pub async fn message(&self, id: Uuid) -> Message {
        self.backends().store.get(id).await.unwrap().unwrap()
    }

    /// Every id the viewer can see, oldest first
    pub async fn visible_ids(&self, conversation_id: Uuid, viewer_id: Uuid) -> Vec<Uuid> {
        self.state
            .visibility
            .list_visible_messages(conversation_id, viewer_id, Some(1), Some(100))
            .await
            .unwrap()
            .messages
            .into_iter()
            .map(|m| m.id)
            .collect()
    }
}
