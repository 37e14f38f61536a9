use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::SystemClock;
use crate::collaborators::{
    AllowAllPermissions, BlobStore, HttpPermissionService, LocalBlobStore, NoopNotifier,
    Notifier, PermissionService, PresenceService, RedisNotifier, RedisPresence, S3BlobStore,
    StaticPresence,
};
use crate::config::{Config, DatabaseConfig};
use crate::error::AppResult;
use crate::grace_queue::{GraceQueue, InMemoryGraceQueue, RedisGraceQueue};
use crate::jobs::RetentionSweeper;
use crate::ledger::{ConversationLedger, InMemoryLedger, PgConversationLedger};
use crate::services::{Backends, ConversationService, DeletionService, VisibilityService};
use crate::store::{InMemoryMessageStore, MessageStore, PgMessageStore};

/// Shared state handed to every handler through `web::Data`
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub backends: Backends,
    pub deletion: Arc<DeletionService>,
    pub visibility: Arc<VisibilityService>,
    pub conversations: Arc<ConversationService>,
    pub sweeper: Arc<RetentionSweeper>,
    pub pg: Option<PgPool>,
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    /// Connect the configured backends, falling back to in-process ones.
    pub async fn connect(config: Config) -> AppResult<Self> {
        let pg = match &config.database {
            Some(db) => Some(connect_postgres(db).await?),
            None => {
                tracing::warn!("DATABASE_URL not set, messages are kept in memory");
                None
            }
        };

        let redis = match &config.redis {
            Some(redis_config) => {
                let client = redis::Client::open(redis_config.url.as_str())?;
                let conn = ConnectionManager::new(client).await?;
                tracing::info!("Redis connection established");
                Some(conn)
            }
            None => {
                tracing::warn!("REDIS_URL not set, grace queue and presence run in-process");
                None
            }
        };

        let (store, ledger): (Arc<dyn MessageStore>, Arc<dyn ConversationLedger>) = match &pg {
            Some(pool) => (
                Arc::new(PgMessageStore::new(pool.clone())),
                Arc::new(PgConversationLedger::new(pool.clone())),
            ),
            None => (Arc::new(InMemoryMessageStore::new()), Arc::new(InMemoryLedger::new())),
        };

        let (grace, notifier, presence): (
            Arc<dyn GraceQueue>,
            Arc<dyn Notifier>,
            Arc<dyn PresenceService>,
        ) = match &redis {
            Some(conn) => (
                Arc::new(RedisGraceQueue::new(
                    conn.clone(),
                    config.retention.grace_queue_ttl_secs,
                )),
                Arc::new(RedisNotifier::new(conn.clone())),
                Arc::new(RedisPresence::new(conn.clone())),
            ),
            None => (
                Arc::new(InMemoryGraceQueue::with_ttl(
                    config.retention.grace_queue_ttl_secs,
                )),
                Arc::new(NoopNotifier),
                Arc::new(StaticPresence::new()),
            ),
        };

        let blobs: Arc<dyn BlobStore> = match &config.s3 {
            Some(s3) => Arc::new(S3BlobStore::from_config(s3).await),
            None => {
                tracing::warn!("S3_BUCKET not set, media releases are local only");
                Arc::new(LocalBlobStore::new())
            }
        };

        let permissions: Arc<dyn PermissionService> = match &config.permission_service_url {
            Some(url) => Arc::new(HttpPermissionService::new(url)?),
            None => {
                tracing::warn!("PERMISSION_SERVICE_URL not set, every pair may message");
                Arc::new(AllowAllPermissions)
            }
        };

        let backends = Backends {
            store,
            ledger,
            grace,
            blobs,
            notifier,
            presence,
            permissions,
            clock: Arc::new(SystemClock),
        };

        let mut state = Self::from_backends(config, backends);
        state.pg = pg;
        state.redis = redis;
        Ok(state)
    }

    /// Wire services over already-built backends.
    pub fn from_backends(config: Config, backends: Backends) -> Self {
        let deletion = Arc::new(DeletionService::new(
            backends.clone(),
            config.policy.clone(),
            config.retention.clone(),
        ));
        let visibility = Arc::new(VisibilityService::new(backends.clone(), config.policy.clone()));
        let conversations = Arc::new(ConversationService::new(backends.clone()));
        let sweeper = Arc::new(RetentionSweeper::new(
            deletion.clone(),
            backends.store.clone(),
            backends.clock.clone(),
            config.retention.clone(),
        ));

        Self {
            config: Arc::new(config),
            backends,
            deletion,
            visibility,
            conversations,
            sweeper,
            pg: None,
            redis: None,
        }
    }
}

async fn connect_postgres(db: &DatabaseConfig) -> AppResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .min_connections(db.min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&db.url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!(
        max_connections = db.max_connections,
        "PostgreSQL pool ready, migrations applied"
    );
    Ok(pool)
}
