pub mod conversation_service;
pub mod deletion_service;
pub mod visibility_service;

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::RetentionConfig;
use crate::collaborators::{
    AllowAllPermissions, BlobStore, InProcessNotifier, LocalBlobStore, Notifier,
    PermissionService, PresenceService, StaticPresence,
};
use crate::grace_queue::{GraceQueue, InMemoryGraceQueue};
use crate::ledger::{ConversationLedger, InMemoryLedger};
use crate::store::{InMemoryMessageStore, MessageStore};

pub use conversation_service::{ConversationService, IngestMessage, OpenConversation};
pub use deletion_service::{
    BulkOptions, DeletionOutcome, DeletionService, DrainOutcome, GraceOutcome,
    MediaDeleteOptions, MediaDeleteOutcome, SkippedMessage,
};
pub use visibility_service::{MarkReadOutcome, MessagePage, VisibilityService};

/// Storage and collaborator handles shared by every service
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn MessageStore>,
    pub ledger: Arc<dyn ConversationLedger>,
    pub grace: Arc<dyn GraceQueue>,
    pub blobs: Arc<dyn BlobStore>,
    pub notifier: Arc<dyn Notifier>,
    pub presence: Arc<dyn PresenceService>,
    pub permissions: Arc<dyn PermissionService>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// Everything in-process: no database, no Redis, no S3.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemoryMessageStore::new()),
            ledger: Arc::new(InMemoryLedger::new()),
            grace: Arc::new(InMemoryGraceQueue::with_ttl(
                RetentionConfig::default().grace_queue_ttl_secs,
            )),
            blobs: Arc::new(LocalBlobStore::new()),
            notifier: Arc::new(InProcessNotifier::default()),
            presence: Arc::new(StaticPresence::new()),
            permissions: Arc::new(AllowAllPermissions),
            clock: Arc::new(SystemClock),
        }
    }
}
