pub mod conversation;
pub mod events;
pub mod message;

pub use conversation::{Conversation, ConversationSummary, LastMessage};
pub use events::{conversation_topic, user_topic, RealtimeEvent};
pub use message::{
    AutoDelete, DeleteMode, DeletedByEntry, DeletionMetadata, MediaRelease, Message, MessageView,
    ReadReceipt, VisibilityState,
};
