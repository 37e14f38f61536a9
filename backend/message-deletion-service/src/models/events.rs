use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::policy::Transition;

/// Payload published to the real-time fan-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    MessageDeleted {
        conversation_id: Uuid,
        message_ids: Vec<Uuid>,
        transition: Transition,
        actor_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    /// Replayed from the grace queue when a recipient reconnects
    DeferredDeletion {
        conversation_id: Uuid,
        message_ids: Vec<Uuid>,
        transition: Transition,
        enqueued_at: DateTime<Utc>,
    },
}

pub fn conversation_topic(conversation_id: Uuid) -> String {
    format!("conversation:{}", conversation_id)
}

pub fn user_topic(user_id: Uuid) -> String {
    format!("user:{}", user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = RealtimeEvent::MessageDeleted {
            conversation_id: Uuid::nil(),
            message_ids: vec![Uuid::nil()],
            transition: Transition::DeleteForEveryone,
            actor_id: Uuid::nil(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message_deleted");
        assert_eq!(json["transition"]["kind"], "delete_for_everyone");
    }
}
