//! Domain events published for cross-service consumption and real-time fan-out.
//!
//! All events follow the "object.action" naming convention and serialize into a
//! flat JSON structure:
//!
//! ```json
//! {
//!     "type": "message.sent",
//!     "timestamp": "2026-08-30T10:30:00Z",
//!     "dialog_id": "uuid",
//!     ...event fields
//! }
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MessageType, ParticipantRole, PresenceStatus};

/// The enum is exhaustive - all published event types are explicitly listed.
///
/// Serialization is centralized in `to_broadcast_payload()`; the enum does NOT
/// use `serde(tag = ...)` to avoid double-nesting in the broadcast envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    DialogCreated {
        dialog_id: Uuid,
        dialog_type: String,
        creator_id: Uuid,
    },
    ParticipantAdded {
        dialog_id: Uuid,
        user_id: Uuid,
        role: ParticipantRole,
        acting_id: Uuid,
    },
    ParticipantRemoved {
        dialog_id: Uuid,
        user_id: Uuid,
        acting_id: Uuid,
    },
    ParticipantPromoted {
        dialog_id: Uuid,
        user_id: Uuid,
        old_role: ParticipantRole,
        new_role: ParticipantRole,
        acting_id: Uuid,
    },
    DialogArchived {
        dialog_id: Uuid,
        acting_id: Uuid,
    },
    MessageSent {
        dialog_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        message_type: MessageType,
        preview: String,
    },
    MessageEdited {
        dialog_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
    },
    MessageDeleted {
        dialog_id: Uuid,
        message_id: Uuid,
        acting_id: Uuid,
        for_everyone: bool,
    },
    MessageRead {
        dialog_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
    },
    MessageDelivered {
        dialog_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
    },
    PresenceChanged {
        user_id: Uuid,
        status: PresenceStatus,
        activity: Option<String>,
    },
}

impl DomainEvent {
    /// Get event type as string (e.g., "message.sent")
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::DialogCreated { .. } => "dialog.created",
            Self::ParticipantAdded { .. } => "dialog.participant_added",
            Self::ParticipantRemoved { .. } => "dialog.participant_removed",
            Self::ParticipantPromoted { .. } => "dialog.participant_promoted",
            Self::DialogArchived { .. } => "dialog.archived",
            Self::MessageSent { .. } => "message.sent",
            Self::MessageEdited { .. } => "message.edited",
            Self::MessageDeleted { .. } => "message.deleted",
            Self::MessageRead { .. } => "message.read",
            Self::MessageDelivered { .. } => "message.delivered",
            Self::PresenceChanged { .. } => "user.presence_changed",
        }
    }

    pub fn to_payload_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut payload = serde_json::json!({
            "type": self.event_type(),
            "timestamp": Utc::now().to_rfc3339(),
        });

        // Flatten event-specific fields into the payload
        let event_data = serde_json::to_value(self)?;
        if let serde_json::Value::Object(map) = event_data {
            for (_, inner) in map {
                if let serde_json::Value::Object(fields) = inner {
                    for (key, value) in fields {
                        payload[key] = value;
                    }
                }
            }
        }

        Ok(payload)
    }

    /// Convert event to a JSON string for Hub broadcasting.
    /// This is the only place where event serialization happens.
    pub fn to_broadcast_payload(&self) -> Result<String, serde_json::Error> {
        let value = self.to_payload_value()?;
        serde_json::to_string(&value)
    }
}
