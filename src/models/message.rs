use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Voice,
    File,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Video => "video",
            MessageType::Voice => "voice",
            MessageType::File => "file",
            MessageType::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(MessageType::Text),
            "image" => Some(MessageType::Image),
            "video" => Some(MessageType::Video),
            "voice" => Some(MessageType::Voice),
            "file" => Some(MessageType::File),
            "system" => Some(MessageType::System),
            _ => None,
        }
    }
}

/// Type-tagged message payload. Serialized as JSON in both backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    Media {
        file_name: String,
        mime_type: String,
        size_bytes: i64,
        url: Option<String>,
    },
    Voice {
        duration_ms: i64,
        size_bytes: i64,
        url: Option<String>,
    },
    System {
        text: String,
    },
}

impl MessageContent {
    /// Human-readable preview for last-message and reply snapshots.
    pub fn preview_text(&self) -> String {
        match self {
            MessageContent::Text { text } | MessageContent::System { text } => {
                super::dialog::truncate_preview(text)
            }
            MessageContent::Media { file_name, .. } => format!("[file] {file_name}"),
            MessageContent::Voice { duration_ms, .. } => {
                format!("[voice] {}s", duration_ms / 1_000)
            }
        }
    }

    /// Validate the payload against the type-specific rules.
    pub fn validate(
        &self,
        message_type: MessageType,
        max_text_chars: usize,
        max_file_bytes: i64,
    ) -> AppResult<()> {
        match (message_type, self) {
            (MessageType::Text, MessageContent::Text { text })
            | (MessageType::System, MessageContent::System { text }) => {
                if text.trim().is_empty() {
                    return Err(AppError::Validation("message content is empty".into()));
                }
                let chars = text.chars().count();
                if chars > max_text_chars {
                    return Err(AppError::Validation(format!(
                        "message length {chars} exceeds max {max_text_chars}"
                    )));
                }
                Ok(())
            }
            (
                MessageType::Image | MessageType::Video | MessageType::File,
                MessageContent::Media { size_bytes, .. },
            ) => {
                if *size_bytes <= 0 {
                    return Err(AppError::Validation("file size must be positive".into()));
                }
                if *size_bytes > max_file_bytes {
                    return Err(AppError::Validation(format!(
                        "file size {size_bytes} exceeds max {max_file_bytes} bytes"
                    )));
                }
                Ok(())
            }
            (MessageType::Voice, MessageContent::Voice { duration_ms, .. }) => {
                if *duration_ms <= 0 {
                    return Err(AppError::Validation(
                        "voice message requires a positive duration".into(),
                    ));
                }
                Ok(())
            }
            _ => Err(AppError::Validation(format!(
                "content payload does not match message type {}",
                message_type.as_str()
            ))),
        }
    }
}

/// Denormalized snapshot of the replied-to message, captured at send time
/// so reads never join back into the message store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplySnapshot {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub preview: String,
    pub message_type: MessageType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sent" => Some(MessageStatus::Sent),
            "delivered" => Some(MessageStatus::Delivered),
            "read" => Some(MessageStatus::Read),
            "failed" => Some(MessageStatus::Failed),
            _ => None,
        }
    }
}

/// Per-recipient receipt state; read implies delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Delivered,
    Read,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Delivered => "delivered",
            ReceiptStatus::Read => "read",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "delivered" => Some(ReceiptStatus::Delivered),
            "read" => Some(ReceiptStatus::Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub dialog_id: Uuid,
    pub sender_id: Uuid,
    pub message_type: MessageType,
    pub content: MessageContent,
    pub reply_to: Option<ReplySnapshot>,
    pub parent_id: Option<Uuid>,
    pub status: MessageStatus,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub sent_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        dialog_id: Uuid,
        sender_id: Uuid,
        message_type: MessageType,
        content: MessageContent,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            dialog_id,
            sender_id,
            message_type,
            content,
            reply_to: None,
            parent_id: None,
            status: MessageStatus::Sent,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            sent_at: Utc::now(),
        }
    }
}

/// Per-dialog aggregates surfaced by `get_message_stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageStats {
    pub total: i64,
    pub deleted: i64,
    pub edited: i64,
    pub by_type: Vec<(String, i64)>,
    pub first_sent_at: Option<DateTime<Utc>>,
    pub last_sent_at: Option<DateTime<Utc>>,
}
