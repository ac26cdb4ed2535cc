use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::macros::FromRow;
use scylla::Session;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::message::MessageStats;
use crate::models::{
    Message, MessageContent, MessageStatus, MessageType, ReceiptStatus, ReplySnapshot,
};
use crate::repository::{MessageFilter, MessageRepository, Pagination, SortOrder};

use super::{from_millis, opt_from_millis, opt_millis, to_millis};

// Partition scans for unread counts and rate-limit lookups stop after this
// many rows rather than walking an unbounded history.
const SCAN_CAP: i32 = 5_000;
const RATE_SCAN_CAP: i32 = 50;

#[derive(Clone)]
pub struct ScyllaMessageRepository {
    session: Arc<Session>,
}

impl ScyllaMessageRepository {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[derive(FromRow)]
struct MessageRow {
    dialog_id: Uuid,
    sent_at: i64,
    id: Uuid,
    sender_id: Uuid,
    message_type: String,
    content_json: String,
    reply_to_json: Option<String>,
    parent_id: Option<Uuid>,
    status: String,
    is_edited: bool,
    edited_at: Option<i64>,
    is_deleted: bool,
    deleted_at: Option<i64>,
}

const MESSAGE_COLUMNS: &str = "dialog_id, sent_at, id, sender_id, message_type, content_json, \
     reply_to_json, parent_id, status, is_edited, edited_at, is_deleted, deleted_at";

impl MessageRow {
    fn into_message(self) -> AppResult<Message> {
        let message_type = MessageType::parse(&self.message_type).ok_or_else(|| {
            AppError::Storage(format!("unknown message type: {}", self.message_type))
        })?;
        let status = MessageStatus::parse(&self.status)
            .ok_or_else(|| AppError::Storage(format!("unknown message status: {}", self.status)))?;
        let content: MessageContent = serde_json::from_str(&self.content_json)?;
        let reply_to: Option<ReplySnapshot> = self
            .reply_to_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Message {
            id: self.id,
            dialog_id: self.dialog_id,
            sender_id: self.sender_id,
            message_type,
            content,
            reply_to,
            parent_id: self.parent_id,
            status,
            is_edited: self.is_edited,
            edited_at: opt_from_millis(self.edited_at)?,
            is_deleted: self.is_deleted,
            deleted_at: opt_from_millis(self.deleted_at)?,
            sent_at: from_millis(self.sent_at)?,
        })
    }
}

impl ScyllaMessageRepository {
    /// Resolve the clustering key for a message id via the lookup table.
    async fn locate(&self, id: Uuid) -> AppResult<Option<(Uuid, i64)>> {
        let result = self
            .session
            .query(
                "SELECT dialog_id, sent_at FROM messages_by_id WHERE id = ?",
                (id,),
            )
            .await?;
        result
            .maybe_first_row_typed::<(Uuid, i64)>()
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    async fn fetch_row(&self, id: Uuid) -> AppResult<Option<MessageRow>> {
        let Some((dialog_id, sent_at)) = self.locate(id).await? else {
            return Ok(None);
        };
        let result = self
            .session
            .query(
                format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE dialog_id = ? AND sent_at = ? AND id = ?"
                ),
                (dialog_id, sent_at, id),
            )
            .await?;
        result
            .maybe_first_row_typed::<MessageRow>()
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    async fn scan_partition(&self, dialog_id: Uuid, cap: i32) -> AppResult<Vec<MessageRow>> {
        let result = self
            .session
            .query(
                format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE dialog_id = ? LIMIT ?"),
                (dialog_id, cap),
            )
            .await?;
        result
            .rows_typed::<MessageRow>()
            .map_err(|e| AppError::Storage(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| AppError::Storage(e.to_string()))
    }
}

#[async_trait]
impl MessageRepository for ScyllaMessageRepository {
    async fn create_message(&self, message: &Message) -> AppResult<()> {
        let sent_at = to_millis(message.sent_at);

        self.session
            .query(
                "INSERT INTO messages \
                 (dialog_id, sent_at, id, sender_id, message_type, content_json, reply_to_json, \
                  parent_id, status, is_edited, is_deleted) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    message.dialog_id,
                    sent_at,
                    message.id,
                    message.sender_id,
                    message.message_type.as_str(),
                    serde_json::to_string(&message.content)?,
                    message
                        .reply_to
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    message.parent_id,
                    message.status.as_str(),
                    message.is_edited,
                    message.is_deleted,
                ),
            )
            .await?;

        self.session
            .query(
                "INSERT INTO messages_by_id (id, dialog_id, sent_at) VALUES (?, ?, ?)",
                (message.id, message.dialog_id, sent_at),
            )
            .await?;
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        self.fetch_row(id)
            .await?
            .map(MessageRow::into_message)
            .transpose()
    }

    async fn list_dialog_messages(
        &self,
        dialog_id: Uuid,
        filter: &MessageFilter,
        page: &Pagination,
    ) -> AppResult<Vec<Message>> {
        // The partition is clustered newest-first; filtering and paging happen
        // client-side over a capped scan.
        let mut rows = self.scan_partition(dialog_id, SCAN_CAP).await?;

        rows.retain(|r| {
            filter.sender_id.map_or(true, |s| r.sender_id == s)
                && filter
                    .message_type
                    .map_or(true, |t| r.message_type == t.as_str())
                && filter.edited.map_or(true, |e| r.is_edited == e)
                && filter.deleted.map_or(true, |d| r.is_deleted == d)
                && filter
                    .sent_after
                    .map_or(true, |t| r.sent_at >= to_millis(t))
                && filter
                    .sent_before
                    .map_or(true, |t| r.sent_at <= to_millis(t))
        });

        match page.order {
            SortOrder::Asc => rows.sort_by_key(|r| (r.sent_at, r.id)),
            SortOrder::Desc => rows.sort_by_key(|r| (std::cmp::Reverse(r.sent_at), r.id)),
        }

        rows.into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .map(MessageRow::into_message)
            .collect()
    }

    async fn update_message(&self, message: &Message) -> AppResult<()> {
        let (dialog_id, sent_at) = self.locate(message.id).await?.ok_or(AppError::NotFound)?;

        self.session
            .query(
                "UPDATE messages SET content_json = ?, is_edited = ?, edited_at = ?, status = ? \
                 WHERE dialog_id = ? AND sent_at = ? AND id = ?",
                (
                    serde_json::to_string(&message.content)?,
                    message.is_edited,
                    opt_millis(message.edited_at),
                    message.status.as_str(),
                    dialog_id,
                    sent_at,
                    message.id,
                ),
            )
            .await?;
        Ok(())
    }

    async fn soft_delete_message(&self, id: Uuid, deleted_at: DateTime<Utc>) -> AppResult<()> {
        let (dialog_id, sent_at) = self.locate(id).await?.ok_or(AppError::NotFound)?;

        self.session
            .query(
                "UPDATE messages SET is_deleted = true, deleted_at = ? \
                 WHERE dialog_id = ? AND sent_at = ? AND id = ?",
                (to_millis(deleted_at), dialog_id, sent_at, id),
            )
            .await?;
        Ok(())
    }

    async fn upsert_receipt(
        &self,
        message_id: Uuid,
        dialog_id: Uuid,
        user_id: Uuid,
        status: ReceiptStatus,
    ) -> AppResult<bool> {
        // Read-compare-write; last-write-wins between racing receipts for the
        // same user is accepted.
        let result = self
            .session
            .query(
                "SELECT status FROM message_receipts WHERE message_id = ? AND user_id = ?",
                (message_id, user_id),
            )
            .await?;
        let current = result
            .maybe_first_row_typed::<(String,)>()
            .map_err(|e| AppError::Storage(e.to_string()))?
            .map(|(s,)| s);

        match current.as_deref() {
            Some(s) if s == status.as_str() => return Ok(false),
            Some("read") if status == ReceiptStatus::Delivered => return Ok(false),
            _ => {}
        }

        self.session
            .query(
                "INSERT INTO message_receipts (message_id, user_id, dialog_id, status, updated_at) \
                 VALUES (?, ?, ?, ?, ?)",
                (
                    message_id,
                    user_id,
                    dialog_id,
                    status.as_str(),
                    to_millis(Utc::now()),
                ),
            )
            .await?;
        Ok(true)
    }

    async fn unread_count(
        &self,
        dialog_id: Uuid,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<i64> {
        let rows = self.scan_partition(dialog_id, SCAN_CAP).await?;
        let since_millis = since.map(to_millis);

        let count = rows
            .iter()
            .filter(|r| {
                r.sender_id != user_id
                    && !r.is_deleted
                    && since_millis.map_or(true, |s| r.sent_at > s)
            })
            .count();
        Ok(count as i64)
    }

    async fn last_sender_message_at(
        &self,
        dialog_id: Uuid,
        sender_id: Uuid,
    ) -> AppResult<Option<DateTime<Utc>>> {
        // Newest-first clustering means the first matching row in a short scan
        // is the sender's latest message.
        let rows = self.scan_partition(dialog_id, RATE_SCAN_CAP).await?;
        rows.into_iter()
            .find(|r| r.sender_id == sender_id)
            .map(|r| from_millis(r.sent_at))
            .transpose()
    }

    async fn search_messages(
        &self,
        _dialog_id: Uuid,
        _query: &str,
        _limit: i64,
    ) -> AppResult<Vec<Message>> {
        Err(AppError::Unsupported(
            "message search requires ad-hoc text matching, not available on the wide-column \
             backend"
                .into(),
        ))
    }

    async fn message_stats(&self, dialog_id: Uuid) -> AppResult<MessageStats> {
        let rows = self.scan_partition(dialog_id, SCAN_CAP).await?;

        let total = rows.len() as i64;
        let deleted = rows.iter().filter(|r| r.is_deleted).count() as i64;
        let edited = rows.iter().filter(|r| r.is_edited).count() as i64;
        let first_sent_at = opt_from_millis(rows.iter().map(|r| r.sent_at).min())?;
        let last_sent_at = opt_from_millis(rows.iter().map(|r| r.sent_at).max())?;

        let mut by_type: Vec<(String, i64)> = Vec::new();
        for row in &rows {
            match by_type.iter_mut().find(|(t, _)| *t == row.message_type) {
                Some((_, c)) => *c += 1,
                None => by_type.push((row.message_type.clone(), 1)),
            }
        }
        by_type.sort_by_key(|(_, c)| std::cmp::Reverse(*c));

        Ok(MessageStats {
            total,
            deleted,
            edited,
            by_type,
            first_sent_at,
            last_sent_at,
        })
    }
}
