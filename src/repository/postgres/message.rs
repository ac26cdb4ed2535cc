use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::message::MessageStats;
use crate::models::{Message, MessageContent, MessageStatus, MessageType, ReceiptStatus, ReplySnapshot};
use crate::repository::{MessageFilter, MessageRepository, Pagination, SortOrder};

#[derive(Clone)]
pub struct PostgresMessageRepository {
    pool: PgPool,
}

impl PostgresMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_message(row: &PgRow) -> AppResult<Message> {
    let message_type_raw: String = row.try_get("message_type")?;
    let message_type = MessageType::parse(&message_type_raw)
        .ok_or_else(|| AppError::Storage(format!("unknown message type: {message_type_raw}")))?;
    let status_raw: String = row.try_get("status")?;
    let status = MessageStatus::parse(&status_raw)
        .ok_or_else(|| AppError::Storage(format!("unknown message status: {status_raw}")))?;

    let content: MessageContent = serde_json::from_value(row.try_get("content")?)?;
    let reply_to: Option<ReplySnapshot> = row
        .try_get::<Option<serde_json::Value>, _>("reply_to")?
        .map(serde_json::from_value)
        .transpose()?;

    Ok(Message {
        id: row.try_get("id")?,
        dialog_id: row.try_get("dialog_id")?,
        sender_id: row.try_get("sender_id")?,
        message_type,
        content,
        reply_to,
        parent_id: row.try_get("parent_id")?,
        status,
        is_edited: row.try_get("is_edited")?,
        edited_at: row.try_get("edited_at")?,
        is_deleted: row.try_get("is_deleted")?,
        deleted_at: row.try_get("deleted_at")?,
        sent_at: row.try_get("sent_at")?,
    })
}

const MESSAGE_COLUMNS: &str = "id, dialog_id, sender_id, message_type, content, reply_to, \
     parent_id, status, is_edited, edited_at, is_deleted, deleted_at, sent_at";

#[async_trait]
impl MessageRepository for PostgresMessageRepository {
    async fn create_message(&self, message: &Message) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO messages (id, dialog_id, sender_id, message_type, content, reply_to, \
             parent_id, status, is_edited, is_deleted, sent_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(message.id)
        .bind(message.dialog_id)
        .bind(message.sender_id)
        .bind(message.message_type.as_str())
        .bind(serde_json::to_value(&message.content)?)
        .bind(
            message
                .reply_to
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(message.parent_id)
        .bind(message.status.as_str())
        .bind(message.is_edited)
        .bind(message.is_deleted)
        .bind(message.sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_message).transpose()
    }

    async fn list_dialog_messages(
        &self,
        dialog_id: Uuid,
        filter: &MessageFilter,
        page: &Pagination,
    ) -> AppResult<Vec<Message>> {
        let order = match page.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE dialog_id = $1 \
               AND ($2::uuid IS NULL OR sender_id = $2) \
               AND ($3::text IS NULL OR message_type = $3) \
               AND ($4::boolean IS NULL OR is_edited = $4) \
               AND ($5::boolean IS NULL OR is_deleted = $5) \
               AND ($6::timestamptz IS NULL OR sent_at >= $6) \
               AND ($7::timestamptz IS NULL OR sent_at <= $7) \
             ORDER BY sent_at {order} \
             LIMIT $8 OFFSET $9"
        );

        let rows = sqlx::query(&sql)
            .bind(dialog_id)
            .bind(filter.sender_id)
            .bind(filter.message_type.map(|t| t.as_str()))
            .bind(filter.edited)
            .bind(filter.deleted)
            .bind(filter.sent_after)
            .bind(filter.sent_before)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_message).collect()
    }

    async fn update_message(&self, message: &Message) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE messages SET content = $2, is_edited = $3, edited_at = $4, status = $5 \
             WHERE id = $1",
        )
        .bind(message.id)
        .bind(serde_json::to_value(&message.content)?)
        .bind(message.is_edited)
        .bind(message.edited_at)
        .bind(message.status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn soft_delete_message(&self, id: Uuid, deleted_at: DateTime<Utc>) -> AppResult<()> {
        let result =
            sqlx::query("UPDATE messages SET is_deleted = TRUE, deleted_at = $2 WHERE id = $1")
                .bind(id)
                .bind(deleted_at)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn upsert_receipt(
        &self,
        message_id: Uuid,
        dialog_id: Uuid,
        user_id: Uuid,
        status: ReceiptStatus,
    ) -> AppResult<bool> {
        // The WHERE clause makes repeats and read->delivered downgrades no-ops,
        // so rows_affected doubles as the "state actually changed" signal.
        let result = sqlx::query(
            "INSERT INTO message_receipts (message_id, user_id, dialog_id, status, updated_at) \
             VALUES ($1, $2, $3, $4, NOW()) \
             ON CONFLICT (message_id, user_id) DO UPDATE \
             SET status = EXCLUDED.status, updated_at = NOW() \
             WHERE message_receipts.status <> EXCLUDED.status \
               AND NOT (message_receipts.status = 'read' AND EXCLUDED.status = 'delivered')",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(dialog_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn unread_count(
        &self,
        dialog_id: Uuid,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::bigint FROM messages \
             WHERE dialog_id = $1 AND sender_id <> $2 AND is_deleted = FALSE \
               AND ($3::timestamptz IS NULL OR sent_at > $3)",
        )
        .bind(dialog_id)
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn last_sender_message_at(
        &self,
        dialog_id: Uuid,
        sender_id: Uuid,
    ) -> AppResult<Option<DateTime<Utc>>> {
        let at: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX(sent_at) FROM messages WHERE dialog_id = $1 AND sender_id = $2",
        )
        .bind(dialog_id)
        .bind(sender_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(at)
    }

    async fn search_messages(
        &self,
        dialog_id: Uuid,
        query: &str,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE dialog_id = $1 AND is_deleted = FALSE \
               AND content->>'text' ILIKE $2 \
             ORDER BY sent_at DESC \
             LIMIT $3"
        ))
        .bind(dialog_id)
        .bind(pattern)
        .bind(limit.clamp(1, 100))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    async fn message_stats(&self, dialog_id: Uuid) -> AppResult<MessageStats> {
        let row = sqlx::query(
            "SELECT COUNT(*)::bigint AS total, \
                    COUNT(*) FILTER (WHERE is_deleted)::bigint AS deleted, \
                    COUNT(*) FILTER (WHERE is_edited)::bigint AS edited, \
                    MIN(sent_at) AS first_sent_at, \
                    MAX(sent_at) AS last_sent_at \
             FROM messages WHERE dialog_id = $1",
        )
        .bind(dialog_id)
        .fetch_one(&self.pool)
        .await?;

        let by_type_rows = sqlx::query(
            "SELECT message_type, COUNT(*)::bigint AS count \
             FROM messages WHERE dialog_id = $1 GROUP BY message_type ORDER BY count DESC",
        )
        .bind(dialog_id)
        .fetch_all(&self.pool)
        .await?;

        let by_type = by_type_rows
            .iter()
            .map(|r| {
                let t: String = r.try_get("message_type")?;
                let c: i64 = r.try_get("count")?;
                Ok((t, c))
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(MessageStats {
            total: row.try_get("total")?,
            deleted: row.try_get("deleted")?,
            edited: row.try_get("edited")?,
            by_type,
            first_sent_at: row.try_get("first_sent_at")?,
            last_sent_at: row.try_get("last_sent_at")?,
        })
    }
}
