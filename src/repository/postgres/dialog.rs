use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::dialog::{permissions_from_strings, permissions_to_strings};
use crate::models::{
    Dialog, DialogSettings, DialogType, LastMessagePreview, ModerationPolicy, Participant,
    ParticipantRole, Privacy,
};
use crate::repository::{DialogFilter, DialogRepository, Pagination, SortOrder};

#[derive(Clone)]
pub struct PostgresDialogRepository {
    pool: PgPool,
}

impl PostgresDialogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_dialog(row: &PgRow) -> AppResult<Dialog> {
    let dialog_type_raw: String = row.try_get("dialog_type")?;
    let dialog_type = DialogType::parse(&dialog_type_raw)
        .ok_or_else(|| AppError::Storage(format!("unknown dialog type: {dialog_type_raw}")))?;
    let privacy_raw: String = row.try_get("privacy")?;
    let privacy = Privacy::parse(&privacy_raw)
        .ok_or_else(|| AppError::Storage(format!("unknown privacy: {privacy_raw}")))?;

    let settings: DialogSettings = serde_json::from_value(row.try_get("settings")?)?;
    let moderation: ModerationPolicy = serde_json::from_value(row.try_get("moderation")?)?;

    let last_message = match (
        row.try_get::<Option<Uuid>, _>("last_message_id")?,
        row.try_get::<Option<Uuid>, _>("last_message_sender_id")?,
        row.try_get::<Option<String>, _>("last_message_preview")?,
        row.try_get::<Option<DateTime<Utc>>, _>("last_message_at")?,
    ) {
        (Some(message_id), Some(sender_id), Some(preview), Some(sent_at)) => {
            Some(LastMessagePreview {
                message_id,
                sender_id,
                preview,
                sent_at,
            })
        }
        _ => None,
    };

    Ok(Dialog {
        id: row.try_get("id")?,
        dialog_type,
        name: row.try_get("name")?,
        privacy,
        creator_id: row.try_get("creator_id")?,
        owner_id: row.try_get("owner_id")?,
        participant_count: row.try_get("participant_count")?,
        settings,
        moderation,
        last_message,
        message_count: row.try_get("message_count")?,
        unread_count: None,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        is_archived: row.try_get("is_archived")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn row_to_participant(row: &PgRow) -> AppResult<Participant> {
    let role_raw: String = row.try_get("role")?;
    let role = ParticipantRole::parse(&role_raw)
        .ok_or_else(|| AppError::Storage(format!("unknown role: {role_raw}")))?;
    let permissions_raw: Vec<String> = row.try_get("permissions")?;

    Ok(Participant {
        dialog_id: row.try_get("dialog_id")?,
        user_id: row.try_get("user_id")?,
        role,
        permissions: permissions_from_strings(&permissions_raw),
        joined_at: row.try_get("joined_at")?,
        last_read_at: row.try_get("last_read_at")?,
        is_active: row.try_get("is_active")?,
        is_muted: row.try_get("is_muted")?,
    })
}

const DIALOG_COLUMNS: &str = "id, dialog_type, name, privacy, creator_id, owner_id, \
     participant_count, settings, moderation, last_message_id, last_message_sender_id, \
     last_message_preview, last_message_at, message_count, created_at, updated_at, \
     is_archived, deleted_at";

#[async_trait]
impl DialogRepository for PostgresDialogRepository {
    async fn create_dialog(&self, dialog: &Dialog, participants: &[Participant]) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO dialogs (id, dialog_type, name, privacy, creator_id, owner_id, \
             participant_count, settings, moderation, message_count, created_at, updated_at, \
             is_archived) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(dialog.id)
        .bind(dialog.dialog_type.as_str())
        .bind(&dialog.name)
        .bind(dialog.privacy.as_str())
        .bind(dialog.creator_id)
        .bind(dialog.owner_id)
        .bind(participants.len() as i32)
        .bind(serde_json::to_value(&dialog.settings)?)
        .bind(serde_json::to_value(&dialog.moderation)?)
        .bind(dialog.message_count)
        .bind(dialog.created_at)
        .bind(dialog.updated_at)
        .bind(dialog.is_archived)
        .execute(&mut *tx)
        .await?;

        for participant in participants {
            sqlx::query(
                "INSERT INTO dialog_participants \
                 (dialog_id, user_id, role, permissions, joined_at, last_read_at, is_active, is_muted) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (dialog_id, user_id) DO NOTHING",
            )
            .bind(participant.dialog_id)
            .bind(participant.user_id)
            .bind(participant.role.as_str())
            .bind(permissions_to_strings(&participant.permissions))
            .bind(participant.joined_at)
            .bind(participant.last_read_at)
            .bind(participant.is_active)
            .bind(participant.is_muted)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(dialog_id = %dialog.id, "created dialog");
        Ok(())
    }

    async fn get_dialog(&self, id: Uuid) -> AppResult<Option<Dialog>> {
        let row = sqlx::query(&format!(
            "SELECT {DIALOG_COLUMNS} FROM dialogs WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_dialog).transpose()
    }

    async fn list_dialogs_for_user(
        &self,
        user_id: Uuid,
        filter: &DialogFilter,
        page: &Pagination,
    ) -> AppResult<Vec<Dialog>> {
        let order = match page.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let sql = format!(
            "SELECT d.id, d.dialog_type, d.name, d.privacy, d.creator_id, d.owner_id, \
                    d.participant_count, d.settings, d.moderation, d.last_message_id, \
                    d.last_message_sender_id, d.last_message_preview, d.last_message_at, \
                    d.message_count, d.created_at, d.updated_at, d.is_archived, d.deleted_at \
             FROM dialogs d \
             JOIN dialog_participants p ON p.dialog_id = d.id \
             WHERE p.user_id = $1 AND p.is_active \
               AND d.deleted_at IS NULL \
               AND ($2::text IS NULL OR d.dialog_type = $2) \
               AND ($3::boolean IS NULL OR d.is_archived = $3) \
               AND ($4::boolean IS NULL OR p.is_muted = $4) \
               AND ($5::timestamptz IS NULL OR d.updated_at >= $5) \
               AND ($6::timestamptz IS NULL OR d.updated_at <= $6) \
             ORDER BY d.updated_at {order} \
             LIMIT $7 OFFSET $8"
        );

        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(filter.dialog_type.map(|t| t.as_str()))
            .bind(filter.archived)
            .bind(filter.muted)
            .bind(filter.updated_after)
            .bind(filter.updated_before)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_dialog).collect()
    }

    async fn update_dialog(&self, dialog: &Dialog) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE dialogs SET name = $2, privacy = $3, owner_id = $4, settings = $5, \
             moderation = $6, is_archived = $7, deleted_at = $8, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(dialog.id)
        .bind(&dialog.name)
        .bind(dialog.privacy.as_str())
        .bind(dialog.owner_id)
        .bind(serde_json::to_value(&dialog.settings)?)
        .bind(serde_json::to_value(&dialog.moderation)?)
        .bind(dialog.is_archived)
        .bind(dialog.deleted_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn get_participant(
        &self,
        dialog_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<Participant>> {
        let row = sqlx::query(
            "SELECT dialog_id, user_id, role, permissions, joined_at, last_read_at, \
                    is_active, is_muted \
             FROM dialog_participants WHERE dialog_id = $1 AND user_id = $2",
        )
        .bind(dialog_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_participant).transpose()
    }

    async fn list_participants(&self, dialog_id: Uuid) -> AppResult<Vec<Participant>> {
        let rows = sqlx::query(
            "SELECT dialog_id, user_id, role, permissions, joined_at, last_read_at, \
                    is_active, is_muted \
             FROM dialog_participants WHERE dialog_id = $1 ORDER BY joined_at ASC",
        )
        .bind(dialog_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_participant).collect()
    }

    async fn upsert_participant(&self, participant: &Participant) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO dialog_participants \
             (dialog_id, user_id, role, permissions, joined_at, last_read_at, is_active, is_muted) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (dialog_id, user_id) DO UPDATE SET \
                 role = EXCLUDED.role, \
                 permissions = EXCLUDED.permissions, \
                 last_read_at = EXCLUDED.last_read_at, \
                 is_active = EXCLUDED.is_active, \
                 is_muted = EXCLUDED.is_muted",
        )
        .bind(participant.dialog_id)
        .bind(participant.user_id)
        .bind(participant.role.as_str())
        .bind(permissions_to_strings(&participant.permissions))
        .bind(participant.joined_at)
        .bind(participant.last_read_at)
        .bind(participant.is_active)
        .bind(participant.is_muted)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn refresh_participant_count(&self, dialog_id: Uuid) -> AppResult<i32> {
        let count: i32 = sqlx::query_scalar(
            "UPDATE dialogs SET participant_count = ( \
                 SELECT COUNT(*)::int FROM dialog_participants \
                 WHERE dialog_id = $1 AND is_active \
             ), updated_at = NOW() \
             WHERE id = $1 \
             RETURNING participant_count",
        )
        .bind(dialog_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound)?;

        Ok(count)
    }

    async fn update_last_message(
        &self,
        dialog_id: Uuid,
        preview: &LastMessagePreview,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE dialogs SET last_message_id = $2, last_message_sender_id = $3, \
             last_message_preview = $4, last_message_at = $5, \
             message_count = message_count + 1, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(dialog_id)
        .bind(preview.message_id)
        .bind(preview.sender_id)
        .bind(&preview.preview)
        .bind(preview.sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn search_dialogs(
        &self,
        user_id: Uuid,
        query: &str,
        limit: i64,
    ) -> AppResult<Vec<Dialog>> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query(
            "SELECT d.id, d.dialog_type, d.name, d.privacy, d.creator_id, d.owner_id, \
                    d.participant_count, d.settings, d.moderation, d.last_message_id, \
                    d.last_message_sender_id, d.last_message_preview, d.last_message_at, \
                    d.message_count, d.created_at, d.updated_at, d.is_archived, d.deleted_at \
             FROM dialogs d \
             JOIN dialog_participants p ON p.dialog_id = d.id \
             WHERE p.user_id = $1 AND p.is_active \
               AND d.deleted_at IS NULL \
               AND d.name ILIKE $2 \
             ORDER BY d.updated_at DESC \
             LIMIT $3",
        )
        .bind(user_id)
        .bind(pattern)
        .bind(limit.clamp(1, 100))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_dialog).collect()
    }
}
