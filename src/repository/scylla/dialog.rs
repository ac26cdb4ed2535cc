use async_trait::async_trait;
use scylla::macros::FromRow;
use scylla::Session;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::dialog::{permissions_from_strings, permissions_to_strings};
use crate::models::{
    Dialog, DialogSettings, DialogType, LastMessagePreview, ModerationPolicy, Participant,
    ParticipantRole, Privacy,
};
use crate::repository::{DialogFilter, DialogRepository, Pagination, SortOrder};

use super::{from_millis, opt_from_millis, opt_millis, to_millis};

#[derive(Clone)]
pub struct ScyllaDialogRepository {
    session: Arc<Session>,
}

impl ScyllaDialogRepository {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[derive(FromRow)]
struct DialogRow {
    id: Uuid,
    dialog_type: String,
    name: String,
    privacy: String,
    creator_id: Uuid,
    owner_id: Uuid,
    participant_ids: Option<Vec<Uuid>>,
    participant_count: i32,
    settings_json: String,
    moderation_json: String,
    last_message_id: Option<Uuid>,
    last_message_sender_id: Option<Uuid>,
    last_message_preview: Option<String>,
    last_message_at: Option<i64>,
    message_count: i64,
    created_at: i64,
    updated_at: i64,
    is_archived: bool,
    deleted_at: Option<i64>,
}

const DIALOG_COLUMNS: &str = "id, dialog_type, name, privacy, creator_id, owner_id, \
     participant_ids, participant_count, settings_json, moderation_json, last_message_id, \
     last_message_sender_id, last_message_preview, last_message_at, message_count, created_at, \
     updated_at, is_archived, deleted_at";

impl DialogRow {
    fn into_dialog(self) -> AppResult<Dialog> {
        let dialog_type = DialogType::parse(&self.dialog_type)
            .ok_or_else(|| AppError::Storage(format!("unknown dialog type: {}", self.dialog_type)))?;
        let privacy = Privacy::parse(&self.privacy)
            .ok_or_else(|| AppError::Storage(format!("unknown privacy: {}", self.privacy)))?;
        let settings: DialogSettings = serde_json::from_str(&self.settings_json)?;
        let moderation: ModerationPolicy = serde_json::from_str(&self.moderation_json)?;

        let last_message = match (
            self.last_message_id,
            self.last_message_sender_id,
            self.last_message_preview,
            self.last_message_at,
        ) {
            (Some(message_id), Some(sender_id), Some(preview), Some(sent_at)) => {
                Some(LastMessagePreview {
                    message_id,
                    sender_id,
                    preview,
                    sent_at: from_millis(sent_at)?,
                })
            }
            _ => None,
        };

        Ok(Dialog {
            id: self.id,
            dialog_type,
            name: self.name,
            privacy,
            creator_id: self.creator_id,
            owner_id: self.owner_id,
            participant_count: self.participant_count,
            settings,
            moderation,
            last_message,
            message_count: self.message_count,
            unread_count: None,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
            is_archived: self.is_archived,
            deleted_at: opt_from_millis(self.deleted_at)?,
        })
    }
}

#[derive(FromRow)]
struct ParticipantRow {
    dialog_id: Uuid,
    user_id: Uuid,
    role: String,
    permissions: Option<Vec<String>>,
    joined_at: i64,
    last_read_at: Option<i64>,
    is_active: bool,
    is_muted: bool,
}

impl ParticipantRow {
    fn into_participant(self) -> AppResult<Participant> {
        let role = ParticipantRole::parse(&self.role)
            .ok_or_else(|| AppError::Storage(format!("unknown role: {}", self.role)))?;
        Ok(Participant {
            dialog_id: self.dialog_id,
            user_id: self.user_id,
            role,
            permissions: permissions_from_strings(self.permissions.unwrap_or_default()),
            joined_at: from_millis(self.joined_at)?,
            last_read_at: opt_from_millis(self.last_read_at)?,
            is_active: self.is_active,
            is_muted: self.is_muted,
        })
    }
}

/// Entry in the per-user inverted index, denormalized enough to render a
/// dialog list without touching the dialog partition.
#[derive(FromRow)]
struct UserDialogRow {
    dialog_id: Uuid,
    dialog_type: String,
    is_archived: bool,
    // Null when the row was first written by a fan-out update; reads as
    // unmuted.
    is_muted: Option<bool>,
    updated_at: i64,
}

fn index_entry_matches(entry: &UserDialogRow, filter: &DialogFilter) -> bool {
    filter
        .dialog_type
        .map_or(true, |t| entry.dialog_type == t.as_str())
        && filter.archived.map_or(true, |a| entry.is_archived == a)
        && filter
            .muted
            .map_or(true, |m| entry.is_muted.unwrap_or(false) == m)
        && filter
            .updated_after
            .map_or(true, |t| entry.updated_at >= to_millis(t))
        && filter
            .updated_before
            .map_or(true, |t| entry.updated_at <= to_millis(t))
}

impl ScyllaDialogRepository {
    async fn fetch_dialog_row(&self, id: Uuid) -> AppResult<Option<DialogRow>> {
        let result = self
            .session
            .query(
                format!("SELECT {DIALOG_COLUMNS} FROM dialogs WHERE id = ?"),
                (id,),
            )
            .await?;
        result
            .maybe_first_row_typed::<DialogRow>()
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Mirror one participant's index row. Single-partition write; failures
    /// are surfaced to the caller, which decides whether they are fatal.
    async fn upsert_index_row(
        &self,
        user_id: Uuid,
        dialog: &DialogRow,
        is_muted: bool,
    ) -> AppResult<()> {
        self.session
            .query(
                "INSERT INTO user_dialogs \
                 (user_id, dialog_id, dialog_type, name, is_archived, is_muted, \
                  last_message_preview, last_message_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    user_id,
                    dialog.id,
                    dialog.dialog_type.as_str(),
                    dialog.name.as_str(),
                    dialog.is_archived,
                    is_muted,
                    dialog.last_message_preview.as_deref(),
                    dialog.last_message_at,
                    dialog.updated_at,
                ),
            )
            .await?;
        Ok(())
    }

    /// Fan the current dialog state out to every listed participant's index
    /// row. Only the denormalized dialog fields are written; the per-user
    /// muted flag is owned by `upsert_participant` and left untouched. Each
    /// write is an independent partition; a failure is logged and skipped so
    /// the remaining participants still get their update.
    async fn fan_out_index(&self, dialog: &DialogRow, user_ids: &[Uuid]) {
        for user_id in user_ids {
            let write = self
                .session
                .query(
                    "UPDATE user_dialogs SET dialog_type = ?, name = ?, is_archived = ?, \
                     last_message_preview = ?, last_message_at = ?, updated_at = ? \
                     WHERE user_id = ? AND dialog_id = ?",
                    (
                        dialog.dialog_type.as_str(),
                        dialog.name.as_str(),
                        dialog.is_archived,
                        dialog.last_message_preview.as_deref(),
                        dialog.last_message_at,
                        dialog.updated_at,
                        *user_id,
                        dialog.id,
                    ),
                )
                .await;
            if let Err(e) = write {
                warn!(
                    dialog_id = %dialog.id,
                    user_id = %user_id,
                    error = %e,
                    "user_dialogs fan-out write failed; index row left stale"
                );
            }
        }
    }
}

#[async_trait]
impl DialogRepository for ScyllaDialogRepository {
    async fn create_dialog(&self, dialog: &Dialog, participants: &[Participant]) -> AppResult<()> {
        let participant_ids: Vec<Uuid> = participants.iter().map(|p| p.user_id).collect();
        let now = to_millis(dialog.updated_at);

        // Primary write: the dialog partition.
        self.session
            .query(
                "INSERT INTO dialogs \
                 (id, dialog_type, name, privacy, creator_id, owner_id, participant_ids, \
                  participant_count, settings_json, moderation_json, message_count, created_at, \
                  updated_at, is_archived) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    dialog.id,
                    dialog.dialog_type.as_str(),
                    dialog.name.as_str(),
                    dialog.privacy.as_str(),
                    dialog.creator_id,
                    dialog.owner_id,
                    participant_ids.clone(),
                    participants.len() as i32,
                    serde_json::to_string(&dialog.settings)?,
                    serde_json::to_string(&dialog.moderation)?,
                    dialog.message_count,
                    to_millis(dialog.created_at),
                    now,
                    dialog.is_archived,
                ),
            )
            .await?;

        // Participant rows are separate partitions; a failed write is logged
        // and skipped, repaired by the next membership update.
        for participant in participants {
            if let Err(e) = self.upsert_participant(participant).await {
                warn!(
                    dialog_id = %dialog.id,
                    user_id = %participant.user_id,
                    error = %e,
                    "participant write failed during dialog creation"
                );
            }
        }

        debug!(dialog_id = %dialog.id, "created dialog");
        Ok(())
    }

    async fn get_dialog(&self, id: Uuid) -> AppResult<Option<Dialog>> {
        match self.fetch_dialog_row(id).await? {
            Some(row) if row.deleted_at.is_none() => Ok(Some(row.into_dialog()?)),
            _ => Ok(None),
        }
    }

    async fn list_dialogs_for_user(
        &self,
        user_id: Uuid,
        filter: &DialogFilter,
        page: &Pagination,
    ) -> AppResult<Vec<Dialog>> {
        let result = self
            .session
            .query(
                "SELECT dialog_id, dialog_type, is_archived, is_muted, updated_at \
                 FROM user_dialogs WHERE user_id = ?",
                (user_id,),
            )
            .await?;

        let mut entries: Vec<UserDialogRow> = result
            .rows_typed::<UserDialogRow>()
            .map_err(|e| AppError::Storage(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| AppError::Storage(e.to_string()))?;

        entries.retain(|e| index_entry_matches(e, filter));

        match page.order {
            SortOrder::Asc => entries.sort_by_key(|e| e.updated_at),
            SortOrder::Desc => entries.sort_by_key(|e| std::cmp::Reverse(e.updated_at)),
        }

        let window: Vec<Uuid> = entries
            .iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .map(|e| e.dialog_id)
            .collect();

        let mut dialogs = Vec::with_capacity(window.len());
        for dialog_id in window {
            // A stale index entry may point at a deleted dialog; skip it.
            if let Some(dialog) = self.get_dialog(dialog_id).await? {
                dialogs.push(dialog);
            }
        }
        Ok(dialogs)
    }

    async fn update_dialog(&self, dialog: &Dialog) -> AppResult<()> {
        let existing = self.fetch_dialog_row(dialog.id).await?.ok_or(AppError::NotFound)?;

        let now = to_millis(chrono::Utc::now());
        self.session
            .query(
                "UPDATE dialogs SET name = ?, privacy = ?, owner_id = ?, settings_json = ?, \
                 moderation_json = ?, is_archived = ?, deleted_at = ?, updated_at = ? \
                 WHERE id = ?",
                (
                    dialog.name.as_str(),
                    dialog.privacy.as_str(),
                    dialog.owner_id,
                    serde_json::to_string(&dialog.settings)?,
                    serde_json::to_string(&dialog.moderation)?,
                    dialog.is_archived,
                    opt_millis(dialog.deleted_at),
                    now,
                    dialog.id,
                ),
            )
            .await?;

        let mirrored = DialogRow {
            name: dialog.name.clone(),
            is_archived: dialog.is_archived,
            updated_at: now,
            ..existing
        };
        let participant_ids = mirrored.participant_ids.clone().unwrap_or_default();
        self.fan_out_index(&mirrored, &participant_ids).await;
        Ok(())
    }

    async fn get_participant(
        &self,
        dialog_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<Participant>> {
        let result = self
            .session
            .query(
                "SELECT dialog_id, user_id, role, permissions, joined_at, last_read_at, \
                 is_active, is_muted \
                 FROM participants_by_dialog WHERE dialog_id = ? AND user_id = ?",
                (dialog_id, user_id),
            )
            .await?;

        result
            .maybe_first_row_typed::<ParticipantRow>()
            .map_err(|e| AppError::Storage(e.to_string()))?
            .map(ParticipantRow::into_participant)
            .transpose()
    }

    async fn list_participants(&self, dialog_id: Uuid) -> AppResult<Vec<Participant>> {
        let result = self
            .session
            .query(
                "SELECT dialog_id, user_id, role, permissions, joined_at, last_read_at, \
                 is_active, is_muted \
                 FROM participants_by_dialog WHERE dialog_id = ?",
                (dialog_id,),
            )
            .await?;

        result
            .rows_typed::<ParticipantRow>()
            .map_err(|e| AppError::Storage(e.to_string()))?
            .map(|row| {
                row.map_err(|e| AppError::Storage(e.to_string()))
                    .and_then(ParticipantRow::into_participant)
            })
            .collect()
    }

    async fn upsert_participant(&self, participant: &Participant) -> AppResult<()> {
        self.session
            .query(
                "INSERT INTO participants_by_dialog \
                 (dialog_id, user_id, role, permissions, joined_at, last_read_at, is_active, \
                  is_muted) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    participant.dialog_id,
                    participant.user_id,
                    participant.role.as_str(),
                    permissions_to_strings(&participant.permissions),
                    to_millis(participant.joined_at),
                    opt_millis(participant.last_read_at),
                    participant.is_active,
                    participant.is_muted,
                ),
            )
            .await?;

        // Mirror into the inverted index: active membership upserts the row,
        // a leave removes it. Best effort; the participant row is the primary.
        if participant.is_active {
            match self.fetch_dialog_row(participant.dialog_id).await {
                Ok(Some(dialog)) => {
                    if let Err(e) = self
                        .upsert_index_row(participant.user_id, &dialog, participant.is_muted)
                        .await
                    {
                        warn!(
                            dialog_id = %participant.dialog_id,
                            user_id = %participant.user_id,
                            error = %e,
                            "user_dialogs index upsert failed"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(
                    dialog_id = %participant.dialog_id,
                    error = %e,
                    "could not read dialog for index mirror"
                ),
            }
        } else if let Err(e) = self
            .session
            .query(
                "DELETE FROM user_dialogs WHERE user_id = ? AND dialog_id = ?",
                (participant.user_id, participant.dialog_id),
            )
            .await
        {
            warn!(
                dialog_id = %participant.dialog_id,
                user_id = %participant.user_id,
                error = %e,
                "user_dialogs index delete failed"
            );
        }

        Ok(())
    }

    async fn refresh_participant_count(&self, dialog_id: Uuid) -> AppResult<i32> {
        let active: Vec<Uuid> = self
            .list_participants(dialog_id)
            .await?
            .into_iter()
            .filter(|p| p.is_active)
            .map(|p| p.user_id)
            .collect();
        let count = active.len() as i32;
        let now = to_millis(chrono::Utc::now());

        self.session
            .query(
                "UPDATE dialogs SET participant_ids = ?, participant_count = ?, updated_at = ? \
                 WHERE id = ?",
                (active.clone(), count, now, dialog_id),
            )
            .await?;

        if let Some(dialog) = self.fetch_dialog_row(dialog_id).await? {
            self.fan_out_index(&dialog, &active).await;
        }
        Ok(count)
    }

    async fn update_last_message(
        &self,
        dialog_id: Uuid,
        preview: &LastMessagePreview,
    ) -> AppResult<()> {
        let existing = self.fetch_dialog_row(dialog_id).await?.ok_or(AppError::NotFound)?;
        let now = to_millis(chrono::Utc::now());

        // Read-modify-write on message_count; last-write-wins is accepted at
        // this layer.
        self.session
            .query(
                "UPDATE dialogs SET last_message_id = ?, last_message_sender_id = ?, \
                 last_message_preview = ?, last_message_at = ?, message_count = ?, updated_at = ? \
                 WHERE id = ?",
                (
                    preview.message_id,
                    preview.sender_id,
                    preview.preview.as_str(),
                    to_millis(preview.sent_at),
                    existing.message_count + 1,
                    now,
                    dialog_id,
                ),
            )
            .await?;

        let mirrored = DialogRow {
            last_message_preview: Some(preview.preview.clone()),
            last_message_at: Some(to_millis(preview.sent_at)),
            updated_at: now,
            ..existing
        };
        let participant_ids = mirrored.participant_ids.clone().unwrap_or_default();
        self.fan_out_index(&mirrored, &participant_ids).await;
        Ok(())
    }

    async fn search_dialogs(
        &self,
        _user_id: Uuid,
        _query: &str,
        _limit: i64,
    ) -> AppResult<Vec<Dialog>> {
        Err(AppError::Unsupported(
            "dialog search requires ad-hoc text matching, not available on the wide-column backend"
                .into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(is_muted: Option<bool>) -> UserDialogRow {
        UserDialogRow {
            dialog_id: Uuid::new_v4(),
            dialog_type: "group".into(),
            is_archived: false,
            is_muted,
            updated_at: to_millis(Utc::now()),
        }
    }

    #[test]
    fn muted_filter_treats_missing_flag_as_unmuted() {
        let unmuted_only = DialogFilter {
            muted: Some(false),
            ..Default::default()
        };
        assert!(index_entry_matches(&entry(None), &unmuted_only));
        assert!(index_entry_matches(&entry(Some(false)), &unmuted_only));
        assert!(!index_entry_matches(&entry(Some(true)), &unmuted_only));

        let muted_only = DialogFilter {
            muted: Some(true),
            ..Default::default()
        };
        assert!(index_entry_matches(&entry(Some(true)), &muted_only));
        assert!(!index_entry_matches(&entry(None), &muted_only));
    }

    #[test]
    fn type_and_archive_filters_apply_to_index_entries() {
        let mut e = entry(None);
        e.is_archived = true;

        let active_groups = DialogFilter {
            dialog_type: Some(DialogType::Group),
            archived: Some(false),
            ..Default::default()
        };
        assert!(!index_entry_matches(&e, &active_groups));

        e.is_archived = false;
        assert!(index_entry_matches(&e, &active_groups));

        let channels = DialogFilter {
            dialog_type: Some(DialogType::Channel),
            ..Default::default()
        };
        assert!(!index_entry_matches(&e, &channels));
    }
}
