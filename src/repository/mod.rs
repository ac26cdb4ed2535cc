//! Repository contracts shared by both storage backends.
//!
//! The relational (PostgreSQL) and wide-column (ScyllaDB) implementations are
//! interchangeable behind these traits; the service layer never branches on
//! which backend is active. A backend that cannot express an operation (e.g.
//! full-text search on the wide-column store) returns `AppError::Unsupported`
//! instead of silently returning partial results.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::message::MessageStats;
use crate::models::presence::PresenceStats;
use crate::models::{
    Dialog, DialogType, LastMessagePreview, Message, MessageType, Participant, Presence,
    ReceiptStatus,
};

pub mod postgres;
pub mod scylla;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub order: SortOrder,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 50,
            order: SortOrder::Desc,
        }
    }
}

impl Pagination {
    pub fn limit(&self) -> i64 {
        i64::from(self.page_size.clamp(1, 200))
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.max(1) - 1) * self.limit()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DialogFilter {
    pub dialog_type: Option<DialogType>,
    pub archived: Option<bool>,
    pub muted: Option<bool>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub sender_id: Option<Uuid>,
    pub message_type: Option<MessageType>,
    pub edited: Option<bool>,
    pub deleted: Option<bool>,
    pub sent_after: Option<DateTime<Utc>>,
    pub sent_before: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait DialogRepository: Send + Sync {
    /// Persist a freshly created dialog together with its initial participants
    /// (at minimum the creator). Backends with transactions write the whole
    /// aggregate atomically; partitioned backends may land participant rows
    /// independently, logging and skipping failed ones, with the next
    /// membership update repairing the gap.
    async fn create_dialog(&self, dialog: &Dialog, participants: &[Participant]) -> AppResult<()>;

    async fn get_dialog(&self, id: Uuid) -> AppResult<Option<Dialog>>;

    async fn list_dialogs_for_user(
        &self,
        user_id: Uuid,
        filter: &DialogFilter,
        page: &Pagination,
    ) -> AppResult<Vec<Dialog>>;

    /// Update mutable dialog fields (name, privacy, settings, moderation,
    /// archive flag). Does not touch participants or last-message state.
    async fn update_dialog(&self, dialog: &Dialog) -> AppResult<()>;

    async fn get_participant(&self, dialog_id: Uuid, user_id: Uuid)
        -> AppResult<Option<Participant>>;

    async fn list_participants(&self, dialog_id: Uuid) -> AppResult<Vec<Participant>>;

    /// Insert or update a participant row (join, reactivation, role change,
    /// permission edit, mute, last_read_at advance).
    async fn upsert_participant(&self, participant: &Participant) -> AppResult<()>;

    /// Recompute and persist `participant_count` from the active participant
    /// set, stamping `updated_at`. Returns the new count.
    async fn refresh_participant_count(&self, dialog_id: Uuid) -> AppResult<i32>;

    /// Stamp the denormalized last-message snapshot and bump `message_count`.
    async fn update_last_message(
        &self,
        dialog_id: Uuid,
        preview: &LastMessagePreview,
    ) -> AppResult<()>;

    /// Participant-scoped dialog name search. `Unsupported` on backends
    /// without ad-hoc text matching.
    async fn search_dialogs(
        &self,
        user_id: Uuid,
        query: &str,
        limit: i64,
    ) -> AppResult<Vec<Dialog>>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create_message(&self, message: &Message) -> AppResult<()>;

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>>;

    async fn list_dialog_messages(
        &self,
        dialog_id: Uuid,
        filter: &MessageFilter,
        page: &Pagination,
    ) -> AppResult<Vec<Message>>;

    /// Persist an edit (content + edited flag/timestamp).
    async fn update_message(&self, message: &Message) -> AppResult<()>;

    async fn soft_delete_message(&self, id: Uuid, deleted_at: DateTime<Utc>) -> AppResult<()>;

    /// Idempotent per-recipient receipt upsert. Returns true when the stored
    /// state actually changed (a downgrade from read to delivered is a no-op).
    async fn upsert_receipt(
        &self,
        message_id: Uuid,
        dialog_id: Uuid,
        user_id: Uuid,
        status: ReceiptStatus,
    ) -> AppResult<bool>;

    /// Messages sent after `since` by someone else; the caller supplies the
    /// participant's last_read_at (None counts everything).
    async fn unread_count(
        &self,
        dialog_id: Uuid,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<i64>;

    /// When the sender last posted in this dialog (slow-mode enforcement).
    async fn last_sender_message_at(
        &self,
        dialog_id: Uuid,
        sender_id: Uuid,
    ) -> AppResult<Option<DateTime<Utc>>>;

    /// Dialog-scoped content search. `Unsupported` on the wide-column backend.
    async fn search_messages(
        &self,
        dialog_id: Uuid,
        query: &str,
        limit: i64,
    ) -> AppResult<Vec<Message>>;

    async fn message_stats(&self, dialog_id: Uuid) -> AppResult<MessageStats>;
}

#[async_trait]
pub trait PresenceRepository: Send + Sync {
    async fn get_presence(&self, user_id: Uuid) -> AppResult<Option<Presence>>;

    async fn get_multiple_presence(&self, user_ids: &[Uuid]) -> AppResult<Vec<Presence>>;

    async fn upsert_presence(&self, presence: &Presence) -> AppResult<()>;

    async fn list_online(&self, limit: i64) -> AppResult<Vec<Presence>>;

    /// Flip records whose last_seen predates `threshold` to offline.
    /// Returns how many records were swept.
    async fn sweep_stale(&self, threshold: DateTime<Utc>) -> AppResult<u64>;

    async fn presence_stats(&self) -> AppResult<PresenceStats>;
}
