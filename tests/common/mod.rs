//! Shared test fixtures: in-memory repository fakes and a recording event
//! publisher, wired into the real services.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use communication_service::config::Config;
use communication_service::error::{AppError, AppResult};
use communication_service::events::DomainEvent;
use communication_service::hub::Hub;
use communication_service::models::message::MessageStats;
use communication_service::models::presence::PresenceStats;
use communication_service::models::{
    Dialog, LastMessagePreview, Message, Participant, Presence, ReceiptStatus,
};
use communication_service::repository::{
    DialogFilter, DialogRepository, MessageFilter, MessageRepository, Pagination,
    PresenceRepository, SortOrder,
};
use communication_service::services::{
    DialogService, EventPublisher, LoggingPushSender, MessageService, NoopMediaProcessor,
    NoopModerator, NoopSpamDetector, OpenPresencePolicy, PresenceService,
};

#[derive(Default)]
pub struct InMemoryDialogRepo {
    dialogs: Mutex<HashMap<Uuid, Dialog>>,
    participants: Mutex<HashMap<(Uuid, Uuid), Participant>>,
}

#[async_trait]
impl DialogRepository for InMemoryDialogRepo {
    async fn create_dialog(&self, dialog: &Dialog, participants: &[Participant]) -> AppResult<()> {
        self.dialogs
            .lock()
            .unwrap()
            .insert(dialog.id, dialog.clone());
        let mut map = self.participants.lock().unwrap();
        for p in participants {
            map.insert((p.dialog_id, p.user_id), p.clone());
        }
        Ok(())
    }

    async fn get_dialog(&self, id: Uuid) -> AppResult<Option<Dialog>> {
        Ok(self
            .dialogs
            .lock()
            .unwrap()
            .get(&id)
            .filter(|d| d.deleted_at.is_none())
            .cloned())
    }

    async fn list_dialogs_for_user(
        &self,
        user_id: Uuid,
        filter: &DialogFilter,
        page: &Pagination,
    ) -> AppResult<Vec<Dialog>> {
        let participants = self.participants.lock().unwrap();
        let dialogs = self.dialogs.lock().unwrap();

        let mut found: Vec<Dialog> = dialogs
            .values()
            .filter(|d| d.deleted_at.is_none())
            .filter(|d| {
                participants
                    .get(&(d.id, user_id))
                    .map(|p| p.is_active)
                    .unwrap_or(false)
            })
            .filter(|d| {
                filter.dialog_type.map_or(true, |t| d.dialog_type == t)
                    && filter.archived.map_or(true, |a| d.is_archived == a)
                    && filter
                        .muted
                        .map_or(true, |m| {
                            participants
                                .get(&(d.id, user_id))
                                .map(|p| p.is_muted == m)
                                .unwrap_or(false)
                        })
                    && filter.updated_after.map_or(true, |t| d.updated_at >= t)
                    && filter.updated_before.map_or(true, |t| d.updated_at <= t)
            })
            .cloned()
            .collect();

        match page.order {
            SortOrder::Asc => found.sort_by_key(|d| d.updated_at),
            SortOrder::Desc => found.sort_by_key(|d| std::cmp::Reverse(d.updated_at)),
        }
        Ok(found
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect())
    }

    async fn update_dialog(&self, dialog: &Dialog) -> AppResult<()> {
        let mut dialogs = self.dialogs.lock().unwrap();
        let stored = dialogs.get_mut(&dialog.id).ok_or(AppError::NotFound)?;
        stored.name = dialog.name.clone();
        stored.privacy = dialog.privacy;
        stored.owner_id = dialog.owner_id;
        stored.settings = dialog.settings.clone();
        stored.moderation = dialog.moderation.clone();
        stored.is_archived = dialog.is_archived;
        stored.deleted_at = dialog.deleted_at;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn get_participant(
        &self,
        dialog_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<Participant>> {
        Ok(self
            .participants
            .lock()
            .unwrap()
            .get(&(dialog_id, user_id))
            .cloned())
    }

    async fn list_participants(&self, dialog_id: Uuid) -> AppResult<Vec<Participant>> {
        Ok(self
            .participants
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.dialog_id == dialog_id)
            .cloned()
            .collect())
    }

    async fn upsert_participant(&self, participant: &Participant) -> AppResult<()> {
        self.participants
            .lock()
            .unwrap()
            .insert((participant.dialog_id, participant.user_id), participant.clone());
        Ok(())
    }

    async fn refresh_participant_count(&self, dialog_id: Uuid) -> AppResult<i32> {
        let count = self
            .participants
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.dialog_id == dialog_id && p.is_active)
            .count() as i32;
        let mut dialogs = self.dialogs.lock().unwrap();
        let dialog = dialogs.get_mut(&dialog_id).ok_or(AppError::NotFound)?;
        dialog.participant_count = count;
        dialog.updated_at = Utc::now();
        Ok(count)
    }

    async fn update_last_message(
        &self,
        dialog_id: Uuid,
        preview: &LastMessagePreview,
    ) -> AppResult<()> {
        let mut dialogs = self.dialogs.lock().unwrap();
        let dialog = dialogs.get_mut(&dialog_id).ok_or(AppError::NotFound)?;
        dialog.last_message = Some(preview.clone());
        dialog.message_count += 1;
        dialog.updated_at = Utc::now();
        Ok(())
    }

    async fn search_dialogs(
        &self,
        user_id: Uuid,
        query: &str,
        limit: i64,
    ) -> AppResult<Vec<Dialog>> {
        let needle = query.to_lowercase();
        let participants = self.participants.lock().unwrap();
        Ok(self
            .dialogs
            .lock()
            .unwrap()
            .values()
            .filter(|d| {
                d.deleted_at.is_none()
                    && d.name.to_lowercase().contains(&needle)
                    && participants
                        .get(&(d.id, user_id))
                        .map(|p| p.is_active)
                        .unwrap_or(false)
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepo {
    messages: Mutex<HashMap<Uuid, Message>>,
    receipts: Mutex<HashMap<(Uuid, Uuid), ReceiptStatus>>,
}

impl InMemoryMessageRepo {
    /// Test-only backdoor for fabricating history (e.g. old messages for
    /// edit-window checks).
    pub fn insert_raw(&self, message: Message) {
        self.messages.lock().unwrap().insert(message.id, message);
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepo {
    async fn create_message(&self, message: &Message) -> AppResult<()> {
        self.messages
            .lock()
            .unwrap()
            .insert(message.id, message.clone());
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.messages.lock().unwrap().get(&id).cloned())
    }

    async fn list_dialog_messages(
        &self,
        dialog_id: Uuid,
        filter: &MessageFilter,
        page: &Pagination,
    ) -> AppResult<Vec<Message>> {
        let mut found: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.dialog_id == dialog_id)
            .filter(|m| {
                filter.sender_id.map_or(true, |s| m.sender_id == s)
                    && filter.message_type.map_or(true, |t| m.message_type == t)
                    && filter.edited.map_or(true, |e| m.is_edited == e)
                    && filter.deleted.map_or(true, |d| m.is_deleted == d)
                    && filter.sent_after.map_or(true, |t| m.sent_at >= t)
                    && filter.sent_before.map_or(true, |t| m.sent_at <= t)
            })
            .cloned()
            .collect();

        match page.order {
            SortOrder::Asc => found.sort_by_key(|m| m.sent_at),
            SortOrder::Desc => found.sort_by_key(|m| std::cmp::Reverse(m.sent_at)),
        }
        Ok(found
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect())
    }

    async fn update_message(&self, message: &Message) -> AppResult<()> {
        let mut messages = self.messages.lock().unwrap();
        let stored = messages.get_mut(&message.id).ok_or(AppError::NotFound)?;
        stored.content = message.content.clone();
        stored.is_edited = message.is_edited;
        stored.edited_at = message.edited_at;
        stored.status = message.status;
        Ok(())
    }

    async fn soft_delete_message(&self, id: Uuid, deleted_at: DateTime<Utc>) -> AppResult<()> {
        let mut messages = self.messages.lock().unwrap();
        let stored = messages.get_mut(&id).ok_or(AppError::NotFound)?;
        stored.is_deleted = true;
        stored.deleted_at = Some(deleted_at);
        Ok(())
    }

    async fn upsert_receipt(
        &self,
        message_id: Uuid,
        _dialog_id: Uuid,
        user_id: Uuid,
        status: ReceiptStatus,
    ) -> AppResult<bool> {
        let mut receipts = self.receipts.lock().unwrap();
        match receipts.get(&(message_id, user_id)) {
            Some(current) if *current == status => Ok(false),
            Some(ReceiptStatus::Read) if status == ReceiptStatus::Delivered => Ok(false),
            _ => {
                receipts.insert((message_id, user_id), status);
                Ok(true)
            }
        }
    }

    async fn unread_count(
        &self,
        dialog_id: Uuid,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<i64> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .values()
            .filter(|m| {
                m.dialog_id == dialog_id
                    && m.sender_id != user_id
                    && !m.is_deleted
                    && since.map_or(true, |s| m.sent_at > s)
            })
            .count() as i64)
    }

    async fn last_sender_message_at(
        &self,
        dialog_id: Uuid,
        sender_id: Uuid,
    ) -> AppResult<Option<DateTime<Utc>>> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.dialog_id == dialog_id && m.sender_id == sender_id)
            .map(|m| m.sent_at)
            .max())
    }

    async fn search_messages(
        &self,
        dialog_id: Uuid,
        query: &str,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        let needle = query.to_lowercase();
        Ok(self
            .messages
            .lock()
            .unwrap()
            .values()
            .filter(|m| {
                m.dialog_id == dialog_id
                    && !m.is_deleted
                    && m.content.preview_text().to_lowercase().contains(&needle)
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn message_stats(&self, dialog_id: Uuid) -> AppResult<MessageStats> {
        let messages = self.messages.lock().unwrap();
        let rows: Vec<&Message> = messages
            .values()
            .filter(|m| m.dialog_id == dialog_id)
            .collect();

        let mut by_type: Vec<(String, i64)> = Vec::new();
        for m in &rows {
            let key = m.message_type.as_str().to_string();
            match by_type.iter_mut().find(|(t, _)| *t == key) {
                Some((_, c)) => *c += 1,
                None => by_type.push((key, 1)),
            }
        }

        Ok(MessageStats {
            total: rows.len() as i64,
            deleted: rows.iter().filter(|m| m.is_deleted).count() as i64,
            edited: rows.iter().filter(|m| m.is_edited).count() as i64,
            by_type,
            first_sent_at: rows.iter().map(|m| m.sent_at).min(),
            last_sent_at: rows.iter().map(|m| m.sent_at).max(),
        })
    }
}

#[derive(Default)]
pub struct InMemoryPresenceRepo {
    records: Mutex<HashMap<Uuid, Presence>>,
}

impl InMemoryPresenceRepo {
    pub fn insert_raw(&self, presence: Presence) {
        self.records.lock().unwrap().insert(presence.user_id, presence);
    }
}

#[async_trait]
impl PresenceRepository for InMemoryPresenceRepo {
    async fn get_presence(&self, user_id: Uuid) -> AppResult<Option<Presence>> {
        Ok(self.records.lock().unwrap().get(&user_id).cloned())
    }

    async fn get_multiple_presence(&self, user_ids: &[Uuid]) -> AppResult<Vec<Presence>> {
        let records = self.records.lock().unwrap();
        Ok(user_ids
            .iter()
            .filter_map(|id| records.get(id).cloned())
            .collect())
    }

    async fn upsert_presence(&self, presence: &Presence) -> AppResult<()> {
        self.records
            .lock()
            .unwrap()
            .insert(presence.user_id, presence.clone());
        Ok(())
    }

    async fn list_online(&self, limit: i64) -> AppResult<Vec<Presence>> {
        let mut online: Vec<Presence> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.is_online)
            .cloned()
            .collect();
        online.sort_by_key(|p| std::cmp::Reverse(p.last_seen));
        online.truncate(limit.max(0) as usize);
        Ok(online)
    }

    async fn sweep_stale(&self, threshold: DateTime<Utc>) -> AppResult<u64> {
        let mut swept = 0;
        for p in self.records.lock().unwrap().values_mut() {
            if p.is_online && p.last_seen < threshold {
                p.status = communication_service::models::PresenceStatus::Offline;
                p.is_online = false;
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn presence_stats(&self) -> AppResult<PresenceStats> {
        let mut stats = PresenceStats::default();
        for p in self.records.lock().unwrap().values() {
            use communication_service::models::PresenceStatus::*;
            match p.status {
                Online => stats.online += 1,
                Away => stats.away += 1,
                Busy => stats.busy += 1,
                Offline => stats.offline += 1,
            }
        }
        Ok(stats)
    }
}

/// Captures published event types so tests can assert on them.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<String>>,
}

impl RecordingPublisher {
    pub fn event_types(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count_of(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.as_str() == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &DomainEvent) -> AppResult<()> {
        self.events
            .lock()
            .unwrap()
            .push(event.event_type().to_string());
        Ok(())
    }
}

pub struct TestEnv {
    pub hub: Hub,
    pub dialogs: Arc<DialogService>,
    pub messages: Arc<MessageService>,
    pub presence: Arc<PresenceService>,
    pub dialog_repo: Arc<InMemoryDialogRepo>,
    pub message_repo: Arc<InMemoryMessageRepo>,
    pub presence_repo: Arc<InMemoryPresenceRepo>,
    pub published: Arc<RecordingPublisher>,
}

pub fn test_env() -> TestEnv {
    let config = Arc::new(Config::test_defaults());
    let hub = Hub::spawn();
    let dialog_repo = Arc::new(InMemoryDialogRepo::default());
    let message_repo = Arc::new(InMemoryMessageRepo::default());
    let presence_repo = Arc::new(InMemoryPresenceRepo::default());
    let published = Arc::new(RecordingPublisher::default());

    let dialogs = Arc::new(DialogService::new(
        dialog_repo.clone(),
        message_repo.clone(),
        hub.clone(),
        published.clone(),
    ));
    let messages = Arc::new(MessageService::new(
        dialog_repo.clone(),
        message_repo.clone(),
        hub.clone(),
        published.clone(),
        Arc::new(NoopModerator),
        Arc::new(NoopSpamDetector),
        Arc::new(NoopMediaProcessor),
        Arc::new(LoggingPushSender),
        config.clone(),
    ));
    let presence = Arc::new(PresenceService::new(
        presence_repo.clone(),
        hub.clone(),
        published.clone(),
        Arc::new(OpenPresencePolicy),
        config.presence_stale_minutes,
    ));

    TestEnv {
        hub,
        dialogs,
        messages,
        presence,
        dialog_repo,
        message_repo,
        presence_repo,
        published,
    }
}
