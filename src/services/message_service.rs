use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::events::DomainEvent;
use crate::hub::Hub;
use crate::models::message::MessageStats;
use crate::models::{
    Message, MessageContent, MessageType, Participant, ParticipantRole, Permission, ReceiptStatus,
    ReplySnapshot,
};
use crate::models::{Dialog, DialogType};
use crate::repository::{DialogRepository, MessageFilter, MessageRepository, Pagination};
use crate::services::collaborators::{
    ContentModerator, EventPublisher, ModerationVerdict, PushSender, SpamDetector,
};
use crate::services::dialog_service::require_permission;
use crate::services::MediaProcessor;

pub struct MessageService {
    dialogs: Arc<dyn DialogRepository>,
    messages: Arc<dyn MessageRepository>,
    hub: Hub,
    publisher: Arc<dyn EventPublisher>,
    moderator: Arc<dyn ContentModerator>,
    spam: Arc<dyn SpamDetector>,
    media: Arc<dyn MediaProcessor>,
    push: Arc<dyn PushSender>,
    config: Arc<Config>,
}

impl MessageService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dialogs: Arc<dyn DialogRepository>,
        messages: Arc<dyn MessageRepository>,
        hub: Hub,
        publisher: Arc<dyn EventPublisher>,
        moderator: Arc<dyn ContentModerator>,
        spam: Arc<dyn SpamDetector>,
        media: Arc<dyn MediaProcessor>,
        push: Arc<dyn PushSender>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            dialogs,
            messages,
            hub,
            publisher,
            moderator,
            spam,
            media,
            push,
            config,
        }
    }

    pub async fn send_message(
        &self,
        dialog_id: Uuid,
        sender_id: Uuid,
        message_type: MessageType,
        mut content: MessageContent,
        reply_to: Option<Uuid>,
        parent_id: Option<Uuid>,
    ) -> AppResult<Message> {
        let dialog = self
            .dialogs
            .get_dialog(dialog_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if dialog.is_archived {
            return Err(AppError::Validation("dialog is archived".into()));
        }

        let sender = self.require_active_participant(dialog_id, sender_id).await?;
        require_permission(&sender, Permission::Write)?;

        // Broadcast dialogs are one-way: only admins and the owner post.
        if dialog.dialog_type == DialogType::Broadcast
            && !matches!(sender.role, ParticipantRole::Admin | ParticipantRole::Owner)
        {
            return Err(AppError::Forbidden);
        }

        self.check_banned_words(&dialog, &content)?;
        self.check_slow_mode(&dialog, &sender).await?;

        let max_chars = (dialog.moderation.max_message_length.max(1) as usize)
            .min(self.config.max_message_length);
        content.validate(message_type, max_chars, self.config.max_file_size_bytes)?;

        match self.moderator.review(sender_id, &content).await {
            Ok(ModerationVerdict::Allow) => {}
            Ok(ModerationVerdict::Reject(reason)) => {
                return Err(AppError::ContentRejected(reason));
            }
            // Moderation infrastructure failure degrades to allow-and-log.
            Err(e) => warn!(%dialog_id, error = %e, "moderator unavailable, allowing message"),
        }
        match self.spam.is_spam(sender_id, &content).await {
            Ok(true) => return Err(AppError::SpamDetected),
            Ok(false) => {}
            Err(e) => warn!(%dialog_id, error = %e, "spam detector unavailable, allowing message"),
        }

        match self.media.store(sender_id, &content).await {
            Ok(Some(stored_url)) => match &mut content {
                MessageContent::Media { url, .. } | MessageContent::Voice { url, .. } => {
                    *url = Some(stored_url);
                }
                _ => {}
            },
            Ok(None) => {}
            Err(e) => warn!(%dialog_id, error = %e, "media processing failed, keeping original payload"),
        }

        let mut message = Message::new(dialog_id, sender_id, message_type, content);
        message.parent_id = parent_id;
        message.reply_to = match reply_to {
            Some(target_id) => self.resolve_reply_snapshot(dialog_id, target_id).await?,
            None => None,
        };

        self.messages.create_message(&message).await?;

        let preview = crate::models::LastMessagePreview {
            message_id: message.id,
            sender_id,
            preview: message.content.preview_text(),
            sent_at: message.sent_at,
        };
        self.dialogs.update_last_message(dialog_id, &preview).await?;

        let recipients: Vec<Uuid> = self
            .active_participant_ids(dialog_id)
            .await?
            .into_iter()
            .filter(|id| *id != sender_id)
            .collect();

        let event = DomainEvent::MessageSent {
            dialog_id,
            message_id: message.id,
            sender_id,
            message_type,
            preview: preview.preview.clone(),
        };
        if let Err(e) = self.publisher.publish(&event).await {
            warn!(%dialog_id, error = %e, "event publish failed");
        }
        if let Err(e) = self
            .hub
            .broadcast_event(&event, recipients.clone(), None)
            .await
        {
            warn!(%dialog_id, error = %e, "hub broadcast failed");
        }

        // Push delivery is off the send path; partial failures only log.
        let push = Arc::clone(&self.push);
        tokio::spawn(async move {
            for user_id in recipients {
                if let Err(e) = push.notify(user_id, &event).await {
                    warn!(%user_id, error = %e, "push notification failed");
                }
            }
        });

        info!(dialog_id = %dialog_id, message_id = %message.id, "message sent");
        Ok(message)
    }

    pub async fn edit_message(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        new_content: MessageContent,
    ) -> AppResult<Message> {
        let mut message = self
            .messages
            .get_message(message_id)
            .await?
            .filter(|m| !m.is_deleted)
            .ok_or(AppError::NotFound)?;

        if message.sender_id != user_id {
            return Err(AppError::Forbidden);
        }

        let window = Duration::hours(self.config.edit_window_hours);
        if Utc::now() - message.sent_at > window {
            return Err(AppError::EditWindowExpired {
                max_edit_hours: self.config.edit_window_hours,
            });
        }

        let dialog = self
            .dialogs
            .get_dialog(message.dialog_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let max_chars = (dialog.moderation.max_message_length.max(1) as usize)
            .min(self.config.max_message_length);
        new_content.validate(message.message_type, max_chars, self.config.max_file_size_bytes)?;
        self.check_banned_words(&dialog, &new_content)?;

        message.content = new_content;
        message.is_edited = true;
        message.edited_at = Some(Utc::now());
        self.messages.update_message(&message).await?;

        let event = DomainEvent::MessageEdited {
            dialog_id: message.dialog_id,
            message_id,
            sender_id: user_id,
        };
        self.publish_and_fanout(message.dialog_id, &event).await?;
        Ok(message)
    }

    pub async fn delete_message(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        for_everyone: bool,
    ) -> AppResult<()> {
        let message = self
            .messages
            .get_message(message_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if message.is_deleted {
            return Ok(());
        }

        if message.sender_id != user_id {
            if !for_everyone {
                return Err(AppError::Forbidden);
            }
            let acting = self
                .require_active_participant(message.dialog_id, user_id)
                .await?;
            if !acting.has_any_permission(&[Permission::Delete, Permission::Admin]) {
                return Err(AppError::Forbidden);
            }
        }

        self.messages
            .soft_delete_message(message_id, Utc::now())
            .await?;

        let event = DomainEvent::MessageDeleted {
            dialog_id: message.dialog_id,
            message_id,
            acting_id: user_id,
            for_everyone,
        };
        if for_everyone {
            self.publish_and_fanout(message.dialog_id, &event).await?;
        } else {
            if let Err(e) = self.publisher.publish(&event).await {
                warn!(%message_id, error = %e, "event publish failed");
            }
            if let Err(e) = self.hub.send_event_to_user(user_id, &event).await {
                warn!(%message_id, error = %e, "hub send failed");
            }
        }
        Ok(())
    }

    /// Returns whether the receipt state actually changed; a repeated call is
    /// a no-op and publishes nothing.
    pub async fn mark_as_read(&self, message_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let message = self
            .messages
            .get_message(message_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if message.sender_id == user_id {
            return Ok(false);
        }
        let mut participant = self
            .require_active_participant(message.dialog_id, user_id)
            .await?;

        let changed = self
            .messages
            .upsert_receipt(message_id, message.dialog_id, user_id, ReceiptStatus::Read)
            .await?;
        if !changed {
            return Ok(false);
        }

        // Reading a message advances the participant's read cursor, never
        // moves it backwards.
        if participant.last_read_at.map_or(true, |at| at < message.sent_at) {
            participant.last_read_at = Some(message.sent_at);
            self.dialogs.upsert_participant(&participant).await?;
        }

        let event = DomainEvent::MessageRead {
            dialog_id: message.dialog_id,
            message_id,
            user_id,
        };
        self.publish_and_fanout(message.dialog_id, &event).await?;
        Ok(true)
    }

    pub async fn mark_as_delivered(&self, message_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let message = self
            .messages
            .get_message(message_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if message.sender_id == user_id {
            return Ok(false);
        }
        self.require_active_participant(message.dialog_id, user_id)
            .await?;

        let changed = self
            .messages
            .upsert_receipt(
                message_id,
                message.dialog_id,
                user_id,
                ReceiptStatus::Delivered,
            )
            .await?;
        if !changed {
            return Ok(false);
        }

        let event = DomainEvent::MessageDelivered {
            dialog_id: message.dialog_id,
            message_id,
            user_id,
        };
        self.publish_and_fanout(message.dialog_id, &event).await?;
        Ok(true)
    }

    pub async fn get_dialog_messages(
        &self,
        dialog_id: Uuid,
        user_id: Uuid,
        filter: &MessageFilter,
        page: &Pagination,
    ) -> AppResult<Vec<Message>> {
        self.check_read_access(dialog_id, user_id).await?;

        // Deleted messages are hidden unless the caller asks for them.
        let mut filter = filter.clone();
        if filter.deleted.is_none() {
            filter.deleted = Some(false);
        }
        self.messages
            .list_dialog_messages(dialog_id, &filter, page)
            .await
    }

    /// Fetch a single message, subject to the same visibility rules as the
    /// history listing. Soft-deleted messages read as not found.
    pub async fn get_message(&self, message_id: Uuid, user_id: Uuid) -> AppResult<Message> {
        let message = self
            .messages
            .get_message(message_id)
            .await?
            .filter(|m| !m.is_deleted)
            .ok_or(AppError::NotFound)?;
        self.check_read_access(message.dialog_id, user_id).await?;
        Ok(message)
    }

    pub async fn search_messages(
        &self,
        dialog_id: Uuid,
        user_id: Uuid,
        query: &str,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        if query.trim().is_empty() {
            return Err(AppError::Validation("search query is empty".into()));
        }
        self.check_read_access(dialog_id, user_id).await?;
        self.messages.search_messages(dialog_id, query, limit).await
    }

    pub async fn get_message_stats(
        &self,
        dialog_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<MessageStats> {
        self.require_active_participant(dialog_id, user_id).await?;
        self.messages.message_stats(dialog_id).await
    }

    pub async fn unread_count(&self, dialog_id: Uuid, user_id: Uuid) -> AppResult<i64> {
        let participant = self.require_active_participant(dialog_id, user_id).await?;
        self.messages
            .unread_count(dialog_id, user_id, participant.last_read_at)
            .await
    }

    async fn resolve_reply_snapshot(
        &self,
        dialog_id: Uuid,
        target_id: Uuid,
    ) -> AppResult<Option<ReplySnapshot>> {
        match self.messages.get_message(target_id).await? {
            Some(target) if target.dialog_id == dialog_id && !target.is_deleted => {
                Ok(Some(ReplySnapshot {
                    message_id: target.id,
                    sender_id: target.sender_id,
                    preview: target.content.preview_text(),
                    message_type: target.message_type,
                }))
            }
            Some(target) => {
                // Cross-dialog (or deleted) reply targets never fail the send.
                debug!(
                    target_id = %target.id,
                    target_dialog = %target.dialog_id,
                    "reply target not usable, sending without snapshot"
                );
                Ok(None)
            }
            None => {
                debug!(%target_id, "reply target not found, sending without snapshot");
                Ok(None)
            }
        }
    }

    fn check_banned_words(&self, dialog: &Dialog, content: &MessageContent) -> AppResult<()> {
        let text = match content {
            MessageContent::Text { text } | MessageContent::System { text } => text,
            _ => return Ok(()),
        };
        let lowered = text.to_lowercase();
        for word in &dialog.moderation.banned_words {
            if !word.is_empty() && lowered.contains(&word.to_lowercase()) {
                return Err(AppError::ContentRejected(format!(
                    "message contains a banned word: {word}"
                )));
            }
        }
        Ok(())
    }

    /// Slow mode throttles members and guests; moderators and above are exempt.
    async fn check_slow_mode(&self, dialog: &Dialog, sender: &Participant) -> AppResult<()> {
        let Some(interval) = dialog.moderation.slow_mode_seconds.filter(|s| *s > 0) else {
            return Ok(());
        };
        if sender.role >= ParticipantRole::Moderator {
            return Ok(());
        }
        if let Some(last) = self
            .messages
            .last_sender_message_at(dialog.id, sender.user_id)
            .await?
        {
            let elapsed = Utc::now() - last;
            if elapsed < Duration::seconds(interval) {
                return Err(AppError::Validation(format!(
                    "slow mode: wait {} more seconds",
                    interval - elapsed.num_seconds()
                )));
            }
        }
        Ok(())
    }

    async fn check_read_access(&self, dialog_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let dialog = self
            .dialogs
            .get_dialog(dialog_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let active = self
            .dialogs
            .get_participant(dialog_id, user_id)
            .await?
            .map(|p| p.is_active)
            .unwrap_or(false);
        if !active && dialog.privacy != crate::models::Privacy::Public {
            return Err(AppError::AccessDenied);
        }
        Ok(())
    }

    async fn require_active_participant(
        &self,
        dialog_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Participant> {
        self.dialogs
            .get_participant(dialog_id, user_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or(AppError::AccessDenied)
    }

    async fn active_participant_ids(&self, dialog_id: Uuid) -> AppResult<Vec<Uuid>> {
        Ok(self
            .dialogs
            .list_participants(dialog_id)
            .await?
            .into_iter()
            .filter(|p| p.is_active)
            .map(|p| p.user_id)
            .collect())
    }

    async fn publish_and_fanout(&self, dialog_id: Uuid, event: &DomainEvent) -> AppResult<()> {
        if let Err(e) = self.publisher.publish(event).await {
            warn!(event = event.event_type(), error = %e, "event publish failed");
        }
        let recipients = self.active_participant_ids(dialog_id).await?;
        if let Err(e) = self.hub.broadcast_event(event, recipients, None).await {
            warn!(event = event.event_type(), error = %e, "hub broadcast failed");
        }
        Ok(())
    }
}
