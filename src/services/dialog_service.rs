use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::events::DomainEvent;
use crate::hub::Hub;
use crate::models::{
    Dialog, DialogSettings, DialogType, ModerationPolicy, Participant, ParticipantRole, Permission,
};
use crate::repository::{DialogFilter, DialogRepository, MessageRepository, Pagination};
use crate::services::collaborators::EventPublisher;

pub struct DialogService {
    dialogs: Arc<dyn DialogRepository>,
    messages: Arc<dyn MessageRepository>,
    hub: Hub,
    publisher: Arc<dyn EventPublisher>,
}

impl DialogService {
    pub fn new(
        dialogs: Arc<dyn DialogRepository>,
        messages: Arc<dyn MessageRepository>,
        hub: Hub,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            dialogs,
            messages,
            hub,
            publisher,
        }
    }

    pub async fn create_dialog(
        &self,
        dialog_type: DialogType,
        name: String,
        creator_id: Uuid,
        participant_ids: &[Uuid],
        settings: Option<DialogSettings>,
    ) -> AppResult<Dialog> {
        if dialog_type != DialogType::Direct && name.trim().is_empty() {
            return Err(AppError::Validation(
                "non-direct dialogs require a title".into(),
            ));
        }

        // Channels and broadcasts are discoverable; conversations are not.
        let privacy = match dialog_type {
            DialogType::Channel | DialogType::Broadcast => crate::models::Privacy::Public,
            _ => crate::models::Privacy::Private,
        };
        let mut dialog = Dialog::new(dialog_type, name, privacy, creator_id, settings);

        // Candidate set: creator plus the invitees, deduplicated.
        let mut members: Vec<Uuid> = vec![creator_id];
        for id in participant_ids {
            if members.contains(id) {
                debug!(user_id = %id, "duplicate participant skipped");
                continue;
            }
            members.push(*id);
        }
        dialog.ensure_capacity_for(members.len())?;

        let participants: Vec<Participant> = members
            .iter()
            .map(|user_id| {
                let role = if *user_id == creator_id {
                    ParticipantRole::Owner
                } else {
                    ParticipantRole::Member
                };
                Participant::new(dialog.id, *user_id, role)
            })
            .collect();

        self.dialogs.create_dialog(&dialog, &participants).await?;
        dialog.participant_count = self.dialogs.refresh_participant_count(dialog.id).await?;

        let event = DomainEvent::DialogCreated {
            dialog_id: dialog.id,
            dialog_type: dialog.dialog_type.as_str().to_string(),
            creator_id,
        };
        self.publish_and_fanout(&event, &members, None).await;

        info!(dialog_id = %dialog.id, dialog_type = dialog.dialog_type.as_str(), "dialog created");
        Ok(dialog)
    }

    pub async fn get_dialog(&self, dialog_id: Uuid, requester_id: Uuid) -> AppResult<Dialog> {
        let mut dialog = self
            .dialogs
            .get_dialog(dialog_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let participant = self.dialogs.get_participant(dialog_id, requester_id).await?;
        let active = participant.as_ref().map(|p| p.is_active).unwrap_or(false);
        if !active && dialog.privacy != crate::models::Privacy::Public {
            return Err(AppError::AccessDenied);
        }

        if let Some(p) = participant.filter(|p| p.is_active) {
            dialog.unread_count = Some(
                self.messages
                    .unread_count(dialog_id, requester_id, p.last_read_at)
                    .await?,
            );
        }
        Ok(dialog)
    }

    pub async fn list_dialogs(
        &self,
        user_id: Uuid,
        filter: &DialogFilter,
        page: &Pagination,
    ) -> AppResult<Vec<Dialog>> {
        let mut dialogs = self
            .dialogs
            .list_dialogs_for_user(user_id, filter, page)
            .await?;

        for dialog in &mut dialogs {
            if let Some(p) = self.dialogs.get_participant(dialog.id, user_id).await? {
                dialog.unread_count = Some(
                    self.messages
                        .unread_count(dialog.id, user_id, p.last_read_at)
                        .await?,
                );
            }
        }
        Ok(dialogs)
    }

    pub async fn update_dialog(
        &self,
        dialog_id: Uuid,
        acting_id: Uuid,
        name: Option<String>,
        settings: Option<DialogSettings>,
        moderation: Option<ModerationPolicy>,
    ) -> AppResult<Dialog> {
        let mut dialog = self
            .dialogs
            .get_dialog(dialog_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let acting = self.require_active_participant(dialog_id, acting_id).await?;
        require_permission(&acting, Permission::Manage)?;

        if let Some(name) = name {
            if dialog.dialog_type != DialogType::Direct && name.trim().is_empty() {
                return Err(AppError::Validation(
                    "non-direct dialogs require a title".into(),
                ));
            }
            dialog.name = name;
        }
        if let Some(mut settings) = settings {
            // Settings can narrow the type ceiling but never widen it.
            settings.max_participants = settings
                .max_participants
                .min(dialog.dialog_type.capacity() as i32)
                .max(1);
            if (dialog.participant_count as usize) > settings.max_participants.max(1) as usize {
                return Err(AppError::InvariantViolation(
                    "max_participants below current participant count".into(),
                ));
            }
            dialog.settings = settings;
        }
        if let Some(moderation) = moderation {
            if moderation.max_message_length <= 0 {
                return Err(AppError::Validation(
                    "max_message_length must be positive".into(),
                ));
            }
            dialog.moderation = moderation;
        }

        self.dialogs.update_dialog(&dialog).await?;
        self.dialogs.get_dialog(dialog_id).await?.ok_or(AppError::NotFound)
    }

    pub async fn add_participant(
        &self,
        dialog_id: Uuid,
        user_id: Uuid,
        role: ParticipantRole,
        acting_id: Uuid,
    ) -> AppResult<Participant> {
        let dialog = self
            .dialogs
            .get_dialog(dialog_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let acting = self.require_active_participant(dialog_id, acting_id).await?;

        match dialog.settings.invite_policy {
            crate::models::InvitePolicy::AdminsOnly => {
                require_permission(&acting, Permission::Manage)?
            }
            crate::models::InvitePolicy::Everyone => {
                if !acting.has_any_permission(&[Permission::Invite, Permission::Manage]) {
                    return Err(AppError::Forbidden);
                }
            }
        }
        if role == ParticipantRole::Owner {
            return Err(AppError::Validation(
                "ownership is assigned via promotion, not invitation".into(),
            ));
        }

        dialog.ensure_capacity_for(dialog.participant_count as usize + 1)?;

        let participant = match self.dialogs.get_participant(dialog_id, user_id).await? {
            Some(existing) if existing.is_active => {
                return Err(AppError::Conflict("user is already a participant".into()));
            }
            Some(mut left) => {
                // Rejoin: reactivate the old row with the new role.
                left.is_active = true;
                left.change_role(role);
                left
            }
            None => Participant::new(dialog_id, user_id, role),
        };
        self.dialogs.upsert_participant(&participant).await?;
        self.dialogs.refresh_participant_count(dialog_id).await?;

        let recipients = self.active_participant_ids(dialog_id).await?;
        let event = DomainEvent::ParticipantAdded {
            dialog_id,
            user_id,
            role,
            acting_id,
        };
        self.publish_and_fanout(&event, &recipients, None).await;
        Ok(participant)
    }

    pub async fn remove_participant(
        &self,
        dialog_id: Uuid,
        user_id: Uuid,
        acting_id: Uuid,
    ) -> AppResult<()> {
        let dialog = self
            .dialogs
            .get_dialog(dialog_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let acting = self.require_active_participant(dialog_id, acting_id).await?;

        if acting_id != user_id {
            require_permission(&acting, Permission::Manage)?;
        }

        let mut target = self
            .dialogs
            .get_participant(dialog_id, user_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or(AppError::NotFound)?;

        // A non-direct dialog always keeps exactly one owner; the owner must
        // transfer ownership before leaving.
        if target.role == ParticipantRole::Owner && dialog.dialog_type != DialogType::Direct {
            return Err(AppError::InvariantViolation(
                "the sole owner cannot leave; transfer ownership first".into(),
            ));
        }

        target.is_active = false;
        self.dialogs.upsert_participant(&target).await?;
        self.dialogs.refresh_participant_count(dialog_id).await?;

        let mut recipients = self.active_participant_ids(dialog_id).await?;
        recipients.push(user_id); // the removed user is told too
        let event = DomainEvent::ParticipantRemoved {
            dialog_id,
            user_id,
            acting_id,
        };
        self.publish_and_fanout(&event, &recipients, None).await;
        Ok(())
    }

    pub async fn promote_participant(
        &self,
        dialog_id: Uuid,
        user_id: Uuid,
        new_role: ParticipantRole,
        acting_id: Uuid,
    ) -> AppResult<Participant> {
        let mut dialog = self
            .dialogs
            .get_dialog(dialog_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let acting = self.require_active_participant(dialog_id, acting_id).await?;
        require_permission(&acting, Permission::Manage)?;

        let mut target = self
            .dialogs
            .get_participant(dialog_id, user_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or(AppError::NotFound)?;
        let old_role = target.role;
        if old_role == new_role {
            return Ok(target);
        }

        if new_role == ParticipantRole::Owner {
            // Ownership transfer: the previous owner steps down to admin.
            // Applies to every dialog type; a dialog never has two owners.
            if let Some(mut previous) = self
                .dialogs
                .get_participant(dialog_id, dialog.owner_id)
                .await?
                .filter(|p| p.is_active && p.user_id != user_id)
            {
                previous.change_role(ParticipantRole::Admin);
                self.dialogs.upsert_participant(&previous).await?;
            }
            dialog.owner_id = user_id;
            self.dialogs.update_dialog(&dialog).await?;
        } else if old_role == ParticipantRole::Owner && dialog.dialog_type != DialogType::Direct {
            return Err(AppError::InvariantViolation(
                "cannot demote the sole owner; transfer ownership first".into(),
            ));
        }

        target.change_role(new_role);
        self.dialogs.upsert_participant(&target).await?;
        self.dialogs.refresh_participant_count(dialog_id).await?;

        let recipients = self.active_participant_ids(dialog_id).await?;
        let event = DomainEvent::ParticipantPromoted {
            dialog_id,
            user_id,
            old_role,
            new_role,
            acting_id,
        };
        self.publish_and_fanout(&event, &recipients, None).await;
        Ok(target)
    }

    pub async fn archive_dialog(&self, dialog_id: Uuid, acting_id: Uuid) -> AppResult<Dialog> {
        let mut dialog = self
            .dialogs
            .get_dialog(dialog_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let acting = self.require_active_participant(dialog_id, acting_id).await?;
        require_permission(&acting, Permission::Admin)?;

        if dialog.is_archived {
            return Err(AppError::AlreadyArchived);
        }
        dialog.is_archived = true;
        self.dialogs.update_dialog(&dialog).await?;

        let recipients = self.active_participant_ids(dialog_id).await?;
        let event = DomainEvent::DialogArchived {
            dialog_id,
            acting_id,
        };
        self.publish_and_fanout(&event, &recipients, None).await;
        Ok(dialog)
    }

    pub async fn search_dialogs(
        &self,
        user_id: Uuid,
        query: &str,
        limit: i64,
    ) -> AppResult<Vec<Dialog>> {
        if query.trim().is_empty() {
            return Err(AppError::Validation("search query is empty".into()));
        }
        self.dialogs.search_dialogs(user_id, query, limit).await
    }

    pub async fn list_participants(
        &self,
        dialog_id: Uuid,
        requester_id: Uuid,
    ) -> AppResult<Vec<Participant>> {
        self.require_active_participant(dialog_id, requester_id)
            .await?;
        Ok(self
            .dialogs
            .list_participants(dialog_id)
            .await?
            .into_iter()
            .filter(|p| p.is_active)
            .collect())
    }

    pub(crate) async fn require_active_participant(
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

    pub(crate) async fn active_participant_ids(&self, dialog_id: Uuid) -> AppResult<Vec<Uuid>> {
        Ok(self
            .dialogs
            .list_participants(dialog_id)
            .await?
            .into_iter()
            .filter(|p| p.is_active)
            .map(|p| p.user_id)
            .collect())
    }

    /// Publish the event and fan it out over the Hub. Neither failure aborts
    /// the already-committed mutation.
    async fn publish_and_fanout(&self, event: &DomainEvent, recipients: &[Uuid], exclude: Option<Uuid>) {
        if let Err(e) = self.publisher.publish(event).await {
            warn!(event = event.event_type(), error = %e, "event publish failed");
        }
        if let Err(e) = self
            .hub
            .broadcast_event(event, recipients.to_vec(), exclude)
            .await
        {
            warn!(event = event.event_type(), error = %e, "hub broadcast failed");
        }
    }
}

pub(crate) fn require_permission(participant: &Participant, permission: Permission) -> AppResult<()> {
    if participant.has_permission(permission) {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}
