use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::events::DomainEvent;
use crate::hub::Hub;
use crate::models::presence::PresenceStats;
use crate::models::{Presence, PresenceStatus};
use crate::repository::PresenceRepository;
use crate::services::collaborators::{EventPublisher, PresencePolicy};

/// Upper bound on a single batch presence lookup.
pub const MAX_PRESENCE_BATCH: usize = 100;

/// Optional fields of a presence update; only provided fields are applied.
#[derive(Debug, Clone, Default)]
pub struct PresenceUpdate {
    pub status: Option<PresenceStatus>,
    pub activity: Option<Option<String>>,
    pub platform: Option<String>,
    pub device_info: Option<String>,
    pub location: Option<String>,
}

pub struct PresenceService {
    presence: Arc<dyn PresenceRepository>,
    hub: Hub,
    publisher: Arc<dyn EventPublisher>,
    policy: Arc<dyn PresencePolicy>,
    stale_after_minutes: i64,
}

impl PresenceService {
    pub fn new(
        presence: Arc<dyn PresenceRepository>,
        hub: Hub,
        publisher: Arc<dyn EventPublisher>,
        policy: Arc<dyn PresencePolicy>,
        stale_after_minutes: i64,
    ) -> Self {
        Self {
            presence,
            hub,
            publisher,
            policy,
            stale_after_minutes,
        }
    }

    /// Apply a partial presence update. The record is created lazily on first
    /// touch. `user.presence_changed` is broadcast to every *other* connected
    /// user, and only when status or activity actually changed.
    pub async fn update_presence(&self, user_id: Uuid, update: PresenceUpdate) -> AppResult<Presence> {
        let mut presence = self
            .presence
            .get_presence(user_id)
            .await?
            .unwrap_or_else(|| Presence::initial(user_id));

        let old_status = presence.status;
        let old_activity = presence.activity.clone();

        if let Some(status) = update.status {
            presence.transition(status);
        } else {
            presence.last_seen = Utc::now();
        }
        if let Some(activity) = update.activity {
            presence.activity = activity;
        }
        if let Some(platform) = update.platform {
            presence.platform = Some(platform);
        }
        if let Some(device_info) = update.device_info {
            presence.device_info = Some(device_info);
        }
        if let Some(location) = update.location {
            presence.location = Some(location);
        }

        self.presence.upsert_presence(&presence).await?;

        let changed = presence.status != old_status || presence.activity != old_activity;
        if changed {
            let event = DomainEvent::PresenceChanged {
                user_id,
                status: presence.status,
                activity: presence.activity.clone(),
            };
            if let Err(e) = self.publisher.publish(&event).await {
                warn!(%user_id, error = %e, "event publish failed");
            }
            if let Err(e) = self.hub.broadcast_event_to_all(&event, Some(user_id)).await {
                warn!(%user_id, error = %e, "hub broadcast failed");
            }
        }
        Ok(presence)
    }

    pub async fn set_online(&self, user_id: Uuid) -> AppResult<Presence> {
        self.update_presence(
            user_id,
            PresenceUpdate {
                status: Some(PresenceStatus::Online),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_offline(&self, user_id: Uuid) -> AppResult<Presence> {
        self.update_presence(
            user_id,
            PresenceUpdate {
                status: Some(PresenceStatus::Offline),
                // Whatever they were doing ended with the session.
                activity: Some(None),
                ..Default::default()
            },
        )
        .await
    }

    /// Hub integration: connection established means online, closed means
    /// offline.
    pub async fn auto_update_from_socket(&self, user_id: Uuid, connected: bool) -> AppResult<()> {
        if connected {
            self.set_online(user_id).await?;
        } else {
            self.set_offline(user_id).await?;
        }
        Ok(())
    }

    /// Users without a stored record read as offline.
    pub async fn get_presence(&self, user_id: Uuid, requester_id: Uuid) -> AppResult<Presence> {
        let presence = self
            .presence
            .get_presence(user_id)
            .await?
            .unwrap_or_else(|| Presence::initial(user_id));
        Ok(self
            .policy
            .filter_for_requester(requester_id, presence)
            .unwrap_or_else(|| Presence::initial(user_id)))
    }

    pub async fn get_multiple_presence(
        &self,
        user_ids: &[Uuid],
        requester_id: Uuid,
    ) -> AppResult<Vec<Presence>> {
        if user_ids.len() > MAX_PRESENCE_BATCH {
            return Err(AppError::Validation(format!(
                "at most {MAX_PRESENCE_BATCH} users per presence lookup"
            )));
        }
        let found = self.presence.get_multiple_presence(user_ids).await?;
        Ok(found
            .into_iter()
            .filter_map(|p| self.policy.filter_for_requester(requester_id, p))
            .collect())
    }

    pub async fn list_online(&self, limit: i64) -> AppResult<Vec<Presence>> {
        self.presence.list_online(limit).await
    }

    pub async fn presence_stats(&self) -> AppResult<PresenceStats> {
        self.presence.presence_stats().await
    }

    /// Flip records that have not been seen within the staleness window to
    /// offline. Meant to run periodically.
    pub async fn cleanup_stale_presence(&self) -> AppResult<u64> {
        let threshold = Utc::now() - Duration::minutes(self.stale_after_minutes);
        let swept = self.presence.sweep_stale(threshold).await?;
        if swept > 0 {
            info!(swept, "stale presence records marked offline");
        }
        Ok(swept)
    }
}
