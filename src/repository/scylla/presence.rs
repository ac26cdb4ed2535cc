use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::macros::FromRow;
use scylla::Session;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::presence::PresenceStats;
use crate::models::{Presence, PresenceStatus};
use crate::repository::PresenceRepository;

use super::{from_millis, to_millis};

#[derive(Clone)]
pub struct ScyllaPresenceRepository {
    session: Arc<Session>,
}

impl ScyllaPresenceRepository {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[derive(FromRow)]
struct PresenceRow {
    user_id: Uuid,
    status: String,
    activity: Option<String>,
    is_online: bool,
    last_seen: i64,
    platform: Option<String>,
    device_info: Option<String>,
    location: Option<String>,
}

const PRESENCE_COLUMNS: &str =
    "user_id, status, activity, is_online, last_seen, platform, device_info, location";

impl PresenceRow {
    fn into_presence(self) -> AppResult<Presence> {
        let status = PresenceStatus::parse(&self.status)
            .ok_or_else(|| AppError::Storage(format!("unknown presence status: {}", self.status)))?;
        Ok(Presence {
            user_id: self.user_id,
            status,
            activity: self.activity,
            is_online: self.is_online,
            last_seen: from_millis(self.last_seen)?,
            platform: self.platform,
            device_info: self.device_info,
            location: self.location,
        })
    }
}

#[async_trait]
impl PresenceRepository for ScyllaPresenceRepository {
    async fn get_presence(&self, user_id: Uuid) -> AppResult<Option<Presence>> {
        let result = self
            .session
            .query(
                format!("SELECT {PRESENCE_COLUMNS} FROM presence WHERE user_id = ?"),
                (user_id,),
            )
            .await?;
        result
            .maybe_first_row_typed::<PresenceRow>()
            .map_err(|e| AppError::Storage(e.to_string()))?
            .map(PresenceRow::into_presence)
            .transpose()
    }

    async fn get_multiple_presence(&self, user_ids: &[Uuid]) -> AppResult<Vec<Presence>> {
        let result = self
            .session
            .query(
                format!("SELECT {PRESENCE_COLUMNS} FROM presence WHERE user_id IN ?"),
                (user_ids.to_vec(),),
            )
            .await?;
        result
            .rows_typed::<PresenceRow>()
            .map_err(|e| AppError::Storage(e.to_string()))?
            .map(|row| {
                row.map_err(|e| AppError::Storage(e.to_string()))
                    .and_then(PresenceRow::into_presence)
            })
            .collect()
    }

    async fn upsert_presence(&self, presence: &Presence) -> AppResult<()> {
        self.session
            .query(
                "INSERT INTO presence \
                 (user_id, status, activity, is_online, last_seen, platform, device_info, \
                  location) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    presence.user_id,
                    presence.status.as_str(),
                    presence.activity.as_deref(),
                    presence.is_online,
                    to_millis(presence.last_seen),
                    presence.platform.as_deref(),
                    presence.device_info.as_deref(),
                    presence.location.as_deref(),
                ),
            )
            .await?;
        Ok(())
    }

    async fn list_online(&self, limit: i64) -> AppResult<Vec<Presence>> {
        // Full-table filter; acceptable for the bounded presence table.
        let result = self
            .session
            .query(
                format!(
                    "SELECT {PRESENCE_COLUMNS} FROM presence WHERE is_online = true \
                     LIMIT ? ALLOW FILTERING"
                ),
                (limit.clamp(1, 1_000) as i32,),
            )
            .await?;
        result
            .rows_typed::<PresenceRow>()
            .map_err(|e| AppError::Storage(e.to_string()))?
            .map(|row| {
                row.map_err(|e| AppError::Storage(e.to_string()))
                    .and_then(PresenceRow::into_presence)
            })
            .collect()
    }

    async fn sweep_stale(&self, threshold: DateTime<Utc>) -> AppResult<u64> {
        let result = self
            .session
            .query(
                format!(
                    "SELECT {PRESENCE_COLUMNS} FROM presence WHERE is_online = true \
                     ALLOW FILTERING"
                ),
                (),
            )
            .await?;
        let rows: Vec<PresenceRow> = result
            .rows_typed::<PresenceRow>()
            .map_err(|e| AppError::Storage(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| AppError::Storage(e.to_string()))?;

        let cutoff = to_millis(threshold);
        let mut swept = 0u64;
        for row in rows.into_iter().filter(|r| r.last_seen < cutoff) {
            self.session
                .query(
                    "UPDATE presence SET status = 'offline', is_online = false WHERE user_id = ?",
                    (row.user_id,),
                )
                .await?;
            swept += 1;
        }
        Ok(swept)
    }

    async fn presence_stats(&self) -> AppResult<PresenceStats> {
        let result = self
            .session
            .query("SELECT status FROM presence", ())
            .await?;
        let statuses: Vec<(String,)> = result
            .rows_typed::<(String,)>()
            .map_err(|e| AppError::Storage(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| AppError::Storage(e.to_string()))?;

        let mut stats = PresenceStats::default();
        for (status,) in statuses {
            match status.as_str() {
                "online" => stats.online += 1,
                "away" => stats.away += 1,
                "busy" => stats.busy += 1,
                _ => stats.offline += 1,
            }
        }
        Ok(stats)
    }
}
