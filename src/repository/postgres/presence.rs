use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::presence::PresenceStats;
use crate::models::{Presence, PresenceStatus};
use crate::repository::PresenceRepository;

#[derive(Clone)]
pub struct PostgresPresenceRepository {
    pool: PgPool,
}

impl PostgresPresenceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_presence(row: &PgRow) -> AppResult<Presence> {
    let status_raw: String = row.try_get("status")?;
    let status = PresenceStatus::parse(&status_raw)
        .ok_or_else(|| AppError::Storage(format!("unknown presence status: {status_raw}")))?;

    Ok(Presence {
        user_id: row.try_get("user_id")?,
        status,
        activity: row.try_get("activity")?,
        is_online: row.try_get("is_online")?,
        last_seen: row.try_get("last_seen")?,
        platform: row.try_get("platform")?,
        device_info: row.try_get("device_info")?,
        location: row.try_get("location")?,
    })
}

const PRESENCE_COLUMNS: &str =
    "user_id, status, activity, is_online, last_seen, platform, device_info, location";

#[async_trait]
impl PresenceRepository for PostgresPresenceRepository {
    async fn get_presence(&self, user_id: Uuid) -> AppResult<Option<Presence>> {
        let row = sqlx::query(&format!(
            "SELECT {PRESENCE_COLUMNS} FROM presence WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_presence).transpose()
    }

    async fn get_multiple_presence(&self, user_ids: &[Uuid]) -> AppResult<Vec<Presence>> {
        let rows = sqlx::query(&format!(
            "SELECT {PRESENCE_COLUMNS} FROM presence WHERE user_id = ANY($1)"
        ))
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_presence).collect()
    }

    async fn upsert_presence(&self, presence: &Presence) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO presence \
             (user_id, status, activity, is_online, last_seen, platform, device_info, location) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (user_id) DO UPDATE SET \
                 status = EXCLUDED.status, \
                 activity = EXCLUDED.activity, \
                 is_online = EXCLUDED.is_online, \
                 last_seen = EXCLUDED.last_seen, \
                 platform = EXCLUDED.platform, \
                 device_info = EXCLUDED.device_info, \
                 location = EXCLUDED.location",
        )
        .bind(presence.user_id)
        .bind(presence.status.as_str())
        .bind(&presence.activity)
        .bind(presence.is_online)
        .bind(presence.last_seen)
        .bind(&presence.platform)
        .bind(&presence.device_info)
        .bind(&presence.location)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_online(&self, limit: i64) -> AppResult<Vec<Presence>> {
        let rows = sqlx::query(&format!(
            "SELECT {PRESENCE_COLUMNS} FROM presence WHERE is_online \
             ORDER BY last_seen DESC LIMIT $1"
        ))
        .bind(limit.clamp(1, 1_000))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_presence).collect()
    }

    async fn sweep_stale(&self, threshold: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE presence SET status = 'offline', is_online = FALSE \
             WHERE is_online AND last_seen < $1",
        )
        .bind(threshold)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn presence_stats(&self) -> AppResult<PresenceStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) FILTER (WHERE status = 'online')::bigint AS online, \
                    COUNT(*) FILTER (WHERE status = 'away')::bigint AS away, \
                    COUNT(*) FILTER (WHERE status = 'busy')::bigint AS busy, \
                    COUNT(*) FILTER (WHERE status = 'offline')::bigint AS offline \
             FROM presence",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(PresenceStats {
            online: row.try_get("online")?,
            away: row.try_get("away")?,
            busy: row.try_get("busy")?,
            offline: row.try_get("offline")?,
        })
    }
}
