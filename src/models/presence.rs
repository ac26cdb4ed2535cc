use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
    Offline,
}

impl PresenceStatus {
    pub fn is_online(&self) -> bool {
        !matches!(self, PresenceStatus::Offline)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Away => "away",
            PresenceStatus::Busy => "busy",
            PresenceStatus::Offline => "offline",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "online" => Some(PresenceStatus::Online),
            "away" => Some(PresenceStatus::Away),
            "busy" => Some(PresenceStatus::Busy),
            "offline" => Some(PresenceStatus::Offline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Presence {
    pub user_id: Uuid,
    pub status: PresenceStatus,
    pub activity: Option<String>,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub platform: Option<String>,
    pub device_info: Option<String>,
    pub location: Option<String>,
}

impl Presence {
    /// Lazily-created record: a user is offline until they say otherwise.
    pub fn initial(user_id: Uuid) -> Self {
        Self {
            user_id,
            status: PresenceStatus::Offline,
            activity: None,
            is_online: false,
            last_seen: Utc::now(),
            platform: None,
            device_info: None,
            location: None,
        }
    }

    /// Apply a status transition, keeping `is_online` and `last_seen` in sync.
    pub fn transition(&mut self, status: PresenceStatus) {
        self.status = status;
        self.is_online = status.is_online();
        self.last_seen = Utc::now();
    }
}

/// Aggregate counts surfaced by `presence_stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceStats {
    pub online: i64,
    pub away: i64,
    pub busy: i64,
    pub offline: i64,
}

impl PresenceStats {
    pub fn total_online(&self) -> i64 {
        self.online + self.away + self.busy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_online_tracks_status() {
        let mut p = Presence::initial(Uuid::new_v4());
        assert!(!p.is_online);

        p.transition(PresenceStatus::Online);
        assert!(p.is_online);
        p.transition(PresenceStatus::Away);
        assert!(p.is_online);
        p.transition(PresenceStatus::Busy);
        assert!(p.is_online);

        let before = p.last_seen;
        p.transition(PresenceStatus::Offline);
        assert!(!p.is_online);
        assert!(p.last_seen >= before);
    }
}
