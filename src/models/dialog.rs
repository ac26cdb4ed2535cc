use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogType {
    Direct,
    Group,
    Channel,
    Broadcast,
}

impl DialogType {
    /// Hard participant ceiling per dialog type.
    pub fn capacity(&self) -> usize {
        match self {
            DialogType::Direct => 2,
            DialogType::Group => 1_000,
            DialogType::Channel | DialogType::Broadcast => 200_000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DialogType::Direct => "direct",
            DialogType::Group => "group",
            DialogType::Channel => "channel",
            DialogType::Broadcast => "broadcast",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "direct" => Some(DialogType::Direct),
            "group" => Some(DialogType::Group),
            "channel" => Some(DialogType::Channel),
            "broadcast" => Some(DialogType::Broadcast),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    Public,
    Private,
    Secret,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Public => "public",
            Privacy::Private => "private",
            Privacy::Secret => "secret",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(Privacy::Public),
            "private" => Some(Privacy::Private),
            "secret" => Some(Privacy::Secret),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitePolicy {
    Everyone,
    AdminsOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogSettings {
    pub max_participants: i32,
    pub invite_policy: InvitePolicy,
    pub read_receipts_enabled: bool,
    pub typing_indicators_enabled: bool,
    pub retention_days: Option<i32>,
}

impl DialogSettings {
    pub fn defaults_for(dialog_type: DialogType) -> Self {
        Self {
            max_participants: dialog_type.capacity() as i32,
            invite_policy: match dialog_type {
                DialogType::Channel | DialogType::Broadcast => InvitePolicy::AdminsOnly,
                _ => InvitePolicy::Everyone,
            },
            read_receipts_enabled: true,
            typing_indicators_enabled: dialog_type != DialogType::Broadcast,
            retention_days: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationPolicy {
    pub banned_words: Vec<String>,
    pub slow_mode_seconds: Option<i64>,
    pub max_message_length: i32,
}

impl Default for ModerationPolicy {
    fn default() -> Self {
        Self {
            banned_words: Vec::new(),
            slow_mode_seconds: None,
            max_message_length: 4_000,
        }
    }
}

/// Denormalized preview of the newest message, kept on the dialog row
/// so dialog lists never join into the message store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessagePreview {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub preview: String,
    pub sent_at: DateTime<Utc>,
}

pub const PREVIEW_MAX_CHARS: usize = 120;

/// Truncate message text for a dialog-level or reply preview.
pub fn truncate_preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_MAX_CHARS {
        return text.to_string();
    }
    text.chars().take(PREVIEW_MAX_CHARS).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dialog {
    pub id: Uuid,
    pub dialog_type: DialogType,
    pub name: String,
    pub privacy: Privacy,
    pub creator_id: Uuid,
    pub owner_id: Uuid,
    pub participant_count: i32,
    pub settings: DialogSettings,
    pub moderation: ModerationPolicy,
    pub last_message: Option<LastMessagePreview>,
    pub message_count: i64,
    /// Computed for the requesting user on read paths; never persisted.
    pub unread_count: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_archived: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Dialog {
    pub fn new(
        dialog_type: DialogType,
        name: String,
        privacy: Privacy,
        creator_id: Uuid,
        settings: Option<DialogSettings>,
    ) -> Self {
        let now = Utc::now();
        let mut settings = settings.unwrap_or_else(|| DialogSettings::defaults_for(dialog_type));
        // Settings can narrow the ceiling but never widen it.
        settings.max_participants = settings
            .max_participants
            .min(dialog_type.capacity() as i32)
            .max(1);
        Self {
            id: Uuid::new_v4(),
            dialog_type,
            name,
            privacy,
            creator_id,
            owner_id: creator_id,
            participant_count: 0,
            settings,
            moderation: ModerationPolicy::default(),
            last_message: None,
            message_count: 0,
            unread_count: None,
            created_at: now,
            updated_at: now,
            is_archived: false,
            deleted_at: None,
        }
    }

    /// Effective capacity: the type ceiling, optionally narrowed by settings.
    pub fn capacity(&self) -> usize {
        (self.settings.max_participants.max(1) as usize).min(self.dialog_type.capacity())
    }

    pub fn ensure_capacity_for(&self, candidate_count: usize) -> AppResult<()> {
        if candidate_count > self.capacity() {
            return Err(AppError::InvariantViolation(format!(
                "{} dialog capacity is {} participants",
                self.dialog_type.as_str(),
                self.capacity()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Banned,
    Guest,
    Member,
    Moderator,
    Admin,
    Owner,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Owner => "owner",
            ParticipantRole::Admin => "admin",
            ParticipantRole::Moderator => "moderator",
            ParticipantRole::Member => "member",
            ParticipantRole::Guest => "guest",
            ParticipantRole::Banned => "banned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "owner" => Some(ParticipantRole::Owner),
            "admin" => Some(ParticipantRole::Admin),
            "moderator" => Some(ParticipantRole::Moderator),
            "member" => Some(ParticipantRole::Member),
            "guest" => Some(ParticipantRole::Guest),
            "banned" => Some(ParticipantRole::Banned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Invite,
    Manage,
    Admin,
    Delete,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Invite => "invite",
            Permission::Manage => "manage",
            Permission::Admin => "admin",
            Permission::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "read" => Some(Permission::Read),
            "write" => Some(Permission::Write),
            "invite" => Some(Permission::Invite),
            "manage" => Some(Permission::Manage),
            "admin" => Some(Permission::Admin),
            "delete" => Some(Permission::Delete),
            _ => None,
        }
    }
}

/// Default capability set issued when a participant gets a role.
/// Stored per participant afterwards; role changes re-issue this set,
/// individual grants may then be edited independently of the role.
pub fn default_permissions(role: ParticipantRole) -> HashSet<Permission> {
    use Permission::*;
    match role {
        ParticipantRole::Owner => [Read, Write, Invite, Manage, Admin, Delete].into(),
        ParticipantRole::Admin => [Read, Write, Invite, Manage, Admin, Delete].into(),
        ParticipantRole::Moderator => [Read, Write, Invite, Manage].into(),
        ParticipantRole::Member => [Read, Write, Invite].into(),
        ParticipantRole::Guest => [Read].into(),
        ParticipantRole::Banned => HashSet::new(),
    }
}

pub fn permissions_to_strings(perms: &HashSet<Permission>) -> Vec<String> {
    let mut out: Vec<String> = perms.iter().map(|p| p.as_str().to_string()).collect();
    out.sort();
    out
}

pub fn permissions_from_strings<I, S>(values: I) -> HashSet<Permission>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .filter_map(|v| Permission::parse(v.as_ref()))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub dialog_id: Uuid,
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub permissions: HashSet<Permission>,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_muted: bool,
}

impl Participant {
    pub fn new(dialog_id: Uuid, user_id: Uuid, role: ParticipantRole) -> Self {
        Self {
            dialog_id,
            user_id,
            role,
            permissions: default_permissions(role),
            joined_at: Utc::now(),
            last_read_at: None,
            is_active: true,
            is_muted: false,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.is_active && self.permissions.contains(&permission)
    }

    pub fn has_any_permission(&self, permissions: &[Permission]) -> bool {
        permissions.iter().any(|p| self.has_permission(*p))
    }

    /// Re-issue the default capability set for a new role.
    pub fn change_role(&mut self, role: ParticipantRole) {
        self.role = role;
        self.permissions = default_permissions(role);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_ceilings_per_type() {
        assert_eq!(DialogType::Direct.capacity(), 2);
        assert_eq!(DialogType::Group.capacity(), 1_000);
        assert_eq!(DialogType::Channel.capacity(), 200_000);
        assert_eq!(DialogType::Broadcast.capacity(), 200_000);
    }

    #[test]
    fn settings_cannot_widen_type_ceiling() {
        let mut settings = DialogSettings::defaults_for(DialogType::Direct);
        settings.max_participants = 500;
        let dialog = Dialog::new(
            DialogType::Direct,
            String::new(),
            Privacy::Private,
            Uuid::new_v4(),
            Some(settings),
        );
        assert_eq!(dialog.capacity(), 2);
        assert!(dialog.ensure_capacity_for(3).is_err());
        assert!(dialog.ensure_capacity_for(2).is_ok());
    }

    #[test]
    fn role_change_reissues_default_permissions() {
        let mut p = Participant::new(Uuid::new_v4(), Uuid::new_v4(), ParticipantRole::Member);
        p.permissions.insert(Permission::Manage); // ad-hoc grant
        assert!(p.has_permission(Permission::Manage));

        p.change_role(ParticipantRole::Guest);
        assert_eq!(p.permissions, default_permissions(ParticipantRole::Guest));
        assert!(!p.has_permission(Permission::Manage));
        assert!(!p.has_permission(Permission::Write));
    }

    #[test]
    fn banned_role_has_no_capabilities() {
        let p = Participant::new(Uuid::new_v4(), Uuid::new_v4(), ParticipantRole::Banned);
        assert!(!p.has_permission(Permission::Read));
    }

    #[test]
    fn inactive_participant_has_no_effective_permissions() {
        let mut p = Participant::new(Uuid::new_v4(), Uuid::new_v4(), ParticipantRole::Admin);
        p.is_active = false;
        assert!(!p.has_permission(Permission::Read));
    }

    #[test]
    fn permission_strings_round_trip() {
        let perms = default_permissions(ParticipantRole::Moderator);
        let strings = permissions_to_strings(&perms);
        assert_eq!(permissions_from_strings(&strings), perms);
    }

    #[test]
    fn preview_truncation() {
        let long: String = "x".repeat(500);
        assert_eq!(truncate_preview(&long).chars().count(), PREVIEW_MAX_CHARS);
        assert_eq!(truncate_preview("hello"), "hello");
    }
}
