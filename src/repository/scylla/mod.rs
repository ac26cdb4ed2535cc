//! Wide-column backend, optimized for horizontal write scale.
//!
//! A dialog row embeds its participant id set for fast single-key reads. The
//! store cannot efficiently answer "all dialogs for user X", so a derived
//! inverted index table (`user_dialogs`, keyed by user id) is maintained by
//! fan-out writes at dialog-creation, membership-change and message-send time.
//! The fan-out statements are independent single-partition writes, not a
//! multi-partition transaction: a crash mid-fan-out leaves some index rows
//! stale relative to the dialog row. That is an accepted eventually-consistent
//! condition, resolved by client-driven retries.

use chrono::{DateTime, TimeZone, Utc};
use scylla::{Session, SessionBuilder};
use std::sync::Arc;

use crate::config::ScyllaConfig;
use crate::error::{AppError, AppResult};

mod dialog;
mod message;
mod presence;

pub use dialog::ScyllaDialogRepository;
pub use message::ScyllaMessageRepository;
pub use presence::ScyllaPresenceRepository;

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> AppResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| AppError::Storage(format!("timestamp out of range: {millis}")))
}

pub(crate) fn opt_millis(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(to_millis)
}

pub(crate) fn opt_from_millis(millis: Option<i64>) -> AppResult<Option<DateTime<Utc>>> {
    millis.map(from_millis).transpose()
}

const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS dialogs ( \
        id uuid PRIMARY KEY, \
        dialog_type text, \
        name text, \
        privacy text, \
        creator_id uuid, \
        owner_id uuid, \
        participant_ids set<uuid>, \
        participant_count int, \
        settings_json text, \
        moderation_json text, \
        last_message_id uuid, \
        last_message_sender_id uuid, \
        last_message_preview text, \
        last_message_at bigint, \
        message_count bigint, \
        created_at bigint, \
        updated_at bigint, \
        is_archived boolean, \
        deleted_at bigint)",
    "CREATE TABLE IF NOT EXISTS participants_by_dialog ( \
        dialog_id uuid, \
        user_id uuid, \
        role text, \
        permissions set<text>, \
        joined_at bigint, \
        last_read_at bigint, \
        is_active boolean, \
        is_muted boolean, \
        PRIMARY KEY (dialog_id, user_id))",
    "CREATE TABLE IF NOT EXISTS user_dialogs ( \
        user_id uuid, \
        dialog_id uuid, \
        dialog_type text, \
        name text, \
        is_archived boolean, \
        is_muted boolean, \
        last_message_preview text, \
        last_message_at bigint, \
        updated_at bigint, \
        PRIMARY KEY (user_id, dialog_id))",
    "CREATE TABLE IF NOT EXISTS messages ( \
        dialog_id uuid, \
        sent_at bigint, \
        id uuid, \
        sender_id uuid, \
        message_type text, \
        content_json text, \
        reply_to_json text, \
        parent_id uuid, \
        status text, \
        is_edited boolean, \
        edited_at bigint, \
        is_deleted boolean, \
        deleted_at bigint, \
        PRIMARY KEY ((dialog_id), sent_at, id)) \
        WITH CLUSTERING ORDER BY (sent_at DESC, id ASC)",
    "CREATE TABLE IF NOT EXISTS messages_by_id ( \
        id uuid PRIMARY KEY, \
        dialog_id uuid, \
        sent_at bigint)",
    "CREATE TABLE IF NOT EXISTS message_receipts ( \
        message_id uuid, \
        user_id uuid, \
        dialog_id uuid, \
        status text, \
        updated_at bigint, \
        PRIMARY KEY (message_id, user_id))",
    "CREATE TABLE IF NOT EXISTS presence ( \
        user_id uuid PRIMARY KEY, \
        status text, \
        activity text, \
        is_online boolean, \
        last_seen bigint, \
        platform text, \
        device_info text, \
        location text)",
];

/// Connect to the cluster, ensure the keyspace and tables exist, and return a
/// shared session.
pub async fn connect(config: &ScyllaConfig) -> AppResult<Arc<Session>> {
    let session = SessionBuilder::new()
        .known_nodes(&config.nodes)
        .build()
        .await?;

    session
        .query(
            format!(
                "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = \
                 {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                config.keyspace
            ),
            (),
        )
        .await?;
    session
        .use_keyspace(&config.keyspace, false)
        .await
        .map_err(|e| AppError::Storage(e.to_string()))?;

    for stmt in SCHEMA_STATEMENTS {
        session.query(*stmt, ()).await?;
    }

    Ok(Arc::new(session))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_trip() {
        let now = Utc::now();
        let back = from_millis(to_millis(now)).unwrap();
        assert_eq!(back.timestamp_millis(), now.timestamp_millis());
    }
}
