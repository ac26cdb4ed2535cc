//! Repository tests against a real PostgreSQL instance.
//!
//! Skipped unless TEST_DATABASE_URL points at a disposable database; each run
//! applies the embedded migrations before exercising the repositories.

use std::sync::Arc;
use uuid::Uuid;

use communication_service::db;
use communication_service::models::{
    Dialog, DialogType, LastMessagePreview, Message, MessageContent, MessageType, Participant,
    ParticipantRole, Privacy, ReceiptStatus,
};
use communication_service::repository::postgres::{
    PostgresDialogRepository, PostgresMessageRepository,
};
use communication_service::repository::{DialogRepository, MessageRepository};

async fn test_pool() -> Option<sqlx::PgPool> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = db::init_pool(&url).await.expect("connect to test database");
    db::run_migrations(&pool).await.expect("run migrations");
    Some(pool)
}

#[tokio::test]
async fn dialog_round_trip_with_participants() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    let repo = Arc::new(PostgresDialogRepository::new(pool));

    let owner = Uuid::new_v4();
    let member = Uuid::new_v4();
    let dialog = Dialog::new(
        DialogType::Group,
        "pg round trip".into(),
        Privacy::Private,
        owner,
        None,
    );
    let participants = vec![
        Participant::new(dialog.id, owner, ParticipantRole::Owner),
        Participant::new(dialog.id, member, ParticipantRole::Member),
    ];
    repo.create_dialog(&dialog, &participants).await.unwrap();

    let count = repo.refresh_participant_count(dialog.id).await.unwrap();
    assert_eq!(count, 2);

    let loaded = repo.get_dialog(dialog.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "pg round trip");
    assert_eq!(loaded.participant_count, 2);

    let stored = repo.get_participant(dialog.id, member).await.unwrap().unwrap();
    assert_eq!(stored.role, ParticipantRole::Member);
    assert!(stored.is_active);
}

#[tokio::test]
async fn receipt_upsert_is_idempotent_and_refuses_downgrade() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    let dialogs = Arc::new(PostgresDialogRepository::new(pool.clone()));
    let messages = Arc::new(PostgresMessageRepository::new(pool));

    let owner = Uuid::new_v4();
    let reader = Uuid::new_v4();
    let dialog = Dialog::new(
        DialogType::Group,
        "receipts".into(),
        Privacy::Private,
        owner,
        None,
    );
    dialogs
        .create_dialog(
            &dialog,
            &[
                Participant::new(dialog.id, owner, ParticipantRole::Owner),
                Participant::new(dialog.id, reader, ParticipantRole::Member),
            ],
        )
        .await
        .unwrap();

    let message = Message::new(
        dialog.id,
        owner,
        MessageType::Text,
        MessageContent::Text { text: "hi".into() },
    );
    messages.create_message(&message).await.unwrap();

    assert!(messages
        .upsert_receipt(message.id, dialog.id, reader, ReceiptStatus::Read)
        .await
        .unwrap());
    // Repeat and downgrade are both no-ops.
    assert!(!messages
        .upsert_receipt(message.id, dialog.id, reader, ReceiptStatus::Read)
        .await
        .unwrap());
    assert!(!messages
        .upsert_receipt(message.id, dialog.id, reader, ReceiptStatus::Delivered)
        .await
        .unwrap());

    let preview = LastMessagePreview {
        message_id: message.id,
        sender_id: owner,
        preview: "hi".into(),
        sent_at: message.sent_at,
    };
    dialogs.update_last_message(dialog.id, &preview).await.unwrap();
    let loaded = dialogs.get_dialog(dialog.id).await.unwrap().unwrap();
    assert_eq!(loaded.message_count, 1);
    assert_eq!(loaded.last_message.unwrap().message_id, message.id);
}
