mod common;

use chrono::{Duration, Utc};
use communication_service::error::AppError;
use communication_service::models::{Presence, PresenceStatus};
use communication_service::services::PresenceUpdate;
use uuid::Uuid;

use common::test_env;

#[tokio::test]
async fn record_is_created_lazily_and_defaults_offline() {
    let env = test_env();
    let user = Uuid::new_v4();
    let requester = Uuid::new_v4();

    let unknown = env.presence.get_presence(user, requester).await.unwrap();
    assert_eq!(unknown.status, PresenceStatus::Offline);
    assert!(!unknown.is_online);

    let online = env.presence.set_online(user).await.unwrap();
    assert_eq!(online.status, PresenceStatus::Online);
    assert!(online.is_online);
}

#[tokio::test]
async fn unchanged_update_publishes_nothing() {
    let env = test_env();
    let user = Uuid::new_v4();

    env.presence.set_online(user).await.unwrap();
    assert_eq!(env.published.count_of("user.presence_changed"), 1);

    // Same status again: heartbeat, not a change.
    env.presence.set_online(user).await.unwrap();
    assert_eq!(env.published.count_of("user.presence_changed"), 1);

    // Status change fires again.
    env.presence
        .update_presence(
            user,
            PresenceUpdate {
                status: Some(PresenceStatus::Away),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(env.published.count_of("user.presence_changed"), 2);
}

#[tokio::test]
async fn activity_change_alone_is_broadcast() {
    let env = test_env();
    let user = Uuid::new_v4();
    env.presence.set_online(user).await.unwrap();
    env.published.clear();

    env.presence
        .update_presence(
            user,
            PresenceUpdate {
                activity: Some(Some("in a call".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(env.published.count_of("user.presence_changed"), 1);

    // Same activity again: no-op.
    env.presence
        .update_presence(
            user,
            PresenceUpdate {
                activity: Some(Some("in a call".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(env.published.count_of("user.presence_changed"), 1);
}

#[tokio::test]
async fn presence_change_reaches_other_connected_users_only() {
    let env = test_env();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let mut alice_rx = env.hub.register(alice).await.unwrap().receiver;
    let mut bob_rx = env.hub.register(bob).await.unwrap().receiver;

    env.presence.set_online(alice).await.unwrap();

    let payload = bob_rx.recv().await.unwrap();
    assert!(payload.contains("user.presence_changed"));
    assert!(payload.contains(&alice.to_string()));
    assert!(alice_rx.try_recv().is_err());
}

#[tokio::test]
async fn batch_lookup_is_capped_at_100() {
    let env = test_env();
    let requester = Uuid::new_v4();

    let too_many: Vec<Uuid> = (0..101).map(|_| Uuid::new_v4()).collect();
    let err = env
        .presence
        .get_multiple_presence(&too_many, requester)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let some: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    env.presence.set_online(some[0]).await.unwrap();
    let found = env
        .presence
        .get_multiple_presence(&some, requester)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn stale_records_are_swept_offline() {
    let env = test_env();
    let fresh = Uuid::new_v4();
    let stale = Uuid::new_v4();

    env.presence.set_online(fresh).await.unwrap();

    let mut old = Presence::initial(stale);
    old.transition(PresenceStatus::Online);
    old.last_seen = Utc::now() - Duration::hours(2);
    env.presence_repo.insert_raw(old);

    let swept = env.presence.cleanup_stale_presence().await.unwrap();
    assert_eq!(swept, 1);

    let stale_now = env.presence.get_presence(stale, fresh).await.unwrap();
    assert_eq!(stale_now.status, PresenceStatus::Offline);
    let fresh_now = env.presence.get_presence(fresh, stale).await.unwrap();
    assert!(fresh_now.is_online);
}

#[tokio::test]
async fn offline_clears_activity_and_stamps_last_seen() {
    let env = test_env();
    let user = Uuid::new_v4();

    env.presence
        .update_presence(
            user,
            PresenceUpdate {
                status: Some(PresenceStatus::Online),
                activity: Some(Some("typing".into())),
                platform: Some("ios".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let before = Utc::now();
    let offline = env.presence.set_offline(user).await.unwrap();
    assert_eq!(offline.status, PresenceStatus::Offline);
    assert!(offline.activity.is_none());
    assert!(offline.last_seen >= before);
    // Device metadata survives going offline.
    assert_eq!(offline.platform.as_deref(), Some("ios"));
}

#[tokio::test]
async fn stats_and_online_listing() {
    let env = test_env();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();

    env.presence.set_online(a).await.unwrap();
    env.presence
        .update_presence(
            b,
            PresenceUpdate {
                status: Some(PresenceStatus::Busy),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    env.presence.set_online(c).await.unwrap();
    env.presence.set_offline(c).await.unwrap();

    let stats = env.presence.presence_stats().await.unwrap();
    assert_eq!(stats.online, 1);
    assert_eq!(stats.busy, 1);
    assert_eq!(stats.offline, 1);
    assert_eq!(stats.total_online(), 2);

    let online = env.presence.list_online(10).await.unwrap();
    assert_eq!(online.len(), 2);
}
