//! Boundary traits for concerns owned by other services.
//!
//! The messaging core calls these seams but ships only logging/no-op
//! implementations; real moderation, spam scoring, media storage and push
//! delivery live elsewhere and get wired in at composition time.

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AppResult;
use crate::events::DomainEvent;
use crate::models::{MessageContent, Presence};

/// Outcome of an external moderation check.
#[derive(Debug, Clone, PartialEq)]
pub enum ModerationVerdict {
    Allow,
    Reject(String),
}

#[async_trait]
pub trait ContentModerator: Send + Sync {
    async fn review(&self, sender_id: Uuid, content: &MessageContent)
        -> AppResult<ModerationVerdict>;
}

/// Allows everything.
pub struct NoopModerator;

#[async_trait]
impl ContentModerator for NoopModerator {
    async fn review(
        &self,
        _sender_id: Uuid,
        _content: &MessageContent,
    ) -> AppResult<ModerationVerdict> {
        Ok(ModerationVerdict::Allow)
    }
}

#[async_trait]
pub trait SpamDetector: Send + Sync {
    async fn is_spam(&self, sender_id: Uuid, content: &MessageContent) -> AppResult<bool>;
}

pub struct NoopSpamDetector;

#[async_trait]
impl SpamDetector for NoopSpamDetector {
    async fn is_spam(&self, _sender_id: Uuid, _content: &MessageContent) -> AppResult<bool> {
        Ok(false)
    }
}

/// Uploads media payloads to durable storage, returning the stored URL.
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    async fn store(&self, sender_id: Uuid, content: &MessageContent) -> AppResult<Option<String>>;
}

/// Leaves any caller-supplied URL untouched.
pub struct NoopMediaProcessor;

#[async_trait]
impl MediaProcessor for NoopMediaProcessor {
    async fn store(
        &self,
        _sender_id: Uuid,
        _content: &MessageContent,
    ) -> AppResult<Option<String>> {
        Ok(None)
    }
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn notify(&self, user_id: Uuid, event: &DomainEvent) -> AppResult<()>;
}

pub struct LoggingPushSender;

#[async_trait]
impl PushSender for LoggingPushSender {
    async fn notify(&self, user_id: Uuid, event: &DomainEvent) -> AppResult<()> {
        debug!(%user_id, event = event.event_type(), "push notification skipped (no sender configured)");
        Ok(())
    }
}

/// Publishes domain events for cross-service consumption.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> AppResult<()>;
}

pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: &DomainEvent) -> AppResult<()> {
        info!(event = event.event_type(), "domain event");
        Ok(())
    }
}

/// Decides what of a user's presence a given requester may see.
/// Returning `None` hides the record entirely.
pub trait PresencePolicy: Send + Sync {
    fn filter_for_requester(&self, requester_id: Uuid, presence: Presence) -> Option<Presence>;
}

/// Pass-through: everyone sees everyone.
pub struct OpenPresencePolicy;

impl PresencePolicy for OpenPresencePolicy {
    fn filter_for_requester(&self, _requester_id: Uuid, presence: Presence) -> Option<Presence> {
        Some(presence)
    }
}
