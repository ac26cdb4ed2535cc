pub mod collaborators;
pub mod dialog_service;
pub mod message_service;
pub mod presence_service;

pub use collaborators::{
    ContentModerator, EventPublisher, LoggingEventPublisher, LoggingPushSender, MediaProcessor,
    ModerationVerdict, NoopMediaProcessor, NoopModerator, NoopSpamDetector, OpenPresencePolicy,
    PresencePolicy, PushSender, SpamDetector,
};
pub use dialog_service::DialogService;
pub use message_service::MessageService;
pub use presence_service::{PresenceService, PresenceUpdate, MAX_PRESENCE_BATCH};
