pub mod dialog;
pub mod message;
pub mod presence;

pub use dialog::{
    Dialog, DialogSettings, DialogType, InvitePolicy, LastMessagePreview, ModerationPolicy,
    Participant, ParticipantRole, Permission, Privacy,
};
pub use message::{
    Message, MessageContent, MessageStats, MessageStatus, MessageType, ReceiptStatus,
    ReplySnapshot,
};
pub use presence::{Presence, PresenceStats, PresenceStatus};
