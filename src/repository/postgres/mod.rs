//! Relational backend: participants live in a proper child table with
//! foreign-key integrity, multi-row writes run in transactions and counts are
//! exact. Chosen where consistency and query flexibility matter more than
//! write throughput.

mod dialog;
mod message;
mod presence;

pub use dialog::PostgresDialogRepository;
pub use message::PostgresMessageRepository;
pub use presence::PostgresPresenceRepository;
