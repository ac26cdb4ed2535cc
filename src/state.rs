use std::sync::Arc;
use tracing::info;

use crate::config::{Config, StorageBackend};
use crate::db;
use crate::error::AppResult;
use crate::hub::Hub;
use crate::repository::postgres::{
    PostgresDialogRepository, PostgresMessageRepository, PostgresPresenceRepository,
};
use crate::repository::scylla::{
    self, ScyllaDialogRepository, ScyllaMessageRepository, ScyllaPresenceRepository,
};
use crate::repository::{DialogRepository, MessageRepository, PresenceRepository};
use crate::services::{
    DialogService, LoggingEventPublisher, LoggingPushSender, MessageService, NoopMediaProcessor,
    NoopModerator, NoopSpamDetector, OpenPresencePolicy, PresenceService,
};

/// Composition root shared by every connection.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Hub,
    pub dialogs: Arc<DialogService>,
    pub messages: Arc<MessageService>,
    pub presence: Arc<PresenceService>,
}

impl AppState {
    /// Connect to the configured backend, run schema setup and wire the
    /// services.
    pub async fn initialize(config: Config) -> AppResult<Self> {
        let (dialogs, messages, presence): (
            Arc<dyn DialogRepository>,
            Arc<dyn MessageRepository>,
            Arc<dyn PresenceRepository>,
        ) = match config.backend {
            StorageBackend::Postgres => {
                let pool = db::init_pool(&config.database_url).await?;
                db::run_migrations(&pool).await.map_err(sqlx::Error::from)?;
                info!("using relational storage backend");
                (
                    Arc::new(PostgresDialogRepository::new(pool.clone())),
                    Arc::new(PostgresMessageRepository::new(pool.clone())),
                    Arc::new(PostgresPresenceRepository::new(pool)),
                )
            }
            StorageBackend::Scylla => {
                let session = scylla::connect(&config.scylla).await?;
                info!("using wide-column storage backend");
                (
                    Arc::new(ScyllaDialogRepository::new(session.clone())),
                    Arc::new(ScyllaMessageRepository::new(session.clone())),
                    Arc::new(ScyllaPresenceRepository::new(session)),
                )
            }
        };

        Ok(Self::with_repositories(config, dialogs, messages, presence))
    }

    /// Wire services around already-built repositories. Tests use this with
    /// in-memory fakes.
    pub fn with_repositories(
        config: Config,
        dialog_repo: Arc<dyn DialogRepository>,
        message_repo: Arc<dyn MessageRepository>,
        presence_repo: Arc<dyn PresenceRepository>,
    ) -> Self {
        let config = Arc::new(config);
        let hub = Hub::spawn();
        let publisher = Arc::new(LoggingEventPublisher);

        let dialogs = Arc::new(DialogService::new(
            Arc::clone(&dialog_repo),
            Arc::clone(&message_repo),
            hub.clone(),
            publisher.clone(),
        ));
        let messages = Arc::new(MessageService::new(
            dialog_repo,
            message_repo,
            hub.clone(),
            publisher.clone(),
            Arc::new(NoopModerator),
            Arc::new(NoopSpamDetector),
            Arc::new(NoopMediaProcessor),
            Arc::new(LoggingPushSender),
            Arc::clone(&config),
        ));
        let presence = Arc::new(PresenceService::new(
            presence_repo,
            hub.clone(),
            publisher,
            Arc::new(OpenPresencePolicy),
            config.presence_stale_minutes,
        ));

        Self {
            config,
            hub,
            dialogs,
            messages,
            presence,
        }
    }
}
