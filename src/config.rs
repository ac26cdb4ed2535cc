use dotenvy::dotenv;
use std::env;

/// Which repository backend backs the three stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Scylla,
}

impl StorageBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(StorageBackend::Postgres),
            "scylla" | "cassandra" => Some(StorageBackend::Scylla),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScyllaConfig {
    pub nodes: Vec<String>,
    pub keyspace: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: StorageBackend,
    pub database_url: String,
    pub scylla: ScyllaConfig,
    pub port: u16,
    /// Default max text message length in chars; dialogs may lower it.
    pub max_message_length: usize,
    /// Max attachment size in bytes for file/image/video messages.
    pub max_file_size_bytes: i64,
    /// Window during which a sender may edit their message.
    pub edit_window_hours: i64,
    /// Presence records older than this are swept to offline.
    pub presence_stale_minutes: i64,
}

impl Config {
    fn parse_nodes(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();

        let backend_raw = env::var("STORAGE_BACKEND").unwrap_or_else(|_| "postgres".into());
        let backend = StorageBackend::parse(&backend_raw).ok_or_else(|| {
            crate::error::AppError::Config(format!("unknown STORAGE_BACKEND: {backend_raw}"))
        })?;

        let database_url = match backend {
            StorageBackend::Postgres => env::var("DATABASE_URL")
                .map_err(|_| crate::error::AppError::Config("DATABASE_URL missing".into()))?,
            StorageBackend::Scylla => env::var("DATABASE_URL").unwrap_or_default(),
        };

        let scylla_nodes_raw =
            env::var("SCYLLA_NODES").unwrap_or_else(|_| "127.0.0.1:9042".into());
        let scylla = ScyllaConfig {
            nodes: Self::parse_nodes(&scylla_nodes_raw),
            keyspace: env::var("SCYLLA_KEYSPACE").unwrap_or_else(|_| "communication".into()),
        };
        if backend == StorageBackend::Scylla && scylla.nodes.is_empty() {
            return Err(crate::error::AppError::Config(
                "SCYLLA_NODES must list at least one node".into(),
            ));
        }

        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        let max_message_length = env::var("MAX_MESSAGE_LENGTH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4_000);

        let max_file_size_bytes = env::var("MAX_FILE_SIZE_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50 * 1024 * 1024);

        let edit_window_hours = env::var("EDIT_WINDOW_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(24);

        let presence_stale_minutes = env::var("PRESENCE_STALE_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            backend,
            database_url,
            scylla,
            port,
            max_message_length,
            max_file_size_bytes,
            edit_window_hours,
            presence_stale_minutes,
        })
    }

    pub fn test_defaults() -> Self {
        Self {
            backend: StorageBackend::Postgres,
            database_url: "postgres://localhost/communication_test".into(),
            scylla: ScyllaConfig {
                nodes: vec!["127.0.0.1:9042".into()],
                keyspace: "communication_test".into(),
            },
            port: 3000,
            max_message_length: 4_000,
            max_file_size_bytes: 50 * 1024 * 1024,
            edit_window_hours: 24,
            presence_stale_minutes: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parsing_accepts_aliases() {
        assert_eq!(
            StorageBackend::parse("PostgreSQL"),
            Some(StorageBackend::Postgres)
        );
        assert_eq!(StorageBackend::parse("scylla"), Some(StorageBackend::Scylla));
        assert_eq!(StorageBackend::parse("mongo"), None);
    }

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::test_defaults();
        assert_eq!(cfg.max_message_length, 4_000);
        assert_eq!(cfg.edit_window_hours, 24);
        assert_eq!(cfg.presence_stale_minutes, 30);
    }
}
