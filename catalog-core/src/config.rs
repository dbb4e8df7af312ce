use std::env;

/// Application configuration loaded from environment variables.
///
/// Required variables panic with a clear message when missing, the same
/// contract as every other `from_env` constructor in this codebase: fail
/// fast at startup rather than deep inside a running pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    // Archive (crawl input)
    pub archive_base_url: String,

    // Relational store
    pub database_url: String,

    // Search index
    pub index_host: String,
    pub index_api_key: String,

    // Metadata provider (IGDB-shaped: OAuth2 client-credentials + multiquery)
    pub metadata_client_id: String,
    pub metadata_client_secret: String,
    pub metadata_auth_host: String,
    pub metadata_api_host: String,

    // Admin surface
    pub admin_shared_key: String,
    pub admin_host: String,
    pub admin_port: u16,

    // Scheduler persistence
    pub schedule_config_path: String,

    // Tunables (literal spec defaults, overridable for tests)
    pub crawl_concurrency: usize,
    pub db_batch_size: usize,
    pub igdb_workers: usize,
    pub igdb_batch_size: usize,
    pub igdb_worker_delay_ms: u64,
}

impl Config {
    /// Load configuration for the pipeline binary (crawler + enrichment + scheduler).
    pub fn from_env() -> Self {
        Self {
            archive_base_url: required_env("ARCHIVE_BASE_URL"),
            database_url: required_env("DATABASE_URL"),
            index_host: required_env("INDEX_HOST"),
            index_api_key: env::var("INDEX_API_KEY").unwrap_or_default(),
            metadata_client_id: env::var("METADATA_CLIENT_ID").unwrap_or_default(),
            metadata_client_secret: env::var("METADATA_CLIENT_SECRET").unwrap_or_default(),
            metadata_auth_host: env::var("METADATA_AUTH_HOST")
                .unwrap_or_else(|_| "id.twitch.tv".to_string()),
            metadata_api_host: env::var("METADATA_API_HOST")
                .unwrap_or_else(|_| "api.igdb.com".to_string()),
            admin_shared_key: env::var("ADMIN_SHARED_KEY").unwrap_or_default(),
            admin_host: env::var("ADMIN_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            admin_port: env::var("ADMIN_PORT")
                .unwrap_or_else(|_| "8088".to_string())
                .parse()
                .expect("ADMIN_PORT must be a number"),
            schedule_config_path: env::var("SCHEDULE_CONFIG_PATH")
                .unwrap_or_else(|_| "./data/schedule.json".to_string()),
            crawl_concurrency: env_usize("CRAWL_CONCURRENCY", 20),
            db_batch_size: env_usize("DB_BATCH_SIZE", 500),
            igdb_workers: env_usize("IGDB_WORKERS", 4),
            igdb_batch_size: env_usize("IGDB_BATCH_SIZE", 10),
            igdb_worker_delay_ms: env::var("IGDB_WORKER_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
        }
    }

    /// True when provider credentials are present. Their absence disables
    /// enrichment but not crawling (spec.md §6).
    pub fn has_metadata_credentials(&self) -> bool {
        !self.metadata_client_id.is_empty() && !self.metadata_client_secret.is_empty()
    }

    /// Log the presence (not the value) of every sensitive env var.
    pub fn log_redacted(&self) {
        let vars = [
            ("DATABASE_URL", &self.database_url),
            ("INDEX_API_KEY", &self.index_api_key),
            ("METADATA_CLIENT_ID", &self.metadata_client_id),
            ("METADATA_CLIENT_SECRET", &self.metadata_client_secret),
            ("ADMIN_SHARED_KEY", &self.admin_shared_key),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
