//! Configuration types for workshop-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// Download behavior configuration (root directory, concurrency, deadlines)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root directory holding per-job workspaces (default: "./downloads")
    #[serde(default = "default_download_root")]
    pub download_root: PathBuf,

    /// Maximum concurrent downloads; submissions past the cap are rejected (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Wall-clock deadline after which a non-terminal job is reaped (default: 2 hours)
    #[serde(default = "default_job_timeout", with = "duration_serde")]
    pub job_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_root: default_download_root(),
            max_concurrent_downloads: default_max_concurrent(),
            job_timeout: default_job_timeout(),
        }
    }
}

/// Steam client configuration: binary location, target application, credentials
///
/// When `username` is absent the service runs in anonymous mode and the
/// session machinery is skipped entirely.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SteamConfig {
    /// Path to the steamcmd executable (auto-detected from PATH if None)
    #[serde(default)]
    pub steamcmd_path: Option<PathBuf>,

    /// Whether to search PATH for steamcmd if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Steam application id whose workshop items this service accepts (default: 480)
    #[serde(default = "default_app_id")]
    pub app_id: u32,

    /// Steam account name; None means anonymous mode
    #[serde(default)]
    pub username: Option<String>,

    /// Account password, used only for the initial credentialed login
    #[serde(default)]
    pub password: Option<String>,

    /// One-shot second-factor code consumed during session bootstrap
    #[serde(default)]
    pub guard_code: Option<String>,

    /// Hard deadline for a single content fetch (default: 2 hours)
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub fetch_timeout: Duration,

    /// Hard deadline for the login-and-quit session probe (default: 30 seconds)
    #[serde(default = "default_verify_timeout", with = "duration_serde")]
    pub verify_timeout: Duration,

    /// How long a verified session is trusted before re-probing (default: 30 minutes)
    #[serde(default = "default_session_cache", with = "duration_serde")]
    pub session_cache_window: Duration,
}

impl Default for SteamConfig {
    fn default() -> Self {
        Self {
            steamcmd_path: None,
            search_path: true,
            app_id: default_app_id(),
            username: None,
            password: None,
            guard_code: None,
            fetch_timeout: default_fetch_timeout(),
            verify_timeout: default_verify_timeout(),
            session_cache_window: default_session_cache(),
        }
    }
}

/// Archive builder configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Minimum acceptable archive size in bytes (default: 512)
    #[serde(default = "default_min_archive_size")]
    pub min_size: u64,

    /// Maximum acceptable archive size in bytes (None = unlimited)
    #[serde(default)]
    pub max_size: Option<u64>,

    /// Hard deadline for a single archive build (default: 30 minutes)
    #[serde(default = "default_build_timeout", with = "duration_serde")]
    pub build_timeout: Duration,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            min_size: default_min_archive_size(),
            max_size: None,
            build_timeout: default_build_timeout(),
        }
    }
}

/// Retry configuration for transient steam client failures
///
/// Backoff is linear: the delay before attempt N is `base_delay * N`,
/// capped at `max_delay`, with optional jitter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts including the first (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay unit for linear backoff (default: 2 seconds)
    #[serde(default = "default_base_delay", with = "duration_serde")]
    pub base_delay: Duration,

    /// Cap on a single backoff delay (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: true,
        }
    }
}

/// Periodic sweeper configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Interval between sweeper passes (default: 10 minutes)
    #[serde(default = "default_sweep_interval", with = "duration_serde")]
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: default_sweep_interval(),
        }
    }
}

/// Content pipeline configuration grouping retry, archive, and sweep settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Retry configuration for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Archive builder configuration
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Periodic sweeper configuration
    #[serde(default)]
    pub sweep: SweepConfig,
}

/// Log Bus configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogConfig {
    /// Number of records retained in the in-memory ring (default: 1000)
    #[serde(default = "default_log_capacity")]
    pub ring_capacity: usize,

    /// Number of recent records replayed to a new subscriber (default: 50)
    #[serde(default = "default_replay_count")]
    pub replay_count: usize,

    /// Interval between heartbeat frames on the log stream (default: 30 seconds)
    #[serde(default = "default_heartbeat_interval", with = "duration_serde")]
    pub heartbeat_interval: Duration,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            ring_capacity: default_log_capacity(),
            replay_count: default_replay_count(),
            heartbeat_interval: default_heartbeat_interval(),
        }
    }
}

/// Admin persistence integration
///
/// The durable history/session store is an external collaborator; this
/// config only carries its endpoint so embedders can wire it up.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Endpoint of the external admin persistence service
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:8080)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Shared token authenticating log-stream subscribers and the admin listing
    #[serde(default)]
    pub observer_token: Option<String>,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            observer_token: None,
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

/// API and external server integration configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerIntegrationConfig {
    /// REST API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Main configuration for [`WorkshopDownloader`](crate::WorkshopDownloader)
///
/// Fields are organized into logical sub-configs; all but `persistence`
/// are flattened so the JSON/TOML format stays flat.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Steam client settings
    #[serde(flatten)]
    pub steam: SteamConfig,

    /// Pipeline processing settings (retry, archive, sweep)
    #[serde(flatten)]
    pub processing: ProcessingConfig,

    /// Log Bus settings
    #[serde(flatten)]
    pub logging: LogConfig,

    /// Admin persistence integration
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// API server integration
    #[serde(flatten)]
    pub server: ServerIntegrationConfig,
}

impl Config {
    /// Download root directory
    pub fn download_root(&self) -> &PathBuf {
        &self.download.download_root
    }

    /// Whether steam credentials are configured (credentialed vs anonymous mode)
    pub fn credentialed(&self) -> bool {
        self.steam.username.is_some()
    }

    /// Validate cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::Config {
                message: "max_concurrent_downloads must be at least 1".into(),
                key: Some("max_concurrent_downloads".into()),
            });
        }
        if self.steam.app_id == 0 {
            return Err(Error::Config {
                message: "app_id must be set".into(),
                key: Some("app_id".into()),
            });
        }
        if self.logging.ring_capacity == 0 {
            return Err(Error::Config {
                message: "ring_capacity must be at least 1".into(),
                key: Some("ring_capacity".into()),
            });
        }
        Ok(())
    }

    /// Build a configuration from the recognized environment variables.
    ///
    /// Unset variables keep their defaults. Recognized names:
    /// `WORKSHOP_DL_DOWNLOAD_ROOT`, `WORKSHOP_DL_STEAMCMD_PATH`,
    /// `WORKSHOP_DL_APP_ID`, `WORKSHOP_DL_MAX_CONCURRENT`,
    /// `WORKSHOP_DL_MAX_ARCHIVE_SIZE`, `WORKSHOP_DL_JOB_TIMEOUT_SECS`,
    /// `WORKSHOP_DL_PORT`, `WORKSHOP_DL_STEAM_USERNAME`,
    /// `WORKSHOP_DL_STEAM_PASSWORD`, `WORKSHOP_DL_STEAM_GUARD_CODE`,
    /// `WORKSHOP_DL_PERSISTENCE_ENDPOINT`, `WORKSHOP_DL_LOG_CAPACITY`,
    /// `WORKSHOP_DL_OBSERVER_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Some(v) = read_env("WORKSHOP_DL_DOWNLOAD_ROOT") {
            config.download.download_root = PathBuf::from(v);
        }
        if let Some(v) = read_env("WORKSHOP_DL_STEAMCMD_PATH") {
            config.steam.steamcmd_path = Some(PathBuf::from(v));
        }
        if let Some(v) = read_env("WORKSHOP_DL_APP_ID") {
            config.steam.app_id = parse_env("WORKSHOP_DL_APP_ID", &v)?;
        }
        if let Some(v) = read_env("WORKSHOP_DL_MAX_CONCURRENT") {
            config.download.max_concurrent_downloads = parse_env("WORKSHOP_DL_MAX_CONCURRENT", &v)?;
        }
        if let Some(v) = read_env("WORKSHOP_DL_MAX_ARCHIVE_SIZE") {
            config.processing.archive.max_size = Some(parse_env("WORKSHOP_DL_MAX_ARCHIVE_SIZE", &v)?);
        }
        if let Some(v) = read_env("WORKSHOP_DL_JOB_TIMEOUT_SECS") {
            let secs: u64 = parse_env("WORKSHOP_DL_JOB_TIMEOUT_SECS", &v)?;
            config.download.job_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = read_env("WORKSHOP_DL_PORT") {
            let port: u16 = parse_env("WORKSHOP_DL_PORT", &v)?;
            config.server.api.bind_address.set_port(port);
        }
        if let Some(v) = read_env("WORKSHOP_DL_STEAM_USERNAME") {
            config.steam.username = Some(v);
        }
        if let Some(v) = read_env("WORKSHOP_DL_STEAM_PASSWORD") {
            config.steam.password = Some(v);
        }
        if let Some(v) = read_env("WORKSHOP_DL_STEAM_GUARD_CODE") {
            config.steam.guard_code = Some(v);
        }
        if let Some(v) = read_env("WORKSHOP_DL_PERSISTENCE_ENDPOINT") {
            config.persistence.endpoint = Some(v);
        }
        if let Some(v) = read_env("WORKSHOP_DL_LOG_CAPACITY") {
            config.logging.ring_capacity = parse_env("WORKSHOP_DL_LOG_CAPACITY", &v)?;
        }
        if let Some(v) = read_env("WORKSHOP_DL_OBSERVER_TOKEN") {
            config.server.api.observer_token = Some(v);
        }

        config.validate()?;
        Ok(config)
    }
}

fn read_env(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| Error::Config {
        message: format!("cannot parse '{value}'"),
        key: Some(name.to_string()),
    })
}

// Default value functions
fn default_download_root() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_job_timeout() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}

fn default_app_id() -> u32 {
    480
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}

fn default_verify_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_session_cache() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_min_archive_size() -> u64 {
    512
}

fn default_build_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_log_capacity() -> usize {
    1000
}

fn default_replay_count() -> usize {
    50
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
