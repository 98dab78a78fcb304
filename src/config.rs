use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Configuration for the clip uploader
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Clip server location and endpoints
    pub server: ServerConfig,

    /// Upload transfer settings
    pub upload: UploadConfig,

    /// Status polling settings
    pub polling: PollingConfig,

    /// Output and logging settings
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the clip server
    pub server_url: String,

    /// Path of the multipart upload endpoint
    pub upload_path: String,

    /// Path of the job progress endpoint
    pub progress_path: String,

    /// Path prefix of the page showing a finished clip
    pub result_path: String,

    /// Session cookie sent with every request
    pub session_cookie: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    /// Size of each streamed payload chunk in bytes
    pub chunk_size: usize,

    /// Whole-upload timeout in seconds (0 = no limit)
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between status queries in milliseconds
    pub interval_ms: u64,

    /// Timeout for a single status query in seconds
    pub request_timeout_seconds: u64,

    /// Give up after this many failed queries in a row (unset = retry forever)
    pub max_consecutive_failures: Option<u32>,

    /// Give up after this many queries in total (unset = no deadline)
    pub max_polls: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            upload_path: "/api/clips".to_string(),
            progress_path: "/api/clips/progress".to_string(),
            result_path: "/clips".to_string(),
            session_cookie: None,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256 * 1024,
            timeout_seconds: 0,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            request_timeout_seconds: 10,
            max_consecutive_failures: None,
            max_polls: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upload: UploadConfig::default(),
            polling: PollingConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parsed base URL
    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.server_url)
    }

    /// Absolute URL of an endpoint path
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url()?.join(path)
    }

    /// Where a finished clip can be viewed
    pub fn result_url(&self, job_id: &str) -> Result<Url, url::ParseError> {
        let path = format!("{}/{}", self.result_path.trim_end_matches('/'), job_id);
        self.endpoint(&path)
    }
}

impl UploadConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_seconds > 0).then(|| Duration::from_secs(self.request_timeout_seconds))
    }
}

impl Config {
    /// Load configuration from the first config file found, then from the environment
    pub fn load() -> Result<Self> {
        let mut config_paths = vec![
            PathBuf::from("clip-uploader.toml"),
            PathBuf::from("config/clip-uploader.toml"),
        ];
        if let Ok(home) = std::env::var("HOME") {
            config_paths.push(Path::new(&home).join(".config/clip-uploader/config.toml"));
        }

        Self::load_from(&config_paths)
    }

    /// Load the first parsable file among `config_paths`, then fall back to the environment.
    ///
    /// When nothing loads, a file that exists but fails to parse is reported instead of
    /// "not found".
    pub fn load_from(config_paths: &[PathBuf]) -> Result<Self> {
        let mut parse_error = None;

        for path in config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path.display());
                        return Ok(config.with_env_overrides());
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                        parse_error.get_or_insert_with(|| {
                            anyhow!("Failed to parse config file {}: {}", path.display(), e)
                        });
                    }
                }
            }
        }

        if let Ok(config) = Self::from_env() {
            return Ok(config);
        }

        Err(parse_error.unwrap_or_else(|| anyhow!("No configuration file found")))
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&config_str)
            .map_err(|e| anyhow!("Failed to parse config {}: {}", path.display(), e))?;
        Ok(config.with_env_overrides())
    }

    /// Load configuration from environment variables only.
    ///
    /// Fails when none of the recognised variables is set.
    pub fn from_env() -> Result<Self> {
        let has_env = ENV_VARS.iter().any(|name| std::env::var(name).is_ok());
        if !has_env {
            return Err(anyhow!("No CLIP_UPLOADER_* environment variables set"));
        }
        Ok(Self::default().with_env_overrides())
    }

    /// Apply environment variable overrides on top of this configuration
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("CLIP_UPLOADER_SERVER_URL") {
            self.server.server_url = url;
        }

        if let Ok(cookie) = std::env::var("CLIP_UPLOADER_SESSION_COOKIE") {
            self.server.session_cookie = Some(cookie);
        }

        if let Ok(interval) = std::env::var("CLIP_UPLOADER_POLL_INTERVAL_MS") {
            match interval.parse() {
                Ok(ms) => self.polling.interval_ms = ms,
                Err(e) => tracing::warn!("Ignoring CLIP_UPLOADER_POLL_INTERVAL_MS={}: {}", interval, e),
            }
        }

        if let Ok(log_level) = std::env::var("CLIP_UPLOADER_LOG_LEVEL") {
            self.output.log_level = log_level;
        }

        self
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let base = self
            .server
            .base_url()
            .map_err(|e| anyhow!("Invalid server_url {}: {}", self.server.server_url, e))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("server_url must be an absolute http(s) URL"));
        }

        for (name, path) in [
            ("upload_path", &self.server.upload_path),
            ("progress_path", &self.server.progress_path),
            ("result_path", &self.server.result_path),
        ] {
            if !path.starts_with('/') {
                return Err(anyhow!("{} must start with '/': {}", name, path));
            }
        }

        if self.upload.chunk_size == 0 {
            return Err(anyhow!("chunk_size must be greater than 0"));
        }

        if self.polling.interval_ms == 0 {
            return Err(anyhow!("interval_ms must be greater than 0"));
        }

        if self.polling.max_consecutive_failures == Some(0) {
            return Err(anyhow!("max_consecutive_failures must be greater than 0 when set"));
        }

        if self.polling.max_polls == Some(0) {
            return Err(anyhow!("max_polls must be greater than 0 when set"));
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Clip Uploader Configuration:\n\
            - Server: {}\n\
            - Upload Endpoint: {}\n\
            - Progress Endpoint: {}\n\
            - Poll Interval: {}ms\n\
            - Failure Cap: {}\n\
            - Poll Cap: {}\n\
            - Session Cookie: {}",
            self.server.server_url,
            self.server.upload_path,
            self.server.progress_path,
            self.polling.interval_ms,
            self.polling
                .max_consecutive_failures
                .map_or_else(|| "none".to_string(), |n| n.to_string()),
            self.polling
                .max_polls
                .map_or_else(|| "none".to_string(), |n| n.to_string()),
            if self.server.session_cookie.is_some() { "set" } else { "unset" },
        )
    }
}

const ENV_VARS: [&str; 4] = [
    "CLIP_UPLOADER_SERVER_URL",
    "CLIP_UPLOADER_SESSION_COOKIE",
    "CLIP_UPLOADER_POLL_INTERVAL_MS",
    "CLIP_UPLOADER_LOG_LEVEL",
];

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.config.server.server_url = url.into();
        self
    }

    pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.config.server.session_cookie = Some(cookie.into());
        self
    }

    /// Sub-millisecond intervals round up to 1 ms; zero stays zero and fails validation
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        let ms = interval.as_millis() as u64;
        self.config.polling.interval_ms = if ms == 0 && !interval.is_zero() { 1 } else { ms };
        self
    }

    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.config.polling.max_consecutive_failures = Some(max);
        self
    }

    pub fn with_max_polls(mut self, max: u64) -> Self {
        self.config.polling.max_polls = Some(max);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.upload.chunk_size = chunk_size;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.output.log_level = level.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
