//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/opsync/config.toml)
//! 3. Environment variables (OPSYNC_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment variable prefix
const ENV_PREFIX: &str = "OPSYNC";

/// Default debounce window for aggregate persists
pub const DEFAULT_DEBOUNCE_MS: u64 = 1500;

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Where the local mirror keeps its payloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorBackendKind {
    /// One JSON file per key under `data_dir/mirror`
    #[default]
    File,
    /// Single SQLite database at `data_dir/mirror.db`
    Sqlite,
    /// Process memory only; nothing survives exit
    Memory,
}

impl fmt::Display for MirrorBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MirrorBackendKind::File => "file",
            MirrorBackendKind::Sqlite => "sqlite",
            MirrorBackendKind::Memory => "memory",
        })
    }
}

impl FromStr for MirrorBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(MirrorBackendKind::File),
            "sqlite" => Ok(MirrorBackendKind::Sqlite),
            "memory" => Ok(MirrorBackendKind::Memory),
            other => bail!("Unknown mirror backend '{}' (expected file, sqlite or memory)", other),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (mirror, session)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the REST API, e.g. `https://ops.example.com`
    #[serde(default)]
    pub api_url: Option<String>,

    /// Local mirror backend
    #[serde(default)]
    pub mirror_backend: MirrorBackendKind,

    /// Debounce window for project persists, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Per-request timeout in seconds; 0 leaves the transport default
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Write logs here instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_url: None,
            mirror_backend: MirrorBackendKind::default(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (OPSYNC_DATA_DIR, OPSYNC_API_URL, ...)
    /// 2. Config file (~/.config/opsync/config.toml or OPSYNC_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Unparseable numeric or enum values are ignored with a warning.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env_var("DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = env_var("API_URL") {
            self.api_url = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = env_var("MIRROR_BACKEND") {
            match val.parse() {
                Ok(kind) => self.mirror_backend = kind,
                Err(e) => warn!("Ignoring {}_MIRROR_BACKEND: {}", ENV_PREFIX, e),
            }
        }

        if let Ok(val) = env_var("DEBOUNCE_MS") {
            match val.parse() {
                Ok(ms) => self.debounce_ms = ms,
                Err(_) => warn!("Ignoring {}_DEBOUNCE_MS: '{}' is not a number", ENV_PREFIX, val),
            }
        }

        if let Ok(val) = env_var("REQUEST_TIMEOUT_SECS") {
            match val.parse() {
                Ok(secs) => self.request_timeout_secs = secs,
                Err(_) => warn!(
                    "Ignoring {}_REQUEST_TIMEOUT_SECS: '{}' is not a number",
                    ENV_PREFIX, val
                ),
            }
        }

        if let Ok(val) = env_var("LOG_FILE") {
            self.log_file = if val.is_empty() { None } else { Some(PathBuf::from(val)) };
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path())
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Set a single key by name, as used by `opsync config set`
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "data_dir" => self.data_dir = PathBuf::from(value),
            "api_url" => {
                self.api_url = if value.is_empty() { None } else { Some(value.to_string()) }
            }
            "mirror_backend" => self.mirror_backend = value.parse()?,
            "debounce_ms" => {
                self.debounce_ms = value
                    .parse()
                    .with_context(|| format!("debounce_ms must be a number, got '{}'", value))?
            }
            "request_timeout_secs" => {
                self.request_timeout_secs = value.parse().with_context(|| {
                    format!("request_timeout_secs must be a number, got '{}'", value)
                })?
            }
            "log_file" => {
                self.log_file = if value.is_empty() { None } else { Some(PathBuf::from(value)) }
            }
            other => bail!(
                "Unknown config key '{}'. Valid keys: data_dir, api_url, mirror_backend, debounce_ms, request_timeout_secs, log_file",
                other
            ),
        }
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with OPSYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = env_var("CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("opsync")
            .join("config.toml")
    }

    /// Debounce window as a `Duration`
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Request timeout, `None` when left to the transport
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Directory for the file mirror backend
    pub fn mirror_dir(&self) -> PathBuf {
        self.data_dir.join("mirror")
    }

    /// Get the path to the SQLite mirror database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("mirror.db")
    }

    /// Get the path to the session file
    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }
}

fn env_var(name: &str) -> Result<String, std::env::VarError> {
    std::env::var(format!("{}_{}", ENV_PREFIX, name))
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("opsync")
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "OPSYNC_DATA_DIR",
        "OPSYNC_API_URL",
        "OPSYNC_MIRROR_BACKEND",
        "OPSYNC_DEBOUNCE_MS",
        "OPSYNC_REQUEST_TIMEOUT_SECS",
        "OPSYNC_LOG_FILE",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.api_url.is_none());
        assert_eq!(config.mirror_backend, MirrorBackendKind::File);
        assert_eq!(config.debounce(), Duration::from_millis(1500));
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        assert!(config.data_dir.ends_with("opsync"));
    }

    #[test]
    fn test_file_paths() {
        let config = Config::default();
        assert!(config.mirror_dir().ends_with("mirror"));
        assert!(config.sqlite_path().ends_with("mirror.db"));
        assert!(config.session_path().ends_with("session.json"));
    }

    #[test]
    fn test_zero_timeout_means_transport_default() {
        let config = Config {
            request_timeout_secs: 0,
            ..Config::default()
        };
        assert!(config.request_timeout().is_none());
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("OPSYNC_DATA_DIR", "/tmp/opsync-test");
        config.apply_env_overrides();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/opsync-test"));
    }

    #[test]
    fn test_env_override_api_url() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("OPSYNC_API_URL", "http://localhost:3000");
        config.apply_env_overrides();
        assert_eq!(config.api_url.as_deref(), Some("http://localhost:3000"));

        // Empty string clears it
        env::set_var("OPSYNC_API_URL", "");
        config.apply_env_overrides();
        assert!(config.api_url.is_none());
    }

    #[test]
    fn test_env_override_numbers_and_backend() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("OPSYNC_DEBOUNCE_MS", "250");
        env::set_var("OPSYNC_REQUEST_TIMEOUT_SECS", "0");
        env::set_var("OPSYNC_MIRROR_BACKEND", "SQLite");
        config.apply_env_overrides();

        assert_eq!(config.debounce_ms, 250);
        assert!(config.request_timeout().is_none());
        assert_eq!(config.mirror_backend, MirrorBackendKind::Sqlite);
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("OPSYNC_DEBOUNCE_MS", "soon");
        env::set_var("OPSYNC_MIRROR_BACKEND", "floppy");
        config.apply_env_overrides();

        assert_eq!(config.debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert_eq!(config.mirror_backend, MirrorBackendKind::File);
    }

    #[test]
    fn test_serialization() {
        let _guard = EnvGuard::new(ENV_VARS);

        let config = Config {
            data_dir: PathBuf::from("/data/opsync"),
            api_url: Some("https://ops.example.com".to_string()),
            mirror_backend: MirrorBackendKind::Sqlite,
            debounce_ms: 900,
            request_timeout_secs: 10,
            log_file: None,
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("api_url"));
        assert!(toml_str.contains("mirror_backend = \"sqlite\""));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.data_dir, config.data_dir);
        assert_eq!(parsed.api_url, config.api_url);
        assert_eq!(parsed.mirror_backend, config.mirror_backend);
        assert_eq!(parsed.debounce_ms, 900);
    }

    #[test]
    fn test_load_from_str_fills_defaults() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            api_url = "https://example.com"
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.api_url.as_deref(), Some("https://example.com"));
        assert_eq!(config.debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_set_known_and_unknown_keys() {
        let mut config = Config::default();
        config.set("debounce_ms", "2000").unwrap();
        config.set("mirror_backend", "memory").unwrap();
        config.set("api_url", "https://x.test").unwrap();

        assert_eq!(config.debounce_ms, 2000);
        assert_eq!(config.mirror_backend, MirrorBackendKind::Memory);
        assert_eq!(config.api_url.as_deref(), Some("https://x.test"));

        assert!(config.set("debounce_ms", "later").is_err());
        assert!(config.set("favorite_color", "blue").is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let config = Config {
            data_dir: temp_dir.path().join("data"),
            debounce_ms: 42,
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.debounce_ms, 42);
        assert!(loaded.data_dir.exists());
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        env::set_var("OPSYNC_DATA_DIR", temp_dir.path().join("d"));

        let config = Config::load_from_path(Path::new("/nonexistent/config.toml")).unwrap();
        assert!(config.api_url.is_none());
        assert_eq!(config.debounce_ms, DEFAULT_DEBOUNCE_MS);
    }
}
