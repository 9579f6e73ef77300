//! Configuration file support

use crate::orchestration::{ProgressSettings, SessionSettings};
use imagent::GeminiConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TryOnConfig {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// API key; when unset it is read from `api_key_env`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    #[serde(default = "default_job_estimate_secs")]
    pub job_estimate_secs: u64,

    #[serde(default = "default_extra_job_secs")]
    pub extra_job_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Remote calls in flight per batch; unbounded when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

// Defaults

fn default_endpoint() -> String {
    GeminiConfig::default().endpoint
}

fn default_model() -> String {
    GeminiConfig::default().model
}

fn default_api_key_env() -> String {
    "API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_tick_ms() -> u64 {
    100
}

fn default_job_estimate_secs() -> u64 {
    15
}

fn default_extra_job_secs() -> u64 {
    5
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./try-on")
}

fn default_file_prefix() -> String {
    "ai-fashion-try-on".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            job_estimate_secs: default_job_estimate_secs(),
            extra_job_secs: default_extra_job_secs(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            file_prefix: default_file_prefix(),
        }
    }
}

impl TryOnConfig {
    /// `<config dir>/tryon/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("tryon").join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: TryOnConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Load an explicit file, or the default location when it exists, or
    /// fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "loading config");
                Self::from_file(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Resolve the API key from the config or the environment
    pub fn api_key(&self) -> Option<String> {
        self.remote
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(&self.remote.api_key_env).ok().filter(|k| !k.is_empty()))
    }

    pub fn gemini(&self) -> GeminiConfig {
        GeminiConfig {
            endpoint: self.remote.endpoint.clone(),
            model: self.remote.model.clone(),
            api_key: self.api_key(),
            timeout: Duration::from_secs(self.remote.timeout_secs),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            progress: ProgressSettings {
                tick: Duration::from_millis(self.progress.tick_ms.max(1)),
                job_estimate: Duration::from_secs(self.progress.job_estimate_secs),
                extra_job: Duration::from_secs(self.progress.extra_job_secs),
            },
            max_concurrency: self.batch.max_concurrency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: TryOnConfig = toml::from_str("").unwrap();
        assert_eq!(config.remote.api_key_env, "API_KEY");
        assert_eq!(config.progress.tick_ms, 100);
        assert_eq!(config.output.file_prefix, "ai-fashion-try-on");
        assert!(config.batch.max_concurrency.is_none());
        assert_eq!(config.session_settings().progress, ProgressSettings::default());
    }

    #[test]
    fn test_partial_sections() {
        let config: TryOnConfig = toml::from_str(
            r#"
            [remote]
            model = "image-model-test"
            api_key = "secret"

            [batch]
            max_concurrency = 4

            [progress]
            job_estimate_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.remote.model, "image-model-test");
        assert_eq!(config.remote.timeout_secs, 120);
        assert_eq!(config.api_key().as_deref(), Some("secret"));
        assert_eq!(config.gemini().api_key.as_deref(), Some("secret"));

        let settings = config.session_settings();
        assert_eq!(settings.max_concurrency, Some(4));
        assert_eq!(settings.progress.job_estimate, Duration::from_secs(30));
        assert_eq!(settings.progress.extra_job, Duration::from_secs(5));
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = TryOnConfig::default();
        config.output.dir = PathBuf::from("/tmp/looks");
        config.to_file(&path).unwrap();

        let loaded = TryOnConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.output.dir, PathBuf::from("/tmp/looks"));
        assert!(loaded.remote.api_key.is_none());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TryOnConfig::load(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
