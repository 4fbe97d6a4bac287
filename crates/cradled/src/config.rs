//! Configuration for cradled.
//!
//! Loads settings from cradle.toml or uses defaults; credentials can be
//! overridden from the environment so they stay out of the config file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default config file path
pub const CONFIG_PATH: &str = "cradle.toml";

/// External inference provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key; empty means reasoning degrades to configuration errors.
    #[serde(default)]
    pub api_key: String,

    /// Full generate endpoint URL.
    #[serde(default)]
    pub api_endpoint: String,

    /// Reported model name until the provider names one itself.
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Hard per-attempt timeout. One attempt, no internal retry.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_model_name() -> String {
    "gemini-3".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_endpoint: String::new(),
            model_name: default_model_name(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Live audio stream tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Per-chunk size ceiling in bytes.
    #[serde(default = "default_chunk_max_bytes")]
    pub chunk_max_bytes: usize,

    /// Run a partial reasoning pass on every Kth chunk.
    #[serde(default = "default_partial_every_chunks")]
    pub partial_every_chunks: u64,

    /// Idle seconds after which a stream is reaped.
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout_secs: u64,
}

fn default_chunk_max_bytes() -> usize {
    512 * 1024
}

fn default_partial_every_chunks() -> u64 {
    3
}

fn default_stream_timeout() -> u64 {
    300
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            chunk_max_bytes: default_chunk_max_bytes(),
            partial_every_chunks: default_partial_every_chunks(),
            stream_timeout_secs: default_stream_timeout(),
        }
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CradleConfig {
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub live: LiveConfig,

    /// Single-shot audio upload ceiling in bytes.
    #[serde(default = "default_max_audio_bytes")]
    pub max_audio_bytes: usize,

    /// Deterministic 50/50 treatment/control split when no variant is requested.
    #[serde(default)]
    pub ab_auto_split: bool,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// JSON file backing the adaptive prior store.
    #[serde(default = "default_priors_path")]
    pub priors_path: PathBuf,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_max_audio_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_db_path() -> PathBuf {
    PathBuf::from("cradle.db")
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_priors_path() -> PathBuf {
    PathBuf::from("priors.json")
}

fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for CradleConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            live: LiveConfig::default(),
            max_audio_bytes: default_max_audio_bytes(),
            ab_auto_split: false,
            db_path: default_db_path(),
            upload_dir: default_upload_dir(),
            priors_path: default_priors_path(),
            listen_addr: default_listen_addr(),
        }
    }
}

impl CradleConfig {
    /// Load from a TOML file, falling back to defaults when absent or invalid.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Failed to parse {}: {} - using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Apply environment overrides for credentials and the A/B switch.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("CRADLE_API_KEY") {
            self.provider.api_key = key;
        }
        if let Ok(endpoint) = std::env::var("CRADLE_API_ENDPOINT") {
            self.provider.api_endpoint = endpoint;
        }
        if let Ok(split) = std::env::var("CRADLE_AB_AUTO_SPLIT") {
            self.ab_auto_split = split.eq_ignore_ascii_case("true");
        }
    }

    /// Directory holding in-progress live stream buffers.
    pub fn live_dir(&self) -> PathBuf {
        self.upload_dir.join("live")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CradleConfig::default();
        assert_eq!(config.live.partial_every_chunks, 3);
        assert_eq!(config.live.chunk_max_bytes, 512 * 1024);
        assert_eq!(config.live.stream_timeout_secs, 300);
        assert_eq!(config.max_audio_bytes, 10 * 1024 * 1024);
        assert!(!config.ab_auto_split);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ab_auto_split = true\n\n[live]\npartial_every_chunks = 5").unwrap();
        let config = CradleConfig::load(file.path());
        assert!(config.ab_auto_split);
        assert_eq!(config.live.partial_every_chunks, 5);
        // Unspecified sections keep their defaults.
        assert_eq!(config.live.stream_timeout_secs, 300);
        assert_eq!(config.provider.request_timeout_secs, 30);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = CradleConfig::load(Path::new("/nonexistent/cradle.toml"));
        assert_eq!(config.listen_addr, "0.0.0.0:8000");
    }
}
