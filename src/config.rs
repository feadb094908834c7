//! Settings for the model client, cache and coordinator.
//!
//! Settings are read from TOML with the following resolution order:
//! 1. Explicit path (e.g. `--config <path>`)
//! 2. `~/.formulaspark/config.toml` (user)
//! 3. Built-in defaults
//!
//! Every key is optional. A host application that keeps its own settings can
//! implement [`ConfigStore`] and call [`Settings::from_store`] instead.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{CacheConfig, default_cache_path};
use crate::coordinator::CoordinatorConfig;
use crate::providers::{ModelClient, RetryConfig};
use crate::types::ModelParameters;
use crate::{FormulaError, Result};

/// Keys understood by [`Settings::from_store`].
pub const SETTINGS_KEYS: &[&str] = &[
    "ollama_base_url",
    "model",
    "temperature",
    "top_p",
    "max_retries",
    "timeout_secs",
    "retry_base_ms",
    "retry_cap_ms",
    "cache_enabled",
    "cache_ttl_days",
    "cache_capacity",
    "cache_path",
    "autosave_ms",
    "workers",
    "health_check",
    "health_ttl_secs",
];

/// Key/value settings source owned by the host application.
pub trait ConfigStore {
    fn get(&self, key: &str) -> Option<toml::Value>;

    fn get_or(&self, key: &str, default: toml::Value) -> toml::Value {
        self.get(key).unwrap_or(default)
    }
}

impl ConfigStore for toml::Table {
    fn get(&self, key: &str) -> Option<toml::Value> {
        toml::map::Map::get(self, key).cloned()
    }
}

/// Pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Model endpoint base URL (default: http://localhost:11434).
    pub ollama_base_url: String,
    /// Model name (default: llama3).
    pub model: String,
    /// Sampling temperature (default: 0.2).
    pub temperature: f32,
    /// Nucleus sampling threshold (default: 0.9).
    pub top_p: f32,
    /// Physical attempts per generation, the first one included (default: 3).
    pub max_retries: u32,
    /// Per-attempt timeout in seconds (default: 90).
    pub timeout_secs: u64,
    /// Backoff base in milliseconds (default: 1000).
    pub retry_base_ms: u64,
    /// Backoff cap in milliseconds (default: 30000).
    pub retry_cap_ms: u64,
    pub cache_enabled: bool,
    /// Maximum entry age in days (default: 7).
    pub cache_ttl_days: u64,
    /// Maximum number of cached formulas (default: 1000).
    pub cache_capacity: usize,
    /// Cache file (default: platform cache dir).
    pub cache_path: Option<PathBuf>,
    /// Autosave debounce in milliseconds (default: 2000).
    pub autosave_ms: u64,
    /// Background model calls at once, 1 to 4 (default: 2).
    pub workers: usize,
    pub health_check: bool,
    /// Seconds a health probe result is trusted (default: 5).
    pub health_ttl_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ollama_base_url: crate::providers::ollama::DEFAULT_BASE_URL.to_string(),
            model: crate::providers::ollama::DEFAULT_MODEL.to_string(),
            temperature: 0.2,
            top_p: 0.9,
            max_retries: 3,
            timeout_secs: 90,
            retry_base_ms: 1_000,
            retry_cap_ms: 30_000,
            cache_enabled: true,
            cache_ttl_days: 7,
            cache_capacity: 1_000,
            cache_path: None,
            autosave_ms: 2_000,
            workers: 2,
            health_check: true,
            health_ttl_secs: 5,
        }
    }
}

impl Settings {
    /// Load settings from the standard locations.
    ///
    /// An explicit path must exist. Without one, the user config is used when
    /// present and the defaults otherwise.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// `~/.formulaspark/config.toml`, if a home directory is known.
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".formulaspark").join("config.toml"))
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(FormulaError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }
        Ok(Self::user_config_path().filter(|p| p.exists()))
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            FormulaError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let settings: Self = toml::from_str(&content).map_err(|e| {
            FormulaError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Build settings from a host-supplied store; missing keys use defaults.
    pub fn from_store(store: &dyn ConfigStore) -> Result<Self> {
        let mut table = toml::Table::new();
        for key in SETTINGS_KEYS {
            if let Some(value) = store.get(key) {
                table.insert((*key).to_string(), value);
            }
        }
        let settings: Self = toml::Value::Table(table)
            .try_into::<Settings>()
            .map_err(|e| FormulaError::Configuration(format!("Invalid settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.model_parameters().validate().map_err(|e| match e {
            FormulaError::InvalidInput(msg) => FormulaError::Configuration(msg),
            other => other,
        })?;
        if self.model.trim().is_empty() {
            return Err(FormulaError::Configuration("model name is empty".into()));
        }
        if self.max_retries == 0 {
            return Err(FormulaError::Configuration(
                "max_retries must be at least 1".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(FormulaError::Configuration(
                "timeout_secs must be positive".into(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(FormulaError::Configuration(
                "cache_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn model_parameters(&self) -> ModelParameters {
        ModelParameters::new(self.temperature, self.top_p)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .max_attempts(self.max_retries)
            .initial_delay(Duration::from_millis(self.retry_base_ms))
            .max_delay(Duration::from_millis(self.retry_cap_ms))
    }

    /// Cache settings; the file is the configured path or the platform default.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .capacity(self.cache_capacity)
            .ttl(Duration::from_secs(self.cache_ttl_days.saturating_mul(24 * 3600)))
            .autosave_interval(Duration::from_millis(self.autosave_ms))
            .path(self.cache_path.clone().unwrap_or_else(default_cache_path))
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::new()
            .workers(self.workers)
            .health_check(self.health_check)
            .health_ttl(Duration::from_secs(self.health_ttl_secs))
            .cache_enabled(self.cache_enabled)
    }

    /// HTTP client for the configured endpoint and model.
    pub fn model_client(&self) -> Result<ModelClient> {
        Ok(
            ModelClient::with_base_url(self.ollama_base_url.as_str(), self.model.as_str())?
                .retry(self.retry_config())
                .timeout(self.timeout()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_settings_have_expected_values() {
        let settings = Settings::default();
        assert_eq!(settings.ollama_base_url, "http://localhost:11434");
        assert_eq!(settings.model, "llama3");
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.timeout(), Duration::from_secs(90));
        assert_eq!(settings.cache_capacity, 1000);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn parse_partial_config() {
        let settings: Settings = toml::from_str(
            r#"
            model = "codellama"
            temperature = 0.5
            workers = 9
            "#,
        )
        .unwrap();
        assert_eq!(settings.model, "codellama");
        assert_eq!(settings.temperature, 0.5);
        assert_eq!(settings.top_p, 0.9);
        assert_eq!(settings.coordinator_config().workers, 4);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let settings: Settings = toml::from_str("theme = \"dark\"\nmodel = \"phi3\"").unwrap();
        assert_eq!(settings.model, "phi3");
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = Settings::load(Some(Path::new("/nonexistent/formulaspark.toml"))).unwrap_err();
        assert!(matches!(err, FormulaError::Configuration(_)));
    }

    #[test]
    fn load_from_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_retries = 5\ncache_ttl_days = 1").unwrap();
        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.retry_config().max_attempts, 5);
        assert_eq!(
            settings.cache_config().ttl,
            Duration::from_secs(24 * 3600)
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "temperature = 7.0").unwrap();
        let err = Settings::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, FormulaError::Configuration(_)));
    }

    #[test]
    fn from_store_uses_defaults_for_missing_keys() {
        let mut store = toml::Table::new();
        store.insert("model".into(), toml::Value::String("mistral".into()));
        store.insert("cache_capacity".into(), toml::Value::Integer(50));
        store.insert("unrelated".into(), toml::Value::Boolean(true));

        let settings = Settings::from_store(&store).unwrap();
        assert_eq!(settings.model, "mistral");
        assert_eq!(settings.cache_capacity, 50);
        assert_eq!(settings.temperature, 0.2);
    }

    #[test]
    fn from_store_rejects_wrong_types() {
        let mut store = toml::Table::new();
        store.insert("max_retries".into(), toml::Value::String("three".into()));
        assert!(Settings::from_store(&store).is_err());
    }

    #[test]
    fn store_get_or_falls_back() {
        let store = toml::Table::new();
        let value = store.get_or("model", toml::Value::String("llama3".into()));
        assert_eq!(value.as_str(), Some("llama3"));
    }
}
