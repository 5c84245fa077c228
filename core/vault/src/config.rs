//! Runtime settings for a NoteVault installation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::DEFAULT_CODE_TTL;
use crate::gate::VaultCodeGate;
use crate::items::{ItemStore, JsonItemStore, MemoryItemStore};
use crate::retry::RetryConfig;
use crate::verifier::{CodeVerifier, HttpCodeVerifier};
use notevault_common::{Error, Result};
use notevault_crypto::KdfParams;
use notevault_storage::{ObjectStore, StoreRegistry};

/// Settings file name.
pub const SETTINGS_FILENAME: &str = "notevault.json";

/// Default environment variable holding the verifier API token.
pub const DEFAULT_TOKEN_ENV: &str = "NOTEVAULT_API_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierSettings {
    /// Base URL of the verification service.
    pub url: Option<String>,
    /// Environment variable to read the bearer token from.
    pub token_env: String,
    pub timeout_secs: u64,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            url: None,
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let config = RetryConfig::default();
        Self {
            max_retries: config.max_retries,
            initial_delay_ms: config.initial_delay.as_millis() as u64,
            max_delay_ms: config.max_delay.as_millis() as u64,
        }
    }
}

impl RetrySettings {
    pub fn to_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Object store name in the registry (e.g. "local", "memory").
    pub provider: String,
    /// Provider-specific configuration.
    pub provider_config: serde_json::Value,
    /// Directory for item records. `None` keeps records in memory.
    pub items_dir: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            provider_config: serde_json::json!({ "root": "notevault-data/objects" }),
            items_dir: Some(PathBuf::from("notevault-data/items")),
        }
    }
}

/// Top-level settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    pub kdf: KdfParams,
    pub verifier: VerifierSettings,
    pub retry: RetrySettings,
    pub storage: StorageSettings,
    /// Lifetime of a cached vault code.
    pub cache_ttl_secs: u64,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            verifier: VerifierSettings::default(),
            retry: RetrySettings::default(),
            storage: StorageSettings::default(),
            cache_ttl_secs: DEFAULT_CODE_TTL.as_secs(),
        }
    }
}

impl VaultSettings {
    /// Serialize settings to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize and validate settings from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        settings.kdf.validate()?;
        Ok(settings)
    }

    /// Read settings from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Resolve the configured object store.
    pub fn build_store(&self, registry: &StoreRegistry) -> Result<Arc<dyn ObjectStore>> {
        registry.resolve(&self.storage.provider, self.storage.provider_config.clone())
    }

    /// Open the configured item store.
    pub fn build_items(&self) -> Result<Arc<dyn ItemStore>> {
        Ok(match &self.storage.items_dir {
            Some(dir) => Arc::new(JsonItemStore::new(dir)?),
            None => Arc::new(MemoryItemStore::new()),
        })
    }

    /// Build the HTTP verifier, reading its token from the environment.
    ///
    /// # Errors
    /// - `InvalidInput` if no verifier URL is configured
    pub fn build_verifier(&self) -> Result<Arc<dyn CodeVerifier>> {
        let url = self.verifier.url.as_deref().ok_or_else(|| {
            Error::InvalidInput("No verifier URL configured".to_string())
        })?;
        let token = std::env::var(&self.verifier.token_env).ok();
        let verifier = HttpCodeVerifier::new(
            url,
            token,
            Duration::from_secs(self.verifier.timeout_secs),
        )?;
        Ok(Arc::new(verifier))
    }

    /// Gate around `verifier` using these KDF and retry settings.
    pub fn build_gate(&self, verifier: Arc<dyn CodeVerifier>) -> VaultCodeGate {
        VaultCodeGate::new(verifier)
            .with_kdf(self.kdf.clone())
            .with_retry(self.retry.to_config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notevault_storage::create_default_registry;

    #[test]
    fn test_defaults() {
        let settings = VaultSettings::default();
        assert_eq!(settings.kdf.iterations, 100_000);
        assert_eq!(settings.cache_ttl(), Duration::from_secs(900));
        assert_eq!(settings.retry.max_retries, 2);
        assert_eq!(settings.storage.provider, "local");
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let settings = VaultSettings::from_json(
            r#"{ "verifier": { "url": "https://api.example.com" }, "cache_ttl_secs": 60 }"#,
        )
        .unwrap();

        assert_eq!(settings.verifier.url.as_deref(), Some("https://api.example.com"));
        assert_eq!(settings.verifier.token_env, DEFAULT_TOKEN_ENV);
        assert_eq!(settings.cache_ttl(), Duration::from_secs(60));
        assert_eq!(settings.kdf, KdfParams::default());
    }

    #[test]
    fn test_weak_kdf_rejected() {
        let result = VaultSettings::from_json(r#"{ "kdf": { "iterations": 10, "salt": "s" } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut settings = VaultSettings::default();
        settings.storage.provider = "memory".to_string();
        settings.storage.items_dir = None;

        let restored = VaultSettings::from_json(&settings.to_json().unwrap()).unwrap();
        assert_eq!(restored, settings);
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join(SETTINGS_FILENAME);
        std::fs::write(&path, r#"{ "retry": { "max_retries": 5 } }"#).unwrap();

        let settings = VaultSettings::load(&path).unwrap();
        assert_eq!(settings.retry.max_retries, 5);
        assert_eq!(settings.retry.to_config().max_retries, 5);
    }

    #[test]
    fn test_build_components() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut settings = VaultSettings::default();
        settings.storage.provider_config = serde_json::json!({ "root": temp.path().join("objects") });
        settings.storage.items_dir = Some(temp.path().join("items"));

        let store = settings.build_store(&create_default_registry()).unwrap();
        assert_eq!(store.name(), "local");
        assert!(settings.build_items().is_ok());

        assert!(settings.build_verifier().is_err());
        settings.verifier.url = Some("http://127.0.0.1:9".to_string());
        assert!(settings.build_verifier().is_ok());
    }
}
