//! Configuration service implementation.
//!
//! Loads `config.toml` and `secret.json` from [`CivicPaths`] and caches the
//! application config. Environment variables override secret file values.

use crate::paths::CivicPaths;
use civic_core::config::{AppConfig, FirestoreConfig, GeminiConfig, GoogleMapsConfig, SecretConfig};
use civic_core::error::{CivicError, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_GOOGLE_MAPS_API_KEY: &str = "GOOGLE_MAPS_API_KEY";
pub const ENV_FIRESTORE_PROJECT_ID: &str = "FIRESTORE_PROJECT_ID";

/// Configuration service that loads and caches the application configuration.
#[derive(Debug, Clone)]
pub struct ConfigService {
    paths: CivicPaths,
    config: Arc<RwLock<Option<AppConfig>>>,
}

impl ConfigService {
    pub fn new(base_dir: Option<&Path>) -> Self {
        Self {
            paths: CivicPaths::new(base_dir),
            config: Arc::new(RwLock::new(None)),
        }
    }

    pub fn paths(&self) -> &CivicPaths {
        &self.paths
    }

    /// Gets the application configuration, loading from file if not cached.
    ///
    /// A missing file yields defaults; a malformed file is an error.
    pub async fn get_config(&self) -> Result<AppConfig> {
        if let Some(cached) = self.config.read().await.as_ref() {
            return Ok(cached.clone());
        }

        let loaded = self.load_config().await?;
        *self.config.write().await = Some(loaded.clone());
        Ok(loaded)
    }

    /// Invalidates the cache, forcing a reload on next access.
    pub async fn invalidate_cache(&self) {
        *self.config.write().await = None;
    }

    async fn load_config(&self) -> Result<AppConfig> {
        let path = self.paths.config_file()?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                CivicError::config(format!("Invalid {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Ok(AppConfig::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Loads secrets, then applies environment overrides.
    pub async fn load_secrets(&self) -> Result<SecretConfig> {
        let path = self.paths.secret_file()?;
        let from_file = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => SecretConfig::default(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SecretConfig::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(apply_env_overrides(from_file, |key| std::env::var(key).ok()))
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Overrides secret values with non-empty variables from `lookup`.
pub fn apply_env_overrides(
    mut secrets: SecretConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> SecretConfig {
    let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(api_key) = var(ENV_GEMINI_API_KEY) {
        secrets.gemini = Some(GeminiConfig { api_key });
    }
    if let Some(api_key) = var(ENV_GOOGLE_MAPS_API_KEY) {
        secrets.google_maps = Some(GoogleMapsConfig { api_key });
    }
    if let Some(project_id) = var(ENV_FIRESTORE_PROJECT_ID) {
        secrets.firestore = Some(match secrets.firestore.take() {
            Some(existing) => FirestoreConfig {
                project_id,
                ..existing
            },
            None => FirestoreConfig::new(project_id),
        });
    }
    secrets
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_core::config::StorageBackend;
    use civic_core::proposal::ScoreScale;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_config_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let service = ConfigService::new(Some(temp_dir.path()));
        assert_eq!(service.get_config().await.unwrap(), AppConfig::default());
    }

    #[tokio::test]
    async fn test_config_is_cached_until_invalidated() {
        let temp_dir = TempDir::new().unwrap();
        let service = ConfigService::new(Some(temp_dir.path()));
        let path = temp_dir.path().join("config.toml");

        tokio::fs::write(&path, "[dialogue]\nscore_scale = \"saturation10\"\n")
            .await
            .unwrap();
        let config = service.get_config().await.unwrap();
        assert_eq!(config.dialogue.score_scale, ScoreScale::Saturation10);

        tokio::fs::write(&path, "[storage]\nbackend = \"memory\"\n")
            .await
            .unwrap();
        assert_eq!(
            service.get_config().await.unwrap().dialogue.score_scale,
            ScoreScale::Saturation10
        );

        service.invalidate_cache().await;
        let reloaded = service.get_config().await.unwrap();
        assert_eq!(reloaded.storage.backend, StorageBackend::Memory);
        assert_eq!(reloaded.dialogue.score_scale, ScoreScale::Feasibility100);
    }

    #[tokio::test]
    async fn test_malformed_config_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        tokio::fs::write(temp_dir.path().join("config.toml"), "[dialogue\n")
            .await
            .unwrap();
        let service = ConfigService::new(Some(temp_dir.path()));
        assert!(matches!(
            service.get_config().await,
            Err(CivicError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_load_secrets_from_file() {
        let temp_dir = TempDir::new().unwrap();
        tokio::fs::write(
            temp_dir.path().join("secret.json"),
            r#"{"google_maps": {"api_key": "maps-key"}}"#,
        )
        .await
        .unwrap();
        let service = ConfigService::new(Some(temp_dir.path()));
        let secrets = service.load_secrets().await.unwrap();
        assert!(secrets.google_maps.is_some());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_GEMINI_API_KEY, "env-gemini"),
            (ENV_GOOGLE_MAPS_API_KEY, "  "),
            (ENV_FIRESTORE_PROJECT_ID, "civic-prod"),
        ]);
        let file = SecretConfig {
            google_maps: Some(GoogleMapsConfig {
                api_key: "file-maps".to_string(),
            }),
            firestore: Some(FirestoreConfig {
                project_id: "civic-dev".to_string(),
                api_key: Some("fs-key".to_string()),
                database: "pins-db".to_string(),
            }),
            ..SecretConfig::default()
        };

        let merged = apply_env_overrides(file, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(merged.gemini.unwrap().api_key, "env-gemini");
        // Blank variables do not override
        assert_eq!(merged.google_maps.unwrap().api_key, "file-maps");
        let firestore = merged.firestore.unwrap();
        assert_eq!(firestore.project_id, "civic-prod");
        assert_eq!(firestore.database, "pins-db");
    }
}
