//! Application and secret configuration.
//!
//! `AppConfig` lives in `config.toml`, `SecretConfig` in `secret.json`.
//! Every field has a default so partial files are valid.

use crate::proposal::ScoreScale;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub dialogue: DialogueSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub models: ModelSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DialogueSettings {
    pub score_scale: ScoreScale,
    pub stall_limit: u32,
    pub temperature: f32,
}

impl Default for DialogueSettings {
    fn default() -> Self {
        Self {
            score_scale: ScoreScale::Feasibility100,
            stall_limit: 2,
            temperature: 0.7,
        }
    }
}

/// Time bounds in milliseconds.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Shared budget across all chat backends for one turn.
    pub inference_budget_ms: u64,
    /// Per snapshot fetch.
    pub snapshot_ms: u64,
    /// Per scene analysis call.
    pub analysis_ms: u64,
    /// Whole vision pipeline.
    pub vision_total_ms: u64,
    pub persistence_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            inference_budget_ms: 30_000,
            snapshot_ms: 4_000,
            analysis_ms: 8_000,
            vision_total_ms: 15_000,
            persistence_ms: 5_000,
        }
    }
}

impl TimeoutSettings {
    pub fn inference_budget(&self) -> Duration {
        Duration::from_millis(self.inference_budget_ms)
    }

    pub fn snapshot(&self) -> Duration {
        Duration::from_millis(self.snapshot_ms)
    }

    pub fn analysis(&self) -> Duration {
        Duration::from_millis(self.analysis_ms)
    }

    pub fn vision_total(&self) -> Duration {
        Duration::from_millis(self.vision_total_ms)
    }

    pub fn persistence(&self) -> Duration {
        Duration::from_millis(self.persistence_ms)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ModelSettings {
    /// Chat models, tried in order.
    pub chat: Vec<String>,
    pub vision_analysis: String,
    pub image_generation: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            chat: vec!["gemini-2.5-flash".to_string(), "gemini-2.0-flash".to_string()],
            vision_analysis: "gemini-2.5-flash".to_string(),
            image_generation: "gemini-2.5-flash-image".to_string(),
        }
    }
}

#[derive(
    Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    #[default]
    JsonDir,
    Firestore,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
}

/// Root structure of `secret.json`.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretConfig {
    #[serde(default)]
    pub gemini: Option<GeminiConfig>,
    #[serde(default)]
    pub google_maps: Option<GoogleMapsConfig>,
    #[serde(default)]
    pub firestore: Option<FirestoreConfig>,
}

#[derive(Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: String,
}

#[derive(Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct GoogleMapsConfig {
    pub api_key: String,
}

#[derive(Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct FirestoreConfig {
    pub project_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_database() -> String {
    "(default)".to_string()
}

impl FirestoreConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            api_key: None,
            database: default_database(),
        }
    }
}

impl GeminiConfig {
    /// Placeholder keys select the offline demo agent.
    pub fn is_placeholder(&self) -> bool {
        let key = self.api_key.trim();
        key.is_empty() || key.to_ascii_lowercase().contains("dummy")
    }
}

// Keys stay out of logs.
impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig").field("api_key", &"***").finish()
    }
}

impl std::fmt::Debug for GoogleMapsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleMapsConfig").field("api_key", &"***").finish()
    }
}

impl std::fmt::Debug for FirestoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirestoreConfig")
            .field("project_id", &self.project_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .finish()
    }
}
