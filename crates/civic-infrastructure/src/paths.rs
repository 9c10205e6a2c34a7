//! Unified path management for CivicSense files.
//!
//! # Directory Structure
//!
//! ```text
//! ~/.config/civicsense/        # Config directory
//! ├── config.toml              # Application configuration
//! ├── secret.json              # API keys
//! └── pins/                    # Local proposal documents (json_dir backend)
//!     └── <id>.json
//! ```
//!
//! Tests pass a base directory, which replaces `~/.config/civicsense`.

use civic_core::config::{GeminiConfig, GoogleMapsConfig, SecretConfig};
use civic_core::error::{CivicError, Result};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "civicsense";

/// Resolves every CivicSense path from one root.
#[derive(Debug, Clone)]
pub struct CivicPaths {
    base: Option<PathBuf>,
}

impl CivicPaths {
    /// `None` uses the platform config directory.
    pub fn new(base: Option<&Path>) -> Self {
        Self {
            base: base.map(Path::to_path_buf),
        }
    }

    /// Returns the CivicSense configuration directory.
    pub fn config_dir(&self) -> Result<PathBuf> {
        if let Some(base) = &self.base {
            return Ok(base.clone());
        }
        let home = dirs::home_dir()
            .ok_or_else(|| CivicError::config("Cannot find home directory"))?;
        Ok(home.join(".config").join(APP_DIR))
    }

    pub fn config_file(&self) -> Result<PathBuf> {
        Ok(self.config_dir()?.join("config.toml"))
    }

    /// Returns the path to the secrets file.
    ///
    /// # Security Note
    ///
    /// Ensure this file has appropriate permissions (e.g., 600).
    pub fn secret_file(&self) -> Result<PathBuf> {
        Ok(self.config_dir()?.join("secret.json"))
    }

    pub fn pins_dir(&self) -> Result<PathBuf> {
        Ok(self.config_dir()?.join("pins"))
    }

    /// Ensures the secret file exists, creating an empty template if it doesn't.
    ///
    /// The file is created with mode 600 on Unix.
    pub async fn ensure_secret_file(&self) -> Result<PathBuf> {
        let secret_path = self.secret_file()?;
        if tokio::fs::try_exists(&secret_path).await? {
            return Ok(secret_path);
        }

        if let Some(parent) = secret_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let template = SecretConfig {
            gemini: Some(GeminiConfig {
                api_key: String::new(),
            }),
            google_maps: Some(GoogleMapsConfig {
                api_key: String::new(),
            }),
            firestore: None,
        };
        let template_json = serde_json::to_string_pretty(&template)?;
        tokio::fs::write(&secret_path, template_json).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&secret_path, permissions).await?;
        }

        Ok(secret_path)
    }
}

impl Default for CivicPaths {
    fn default() -> Self {
        Self::new(None)
    }
}
