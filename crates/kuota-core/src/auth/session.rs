//! Bearer token kept on disk between runs.
//!
//! Every `kuota` invocation builds a fresh [`CredentialManager`], so without
//! this file a one-shot command would log in to the SSO provider each time.
//!
//! [`CredentialManager`]: super::CredentialManager

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Credential;

/// Session file name in the data directory
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionData {
    username: String,
    credential: Credential,
    saved_at: DateTime<Utc>,
}

/// The saved credential for one SSO account.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
    username: String,
}

impl SessionFile {
    pub fn new(data_dir: &Path, username: impl Into<String>) -> Self {
        Self {
            path: data_dir.join(SESSION_FILE),
            username: username.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved credential. A missing file, an expired token or a
    /// token saved for a different account all yield `None`.
    pub fn load(&self) -> Result<Option<Credential>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session file {}", self.path.display()))?;
        let data: SessionData =
            serde_json::from_str(&contents).context("Failed to parse session file")?;

        if data.username != self.username {
            debug!(saved_for = %data.username, "Ignoring session saved for another account");
            return Ok(None);
        }
        if data.credential.is_expired() {
            debug!(expired_at = %data.credential.expires_at, "Saved session has expired");
            return Ok(None);
        }
        Ok(Some(data.credential))
    }

    pub fn save(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = SessionData {
            username: self.username.clone(),
            credential: credential.clone(),
            saved_at: Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&data)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write session file {}", self.path.display()))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove session file {}", self.path.display()))?;
        }
        Ok(())
    }
}
