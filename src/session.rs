//! Saved session and the remote namespace it scopes.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Characters the realtime database refuses inside a key.
const INVALID_KEY_CHARS: &[char] = &['.', '#', '$', '[', ']', '/'];

/// Opaque id returned by the identity service; the root of every remote path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    session_id: String,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Option<Self> {
        let session_id = session_id.into().trim().to_string();
        if !is_valid_key(&session_id) {
            return None;
        }
        Some(Self { session_id })
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    /// `users/{session_id}`
    pub fn root(&self) -> String {
        format!("users/{}", self.session_id)
    }

    pub fn command_root(&self) -> String {
        format!("{}/command", self.root())
    }

    /// Path of one command entry. `None` when `name` is not a single valid key.
    pub fn command_path(&self, name: &str) -> Option<String> {
        is_valid_key(name).then(|| format!("{}/{name}", self.command_root()))
    }

    pub fn status_root(&self) -> String {
        format!("{}/status", self.root())
    }

    pub fn last_screenshot_path(&self) -> String {
        format!("{}/last_screenshot", self.status_root())
    }
}

pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key != ".."
        && !key.contains(INVALID_KEY_CHARS)
        && !key.chars().any(char::is_control)
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    uid: String,
}

/// The single `{"uid": ...}` file on local storage.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved session. A missing, unreadable or corrupt file all mean
    /// "no saved session".
    pub fn load(&self) -> Option<Session> {
        match self.try_load() {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!("Ignoring saved session: {err}");
                None
            }
        }
    }

    fn try_load(&self) -> Result<Option<Session>, ConfigError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let file: SessionFile = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        Ok(Session::new(file.uid))
    }

    /// Replace the saved session wholesale, creating the parent directory.
    pub fn save(&self, session: &Session) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let body = serde_json::to_string(&SessionFile {
            uid: session.id().to_string(),
        })
        .map_err(|e| ConfigError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&self.path, body).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Returns whether a file was removed.
    pub fn clear(&self) -> Result<bool, ConfigError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ConfigError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
