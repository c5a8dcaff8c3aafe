//! Error taxonomy for the agent.
//!
//! Each enum maps to one recovery path: auth errors go back to the operator at
//! the login prompt, channel errors go to the supervisor's backoff loop,
//! handler errors stay inside the dispatcher, config errors fall back to
//! "no saved session" or abort startup.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("identity service rejected the credentials: {0}")]
    Rejected(String),
    #[error("identity request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("identity response did not contain a localId")]
    MissingLocalId,
    #[error("email and password are required")]
    EmptyCredentials,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("realtime request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("realtime {op} failed ({status}): {body}")]
    Status {
        op: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("realtime stream was cancelled by the server: {0}")]
    Cancelled(String),
    #[error("realtime stream gave up after {attempts} resubscribe attempts: {last}")]
    Exhausted { attempts: u32, last: String },
    #[error("realtime stream idle for {0}s")]
    Idle(u64),
    #[error("realtime stream closed")]
    Closed,
    #[error("invalid realtime payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("realtime stream buffered more than {0} bytes without a line break")]
    Overflow(usize),
}

impl ChannelError {
    /// Whether a resubscribe can be expected to succeed without operator action.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Cancelled(_) | Self::Exhausted { .. } => true,
            Self::Status { status, .. } => matches!(
                status.as_u16(),
                401 | 403 | 404
            ),
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{command}: {source:#}")]
    Failed {
        command: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("handler for '{0}' panicked")]
    Panicked(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl HandlerError {
    pub fn failed(command: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Failed {
            command,
            source: source.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("credential bundle is missing '{0}'")]
    MissingField(&'static str),
    #[error("no per-user data directory is available on this system")]
    NoDataDir,
}
