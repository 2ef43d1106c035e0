//! Error types for hfw-session operations.

use std::path::PathBuf;

/// All errors that can occur while coordinating tab liveness.
///
/// Storage drift (counters out of step, missing entries) is not an error: the
/// protocol re-normalizes on the next registration. Modal failures never
/// surface here either; the coordinator turns them into a logout.
#[derive(Debug, thiserror::Error)]
pub enum HfwError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    Config { path: PathBuf, details: String },

    #[error("Home directory not found")]
    HomeDirNotFound,

    // ─────────────────────────────────────────────────────────────────────
    // Shared Store Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Timed out waiting for shared session lock: {0}")]
    LockTimeout(PathBuf),

    #[error("Shared store did not apply the update")]
    UpdateNotApplied,

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Coordinator Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Modal host could not open the timeout dialog: {0}")]
    ModalUnavailable(String),
}

impl HfwError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        HfwError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        HfwError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using HfwError.
pub type Result<T> = std::result::Result<T, HfwError>;

impl From<HfwError> for String {
    fn from(err: HfwError) -> String {
        err.to_string()
    }
}
