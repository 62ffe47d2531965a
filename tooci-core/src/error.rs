//! Error taxonomy shared by every stage of the mirroring pipeline.
//!
//! Three families matter to callers:
//! - **Configuration** errors abort a run before any version is processed.
//! - **Tool** errors come from an external command (non-zero exit, timeout, launch failure).
//! - **Invariant** errors cover everything else that goes wrong while mirroring a single version
//!   (unexpected fetch results, failed transformations, local I/O).
//!
//! Tool and invariant errors are contained at version granularity by the driver; see
//! [`crate::synchronise`].

use std::time::Duration;

/// Coarse classification of a [`MirrorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Tool,
    Invariant,
}

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("command {argv:?} failed with exit code {exit_code:?}: {stderr}")]
    Tool {
        argv: Vec<String>,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("command {argv:?} timed out after {}s", timeout.as_secs())]
    Timeout { argv: Vec<String>, timeout: Duration },

    #[error("command {argv:?} could not be launched: {source}")]
    Spawn {
        argv: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("transformation '{name}' failed: {message}")]
    Transform { name: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MirrorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MirrorError::Config(_) => ErrorKind::Configuration,
            MirrorError::Tool { .. } | MirrorError::Timeout { .. } | MirrorError::Spawn { .. } => {
                ErrorKind::Tool
            }
            MirrorError::Invariant(_)
            | MirrorError::Transform { .. }
            | MirrorError::Io(_)
            | MirrorError::Json(_) => ErrorKind::Invariant,
        }
    }
}

pub type Result<T, E = MirrorError> = std::result::Result<T, E>;
