//! Error types for file sync and resource waits.
//!
//! Sync failures and watch terminations are kept in separate enums so that
//! callers can decide on retries by matching on the variant alone.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures while building, piping or unpacking a sync archive.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Bad glob pattern or malformed request. Never retried.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Local filesystem failure while building the archive.
    #[error("failed to read {}: {source}", .path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// One side of the stream bridge observed the other side gone.
    #[error("archive stream broken: {reason}")]
    StreamBroken { reason: String },

    /// Exec channel negotiation failed or the remote command did not succeed.
    #[error("remote command on {target} failed: {reason}{}", .exit_code.map(|c| format!(" (exit code {c})")).unwrap_or_default())]
    RemoteExec {
        target: String,
        reason: String,
        exit_code: Option<i32>,
    },
}

impl SyncError {
    /// Wrap an I/O error raised while reading `path`.
    pub fn source_read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SyncError::SourceRead {
            path: path.into(),
            source,
        }
    }

    /// Map an I/O error raised by the bridge or an exec stream.
    pub fn from_stream(err: io::Error) -> Self {
        SyncError::StreamBroken {
            reason: err.to_string(),
        }
    }
}

/// Terminal outcomes of a resource wait that are not success.
#[derive(Error, Debug, Clone)]
pub enum WatchError {
    /// The resource reported a failure phase or the API sent an error event.
    #[error("{resource} failed: {reason}")]
    Failed { resource: String, reason: String },

    /// The event source ended before the condition was reached.
    #[error("watch on '{selector}' closed after {elapsed:?}{}", .reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    ChannelClosed {
        selector: String,
        elapsed: Duration,
        reason: Option<String>,
    },

    /// No terminal condition before the deadline.
    #[error("waited {elapsed:?} but no resource matching '{selector}' reached the expected state")]
    TimedOut { selector: String, elapsed: Duration },
}

impl WatchError {
    /// `true` for terminations that say nothing about the resource itself.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WatchError::ChannelClosed { .. } | WatchError::TimedOut { .. }
        )
    }
}

/// Returned by deployment lookups by name when nothing matches.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Deployment {0} not found")]
pub struct DeploymentNotFound(pub String);
