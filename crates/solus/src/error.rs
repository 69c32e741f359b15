//! Error types for the solus coordination layer.
//!
//! Lifecycle failures surface as typed errors to the embedding program; the
//! coordination layer itself never crashes the process. Control-plane
//! failures are reported to remote callers as `success: false` JSON instead.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the solus library.
#[derive(Debug, Error)]
pub enum SolusError {
    /// `start()` found a live instance with the same identity.
    #[error("\"{name}\" is already running")]
    ProcessExists { name: String },

    /// `stop()`, `get()` or `send()` found no live instance to talk to.
    #[error("no running instance of \"{name}\" found")]
    ProcessDoesNotExist { name: String },

    /// The persisted lock record is missing, malformed or unparsable.
    ///
    /// Internal condition: the liveness checker treats this as "not running"
    /// and never surfaces it to the caller as a hard failure.
    #[error("corrupt lock file at {path}: {message}")]
    CorruptLockFile { path: PathBuf, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Connection refused, reset or otherwise failed while intentionally
    /// calling a server that liveness checking reported alive.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid instance address: {message}")]
    Address { message: String },

    /// An extension hook (`on_start` / `on_stop`) returned an error.
    #[error("extension hook failed: {0:#}")]
    Hook(#[source] anyhow::Error),

    /// The control-plane server could not be started.
    #[error("server error: {message}")]
    Server { message: String },
}

/// Result type alias using [`SolusError`].
pub type Result<T> = std::result::Result<T, SolusError>;
