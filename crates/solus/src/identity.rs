//! Instance identity: the (name, address, app_dir, pid) tuple naming one
//! running instance of an application.

use crate::error::{Result, SolusError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// Identity of one application instance.
///
/// `address` and `pid` start out empty and are assigned by the lifecycle
/// controller during `start()`, or refreshed from a remote snapshot by a
/// successful liveness probe.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Application name. One live instance is allowed per name per machine.
    pub name: String,
    /// Control-plane address, e.g. `http://127.0.0.1:9876`.
    pub address: Option<Url>,
    /// On-disk storage root holding the `.pid` lock file.
    pub app_dir: PathBuf,
    /// Process ID of the serving instance.
    pub pid: Option<u32>,
}

impl Identity {
    /// Create an identity with no address or pid assigned yet.
    ///
    /// `app_dir` defaults to the per-platform user-data directory keyed by
    /// the application name (e.g. `~/.local/share/{name}` on Linux).
    pub fn new(name: impl Into<String>, app_dir: Option<PathBuf>) -> Self {
        let name = name.into();
        let app_dir = app_dir.unwrap_or_else(|| default_app_dir(&name));
        Self {
            name,
            address: None,
            app_dir,
            pid: None,
        }
    }

    /// Overwrite address, pid, name and app_dir from a remote snapshot.
    ///
    /// Called when a liveness probe got a response from a live server; the
    /// remote instance is the authority for these fields.
    pub fn refresh_from(&mut self, snapshot: &IdentitySnapshot) {
        if let Ok(url) = normalize_address(&snapshot.address) {
            self.address = Some(url);
        }
        self.name = snapshot.name.clone();
        self.pid = Some(snapshot.pid);
        self.app_dir = PathBuf::from(&snapshot.app_dir);
    }

    /// The address rendered without a trailing slash, as written to the lock
    /// file and reported on `GET /`.
    pub fn address_string(&self) -> Option<String> {
        self.address
            .as_ref()
            .map(|u| u.as_str().trim_end_matches('/').to_string())
    }
}

/// The identity record a running instance reports on `GET /`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub success: bool,
    pub name: String,
    pub pid: u32,
    pub app_dir: String,
    pub address: String,
}

/// Parse a user-supplied address like `127.0.0.1:9876` or
/// `http://127.0.0.1:9876` into a URL.
pub fn normalize_address(address: &str) -> Result<Url> {
    let stripped = address.trim().trim_start_matches("http://");
    let candidate = format!("http://{stripped}");
    Url::parse(&candidate).map_err(|e| SolusError::Address {
        message: format!("{address:?}: {e}"),
    })
}

/// Per-platform user-data directory for an application name.
///
/// Falls back to `.{name}` under the current directory when the platform
/// data directory cannot be determined (e.g. stripped-down containers).
pub fn default_app_dir(name: &str) -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(name))
        .unwrap_or_else(|| PathBuf::from(format!(".{name}")))
}
