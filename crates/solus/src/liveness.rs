//! Liveness detection for recorded instance identities.
//!
//! A lock record's existence is only a hint. Proving an instance alive takes
//! two layers: an OS-level PID existence check (cheap, catches crashed
//! processes that left a stale lock file) and an HTTP identity probe (the
//! authority of record, catches PID reuse by unrelated programs).

use crate::identity::{Identity, IdentitySnapshot};
use crate::lock::LockStore;
use crate::platform;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Issues liveness probes against recorded identities.
pub(crate) struct LivenessChecker {
    client: reqwest::Client,
}

impl LivenessChecker {
    /// Build a checker with short probe timeouts.
    ///
    /// Probes must not hang on an unresponsive peer; a slow answer is a
    /// negative liveness signal.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(1))
            .timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default probe client: {e}");
                reqwest::Client::new()
            });
        Self { client }
    }

    /// Determine whether `identity` corresponds to a live, responsive
    /// instance, refreshing its fields from the remote snapshot on success.
    ///
    /// `serving` is the caller's own "I currently run the server" flag; a
    /// process never probes itself. The checks short-circuit on the first
    /// positive signal:
    ///
    /// 1. own server → true
    /// 2. known address answers the identity probe → true (a connection
    ///    failure here falls through: the lock file may still resolve it)
    /// 3. no lock file → false
    /// 4. unreadable/corrupt lock record → false (conservative recovery:
    ///    favor letting a new instance start over blocking on a broken lock)
    /// 5. recorded PID does not exist → false
    /// 6. recorded address answers the identity probe → true, else false
    pub async fn check(&self, identity: &mut Identity, serving: bool, lock: &LockStore) -> bool {
        if serving {
            return true;
        }

        if let Some(address) = identity.address.clone() {
            match self.fetch_identity(&address).await {
                Some(snapshot) => {
                    identity.refresh_from(&snapshot);
                    return true;
                }
                None => {
                    debug!("No identity answer at known address {address}");
                }
            }
        }

        if !lock.exists() {
            debug!("Not running: no lock file at {}", lock.path().display());
            return false;
        }

        let record = match lock.read() {
            Ok(record) => record,
            Err(e) => {
                warn!("Treating unreadable lock record as not running: {e}");
                return false;
            }
        };
        identity.pid = Some(record.pid);
        identity.address = Some(record.address.clone());

        if !platform::is_process_alive(record.pid) {
            debug!("Not running: process {} not found", record.pid);
            return false;
        }
        debug!("Found process {}, probing {}", record.pid, record.address);

        match self.fetch_identity(&record.address).await {
            Some(snapshot) => {
                identity.refresh_from(&snapshot);
                true
            }
            None => {
                debug!("Got no response from control-plane server");
                false
            }
        }
    }

    /// GET the identity snapshot from a candidate address.
    ///
    /// Any transport or parse failure is a negative probe result, not an
    /// error: during probing the question is only "did a live instance
    /// answer".
    pub async fn fetch_identity(&self, address: &Url) -> Option<IdentitySnapshot> {
        let response = match self.client.get(address.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Identity probe of {address} failed: {e}");
                return None;
            }
        };
        match response.json::<IdentitySnapshot>().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!("Identity probe of {address} returned a non-identity body: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::normalize_address;
    use tempfile::TempDir;

    fn checker() -> LivenessChecker {
        LivenessChecker::new()
    }

    #[tokio::test]
    async fn test_serving_flag_short_circuits() {
        let temp_dir = TempDir::new().unwrap();
        let lock = LockStore::new(temp_dir.path());
        let mut identity = Identity::new("demo", Some(temp_dir.path().to_path_buf()));

        assert!(checker().check(&mut identity, true, &lock).await);
    }

    #[tokio::test]
    async fn test_no_lock_file_means_not_running() {
        let temp_dir = TempDir::new().unwrap();
        let lock = LockStore::new(temp_dir.path());
        let mut identity = Identity::new("demo", Some(temp_dir.path().to_path_buf()));

        assert!(!checker().check(&mut identity, false, &lock).await);
    }

    #[tokio::test]
    async fn test_corrupt_lock_file_means_not_running() {
        let temp_dir = TempDir::new().unwrap();
        let lock = LockStore::new(temp_dir.path());
        std::fs::write(lock.path(), "garbage").unwrap();
        let mut identity = Identity::new("demo", Some(temp_dir.path().to_path_buf()));

        assert!(!checker().check(&mut identity, false, &lock).await);
    }

    #[tokio::test]
    async fn test_dead_pid_means_not_running() {
        let temp_dir = TempDir::new().unwrap();
        let lock = LockStore::new(temp_dir.path());
        lock.write(4_000_000_000, "http://127.0.0.1:1").unwrap();
        let mut identity = Identity::new("demo", Some(temp_dir.path().to_path_buf()));

        assert!(!checker().check(&mut identity, false, &lock).await);
    }

    #[tokio::test]
    async fn test_live_pid_without_server_means_not_running() {
        let temp_dir = TempDir::new().unwrap();
        let lock = LockStore::new(temp_dir.path());
        // Our own PID exists, but nothing is listening on port 9.
        lock.write(std::process::id(), "http://127.0.0.1:9").unwrap();
        let mut identity = Identity::new("demo", Some(temp_dir.path().to_path_buf()));

        assert!(!checker().check(&mut identity, false, &lock).await);
    }

    #[tokio::test]
    async fn test_explicit_address_failure_falls_through_to_lock() {
        let temp_dir = TempDir::new().unwrap();
        let lock = LockStore::new(temp_dir.path());
        let mut identity = Identity::new("demo", Some(temp_dir.path().to_path_buf()));
        // Explicit address that refuses connections; no lock file either, so
        // the check must fall through and land on "not running" rather than
        // erroring out at the address step.
        identity.address = Some(normalize_address("127.0.0.1:9").unwrap());

        assert!(!checker().check(&mut identity, false, &lock).await);
    }
}
