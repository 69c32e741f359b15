//! Lifecycle controller: one object that is either the single running
//! instance of an application or a client of it.
//!
//! `start()` makes this process the serving instance (or fails with
//! [`SolusError::ProcessExists`]); `get()` / `send()` talk to whichever
//! instance is live; `stop()` tears the server down and restores the object
//! to a clean pre-start state. The running server is an owned resource on
//! this struct, never ambient global state, so independent instances can
//! coexist in one test process.

use crate::client::RemoteClient;
use crate::error::{Result, SolusError};
use crate::events::{EventDispatcher, HandlerResult};
use crate::hooks::{Hooks, NoHooks};
use crate::identity::{normalize_address, Identity};
use crate::liveness::LivenessChecker;
use crate::lock::LockStore;
use crate::server::{self, ServerHandle};
use serde_json::{Map, Value};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// A shutdown callback run by the signal watcher, in registration order.
type ShutdownCallback = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Allows only one instance of an application to run at a time.
///
/// When started, a `Process` serves a small control plane on an available
/// port (or an address of your choice), then persists its PID and address to
/// `<app_dir>/.pid`. Another `Process` constructed with the same name can
/// use that record to detect the running instance and send events to it.
///
/// ```rust,ignore
/// use solus::Process;
///
/// #[tokio::main]
/// async fn main() -> solus::Result<()> {
///     let mut proc = Process::new("my-app");
///     proc.register_event_handler("ack", |_event| Ok(Default::default()));
///
///     match proc.run_forever().await {
///         Err(solus::SolusError::ProcessExists { .. }) => {
///             // Already running: become a client instead.
///             let response = proc.send_event("ack", serde_json::json!({})).await?;
///             println!("{response}");
///             Ok(())
///         }
///         other => other,
///     }
/// }
/// ```
pub struct Process {
    identity: Identity,
    /// Address supplied at construction; restored on stop so a later start
    /// binds the same place.
    explicit_address: Option<Url>,
    lock: LockStore,
    dispatcher: Arc<RwLock<EventDispatcher>>,
    hooks: Box<dyn Hooks>,
    liveness: LivenessChecker,
    client: reqwest::Client,
    /// The server this instance currently runs, if any. `None` ⇔ stopped.
    server: Option<ServerHandle>,
    signal_task: Option<JoinHandle<()>>,
    shutdown_callbacks: Arc<Mutex<Vec<(String, ShutdownCallback)>>>,
}

/// Builder for [`Process`].
pub struct ProcessBuilder {
    name: String,
    address: Option<String>,
    app_dir: Option<PathBuf>,
    hooks: Box<dyn Hooks>,
}

impl ProcessBuilder {
    /// Pin the control plane to an explicit address like `127.0.0.1:9876`
    /// instead of an ephemeral port.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Directory for the `.pid` lock file. Defaults to the per-platform
    /// user-data directory keyed by the application name.
    pub fn app_dir(mut self, app_dir: impl Into<PathBuf>) -> Self {
        self.app_dir = Some(app_dir.into());
        self
    }

    /// Extension hooks for the embedding application.
    pub fn hooks(mut self, hooks: impl Hooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    /// Build the process. Fails only if the explicit address is unparsable.
    pub fn build(self) -> Result<Process> {
        let explicit_address = self
            .address
            .as_deref()
            .map(normalize_address)
            .transpose()?;

        let mut identity = Identity::new(self.name, self.app_dir);
        identity.address = explicit_address.clone();
        let lock = LockStore::new(&identity.app_dir);

        Ok(Process {
            identity,
            explicit_address,
            lock,
            dispatcher: Arc::new(RwLock::new(EventDispatcher::new())),
            hooks: self.hooks,
            liveness: LivenessChecker::new(),
            client: reqwest::Client::new(),
            server: None,
            signal_task: None,
            shutdown_callbacks: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

impl Process {
    /// Create a process with default app dir, ephemeral port and no hooks.
    pub fn new(name: impl Into<String>) -> Self {
        // No address is supplied, so build() cannot fail.
        match Self::builder(name).build() {
            Ok(process) => process,
            Err(_) => unreachable!("builder without address is infallible"),
        }
    }

    /// Start building a process with the given application name.
    pub fn builder(name: impl Into<String>) -> ProcessBuilder {
        ProcessBuilder {
            name: name.into(),
            address: None,
            app_dir: None,
            hooks: Box::new(NoHooks),
        }
    }

    /// Application name this instance coordinates on.
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Current control-plane address, rendered without a trailing slash.
    pub fn address(&self) -> Option<String> {
        self.identity.address_string()
    }

    /// Directory holding the lock file.
    pub fn app_dir(&self) -> &Path {
        &self.identity.app_dir
    }

    /// PID of the live instance, ours or remote, if one is known.
    pub fn pid(&self) -> Option<u32> {
        self.identity.pid
    }

    /// Full path of the lock file.
    pub fn lock_file(&self) -> &Path {
        self.lock.path()
    }

    /// Whether this object currently owns a running server.
    pub fn is_serving(&self) -> bool {
        self.server.is_some()
    }

    /// Register the handler for an event name. Last registration wins.
    /// Valid before or during serving.
    pub fn register_event_handler<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&crate::Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.dispatcher.write().unwrap().register(event, handler);
    }

    /// Remove the handler for an event name.
    pub fn unregister_event_handler(&self, event: &str) {
        self.dispatcher.write().unwrap().unregister(event);
    }

    /// Append a callback to the ordered list the signal watcher runs on
    /// SIGINT/SIGTERM. Each callback is independently fallible and
    /// individually logged.
    pub fn add_shutdown_callback<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shutdown_callbacks
            .lock()
            .unwrap()
            .push((name.into(), Box::new(callback)));
    }

    /// Check whether a live instance with this identity exists, refreshing
    /// the in-memory identity from the remote snapshot when one answers.
    pub async fn is_running(&mut self) -> bool {
        self.liveness
            .check(&mut self.identity, self.server.is_some(), &self.lock)
            .await
    }

    /// Become the running instance: bind the control plane, install signal
    /// handling and persist the lock record.
    ///
    /// Fails with [`SolusError::ProcessExists`] when a live instance is
    /// already detected. Returns as soon as the server is listening; the
    /// caller's task is not blocked by the accept loop.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running().await {
            return Err(SolusError::ProcessExists {
                name: self.identity.name.clone(),
            });
        }

        let pid = std::process::id();
        self.identity.pid = Some(pid);

        self.hooks.on_start().await.map_err(SolusError::Hook)?;

        let bind = match &self.explicit_address {
            Some(url) => socket_addr_of(url)?,
            None => SocketAddr::from(([127, 0, 0, 1], 0)),
        };
        let extra_routes = self.hooks.configure_routes(axum::Router::new());
        let handle = server::start_server(
            &self.identity.name,
            pid,
            self.identity.app_dir.display().to_string(),
            bind,
            Arc::clone(&self.dispatcher),
            extra_routes,
        )
        .await?;

        self.identity.address = Some(normalize_address(&handle.addr.to_string())?);
        self.install_signal_watcher(&handle);

        // Persist only now that the listener is confirmed bound; a reader
        // must never find a lock record for a server that isn't accepting.
        let address = self.identity.address_string().unwrap_or_default();
        self.lock.write(pid, &address)?;

        info!("Serving process {pid} at {address}");
        self.server = Some(handle);
        Ok(())
    }

    /// Stop the running instance.
    ///
    /// Works both for the serving instance (tears the server down, waits for
    /// the serving task to finish, resets state so `start()` is valid again)
    /// and for a client (asks the remote instance to shut down). Fails with
    /// [`SolusError::ProcessDoesNotExist`] when nothing is live.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.is_running().await {
            return Err(SolusError::ProcessDoesNotExist {
                name: self.identity.name.clone(),
            });
        }

        if self.server.is_some() {
            self.hooks.on_stop().await.map_err(SolusError::Hook)?;
        }

        // Uniform shutdown path: the same route remote clients use. The
        // server may already be gone (e.g. a signal beat us to it); that is
        // not an error.
        match self.send("stop", Value::Object(Map::new())).await {
            Ok(_) => {}
            Err(SolusError::Transport(e)) => {
                warn!("Control-plane server already shut down: {e}");
            }
            Err(e) => return Err(e),
        }

        if let Some(handle) = self.server.take() {
            handle.signal_shutdown();
            debug!("Waiting for server task to finish...");
            if let Err(e) = handle.task.await {
                warn!("Server task join error: {e}");
            }
        }
        if let Some(task) = self.signal_task.take() {
            task.abort();
        }

        self.identity.address = self.explicit_address.clone();
        self.identity.pid = None;
        debug!("Control-plane server successfully shut down");
        Ok(())
    }

    /// Convenience composition: `start()`, then idle until shutdown is
    /// triggered (interrupt signal, remote `/stop`, or `/restart`), then
    /// `stop()`.
    pub async fn run_forever(&mut self) -> Result<()> {
        self.start().await?;

        if let Some(handle) = &self.server {
            let mut shutdown = handle.shutdown.subscribe();
            let _ = shutdown.wait_for(|stop| *stop).await;
        }

        match self.stop().await {
            // A remote stop may have completed the teardown already.
            Err(SolusError::ProcessDoesNotExist { .. }) => Ok(()),
            other => other,
        }
    }

    /// GET a route on the live instance and return the parsed response.
    pub async fn get(&mut self, route: &str) -> Result<Value> {
        self.remote().await?.get(route).await
    }

    /// POST a JSON payload to a route on the live instance.
    pub async fn send(&mut self, route: &str, payload: Value) -> Result<Value> {
        self.remote().await?.post(route, payload).await
    }

    /// Deliver a named event to the live instance via `POST /event`.
    pub async fn send_event(&mut self, name: &str, payload: Value) -> Result<Value> {
        let mut body = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(SolusError::Json {
                    message: format!("event payload must be a JSON object, got {other}"),
                    source: None,
                })
            }
        };
        body.insert("name".to_string(), Value::String(name.to_string()));
        self.send("event", Value::Object(body)).await
    }

    /// Liveness-gated client for the current address.
    async fn remote(&mut self) -> Result<RemoteClient> {
        if !self.is_running().await {
            return Err(SolusError::ProcessDoesNotExist {
                name: self.identity.name.clone(),
            });
        }
        let address = self.identity.address.clone().ok_or_else(|| {
            SolusError::ProcessDoesNotExist {
                name: self.identity.name.clone(),
            }
        })?;
        Ok(RemoteClient::new(self.client.clone(), address))
    }

    /// Spawn the signal-dispatch task: one watcher that runs the ordered
    /// shutdown callbacks on SIGINT/SIGTERM.
    fn install_signal_watcher(&mut self, handle: &ServerHandle) {
        {
            let shutdown = handle.shutdown.clone();
            let mut callbacks = self.shutdown_callbacks.lock().unwrap();
            // The control-plane teardown always runs first; callbacks added
            // by the application follow in registration order. A previous
            // start's entry points at a dead server, so replace it.
            callbacks.retain(|(label, _)| label != "control-plane shutdown");
            callbacks.insert(
                0,
                (
                    "control-plane shutdown".to_string(),
                    Box::new(move || {
                        shutdown
                            .send(true)
                            .map_err(|_| anyhow::anyhow!("shutdown channel closed"))
                    }),
                ),
            );
        }

        let callbacks = Arc::clone(&self.shutdown_callbacks);
        let name = self.identity.name.clone();
        let task = tokio::spawn(async move {
            wait_for_signal().await;
            info!("Interrupt received, shutting down {name:?}");
            let callbacks = callbacks.lock().unwrap();
            for (label, callback) in callbacks.iter() {
                match callback() {
                    Ok(()) => debug!("Shutdown callback {label:?} completed"),
                    Err(e) => warn!("Shutdown callback {label:?} failed: {e:#}"),
                }
            }
        });
        self.signal_task = Some(task);
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        // Redundant shutdown path for abnormal termination: best effort,
        // never blocks, never panics.
        if let Some(handle) = self.server.take() {
            debug!("Process dropped while serving; signaling shutdown");
            handle.signal_shutdown();
        }
        if let Some(task) = self.signal_task.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("name", &self.identity.name)
            .field("address", &self.identity.address_string())
            .field("app_dir", &self.identity.app_dir)
            .field("pid", &self.identity.pid)
            .field("serving", &self.server.is_some())
            .finish()
    }
}

/// Resolve the bind address of an explicit URL.
fn socket_addr_of(url: &Url) -> Result<SocketAddr> {
    url.socket_addrs(|| None)
        .map_err(|e| SolusError::Address {
            message: format!("{url}: {e}"),
        })?
        .into_iter()
        .next()
        .ok_or_else(|| SolusError::Address {
            message: format!("{url}: no usable socket address"),
        })
}

/// Resolve on SIGINT (ctrl-c) or, on Unix, SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder_rejects_bad_address() {
        let result = Process::builder("demo").address("not an address").build();
        assert!(matches!(result, Err(SolusError::Address { .. })));
    }

    #[test]
    fn test_builder_normalizes_address() {
        let process = Process::builder("demo")
            .address("127.0.0.1:9876")
            .build()
            .unwrap();
        assert_eq!(process.address().unwrap(), "http://127.0.0.1:9876");
    }

    #[test]
    fn test_lock_file_lives_in_app_dir() {
        let temp_dir = TempDir::new().unwrap();
        let process = Process::builder("demo")
            .app_dir(temp_dir.path())
            .build()
            .unwrap();
        assert_eq!(process.lock_file(), temp_dir.path().join(".pid"));
    }

    #[tokio::test]
    async fn test_stop_never_started_raises() {
        let temp_dir = TempDir::new().unwrap();
        let mut process = Process::builder("solus-never-started")
            .app_dir(temp_dir.path())
            .build()
            .unwrap();

        let err = process.stop().await.unwrap_err();
        assert!(matches!(err, SolusError::ProcessDoesNotExist { .. }));
    }

    #[tokio::test]
    async fn test_get_without_instance_raises() {
        let temp_dir = TempDir::new().unwrap();
        let mut process = Process::builder("solus-no-instance")
            .app_dir(temp_dir.path())
            .build()
            .unwrap();

        let err = process.get("/").await.unwrap_err();
        assert!(matches!(err, SolusError::ProcessDoesNotExist { .. }));
    }
}
