//! Embedded control-plane HTTP server using Axum.
//!
//! Exposes the built-in routes every running instance serves: identity on
//! `GET /`, event delivery on `POST /event`, and graceful shutdown / restart
//! on `POST /stop` / `POST /restart`. Framework-level failures (bad JSON,
//! unknown routes) are converted to `success: false` JSON bodies rather than
//! raw error pages. The surrounding application may merge extra routes
//! before the listener binds.

use crate::error::SolusError;
use crate::events::{Event, EventDispatcher, Response};
use crate::identity::IdentitySnapshot;
use crate::platform;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// State shared across the built-in route handlers.
pub(crate) struct ServerState {
    pub name: String,
    pub pid: u32,
    pub app_dir: String,
    pub address: String,
    pub dispatcher: Arc<RwLock<EventDispatcher>>,
    pub shutdown: watch::Sender<bool>,
}

/// Owned handle to one running control-plane server.
///
/// This is the lifecycle controller's "server I am currently running"
/// resource; dropping or joining it is the only way the server outlives its
/// accept loop.
pub(crate) struct ServerHandle {
    /// Actual bound address (useful when port 0 was requested).
    pub addr: SocketAddr,
    /// Flipping this to `true` drains in-flight requests and stops the loop.
    pub shutdown: watch::Sender<bool>,
    /// The dedicated serving task.
    pub task: JoinHandle<()>,
}

impl ServerHandle {
    /// Signal shutdown without waiting for the serving task.
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Bind the control-plane server and start serving on a dedicated task.
///
/// Returns only after the listener is confirmed bound, so callers may
/// persist the advertised address immediately. The caller's task is never
/// blocked by the accept loop.
pub(crate) async fn start_server(
    name: &str,
    pid: u32,
    app_dir: String,
    bind: SocketAddr,
    dispatcher: Arc<RwLock<EventDispatcher>>,
    extra_routes: Router,
) -> crate::error::Result<ServerHandle> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| SolusError::Server {
            message: format!("failed to bind {bind}: {e}"),
        })?;
    let addr = listener.local_addr().map_err(|e| SolusError::Server {
        message: format!("failed to resolve bound address: {e}"),
    })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = Arc::new(ServerState {
        name: name.to_string(),
        pid,
        app_dir,
        address: format!("http://{addr}"),
        dispatcher,
        shutdown: shutdown_tx.clone(),
    });

    let app = Router::new()
        .route("/", get(handle_index))
        .route("/event", post(handle_event))
        .route("/stop", post(handle_stop))
        .route("/restart", post(handle_restart))
        .with_state(state)
        .merge(extra_routes)
        .fallback(handle_fallback)
        .layer(TraceLayer::new_for_http());

    info!("Control plane for {:?} listening on {}", name, addr);

    let task = tokio::spawn(async move {
        let mut rx = shutdown_rx;
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = rx.wait_for(|stop| *stop).await;
        });
        if let Err(e) = serve.await {
            error!("Control-plane server error: {e}");
        }
        debug!("Control-plane server terminated");
    });

    Ok(ServerHandle {
        addr,
        shutdown: shutdown_tx,
        task,
    })
}

/// `GET /` — identity snapshot of the serving instance.
async fn handle_index(State(state): State<Arc<ServerState>>) -> Json<IdentitySnapshot> {
    Json(IdentitySnapshot {
        success: true,
        name: state.name.clone(),
        pid: state.pid,
        app_dir: state.app_dir.clone(),
        address: state.address.clone(),
    })
}

/// `POST /event` — forward a named event to the dispatcher.
async fn handle_event(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> (StatusCode, Json<Response>) {
    let body = match body {
        Ok(Json(value)) => value,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(Response::failure(format!("Invalid request body: {rejection}"))),
            );
        }
    };

    // Reject before touching the dispatcher; an unnamed event is a caller
    // error, not an unhandled event.
    let Some(event) = Event::from_body(body) else {
        return (
            StatusCode::OK,
            Json(Response::failure("Event missing required field \"name\".")),
        );
    };

    debug!("Dispatching {:?} event", event.name);
    let response = state.dispatcher.read().unwrap().dispatch(&event);
    (StatusCode::OK, Json(response))
}

/// `POST /stop` — respond, then shut the accept loop down.
///
/// The response is flushed by graceful shutdown draining the connection
/// before the loop exits.
async fn handle_stop(State(state): State<Arc<ServerState>>) -> Json<Response> {
    info!("Stop requested for {:?}", state.name);
    state.signal_shutdown_after_response();
    Json(Response::ok_with_message("Shutting down..."))
}

/// `POST /restart` — respond, shut down, then re-execute the program image.
///
/// The replacement exec races with the response flush by design; the short
/// delay orders "send response" before "shutdown" in practice.
async fn handle_restart(State(state): State<Arc<ServerState>>) -> Json<Response> {
    info!("Restarting {:?}", state.name);
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = shutdown.send(true);
        if let Err(e) = platform::respawn_self() {
            error!("Failed to re-execute program image: {e}");
        }
    });
    Json(Response::ok_with_message("Restarting..."))
}

/// Unknown routes answer JSON, not a framework error page.
async fn handle_fallback(uri: Uri) -> (StatusCode, Json<Response>) {
    (
        StatusCode::NOT_FOUND,
        Json(Response::failure(format!("No route for {uri}"))),
    )
}

impl ServerState {
    /// Flip the shutdown flag from a task so the in-flight response drains
    /// first under graceful shutdown.
    fn signal_shutdown_after_response(&self) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = shutdown.send(true);
        });
    }
}
