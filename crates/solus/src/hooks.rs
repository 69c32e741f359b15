//! Extension hooks consumed from the surrounding application.
//!
//! Every hook is a no-op by default; an embedding application implements the
//! ones it needs and hands the implementation to
//! [`ProcessBuilder::hooks`](crate::ProcessBuilder::hooks).

use async_trait::async_trait;
use axum::Router;

/// Customization points invoked by the lifecycle controller.
///
/// Logging is deliberately not a hook: the embedding application installs
/// its own `tracing` subscriber before starting the process.
#[async_trait]
pub trait Hooks: Send + Sync {
    /// Add application routes to the control-plane server. Called once per
    /// `start()`, before the listener binds.
    fn configure_routes(&self, router: Router) -> Router {
        router
    }

    /// Pre-start setup. Runs before the control-plane server starts; an
    /// error here aborts the start.
    async fn on_start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Pre-stop teardown. Runs before the shutdown event is sent, only on
    /// the instance that owns the running server.
    async fn on_stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The default, do-nothing hook set.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

#[async_trait]
impl Hooks for NoHooks {}
