//! Solus - there can be only one.
//!
//! A small coordination layer that keeps at most one running instance of an
//! application alive per machine, and lets subsequent invocations talk to
//! the running instance instead of starting a duplicate.
//!
//! Each started [`Process`] serves a local HTTP control plane on an
//! available port (or an address of your choice) and persists its PID and
//! address to a lock file. Another `Process` with the same name uses that
//! record, an OS-level PID check and an HTTP identity probe to decide
//! whether an instance is already running, and if so sends it events:
//! simple JSON objects with at least a `name` field.
//!
//! # Example
//!
//! ```rust,ignore
//! use solus::Process;
//!
//! #[tokio::main]
//! async fn main() -> solus::Result<()> {
//!     let mut proc = Process::new("simple");
//!     proc.register_event_handler("ack", |_event| {
//!         let mut fields = serde_json::Map::new();
//!         fields.insert("message".into(), "Hello there!".into());
//!         Ok(fields)
//!     });
//!
//!     match proc.run_forever().await {
//!         Err(solus::SolusError::ProcessExists { .. }) => {
//!             // Already running: send an event instead.
//!             let response = proc.send_event("ack", serde_json::json!({})).await?;
//!             println!("{response}");
//!             Ok(())
//!         }
//!         other => other,
//!     }
//! }
//! ```

pub mod client;
pub mod error;
pub mod events;
pub mod hooks;
pub mod identity;
pub mod lock;
pub mod platform;
pub mod process;

mod liveness;
mod server;

// Re-export commonly used types
pub use client::RemoteClient;
pub use error::{Result, SolusError};
pub use events::{Event, EventDispatcher, Handler, HandlerResult, Response};
pub use hooks::{Hooks, NoHooks};
pub use identity::{Identity, IdentitySnapshot};
pub use lock::{LockRecord, LockStore};
pub use process::{Process, ProcessBuilder};
