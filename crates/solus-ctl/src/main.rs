//! solus-ctl - command-line control for solus-coordinated instances.
//!
//! `serve` runs a named instance in the foreground; the other subcommands
//! act as a second invocation talking to whichever instance is live.

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use solus::{Process, SolusError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "solus-ctl")]
#[command(about = "Control a single-instance application over its local control plane")]
struct Args {
    /// Application name to coordinate on
    #[arg(short, long, default_value = "solus")]
    name: String,

    /// Explicit control-plane address like 127.0.0.1:9876 (default: ephemeral port)
    #[arg(long)]
    address: Option<String>,

    /// Directory for the lock file (default: per-platform user data dir)
    #[arg(long)]
    app_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the instance in the foreground until interrupted or stopped
    Serve {
        /// Register the demo counter handlers (increment/decrement events)
        #[arg(long)]
        counter: bool,
    },
    /// Print the live instance's identity
    Status,
    /// Deliver a named event to the live instance
    Send {
        /// Event name
        event: String,
        /// JSON object payload, e.g. '{"value": 2}'
        #[arg(long)]
        payload: Option<String>,
    },
    /// GET an arbitrary route on the live instance
    Get {
        /// Route, e.g. / or /count
        route: String,
    },
    /// Ask the live instance to shut down
    Stop,
    /// Ask the live instance to re-execute itself
    Restart,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let mut builder = Process::builder(&args.name);
    if let Some(address) = args.address.clone() {
        builder = builder.address(address);
    }
    if let Some(app_dir) = args.app_dir.clone() {
        builder = builder.app_dir(app_dir);
    }
    let mut process = builder.build()?;

    match args.command {
        Command::Serve { counter } => serve(&mut process, counter).await,
        Command::Status => {
            let snapshot = process.get("/").await?;
            print_json(&snapshot);
            Ok(())
        }
        Command::Send { event, payload } => {
            let payload: Value = match payload {
                Some(text) => serde_json::from_str(&text)?,
                None => json!({}),
            };
            let response = process.send_event(&event, payload).await?;
            print_json(&response);
            Ok(())
        }
        Command::Get { route } => {
            let response = process.get(&route).await?;
            print_json(&response);
            Ok(())
        }
        Command::Stop => {
            process.stop().await?;
            info!("Instance {:?} stopped", args.name);
            Ok(())
        }
        Command::Restart => {
            let response = process.send("restart", json!({})).await?;
            print_json(&response);
            Ok(())
        }
    }
}

/// Run the instance in the foreground; if one already exists, report it and
/// exit cleanly (the "second invocation becomes a client" path).
async fn serve(process: &mut Process, counter: bool) -> Result<()> {
    if counter {
        register_counter_handlers(process);
    }

    match process.run_forever().await {
        Err(SolusError::ProcessExists { .. }) => {
            let snapshot = process.get("/").await?;
            info!(
                "{} already running at {}",
                process.name(),
                snapshot["address"].as_str().unwrap_or("<unknown>")
            );
            print_json(&snapshot);
            Ok(())
        }
        other => Ok(other?),
    }
}

/// Demo handler set: a shared counter driven by increment/decrement events.
fn register_counter_handlers(process: &Process) {
    let counter = Arc::new(AtomicI64::new(0));

    let state = Arc::clone(&counter);
    process.register_event_handler("increment", move |event| {
        let step = event.field("value").and_then(Value::as_i64).unwrap_or(1);
        let value = state.fetch_add(step, Ordering::SeqCst) + step;
        info!("Count incremented to {value}");
        Ok(counter_fields(value))
    });

    let state = Arc::clone(&counter);
    process.register_event_handler("decrement", move |event| {
        let step = event.field("value").and_then(Value::as_i64).unwrap_or(1);
        let value = state.fetch_sub(step, Ordering::SeqCst) - step;
        info!("Count decremented to {value}");
        Ok(counter_fields(value))
    });
}

fn counter_fields(value: i64) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("value".to_string(), json!(value));
    fields
}

/// Print a response for the caller (intentional stdout: this is the CLI's
/// output, not logging).
fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}
