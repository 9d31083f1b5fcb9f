//! keychord-daemon: global shortcut engine for the task launcher
//!
//! This daemon runs in the background and provides:
//! - A system-wide keyboard hook that swallows the armed chord
//! - Chord recording for the settings capture field
//! - IPC server so the UI can arm, record, and receive events
//!
//! Out of scope here: the task UI, the LLM request pipeline, and the
//! copy/paste simulation. They consume `Activated` and `Captured`.

mod config;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod state;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::HotkeyEvent;
use crate::hotkey::{dispatch_channel, platform_layout, HookChannel, PlatformHook};
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::state::Controller;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "keychord-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, %config.tcp_addr, "configuration loaded");

    let shutdown = ShutdownSignal::new();

    // Hook callback -> controller (ordered, never blocks the callback)
    let layout = platform_layout();
    let (poster, dispatcher) = dispatch_channel(layout.clone());
    // Controller -> IPC subscribers
    let (event_tx, _event_rx) = broadcast::channel::<HotkeyEvent>(64);

    let channel = HookChannel::new(PlatformHook::default(), poster);
    let (controller, handle, commands) = Controller::new(channel, layout, event_tx.clone());
    let controller_task = tokio::spawn(controller.run(commands, dispatcher));

    match &config.shortcut {
        Some(shortcut) => match handle.arm(shortcut.as_str()).await {
            Ok(shown) => info!(shortcut = %shown, "global shortcut armed"),
            Err(e) => {
                error!(%e, "failed to arm global shortcut");
                warn!("continuing without global shortcut - check permissions and settings");
            }
        },
        None => info!("no shortcut configured, waiting for the UI to arm one"),
    }

    let server = Server::bind(&config, handle.clone(), event_tx.clone())?;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    handle.shutdown().await;
    if let Err(e) = controller_task.await {
        error!(?e, "hotkey controller task failed");
    }
    server.shutdown().await;

    info!("keychord-daemon stopped");

    Ok(())
}
