//! Controller actor that owns the hook channel
//!
//! Every mode switch and hook install/uninstall goes through this one
//! task, which serializes them. Notifications posted by the hook
//! callback arrive here and are broadcast as [`HotkeyEvent`]s.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::events::HotkeyEvent;
use crate::hotkey::{
    parse_chord, render_chord, Dispatcher, HookBackend, HookChannel, HookError, KeyboardLayout,
    Mode, ParseError,
};

/// Coarse engine state as seen by clients
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum State {
    /// No chord armed, all keys pass through
    #[default]
    Idle,
    /// Watching for the armed chord
    Armed,
    /// Capturing the next chord
    Recording,
}

impl From<Mode> for State {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Idle => State::Idle,
            Mode::Armed(_) => State::Armed,
            Mode::Recording { .. } => State::Recording,
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Idle => write!(f, "Idle"),
            State::Armed => write!(f, "Armed"),
            State::Recording => write!(f, "Recording"),
        }
    }
}

/// Snapshot returned by [`ControllerHandle::status`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub state: State,
    /// Armed chord, or the chord parked while recording
    pub shortcut: Option<String>,
    pub hook_installed: bool,
}

/// Errors surfaced to callers of the controller
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid shortcut: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error("hotkey controller is not running")]
    ControllerGone,
}

impl EngineError {
    /// Stable machine-readable code for IPC error responses
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Parse(_) | EngineError::Hook(HookError::InvalidChord(_)) => {
                "invalid_shortcut"
            }
            EngineError::Hook(_) => "hook_unavailable",
            EngineError::ControllerGone => "controller_gone",
        }
    }
}

/// Requests handled by the controller task
#[derive(Debug)]
pub enum Command {
    Arm {
        shortcut: String,
        reply: oneshot::Sender<Result<String, EngineError>>,
    },
    Disarm {
        reply: oneshot::Sender<()>,
    },
    SetRecording {
        enabled: bool,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Shutdown,
}

/// Cloneable client side of the controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Command>,
}

impl ControllerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| EngineError::ControllerGone)?;
        rx.await.map_err(|_| EngineError::ControllerGone)
    }

    /// Parse `shortcut` and arm it; returns the canonical display form
    pub async fn arm(&self, shortcut: impl Into<String>) -> Result<String, EngineError> {
        let shortcut = shortcut.into();
        self.request(|reply| Command::Arm { shortcut, reply }).await?
    }

    pub async fn disarm(&self) -> Result<(), EngineError> {
        self.request(|reply| Command::Disarm { reply }).await
    }

    /// Capture field focus-in (`true`) or focus-out (`false`)
    pub async fn set_recording(&self, enabled: bool) -> Result<(), EngineError> {
        self.request(|reply| Command::SetRecording { enabled, reply })
            .await?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Ask the controller to uninstall the hook and exit
    pub async fn shutdown(&self) {
        if self.tx.send(Command::Shutdown).await.is_err() {
            debug!("controller already stopped");
        }
    }
}

/// Owner of the hook channel
pub struct Controller<B: HookBackend> {
    channel: HookChannel<B>,
    layout: Arc<dyn KeyboardLayout>,
    event_tx: broadcast::Sender<HotkeyEvent>,
}

impl<B: HookBackend> Controller<B> {
    /// Create the controller and the handle used to talk to it
    pub fn new(
        channel: HookChannel<B>,
        layout: Arc<dyn KeyboardLayout>,
        event_tx: broadcast::Sender<HotkeyEvent>,
    ) -> (Self, ControllerHandle, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(32);
        let controller = Self {
            channel,
            layout,
            event_tx,
        };
        (controller, ControllerHandle { tx }, rx)
    }

    /// Process commands and hook notifications until shut down
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut dispatcher: Dispatcher) {
        info!("hotkey controller started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = dispatcher.next() => self.publish(event),
            }
        }

        self.channel.uninstall();
        info!("hotkey controller stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Arm { shortcut, reply } => {
                let _ = reply.send(self.arm(&shortcut));
            }
            Command::Disarm { reply } => {
                self.channel.disarm();
                info!("hotkey disarmed");
                let _ = reply.send(());
            }
            Command::SetRecording { enabled, reply } => {
                let result = self.channel.set_recording(enabled).map_err(EngineError::from);
                match &result {
                    Ok(()) => info!(enabled, state = %self.state(), "recording toggled"),
                    Err(e) => warn!(%e, enabled, "failed to toggle recording"),
                }
                let _ = reply.send(result);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown => {}
        }
    }

    fn arm(&mut self, shortcut: &str) -> Result<String, EngineError> {
        let chord = parse_chord(shortcut, self.layout.as_ref()).map_err(|e| {
            warn!(shortcut, %e, "rejected shortcut, keeping previous mode");
            e
        })?;
        self.channel.set_armed(chord)?;
        let shown = render_chord(&chord, self.layout.as_ref());
        info!(shortcut = %shown, "hotkey armed");
        Ok(shown)
    }

    fn state(&self) -> State {
        self.channel.mode().into()
    }

    fn status(&self) -> EngineStatus {
        let mode = self.channel.mode();
        let chord = match mode {
            Mode::Armed(chord) => Some(chord),
            Mode::Recording { suspended } => suspended,
            Mode::Idle => None,
        };
        EngineStatus {
            state: mode.into(),
            shortcut: chord.map(|c| render_chord(&c, self.layout.as_ref())),
            hook_installed: self.channel.is_installed(),
        }
    }

    fn publish(&self, event: HotkeyEvent) {
        info!(%event, state = %self.state(), "hotkey event");
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}
