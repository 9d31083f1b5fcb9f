//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::HotkeyEvent;
use crate::state::{EngineError, EngineStatus, State};

/// Current operating mode of the hotkey engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Nothing armed
    #[default]
    Idle,
    /// Global shortcut armed
    Armed,
    /// Capture field has focus, recording the next chord
    Recording,
}

/// Requests from UI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Arm a new global shortcut, e.g. after a settings change
    Arm { shortcut: String },

    /// Stop watching for the global shortcut
    Disarm,

    /// Capture field focus changed
    SetRecording { enabled: bool },

    /// Ping to check connectivity
    Ping,

    /// Subscribe to hotkey event notifications
    Subscribe,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Shortcut armed, in canonical display form
    Armed { shortcut: String },

    /// Shortcut disarmed
    Disarmed,

    /// Recording toggled
    Recording { enabled: bool },

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl From<EngineError> for Response {
    fn from(e: EngineError) -> Self {
        Response::Error {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// The hotkey engine raised an event
    Hotkey { event: HotkeyEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current mode
    pub mode: Mode,

    /// Armed shortcut (kept while recording)
    pub shortcut: Option<String>,

    /// Whether the OS keyboard hook is installed
    pub hook_installed: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl DaemonStatus {
    pub fn from_engine(engine: EngineStatus, uptime_secs: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            mode: engine.state.into(),
            shortcut: engine.shortcut,
            hook_installed: engine.hook_installed,
            uptime_secs,
        }
    }
}

/// Convert internal State to IPC Mode
impl From<State> for Mode {
    fn from(state: State) -> Self {
        match state {
            State::Idle => Mode::Idle,
            State::Armed => Mode::Armed,
            State::Recording => Mode::Recording,
        }
    }
}
