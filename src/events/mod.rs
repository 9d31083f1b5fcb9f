//! Events emitted by the hotkey engine to application logic
//!
//! `Activated` drives the configured action UI; `Captured` feeds the
//! capture field and, through it, the settings file.

use serde::{Deserialize, Serialize};

/// Outbound hotkey engine events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HotkeyEvent {
    /// The armed chord was pressed somewhere on the system
    Activated,

    /// A recording session captured a new chord
    Captured {
        /// Display string, re-parseable as a shortcut
        display: String,
    },
}

impl std::fmt::Display for HotkeyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HotkeyEvent::Activated => write!(f, "ACTIVATED"),
            HotkeyEvent::Captured { display } => write!(f, "CAPTURED ({})", display),
        }
    }
}
