//! Hotkey controller
//!
//! A single task owns the hook channel and serializes every mode switch:
//! - Idle: nothing armed, keys pass through
//! - Armed: the configured chord is swallowed and raises `Activated`
//! - Recording: the next chord is captured and raises `Captured`

mod controller;

pub use controller::{Controller, ControllerHandle, EngineError, EngineStatus, State};
