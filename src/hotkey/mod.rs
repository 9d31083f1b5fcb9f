//! Global hotkey engine
//!
//! Intercepts system-wide keyboard events through one owned OS hook,
//! swallows the armed chord or, while recording, everything up to the
//! first complete chord, and hands matches to the application through
//! an ordered queue.

mod channel;
mod chord;
mod codec;
mod dispatch;
mod mode;
mod tracker;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "windows")]
mod win32;

use std::sync::Arc;

pub use channel::{HookBackend, HookChannel, HookError};
pub use codec::{parse_chord, render_chord, KeyboardLayout, ParseError};
pub use dispatch::{channel as dispatch_channel, Dispatcher};
pub use mode::Mode;

#[cfg(test)]
pub use channel::{HookCore, KeyTransition, Verdict};
#[cfg(test)]
pub use chord::{Chord, KeyCode};
#[cfg(test)]
pub use codec::UsLayout;

/// Hook backend for the platform this daemon was built for
#[cfg(target_os = "macos")]
pub type PlatformHook = macos::EventTapHook;

/// Hook backend for the platform this daemon was built for
#[cfg(target_os = "windows")]
pub type PlatformHook = win32::LowLevelHook;

/// Hook backend for the platform this daemon was built for
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub type PlatformHook = channel::UnsupportedHook;

/// Keyboard layout used to parse and render shortcuts on this platform
pub fn platform_layout() -> Arc<dyn KeyboardLayout> {
    #[cfg(target_os = "windows")]
    {
        Arc::new(win32::WindowsLayout)
    }
    #[cfg(not(target_os = "windows"))]
    {
        Arc::new(codec::UsLayout)
    }
}
