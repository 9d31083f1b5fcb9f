//! Focus-independent modifier state
//!
//! OS queries for modifier state answer from the foreground window's
//! point of view, which goes stale once modifier events are swallowed.
//! The tracker instead follows the raw transitions seen by the hook.

use std::sync::atomic::{AtomicU8, Ordering};

use super::chord::Modifiers;

/// Live modifier mask, written from the hook callback
#[derive(Debug, Default)]
pub struct ModifierTracker {
    pressed: AtomicU8,
}

impl ModifierTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Modifiers currently held down
    pub fn current_mask(&self) -> Modifiers {
        Modifiers::from_bits_truncate(self.pressed.load(Ordering::Acquire))
    }

    pub(crate) fn press(&self, modifier: Modifiers) {
        self.pressed.fetch_or(modifier.bits(), Ordering::AcqRel);
    }

    pub(crate) fn release(&self, modifier: Modifiers) {
        self.pressed.fetch_and(!modifier.bits(), Ordering::AcqRel);
    }

    pub(crate) fn clear(&self) {
        self.pressed.store(0, Ordering::Release);
    }
}
