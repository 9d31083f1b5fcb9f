//! Matcher mode and its single-word atomic cell
//!
//! The whole mode, including the armed or suspended chord, packs into
//! one `u64` so the hook callback reads it with a single load and mode
//! switches are a single swap.

use std::sync::atomic::{AtomicU64, Ordering};

use super::chord::{Chord, KeyCode, Modifiers};

/// Operating mode of the hook channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Every event passes through untouched
    #[default]
    Idle,
    /// Watching for one chord
    Armed(Chord),
    /// Capturing the next chord; an armed chord may be parked until the
    /// session ends
    Recording { suspended: Option<Chord> },
}

impl Mode {
    /// Mode to fall back to once a recording session ends
    pub fn after_recording(self) -> Mode {
        match self {
            Mode::Recording {
                suspended: Some(chord),
            } => Mode::Armed(chord),
            Mode::Recording { suspended: None } => Mode::Idle,
            other => other,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Idle => write!(f, "Idle"),
            Mode::Armed(_) => write!(f, "Armed"),
            Mode::Recording { .. } => write!(f, "Recording"),
        }
    }
}

const TAG_IDLE: u64 = 0;
const TAG_ARMED: u64 = 1;
const TAG_RECORDING: u64 = 2;

fn pack_chord(chord: Chord) -> u64 {
    (u64::from(chord.modifiers.bits()) << 8) | (u64::from(chord.key.0) << 16)
}

fn unpack_chord(word: u64) -> Chord {
    Chord::new(
        Modifiers::from_bits_truncate((word >> 8) as u8),
        KeyCode((word >> 16) as u16),
    )
}

fn pack(mode: Mode) -> u64 {
    match mode {
        Mode::Idle => TAG_IDLE,
        Mode::Armed(chord) => TAG_ARMED | pack_chord(chord),
        Mode::Recording { suspended } => {
            TAG_RECORDING | suspended.map(pack_chord).unwrap_or(0)
        }
    }
}

fn unpack(word: u64) -> Mode {
    match word & 0xFF {
        TAG_ARMED => Mode::Armed(unpack_chord(word)),
        TAG_RECORDING => {
            let chord = unpack_chord(word);
            Mode::Recording {
                suspended: (!chord.key.is_none()).then_some(chord),
            }
        }
        _ => Mode::Idle,
    }
}

/// Atomic holder for the current [`Mode`]
#[derive(Debug, Default)]
pub struct ModeCell {
    word: AtomicU64,
}

impl ModeCell {
    pub fn load(&self) -> Mode {
        unpack(self.word.load(Ordering::Acquire))
    }

    /// Replace the mode, returning the previous one
    pub fn swap(&self, mode: Mode) -> Mode {
        unpack(self.word.swap(pack(mode), Ordering::AcqRel))
    }

    /// Move from `current` to `next` unless someone else switched first
    pub fn transition(&self, current: Mode, next: Mode) -> bool {
        self.word
            .compare_exchange(pack(current), pack(next), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
