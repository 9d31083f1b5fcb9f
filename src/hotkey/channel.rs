//! The hook channel: one owned OS keyboard hook and the matcher behind it
//!
//! Platform backends feed raw key transitions into [`HookCore::handle`]
//! from their hook thread and act on the returned [`Verdict`]. Mode
//! switches come from the single owner of the [`HookChannel`].

use std::panic::{self, AssertUnwindSafe};
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::chord::{Chord, KeyCode};
use super::dispatch::{Notification, Poster};
use super::mode::{Mode, ModeCell};
use super::tracker::ModifierTracker;

/// A single key going down or up, already in engine key space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTransition {
    pub key: KeyCode,
    pub down: bool,
}

impl KeyTransition {
    pub fn down(key: KeyCode) -> Self {
        Self { key, down: true }
    }

    pub fn up(key: KeyCode) -> Self {
        Self { key, down: false }
    }
}

/// What the backend should do with the event it reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Forward to the rest of the system
    PassThrough,
    /// Stop propagation
    Swallow,
}

/// Errors that can occur while installing or arming the keyboard hook
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("chord {0:?} has no non-modifier key")]
    InvalidChord(Chord),

    #[error("failed to create event tap - is Accessibility permission granted?")]
    #[cfg_attr(not(target_os = "macos"), allow(dead_code))]
    EventTapCreation,

    #[error("operating system rejected the keyboard hook: {0}")]
    #[cfg_attr(not(any(target_os = "macos", target_os = "windows")), allow(dead_code))]
    HookRejected(String),

    #[error("failed to spawn hook thread: {0}")]
    #[cfg_attr(not(any(target_os = "macos", target_os = "windows")), allow(dead_code))]
    ThreadSpawn(String),

    #[error("hook thread exited before reporting readiness")]
    #[cfg_attr(not(any(target_os = "macos", target_os = "windows")), allow(dead_code))]
    ThreadExited,

    #[error("global keyboard hooks are not supported on this platform")]
    Unsupported,
}

/// State shared between the channel owner and the hook callback
#[derive(Debug)]
pub struct HookCore {
    mode: ModeCell,
    tracker: ModifierTracker,
    poster: Poster,
    #[cfg(test)]
    fail_next: AtomicBool,
}

impl HookCore {
    fn new(poster: Poster) -> Self {
        Self {
            mode: ModeCell::default(),
            tracker: ModifierTracker::new(),
            poster,
            #[cfg(test)]
            fail_next: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub(crate) fn tracker(&self) -> &ModifierTracker {
        &self.tracker
    }

    /// Make the next `decide` call panic
    #[cfg(test)]
    pub(crate) fn fail_next_event(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Decide the fate of one key transition
    ///
    /// Runs inside the OS input pipeline. Never blocks, and a panic in
    /// here turns into pass-through instead of unwinding into OS code.
    pub fn handle(&self, transition: KeyTransition) -> Verdict {
        panic::catch_unwind(AssertUnwindSafe(|| self.decide(transition)))
            .unwrap_or(Verdict::PassThrough)
    }

    fn decide(&self, transition: KeyTransition) -> Verdict {
        #[cfg(test)]
        if self.fail_next.swap(false, Ordering::SeqCst) {
            panic!("injected failure in key handler");
        }

        let mode = self.mode.load();

        if let Some(modifier) = transition.key.modifier() {
            if transition.down {
                self.tracker.press(modifier);
            } else {
                self.tracker.release(modifier);
            }
            return match mode {
                Mode::Idle => Verdict::PassThrough,
                Mode::Armed(_) | Mode::Recording { .. } => Verdict::Swallow,
            };
        }

        if !transition.down {
            return Verdict::PassThrough;
        }

        let live = Chord::new(self.tracker.current_mask(), transition.key);
        match mode {
            Mode::Idle => Verdict::PassThrough,
            Mode::Armed(chord) if chord == live => {
                debug!(?live, "armed chord matched");
                self.poster.post(Notification::Activated);
                Verdict::Swallow
            }
            Mode::Armed(_) => Verdict::PassThrough,
            Mode::Recording { .. } => {
                // A concurrent mode switch wins over the capture
                if self.mode.transition(mode, mode.after_recording()) {
                    self.tracker.clear();
                    debug!(?live, "chord captured");
                    self.poster.post(Notification::Captured(live));
                }
                Verdict::Swallow
            }
        }
    }
}

/// A platform mechanism that delivers key transitions to a [`HookCore`]
pub trait HookBackend: Send {
    /// Start delivering events; must report OS refusal as an error
    fn install(&mut self, core: Arc<HookCore>) -> Result<(), HookError>;

    /// Stop delivering events
    fn uninstall(&mut self);
}

/// Owned handle to the process's keyboard hook
pub struct HookChannel<B: HookBackend> {
    backend: B,
    core: Arc<HookCore>,
    installed: bool,
}

impl<B: HookBackend> HookChannel<B> {
    pub fn new(backend: B, poster: Poster) -> Self {
        Self {
            backend,
            core: Arc::new(HookCore::new(poster)),
            installed: false,
        }
    }

    /// Install the OS hook; a no-op when already installed
    pub fn install(&mut self) -> Result<(), HookError> {
        if self.installed {
            return Ok(());
        }
        self.backend.install(Arc::clone(&self.core))?;
        self.installed = true;
        info!("keyboard hook installed");
        Ok(())
    }

    /// Remove the OS hook; safe to call any number of times
    pub fn uninstall(&mut self) {
        if !self.installed {
            return;
        }
        self.backend.uninstall();
        self.installed = false;
        info!("keyboard hook removed");
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn mode(&self) -> Mode {
        self.core.mode.load()
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Arc<HookCore> {
        &self.core
    }

    /// Watch for `chord`, replacing whatever was armed before
    ///
    /// Leaves the mode untouched if the chord is incomplete or the hook
    /// cannot be installed.
    pub fn set_armed(&mut self, chord: Chord) -> Result<(), HookError> {
        if !chord.is_valid() {
            return Err(HookError::InvalidChord(chord));
        }
        self.install()?;
        let previous = self.core.mode.swap(Mode::Armed(chord));
        debug!(%previous, ?chord, "armed");
        Ok(())
    }

    /// Stop matching; effective for the next key event
    pub fn disarm(&mut self) {
        let previous = self.core.mode.swap(Mode::Idle);
        debug!(%previous, "disarmed");
    }

    /// Start or stop a recording session
    ///
    /// Starting parks any armed chord; stopping without a capture
    /// restores it. Stopping while not recording changes nothing.
    pub fn set_recording(&mut self, enabled: bool) -> Result<(), HookError> {
        if enabled {
            self.install()?;
            let suspended = match self.core.mode.load() {
                Mode::Idle => None,
                Mode::Armed(chord) => Some(chord),
                Mode::Recording { suspended } => suspended,
            };
            self.core.tracker.clear();
            self.core.mode.swap(Mode::Recording { suspended });
            debug!(?suspended, "recording started");
            return Ok(());
        }

        loop {
            let current = self.core.mode.load();
            if !matches!(current, Mode::Recording { .. }) {
                return Ok(());
            }
            let next = current.after_recording();
            if self.core.mode.transition(current, next) {
                debug!(%next, "recording stopped");
                return Ok(());
            }
        }
    }
}

impl<B: HookBackend> Drop for HookChannel<B> {
    fn drop(&mut self) {
        self.uninstall();
    }
}

/// Backend for platforms without a supported global hook
#[derive(Debug, Default)]
pub struct UnsupportedHook;

impl HookBackend for UnsupportedHook {
    fn install(&mut self, _core: Arc<HookCore>) -> Result<(), HookError> {
        warn!("no global keyboard hook available on this platform");
        Err(HookError::Unsupported)
    }

    fn uninstall(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::HotkeyEvent;
    use crate::hotkey::chord::Modifiers;
    use crate::hotkey::codec::{parse_chord, UsLayout};
    use crate::hotkey::dispatch::{self, Dispatcher};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct FakeBackend {
        installs: Arc<AtomicUsize>,
        uninstalls: Arc<AtomicUsize>,
        reject: bool,
    }

    impl HookBackend for FakeBackend {
        fn install(&mut self, _core: Arc<HookCore>) -> Result<(), HookError> {
            if self.reject {
                return Err(HookError::HookRejected("denied".into()));
            }
            self.installs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn uninstall(&mut self) {
            self.uninstalls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn create_channel() -> (HookChannel<FakeBackend>, FakeBackend, Dispatcher) {
        let backend = FakeBackend::default();
        let (poster, dispatcher) = dispatch::channel(Arc::new(UsLayout));
        (HookChannel::new(backend.clone(), poster), backend, dispatcher)
    }

    fn chord(s: &str) -> Chord {
        parse_chord(s, &UsLayout).unwrap()
    }

    fn letter(ch: char) -> KeyCode {
        KeyCode(ch as u16)
    }

    #[test]
    fn test_idle_passes_everything() {
        let (channel, _, mut dispatcher) = create_channel();
        let core = channel.core();

        assert_eq!(core.handle(KeyTransition::down(KeyCode::LEFT_CONTROL)), Verdict::PassThrough);
        assert_eq!(core.handle(KeyTransition::down(letter('K'))), Verdict::PassThrough);
        assert_eq!(core.handle(KeyTransition::up(letter('K'))), Verdict::PassThrough);
        assert_eq!(dispatcher.try_next(), None);
    }

    #[test]
    fn test_armed_match_swallows_and_activates_once() {
        let (mut channel, _, mut dispatcher) = create_channel();
        channel.set_armed(chord("Ctrl+Shift+K")).unwrap();
        let core = Arc::clone(channel.core());

        assert_eq!(core.handle(KeyTransition::down(KeyCode::LEFT_CONTROL)), Verdict::Swallow);
        assert_eq!(core.handle(KeyTransition::down(KeyCode::RIGHT_SHIFT)), Verdict::Swallow);
        assert_eq!(core.handle(KeyTransition::down(letter('K'))), Verdict::Swallow);
        assert_eq!(core.handle(KeyTransition::up(letter('K'))), Verdict::PassThrough);

        assert_eq!(dispatcher.try_next(), Some(HotkeyEvent::Activated));
        assert_eq!(dispatcher.try_next(), None);
    }

    #[test]
    fn test_armed_mismatch_passes_through() {
        let (mut channel, _, mut dispatcher) = create_channel();
        channel.set_armed(chord("Ctrl+Shift+K")).unwrap();
        let core = Arc::clone(channel.core());

        core.handle(KeyTransition::down(KeyCode::LEFT_CONTROL));
        let before = core.tracker().current_mask();

        assert_eq!(core.handle(KeyTransition::down(letter('K'))), Verdict::PassThrough);
        assert_eq!(core.handle(KeyTransition::down(letter('J'))), Verdict::PassThrough);
        assert_eq!(core.tracker().current_mask(), before);
        assert_eq!(dispatcher.try_next(), None);
    }

    #[test]
    fn test_armed_requires_exact_modifiers() {
        let (mut channel, _, mut dispatcher) = create_channel();
        channel.set_armed(chord("Ctrl+K")).unwrap();
        let core = Arc::clone(channel.core());

        core.handle(KeyTransition::down(KeyCode::LEFT_CONTROL));
        core.handle(KeyTransition::down(KeyCode::LEFT_ALT));
        assert_eq!(core.handle(KeyTransition::down(letter('K'))), Verdict::PassThrough);

        core.handle(KeyTransition::up(KeyCode::LEFT_ALT));
        assert_eq!(core.handle(KeyTransition::down(letter('K'))), Verdict::Swallow);
        assert_eq!(dispatcher.try_next(), Some(HotkeyEvent::Activated));
    }

    #[test]
    fn test_recording_captures_one_chord() {
        let (mut channel, _, mut dispatcher) = create_channel();
        channel.set_recording(true).unwrap();
        let core = Arc::clone(channel.core());

        assert_eq!(core.handle(KeyTransition::down(KeyCode::LEFT_CONTROL)), Verdict::Swallow);
        assert_eq!(core.handle(KeyTransition::down(KeyCode::LEFT_ALT)), Verdict::Swallow);
        assert_eq!(core.handle(KeyTransition::down(letter('K'))), Verdict::Swallow);

        assert_eq!(
            dispatcher.try_next(),
            Some(HotkeyEvent::Captured {
                display: "Ctrl+Alt+K".into()
            })
        );
        assert_eq!(dispatcher.try_next(), None);
        assert_eq!(channel.mode(), Mode::Idle);
        assert!(core.tracker().current_mask().is_empty());

        // Session is over: further keys are transparent again
        assert_eq!(core.handle(KeyTransition::down(letter('K'))), Verdict::PassThrough);
    }

    #[test]
    fn test_recording_ignores_key_up_and_modifier_only_input() {
        let (mut channel, _, mut dispatcher) = create_channel();
        channel.set_recording(true).unwrap();
        let core = Arc::clone(channel.core());

        core.handle(KeyTransition::down(KeyCode::LEFT_SHIFT));
        core.handle(KeyTransition::up(KeyCode::LEFT_SHIFT));
        assert_eq!(core.handle(KeyTransition::up(letter('Q'))), Verdict::PassThrough);

        assert_eq!(dispatcher.try_next(), None);
        assert_eq!(channel.mode(), Mode::Recording { suspended: None });
    }

    #[test]
    fn test_capture_restores_suspended_chord() {
        let (mut channel, _, mut dispatcher) = create_channel();
        let armed = chord("Ctrl+Shift+K");
        channel.set_armed(armed).unwrap();
        channel.set_recording(true).unwrap();
        let core = Arc::clone(channel.core());

        core.handle(KeyTransition::down(KeyCode::F1));
        assert_eq!(
            dispatcher.try_next(),
            Some(HotkeyEvent::Captured {
                display: "F1".into()
            })
        );
        assert_eq!(channel.mode(), Mode::Armed(armed));

        // Focus-out after the capture must not disturb the restored chord
        channel.set_recording(false).unwrap();
        assert_eq!(channel.mode(), Mode::Armed(armed));
    }

    #[test]
    fn test_armed_to_recording_and_back_restores_chord() {
        let (mut channel, _, _dispatcher) = create_channel();
        let armed = chord("Alt+F4");
        channel.set_armed(armed).unwrap();

        channel.set_recording(true).unwrap();
        assert_eq!(
            channel.mode(),
            Mode::Recording {
                suspended: Some(armed)
            }
        );

        channel.set_recording(false).unwrap();
        assert_eq!(channel.mode(), Mode::Armed(armed));
    }

    #[test]
    fn test_set_armed_replaces_previous_chord() {
        let (mut channel, _, mut dispatcher) = create_channel();
        channel.set_armed(chord("Ctrl+A")).unwrap();
        channel.set_armed(chord("Ctrl+B")).unwrap();
        let core = Arc::clone(channel.core());

        core.handle(KeyTransition::down(KeyCode::CONTROL));
        assert_eq!(core.handle(KeyTransition::down(letter('A'))), Verdict::PassThrough);
        assert_eq!(core.handle(KeyTransition::down(letter('B'))), Verdict::Swallow);
        assert_eq!(dispatcher.try_next(), Some(HotkeyEvent::Activated));
    }

    #[test]
    fn test_disarm_is_effective_for_next_event() {
        let (mut channel, _, mut dispatcher) = create_channel();
        channel.set_armed(Chord::new(Modifiers::empty(), KeyCode::F1)).unwrap();
        let core = Arc::clone(channel.core());

        channel.disarm();
        assert_eq!(core.handle(KeyTransition::down(KeyCode::F1)), Verdict::PassThrough);
        assert_eq!(dispatcher.try_next(), None);
    }

    #[test]
    fn test_install_is_idempotent() {
        let (mut channel, backend, _dispatcher) = create_channel();
        channel.install().unwrap();
        channel.install().unwrap();
        channel.set_armed(chord("Ctrl+K")).unwrap();
        channel.set_recording(true).unwrap();
        assert_eq!(backend.installs.load(Ordering::SeqCst), 1);
        assert!(channel.is_installed());
    }

    #[test]
    fn test_uninstall_is_always_safe() {
        let (mut channel, backend, _dispatcher) = create_channel();
        channel.uninstall();
        assert_eq!(backend.uninstalls.load(Ordering::SeqCst), 0);

        channel.install().unwrap();
        channel.uninstall();
        channel.uninstall();
        assert_eq!(backend.uninstalls.load(Ordering::SeqCst), 1);

        channel.install().unwrap();
        drop(channel);
        assert_eq!(backend.uninstalls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_install_failure_leaves_mode_unchanged() {
        let backend = FakeBackend {
            reject: true,
            ..Default::default()
        };
        let (poster, _dispatcher) = dispatch::channel(Arc::new(UsLayout));
        let mut channel = HookChannel::new(backend, poster);

        assert!(matches!(
            channel.set_armed(chord("Ctrl+K")),
            Err(HookError::HookRejected(_))
        ));
        assert!(channel.set_recording(true).is_err());
        assert_eq!(channel.mode(), Mode::Idle);
        assert!(!channel.is_installed());
    }

    #[test]
    fn test_incomplete_chord_is_never_armed() {
        let (mut channel, backend, _dispatcher) = create_channel();
        channel.set_armed(chord("Ctrl+K")).unwrap();

        let no_key = Chord::new(Modifiers::CONTROL, KeyCode(0));
        assert!(matches!(channel.set_armed(no_key), Err(HookError::InvalidChord(_))));
        let modifier_key = Chord::new(Modifiers::empty(), KeyCode::LEFT_SHIFT);
        assert!(matches!(
            channel.set_armed(modifier_key),
            Err(HookError::InvalidChord(_))
        ));

        assert_eq!(channel.mode(), Mode::Armed(chord("Ctrl+K")));
        assert_eq!(backend.installs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_in_handler_passes_through() {
        let (mut channel, _, mut dispatcher) = create_channel();
        channel.set_armed(chord("Ctrl+K")).unwrap();
        let core = Arc::clone(channel.core());

        assert_eq!(core.handle(KeyTransition::down(KeyCode::LEFT_CONTROL)), Verdict::Swallow);
        core.fail_next_event();
        assert_eq!(core.handle(KeyTransition::down(letter('K'))), Verdict::PassThrough);
        assert_eq!(dispatcher.try_next(), None);

        // Still matching afterwards
        assert_eq!(core.handle(KeyTransition::down(letter('K'))), Verdict::Swallow);
        assert_eq!(dispatcher.try_next(), Some(HotkeyEvent::Activated));
        assert_eq!(channel.mode(), Mode::Armed(chord("Ctrl+K")));
    }

    #[test]
    fn test_unsupported_backend_reports_failure() {
        let (poster, _dispatcher) = dispatch::channel(Arc::new(UsLayout));
        let mut channel = HookChannel::new(UnsupportedHook, poster);
        assert!(matches!(channel.install(), Err(HookError::Unsupported)));
    }
}
