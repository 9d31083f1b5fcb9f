//! macOS backend using a filtering CGEventTap
//!
//! The tap runs on a dedicated thread with its own CFRunLoop. Returning
//! `None` from the tap callback drops the event for every other app.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventTapProxy, CGEventType, EventField,
};
use tracing::{error, info, warn};

use super::channel::{HookBackend, HookCore, HookError, KeyTransition, Verdict};
use super::chord::KeyCode;

/// Global keyboard hook backed by a session-level event tap
#[derive(Default)]
pub struct EventTapHook {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HookBackend for EventTapHook {
    fn install(&mut self, core: Arc<HookCore>) -> Result<(), HookError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let running = Arc::clone(&self.running);
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("keyboard-hook".to_string())
            .spawn(move || {
                info!("keyboard hook thread started");
                run_event_loop(core, Arc::clone(&running), ready_tx);
                running.store(false, Ordering::SeqCst);
                info!("keyboard hook thread stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                HookError::ThreadSpawn(e.to_string())
            })?;

        let ready = ready_rx.recv().unwrap_or(Err(HookError::ThreadExited));
        if ready.is_err() {
            self.running.store(false, Ordering::SeqCst);
            let _ = thread.join();
        } else {
            self.thread = Some(thread);
        }
        ready
    }

    fn uninstall(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            // The run loop wakes at least every 100ms to check the flag
            if thread.join().is_err() {
                error!("keyboard hook thread panicked");
            }
        }
    }
}

/// Keys without a virtual-key counterpart land at `UNMAPPED_BASE | kVK`
const UNMAPPED_BASE: u16 = 0x100;

/// Map a macOS virtual keycode (kVK_*) into engine key space
fn translate_keycode(code: u16) -> KeyCode {
    let vk = match code {
        0x00 => b'A' as u16,
        0x01 => b'S' as u16,
        0x02 => b'D' as u16,
        0x03 => b'F' as u16,
        0x04 => b'H' as u16,
        0x05 => b'G' as u16,
        0x06 => b'Z' as u16,
        0x07 => b'X' as u16,
        0x08 => b'C' as u16,
        0x09 => b'V' as u16,
        0x0B => b'B' as u16,
        0x0C => b'Q' as u16,
        0x0D => b'W' as u16,
        0x0E => b'E' as u16,
        0x0F => b'R' as u16,
        0x10 => b'Y' as u16,
        0x11 => b'T' as u16,
        0x12 => b'1' as u16,
        0x13 => b'2' as u16,
        0x14 => b'3' as u16,
        0x15 => b'4' as u16,
        0x16 => b'6' as u16,
        0x17 => b'5' as u16,
        0x18 => 0xBB, // =
        0x19 => b'9' as u16,
        0x1A => b'7' as u16,
        0x1B => 0xBD, // -
        0x1C => b'8' as u16,
        0x1D => b'0' as u16,
        0x1E => 0xDD, // ]
        0x1F => b'O' as u16,
        0x20 => b'U' as u16,
        0x21 => 0xDB, // [
        0x22 => b'I' as u16,
        0x23 => b'P' as u16,
        0x24 => KeyCode::ENTER.0,
        0x25 => b'L' as u16,
        0x26 => b'J' as u16,
        0x27 => 0xDE, // '
        0x28 => b'K' as u16,
        0x29 => 0xBA, // ;
        0x2A => 0xDC, // \
        0x2B => 0xBC, // ,
        0x2C => 0xBF, // /
        0x2D => b'N' as u16,
        0x2E => b'M' as u16,
        0x2F => 0xBE, // .
        0x30 => KeyCode::TAB.0,
        0x31 => KeyCode::SPACE.0,
        0x32 => 0xC0, // `
        0x33 => 0x08, // Delete (backspace)
        0x0A => 0xE2, // ISO section
        0x39 => 0x14, // Caps Lock
        0x35 => KeyCode::ESCAPE.0,
        0x36 => KeyCode::RIGHT_META.0,
        0x37 => KeyCode::LEFT_META.0,
        0x38 => KeyCode::LEFT_SHIFT.0,
        0x3A => KeyCode::LEFT_ALT.0,
        0x3B => KeyCode::LEFT_CONTROL.0,
        0x3C => KeyCode::RIGHT_SHIFT.0,
        0x3D => KeyCode::RIGHT_ALT.0,
        0x3E => KeyCode::RIGHT_CONTROL.0,
        0x7A => 0x70, // F1
        0x78 => 0x71,
        0x63 => 0x72,
        0x76 => 0x73,
        0x60 => 0x74,
        0x61 => 0x75,
        0x62 => 0x76,
        0x64 => 0x77,
        0x65 => 0x78,
        0x6D => 0x79,
        0x67 => 0x7A,
        0x6F => 0x7B, // F12
        0x69 => 0x7C,
        0x6B => 0x7D,
        0x71 => 0x7E,
        0x6A => 0x7F,
        0x40 => 0x80,
        0x4F => 0x81,
        0x50 => 0x82,
        0x5A => 0x83, // F20
        0x72 => 0x2D, // Help sits where Insert does
        0x73 => 0x24, // Home
        0x74 => 0x21, // Page Up
        0x75 => 0x2E, // Forward Delete
        0x77 => 0x23, // End
        0x79 => 0x22, // Page Down
        0x7B => 0x25, // Left
        0x7C => 0x27, // Right
        0x7D => 0x28, // Down
        0x7E => 0x26, // Up
        // Keypad
        0x52 => 0x60,
        0x53 => 0x61,
        0x54 => 0x62,
        0x55 => 0x63,
        0x56 => 0x64,
        0x57 => 0x65,
        0x58 => 0x66,
        0x59 => 0x67,
        0x5B => 0x68,
        0x5C => 0x69,
        0x43 => 0x6A, // *
        0x45 => 0x6B, // +
        0x4E => 0x6D, // -
        0x41 => 0x6E, // .
        0x4B => 0x6F, // /
        0x47 => 0x0C, // Clear
        0x4C => KeyCode::ENTER.0,
        _ => UNMAPPED_BASE | code,
    };
    KeyCode(vk)
}

/// Flag that reports whether a modifier key is currently held
fn modifier_flag(key: KeyCode) -> Option<CGEventFlags> {
    use super::chord::Modifiers;

    key.modifier().map(|m| {
        if m == Modifiers::CONTROL {
            CGEventFlags::CGEventFlagControl
        } else if m == Modifiers::ALT {
            CGEventFlags::CGEventFlagAlternate
        } else if m == Modifiers::SHIFT {
            CGEventFlags::CGEventFlagShift
        } else {
            CGEventFlags::CGEventFlagCommand
        }
    })
}

/// Turn a tap event into a key transition, if it is one we track
fn transition_for(event_type: CGEventType, event: &CGEvent) -> Option<KeyTransition> {
    let code = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16;
    let key = translate_keycode(code);
    match event_type {
        CGEventType::KeyDown => Some(KeyTransition::down(key)),
        CGEventType::KeyUp => Some(KeyTransition::up(key)),
        // Modifiers only ever arrive as flag changes
        CGEventType::FlagsChanged => {
            let flag = modifier_flag(key)?;
            if event.get_flags().contains(flag) {
                Some(KeyTransition::down(key))
            } else {
                Some(KeyTransition::up(key))
            }
        }
        _ => None,
    }
}

/// Create the tap, report readiness, then pump the run loop until stopped
fn run_event_loop(
    core: Arc<HookCore>,
    running: Arc<AtomicBool>,
    ready_tx: mpsc::Sender<Result<(), HookError>>,
) {
    let reenable = Arc::new(AtomicBool::new(false));
    let reenable_cb = Arc::clone(&reenable);

    // Must return quickly: macOS disables taps that stall
    let callback = move |_proxy: CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
                         -> Option<CGEvent> {
        match event_type {
            CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                reenable_cb.store(true, Ordering::SeqCst);
            }
            _ => {
                if let Some(transition) = transition_for(event_type, event) {
                    if core.handle(transition) == Verdict::Swallow {
                        return None;
                    }
                }
            }
        }
        Some(event.clone())
    };

    let tap = match CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::Default,
        vec![
            CGEventType::KeyDown,
            CGEventType::KeyUp,
            CGEventType::FlagsChanged,
        ],
        callback,
    ) {
        Ok(tap) => tap,
        Err(()) => {
            error!("failed to create event tap - is Accessibility permission granted?");
            let _ = ready_tx.send(Err(HookError::EventTapCreation));
            return;
        }
    };

    let run_loop_source = match tap.mach_port.create_runloop_source(0) {
        Ok(source) => source,
        Err(()) => {
            let _ = ready_tx.send(Err(HookError::HookRejected(
                "failed to create run loop source for event tap".into(),
            )));
            return;
        }
    };

    let run_loop = CFRunLoop::get_current();
    unsafe {
        run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
    }
    tap.enable();

    info!("event tap created and enabled");
    let _ = ready_tx.send(Ok(()));

    while running.load(Ordering::SeqCst) {
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, Duration::from_millis(100), true);
        }

        if reenable.swap(false, Ordering::SeqCst) {
            warn!("event tap was disabled by the system, re-enabling");
            tap.enable();
        }
    }

    unsafe {
        run_loop.remove_source(&run_loop_source, kCFRunLoopCommonModes);
    }
}
