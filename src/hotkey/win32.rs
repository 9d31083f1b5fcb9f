//! Windows backend using a WH_KEYBOARD_LL hook
//!
//! Low-level hook procedures get no user data and are called on the
//! thread that installed them, so the engine core sits in a
//! thread-local slot on that dedicated hook thread.

use std::cell::RefCell;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};
use windows::core::PCWSTR;
use windows::Win32::Foundation::{HINSTANCE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    GetKeyNameTextW, MapVirtualKeyW, VkKeyScanW, MAPVK_VK_TO_VSC,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, DispatchMessageW, GetMessageW, PostThreadMessageW, SetWindowsHookExW,
    TranslateMessage, UnhookWindowsHookEx, HC_ACTION, HHOOK, KBDLLHOOKSTRUCT, LLKHF_INJECTED,
    MSG, WH_KEYBOARD_LL, WM_KEYDOWN, WM_KEYUP, WM_QUIT, WM_SYSKEYDOWN, WM_SYSKEYUP,
};

use super::channel::{HookBackend, HookCore, HookError, KeyTransition, Verdict};
use super::chord::KeyCode;
use super::codec::{KeyboardLayout, UsLayout};

thread_local! {
    static HOOK_CORE: RefCell<Option<Arc<HookCore>>> = const { RefCell::new(None) };
}

/// Global keyboard hook owned by a dedicated message-loop thread
#[derive(Default)]
pub struct LowLevelHook {
    thread: Option<(JoinHandle<()>, u32)>,
}

impl HookBackend for LowLevelHook {
    fn install(&mut self, core: Arc<HookCore>) -> Result<(), HookError> {
        if self.thread.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("keyboard-hook".to_string())
            .spawn(move || run_message_loop(core, ready_tx))
            .map_err(|e| HookError::ThreadSpawn(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(thread_id)) => {
                self.thread = Some((thread, thread_id));
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(HookError::ThreadExited)
            }
        }
    }

    fn uninstall(&mut self) {
        let Some((thread, thread_id)) = self.thread.take() else {
            return;
        };
        if let Err(e) = unsafe { PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) } {
            warn!(?e, "failed to post quit to keyboard hook thread");
        }
        if thread.join().is_err() {
            error!("keyboard hook thread panicked");
        }
    }
}

fn run_message_loop(core: Arc<HookCore>, ready_tx: mpsc::Sender<Result<u32, HookError>>) {
    HOOK_CORE.with(|slot| *slot.borrow_mut() = Some(core));

    let hook = unsafe {
        GetModuleHandleW(PCWSTR::null())
            .and_then(|module| {
                SetWindowsHookExW(WH_KEYBOARD_LL, Some(hook_proc), HINSTANCE(module.0), 0)
            })
    };
    let hook = match hook {
        Ok(hook) => hook,
        Err(e) => {
            error!(?e, "SetWindowsHookExW failed");
            let _ = ready_tx.send(Err(HookError::HookRejected(e.to_string())));
            HOOK_CORE.with(|slot| slot.borrow_mut().take());
            return;
        }
    };

    info!("low-level keyboard hook installed");
    let _ = ready_tx.send(Ok(unsafe { GetCurrentThreadId() }));

    let mut msg = MSG::default();
    unsafe {
        while GetMessageW(&mut msg, HWND::default(), 0, 0).as_bool() {
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
        if let Err(e) = UnhookWindowsHookEx(hook) {
            warn!(?e, "UnhookWindowsHookEx failed");
        }
    }

    HOOK_CORE.with(|slot| slot.borrow_mut().take());
}

unsafe extern "system" fn hook_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code != HC_ACTION as i32 {
        return CallNextHookEx(HHOOK::default(), code, wparam, lparam);
    }

    let kb = &*(lparam.0 as *const KBDLLHOOKSTRUCT);

    // Synthetic input (our own copy/paste simulation included) is never ours
    if kb.flags.0 & LLKHF_INJECTED.0 != 0 {
        return CallNextHookEx(HHOOK::default(), code, wparam, lparam);
    }

    let down = match wparam.0 as u32 {
        WM_KEYDOWN | WM_SYSKEYDOWN => true,
        WM_KEYUP | WM_SYSKEYUP => false,
        _ => return CallNextHookEx(HHOOK::default(), code, wparam, lparam),
    };

    let key = KeyCode(kb.vkCode as u16);
    let transition = if down {
        KeyTransition::down(key)
    } else {
        KeyTransition::up(key)
    };
    let verdict = HOOK_CORE
        .try_with(|slot| {
            slot.try_borrow()
                .ok()
                .and_then(|core| core.as_ref().map(|core| core.handle(transition)))
        })
        .ok()
        .flatten()
        .unwrap_or(Verdict::PassThrough);

    match verdict {
        Verdict::Swallow => LRESULT(1),
        Verdict::PassThrough => CallNextHookEx(HHOOK::default(), code, wparam, lparam),
    }
}

/// Keyboard layout queries against the thread's active Windows layout
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsLayout;

impl KeyboardLayout for WindowsLayout {
    fn key_for_char(&self, ch: char) -> Option<KeyCode> {
        let mut units = [0u16; 2];
        let encoded = ch.to_uppercase().next()?.encode_utf16(&mut units);
        if encoded.len() != 1 {
            return None;
        }
        let scan = unsafe { VkKeyScanW(encoded[0]) };
        if scan == -1 {
            return None;
        }
        // Low byte is the key, high byte the shift state
        Some(KeyCode((scan as u16) & 0xFF))
    }

    fn key_name(&self, key: KeyCode) -> Option<String> {
        // Scan-code based names are ambiguous for these; use stable names
        if key.function_number().is_some() || key == KeyCode::ESCAPE {
            return UsLayout.key_name(key);
        }
        let scan = unsafe { MapVirtualKeyW(u32::from(key.0), MAPVK_VK_TO_VSC) };
        if scan == 0 {
            return None;
        }
        let mut buf = [0u16; 64];
        let len = unsafe { GetKeyNameTextW((scan << 16) as i32, &mut buf) };
        if len <= 0 {
            return None;
        }
        let name = String::from_utf16_lossy(&buf[..len as usize]);
        let mut chars = name.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => Some(ch.to_uppercase().collect()),
            _ => Some(name),
        }
    }
}
