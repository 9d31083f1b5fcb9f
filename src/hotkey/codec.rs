//! Shortcut string parsing and display rendering
//!
//! Parsing is deliberately permissive: tokens are trimmed, empty tokens
//! are skipped, case is ignored, and a second key token replaces the
//! first instead of failing.

use super::chord::{Chord, KeyCode, Modifiers};

/// Errors produced while turning a shortcut string into a [`Chord`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("shortcut string is empty")]
    Empty,

    #[error("keyboard layout has no key producing '{0}'")]
    UnresolvedKey(char),

    #[error("function key '{0}' is outside F1-F24")]
    InvalidFunctionKey(String),

    #[error("unknown token '{0}' in shortcut")]
    UnknownToken(String),

    #[error("shortcut has modifiers but no key")]
    NoKey,
}

/// Character and name lookups against the active keyboard layout
pub trait KeyboardLayout: Send + Sync {
    /// Key that produces `ch` without dead-key composition
    fn key_for_char(&self, ch: char) -> Option<KeyCode>;

    /// Human readable name of `key`, as the layout labels it
    fn key_name(&self, key: KeyCode) -> Option<String>;
}

/// Static US QWERTY layout used where no native lookup is wired up
#[derive(Debug, Clone, Copy, Default)]
pub struct UsLayout;

// Punctuation keys as (unshifted, shifted, key code)
const US_PUNCTUATION: &[(char, char, u16)] = &[
    (';', ':', 0xBA),
    ('=', '+', 0xBB),
    (',', '<', 0xBC),
    ('-', '_', 0xBD),
    ('.', '>', 0xBE),
    ('/', '?', 0xBF),
    ('`', '~', 0xC0),
    ('[', '{', 0xDB),
    ('\\', '|', 0xDC),
    (']', '}', 0xDD),
    ('\'', '"', 0xDE),
];

const US_SHIFTED_DIGITS: &str = ")!@#$%^&*(";

impl KeyboardLayout for UsLayout {
    fn key_for_char(&self, ch: char) -> Option<KeyCode> {
        let ch = ch.to_ascii_uppercase();
        if ch.is_ascii_uppercase() || ch.is_ascii_digit() {
            return Some(KeyCode(ch as u16));
        }
        if let Some(digit) = US_SHIFTED_DIGITS.find(ch) {
            return Some(KeyCode(u16::from(b'0') + digit as u16));
        }
        US_PUNCTUATION
            .iter()
            .find(|(plain, shifted, _)| *plain == ch || *shifted == ch)
            .map(|(_, _, code)| KeyCode(*code))
    }

    fn key_name(&self, key: KeyCode) -> Option<String> {
        if let Some(n) = key.function_number() {
            return Some(format!("F{n}"));
        }
        match key {
            KeyCode::TAB => return Some("Tab".into()),
            KeyCode::SPACE => return Some("Space".into()),
            KeyCode::ENTER => return Some("Enter".into()),
            KeyCode::ESCAPE => return Some("Esc".into()),
            _ => {}
        }
        if let Ok(byte) = u8::try_from(key.0) {
            if byte.is_ascii_uppercase() || byte.is_ascii_digit() {
                return Some(char::from(byte).to_string());
            }
        }
        US_PUNCTUATION
            .iter()
            .find(|(_, _, code)| *code == key.0)
            .map(|(plain, _, _)| plain.to_string())
    }
}

fn modifier_token(token: &str) -> Option<Modifiers> {
    match token.to_ascii_lowercase().as_str() {
        "ctrl" => Some(Modifiers::CONTROL),
        "alt" => Some(Modifiers::ALT),
        "shift" => Some(Modifiers::SHIFT),
        "win" | "meta" => Some(Modifiers::META),
        _ => None,
    }
}

fn named_key(token: &str) -> Option<KeyCode> {
    match token.to_ascii_lowercase().as_str() {
        "tab" => Some(KeyCode::TAB),
        "space" => Some(KeyCode::SPACE),
        "enter" => Some(KeyCode::ENTER),
        "esc" | "escape" => Some(KeyCode::ESCAPE),
        _ => None,
    }
}

/// Resolve one non-modifier token to a key code
fn key_token(token: &str, layout: &dyn KeyboardLayout) -> Result<KeyCode, ParseError> {
    let mut chars = token.chars();
    if let (Some(ch), None) = (chars.next(), chars.next()) {
        return layout
            .key_for_char(ch)
            .ok_or(ParseError::UnresolvedKey(ch));
    }

    if let Some(digits) = token.strip_prefix(['F', 'f']) {
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return digits
                .parse::<u8>()
                .ok()
                .and_then(KeyCode::function)
                .ok_or_else(|| ParseError::InvalidFunctionKey(token.to_string()));
        }
    }

    named_key(token).ok_or_else(|| ParseError::UnknownToken(token.to_string()))
}

/// Parse a shortcut string like "Ctrl+Alt+K" into a [`Chord`]
pub fn parse_chord(s: &str, layout: &dyn KeyboardLayout) -> Result<Chord, ParseError> {
    let tokens: Vec<&str> = s
        .split('+')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut chord = Chord::default();
    for token in tokens {
        match modifier_token(token) {
            Some(m) => chord.modifiers |= m,
            // Last key token wins
            None => chord.key = key_token(token, layout)?,
        }
    }

    if chord.key.is_none() {
        return Err(ParseError::NoKey);
    }
    Ok(chord)
}

/// Render a chord as "Ctrl+Alt+Shift+Meta+Key"
///
/// Falls back to the decimal key code when the layout has no name for
/// the key; such strings do not parse back.
pub fn render_chord(chord: &Chord, layout: &dyn KeyboardLayout) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(5);
    for (flag, name) in [
        (Modifiers::CONTROL, "Ctrl"),
        (Modifiers::ALT, "Alt"),
        (Modifiers::SHIFT, "Shift"),
        (Modifiers::META, "Meta"),
    ] {
        if chord.modifiers.contains(flag) {
            parts.push(name.to_string());
        }
    }
    parts.push(
        layout
            .key_name(chord.key)
            .unwrap_or_else(|| chord.key.0.to_string()),
    );
    parts.join("+")
}
