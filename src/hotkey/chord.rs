//! Chord, modifier mask and key code definitions
//!
//! Key codes live in one platform-neutral space numbered like Win32
//! virtual-key codes. Platform backends translate their native codes
//! into this space before the engine sees them.

use bitflags::bitflags;

bitflags! {
    /// Modifier keys held while a chord's key goes down
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct Modifiers: u8 {
        /// Control key (either side)
        const CONTROL = 0b0001;
        /// Alt/Option key (either side)
        const ALT = 0b0010;
        /// Shift key (either side)
        const SHIFT = 0b0100;
        /// Windows/Command/Super key (either side)
        const META = 0b1000;
    }
}

/// A key code in the engine's virtual-key space
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub u16);

impl KeyCode {
    pub const TAB: KeyCode = KeyCode(0x09);
    pub const ENTER: KeyCode = KeyCode(0x0D);
    pub const SHIFT: KeyCode = KeyCode(0x10);
    pub const CONTROL: KeyCode = KeyCode(0x11);
    pub const ALT: KeyCode = KeyCode(0x12);
    pub const ESCAPE: KeyCode = KeyCode(0x1B);
    pub const SPACE: KeyCode = KeyCode(0x20);
    pub const LEFT_META: KeyCode = KeyCode(0x5B);
    pub const RIGHT_META: KeyCode = KeyCode(0x5C);
    pub const F1: KeyCode = KeyCode(0x70);
    pub const F24: KeyCode = KeyCode(0x87);
    pub const LEFT_SHIFT: KeyCode = KeyCode(0xA0);
    pub const RIGHT_SHIFT: KeyCode = KeyCode(0xA1);
    pub const LEFT_CONTROL: KeyCode = KeyCode(0xA2);
    pub const RIGHT_CONTROL: KeyCode = KeyCode(0xA3);
    pub const LEFT_ALT: KeyCode = KeyCode(0xA4);
    pub const RIGHT_ALT: KeyCode = KeyCode(0xA5);

    /// Function key `F<n>` for `n` in 1..=24
    pub fn function(n: u8) -> Option<KeyCode> {
        (1..=24)
            .contains(&n)
            .then(|| KeyCode(Self::F1.0 + u16::from(n) - 1))
    }

    /// Function key number if this is one of F1..F24
    pub fn function_number(self) -> Option<u8> {
        (Self::F1.0..=Self::F24.0)
            .contains(&self.0)
            .then(|| (self.0 - Self::F1.0 + 1) as u8)
    }

    /// The modifier bit this key drives, if it is a modifier key
    pub fn modifier(self) -> Option<Modifiers> {
        match self {
            Self::CONTROL | Self::LEFT_CONTROL | Self::RIGHT_CONTROL => Some(Modifiers::CONTROL),
            Self::ALT | Self::LEFT_ALT | Self::RIGHT_ALT => Some(Modifiers::ALT),
            Self::SHIFT | Self::LEFT_SHIFT | Self::RIGHT_SHIFT => Some(Modifiers::SHIFT),
            Self::LEFT_META | Self::RIGHT_META => Some(Modifiers::META),
            _ => None,
        }
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// A keyboard shortcut: a modifier set plus exactly one non-modifier key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Chord {
    pub modifiers: Modifiers,
    pub key: KeyCode,
}

impl Chord {
    pub fn new(modifiers: Modifiers, key: KeyCode) -> Self {
        Self { modifiers, key }
    }

    /// A chord is complete only once it has a key
    pub fn is_valid(&self) -> bool {
        !self.key.is_none() && self.key.modifier().is_none()
    }
}
