//! Keyboard layouts for the local injector.
//!
//! A [`KeyLayout`] maps a character to the physical key and modifiers that
//! produce it. Physical keys are named after their position on a US ANSI
//! board (`"y"` is the key right of `"t"`, whatever it prints).
//!
//! | Table | Modifiers |
//! |-------|-----------|
//! | base | none |
//! | shifted | `SHIFT` |
//! | alt-gr | `ALT_GR` |

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

bitflags! {
    /// Modifier keys held during a stroke.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Modifiers: u8 {
        const SHIFT = 1;
        const CTRL = 1 << 1;
        const ALT = 1 << 2;
        const ALT_GR = 1 << 3;
        const META = 1 << 4;
    }
}

impl Modifiers {
    /// Parses one modifier name as used in `combo:` commands.
    #[must_use]
    pub fn parse_combo_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "SHIFT" => Some(Self::SHIFT),
            "CTRL" | "CONTROL" => Some(Self::CTRL),
            "ALT" => Some(Self::ALT),
            "ALTGR" | "ALT_GR" => Some(Self::ALT_GR),
            "META" | "WIN" | "SUPER" | "CMD" => Some(Self::META),
            _ => None,
        }
    }
}

/// One key press with the modifiers held while pressing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyStroke {
    /// Physical key name.
    pub key: &'static str,
    pub modifiers: Modifiers,
}

impl KeyStroke {
    #[must_use]
    pub fn new(key: &'static str, modifiers: Modifiers) -> Self {
        Self { key, modifiers }
    }

    #[must_use]
    pub fn plain(key: &'static str) -> Self {
        Self::new(key, Modifiers::empty())
    }
}

impl std::fmt::Display for KeyStroke {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (name, _) in self.modifiers.iter_names() {
            write!(f, "{name}+")?;
        }
        f.write_str(self.key)
    }
}

/// Physical keys of the four character rows, left to right, top to bottom.
const ROW_KEYS: [&str; 47] = [
    "`", "1", "2", "3", "4", "5", "6", "7", "8", "9", "0", "-", "=", //
    "q", "w", "e", "r", "t", "y", "u", "i", "o", "p", "[", "]", "\\", //
    "a", "s", "d", "f", "g", "h", "j", "k", "l", ";", "'", //
    "z", "x", "c", "v", "b", "n", "m", ",", ".", "/",
];

const US_BASE: &str = "`1234567890-=qwertyuiop[]\\asdfghjkl;'zxcvbnm,./";
const US_SHIFTED: &str = "~!@#$%^&*()_+QWERTYUIOP{}|ASDFGHJKL:\"ZXCVBNM<>?";

const DE_BASE: &str = "^1234567890ß´qwertzuiopü+#asdfghjklöäyxcvbnm,.-";
const DE_SHIFTED: &str = "°!\"§$%&/()=?`QWERTZUIOPÜ*'ASDFGHJKLÖÄYXCVBNM;:_";
const DE_ALT_GR: [(char, &str); 11] = [
    ('²', "2"),
    ('³', "3"),
    ('{', "7"),
    ('[', "8"),
    (']', "9"),
    ('}', "0"),
    ('\\', "-"),
    ('@', "q"),
    ('€', "e"),
    ('~', "]"),
    ('µ', "m"),
];

/// Extra key left of `z` on ISO boards.
const ISO_EXTRA_KEY: &str = "intl_backslash";

/// Non-character keys accepted by `key:` commands.
const NAMED_KEYS: [&str; 32] = [
    "enter", "tab", "escape", "backspace", "space", "delete", "insert", "home", "end",
    "page_up", "page_down", "up", "down", "left", "right", "caps_lock", "print_screen",
    "menu", "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "f11", "f12",
    "num_lock", "scroll_lock",
];

/// Character to key-stroke mapping for one locale.
///
/// # Example
///
/// ```
/// use keyrelay_runtime::device::{KeyLayout, Modifiers};
///
/// let de = KeyLayout::de();
/// let at = de.stroke_for('@').unwrap();
/// assert_eq!(at.key, "q");
/// assert_eq!(at.modifiers, Modifiers::ALT_GR);
///
/// let us = KeyLayout::us();
/// assert_eq!(us.stroke_for('@').unwrap().modifiers, Modifiers::SHIFT);
/// ```
#[derive(Debug, Clone)]
pub struct KeyLayout {
    name: &'static str,
    map: HashMap<char, KeyStroke>,
}

impl KeyLayout {
    /// US ANSI layout.
    #[must_use]
    pub fn us() -> Self {
        let mut layout = Self::empty("us");
        layout.add_row(US_BASE, Modifiers::empty());
        layout.add_row(US_SHIFTED, Modifiers::SHIFT);
        layout
    }

    /// German ISO layout (QWERTZ).
    #[must_use]
    pub fn de() -> Self {
        let mut layout = Self::empty("de");
        layout.add_row(DE_BASE, Modifiers::empty());
        layout.add_row(DE_SHIFTED, Modifiers::SHIFT);
        for (c, key) in DE_ALT_GR {
            layout.add(c, KeyStroke::new(key, Modifiers::ALT_GR));
        }
        layout.add('<', KeyStroke::plain(ISO_EXTRA_KEY));
        layout.add('>', KeyStroke::new(ISO_EXTRA_KEY, Modifiers::SHIFT));
        layout.add('|', KeyStroke::new(ISO_EXTRA_KEY, Modifiers::ALT_GR));
        layout
    }

    /// Looks a layout up by name (`us`, `de`), ignoring case.
    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "us" | "en_us" | "en-us" => Some(Self::us()),
            "de" | "de_de" | "de-de" => Some(Self::de()),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the stroke that types `c`, if this layout can.
    #[must_use]
    pub fn stroke_for(&self, c: char) -> Option<KeyStroke> {
        match c {
            ' ' => Some(KeyStroke::plain("space")),
            '\n' => Some(KeyStroke::plain("enter")),
            '\t' => Some(KeyStroke::plain("tab")),
            _ => self.map.get(&c).copied(),
        }
    }

    /// Resolves a key name from a `key:` or `combo:` command.
    ///
    /// Accepts named keys (`ENTER`, `PAGE_UP`, `F5`, ...) and single
    /// characters, which are looked up in this layout.
    #[must_use]
    pub fn resolve_key(&self, name: &str) -> Option<KeyStroke> {
        let trimmed = name.trim();
        let mut chars = trimmed.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return self.stroke_for(c);
        }

        let normalized = trimmed.to_ascii_lowercase().replace('-', "_");
        let normalized = match normalized.as_str() {
            "return" => "enter",
            "esc" => "escape",
            "del" => "delete",
            "pageup" | "pgup" => "page_up",
            "pagedown" | "pgdn" => "page_down",
            "capslock" => "caps_lock",
            other => other,
        };
        NAMED_KEYS
            .into_iter()
            .find(|k| *k == normalized)
            .map(KeyStroke::plain)
    }

    fn empty(name: &'static str) -> Self {
        Self {
            name,
            map: HashMap::new(),
        }
    }

    fn add_row(&mut self, chars: &str, modifiers: Modifiers) {
        debug_assert_eq!(chars.chars().count(), ROW_KEYS.len());
        for (c, key) in chars.chars().zip(ROW_KEYS) {
            self.add(c, KeyStroke::new(key, modifiers));
        }
    }

    /// The first mapping for a character wins.
    fn add(&mut self, c: char, stroke: KeyStroke) {
        self.map.entry(c).or_insert(stroke);
    }
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::us()
    }
}
