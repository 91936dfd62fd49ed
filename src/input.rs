//! Mouse and keyboard events forwarded to remote browsers.
//!
//! The structures mirror CEF's native `cef_mouse_event_t` / `cef_key_event_t`
//! so the browser process can hand them to the engine without translation.
//! Events for one browser are delivered to the remote side in the order they
//! were submitted.

use serde::{Deserialize, Serialize};

// CEF Event Flags (from cef_types.h)
pub const EVENTFLAG_NONE: u32 = 0;
pub const EVENTFLAG_CAPS_LOCK_ON: u32 = 1 << 0;
pub const EVENTFLAG_SHIFT_DOWN: u32 = 1 << 1;
pub const EVENTFLAG_CONTROL_DOWN: u32 = 1 << 2;
pub const EVENTFLAG_ALT_DOWN: u32 = 1 << 3;
pub const EVENTFLAG_LEFT_MOUSE_BUTTON: u32 = 1 << 4;
pub const EVENTFLAG_MIDDLE_MOUSE_BUTTON: u32 = 1 << 5;
pub const EVENTFLAG_RIGHT_MOUSE_BUTTON: u32 = 1 << 6;
// Command key on Mac, Windows key on Windows
pub const EVENTFLAG_COMMAND_DOWN: u32 = 1 << 7;
pub const EVENTFLAG_NUM_LOCK_ON: u32 = 1 << 8;
pub const EVENTFLAG_IS_KEY_PAD: u32 = 1 << 9;
pub const EVENTFLAG_IS_REPEAT: u32 = 1 << 13;

/// Mouse button types for click events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    /// Left mouse button (primary click)
    Left,
    /// Middle mouse button (scroll wheel click)
    Middle,
    /// Right mouse button (context menu)
    Right,
}

impl MouseButton {
    /// Returns the CEF-specific button type constant.
    ///
    /// CEF uses these values:
    /// - MBT_LEFT = 0
    /// - MBT_MIDDLE = 1
    /// - MBT_RIGHT = 2
    pub fn to_cef_type(&self) -> i32 {
        match self {
            MouseButton::Left => 0,
            MouseButton::Middle => 1,
            MouseButton::Right => 2,
        }
    }

    /// Returns the event flag set while this button is held.
    pub fn to_event_flags(&self) -> u32 {
        match self {
            MouseButton::Left => EVENTFLAG_LEFT_MOUSE_BUTTON,
            MouseButton::Middle => EVENTFLAG_MIDDLE_MOUSE_BUTTON,
            MouseButton::Right => EVENTFLAG_RIGHT_MOUSE_BUTTON,
        }
    }
}

impl std::fmt::Display for MouseButton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MouseButton::Left => write!(f, "left"),
            MouseButton::Middle => write!(f, "middle"),
            MouseButton::Right => write!(f, "right"),
        }
    }
}

/// Mouse position plus modifier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MouseEvent {
    /// X coordinate in view coordinates
    pub x: i32,
    /// Y coordinate in view coordinates
    pub y: i32,
    /// Combination of EVENTFLAG_* constants
    pub modifiers: u32,
}

impl MouseEvent {
    /// Creates a new mouse event at the specified coordinates.
    pub fn new(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            modifiers: EVENTFLAG_NONE,
        }
    }

    /// Creates a mouse event with modifier flags.
    pub fn with_modifiers(x: i32, y: i32, modifiers: u32) -> Self {
        Self { x, y, modifiers }
    }
}

/// Key event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyEventType {
    /// Key was pressed down (raw key down)
    RawKeyDown,
    /// Key was pressed (translated key down)
    KeyDown,
    /// Key was released
    KeyUp,
    /// Character input event
    Char,
}

impl KeyEventType {
    /// Returns the CEF-specific key event type constant.
    pub fn to_cef_type(&self) -> i32 {
        match self {
            KeyEventType::RawKeyDown => 0,
            KeyEventType::KeyDown => 1,
            KeyEventType::KeyUp => 2,
            KeyEventType::Char => 3,
        }
    }
}

/// Keyboard input for a remote browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEvent {
    /// The type of key event
    pub event_type: KeyEventType,
    /// Combination of EVENTFLAG_* constants
    pub modifiers: u32,
    /// Windows virtual key code
    pub windows_key_code: i32,
    /// Native (platform-specific) key code
    pub native_key_code: i32,
    /// Whether this is a system key (Alt combinations on Windows)
    pub is_system_key: bool,
    /// The character generated by the keystroke
    pub character: u16,
    /// Same as character but unmodified (ignoring Shift, etc.)
    pub unmodified_character: u16,
}

impl KeyEvent {
    /// Creates a new key event.
    pub fn new(event_type: KeyEventType, windows_key_code: i32) -> Self {
        Self {
            event_type,
            modifiers: EVENTFLAG_NONE,
            windows_key_code,
            native_key_code: 0,
            is_system_key: false,
            character: 0,
            unmodified_character: 0,
        }
    }

    /// Creates a character input event.
    pub fn char_event(character: char) -> Self {
        let char_code = character as u16;
        Self {
            event_type: KeyEventType::Char,
            modifiers: EVENTFLAG_NONE,
            windows_key_code: char_code as i32,
            native_key_code: 0,
            is_system_key: false,
            character: char_code,
            unmodified_character: char_code,
        }
    }

    /// Sets the native key code for this event.
    pub fn with_native_key_code(mut self, code: i32) -> Self {
        self.native_key_code = code;
        self
    }

    /// Adds a modifier flag.
    pub fn with_modifier(mut self, flag: u32) -> Self {
        self.modifiers |= flag;
        self
    }

    /// Marks this as a system key event.
    pub fn as_system_key(mut self) -> Self {
        self.is_system_key = true;
        self
    }
}

/// Windows virtual key codes; CEF reports `windows_key_code` in this space on every platform.
pub mod key_codes {
    pub const VK_BACK: i32 = 0x08;
    pub const VK_TAB: i32 = 0x09;
    pub const VK_RETURN: i32 = 0x0D;
    pub const VK_SHIFT: i32 = 0x10;
    pub const VK_CONTROL: i32 = 0x11;
    pub const VK_MENU: i32 = 0x12;
    pub const VK_ESCAPE: i32 = 0x1B;
    pub const VK_SPACE: i32 = 0x20;
    pub const VK_PRIOR: i32 = 0x21;
    pub const VK_NEXT: i32 = 0x22;
    pub const VK_END: i32 = 0x23;
    pub const VK_HOME: i32 = 0x24;
    pub const VK_LEFT: i32 = 0x25;
    pub const VK_UP: i32 = 0x26;
    pub const VK_RIGHT: i32 = 0x27;
    pub const VK_DOWN: i32 = 0x28;
    pub const VK_DELETE: i32 = 0x2E;
    pub const VK_F5: i32 = 0x74;
    pub const VK_F12: i32 = 0x7B;
}

/// Maps a key name (e.g. "Enter", "a", "ArrowUp") to its virtual key code.
pub fn key_name_to_code(key: &str) -> Option<i32> {
    use key_codes::*;

    let mut chars = key.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return match c {
            'a'..='z' => Some(c.to_ascii_uppercase() as i32),
            'A'..='Z' | '0'..='9' => Some(c as i32),
            ' ' => Some(VK_SPACE),
            _ => None,
        };
    }

    match key.to_lowercase().as_str() {
        "enter" | "return" => Some(VK_RETURN),
        "tab" => Some(VK_TAB),
        "backspace" => Some(VK_BACK),
        "delete" | "del" => Some(VK_DELETE),
        "escape" | "esc" => Some(VK_ESCAPE),
        "space" => Some(VK_SPACE),
        "home" => Some(VK_HOME),
        "end" => Some(VK_END),
        "pageup" => Some(VK_PRIOR),
        "pagedown" => Some(VK_NEXT),
        "arrowup" | "up" => Some(VK_UP),
        "arrowdown" | "down" => Some(VK_DOWN),
        "arrowleft" | "left" => Some(VK_LEFT),
        "arrowright" | "right" => Some(VK_RIGHT),
        "shift" => Some(VK_SHIFT),
        "control" | "ctrl" => Some(VK_CONTROL),
        "alt" => Some(VK_MENU),
        "f5" => Some(VK_F5),
        "f12" => Some(VK_F12),
        _ => None,
    }
}

/// Any input event the host can forward, as seen by the browser process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    MouseMove {
        event: MouseEvent,
        mouse_leave: bool,
    },
    MouseClick {
        event: MouseEvent,
        button: MouseButton,
        mouse_up: bool,
        click_count: i32,
    },
    MouseWheel {
        event: MouseEvent,
        delta_x: i32,
        delta_y: i32,
    },
    CaptureLost,
    Key(KeyEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mouse_button_cef_types() {
        assert_eq!(MouseButton::Left.to_cef_type(), 0);
        assert_eq!(MouseButton::Middle.to_cef_type(), 1);
        assert_eq!(MouseButton::Right.to_cef_type(), 2);
        assert_eq!(MouseButton::Right.to_event_flags(), EVENTFLAG_RIGHT_MOUSE_BUTTON);
    }

    #[test]
    fn test_char_event() {
        let event = KeyEvent::char_event('a').with_modifier(EVENTFLAG_SHIFT_DOWN);
        assert_eq!(event.event_type, KeyEventType::Char);
        assert_eq!(event.character, 'a' as u16);
        assert_eq!(event.modifiers, EVENTFLAG_SHIFT_DOWN);
    }

    #[test]
    fn test_key_name_to_code() {
        assert_eq!(key_name_to_code("a"), Some(0x41));
        assert_eq!(key_name_to_code("Enter"), Some(key_codes::VK_RETURN));
        assert_eq!(key_name_to_code("ArrowLeft"), Some(key_codes::VK_LEFT));
        assert_eq!(key_name_to_code("nope"), None);
    }

    #[test]
    fn test_key_event_wire_format() {
        let json = serde_json::to_value(KeyEvent::new(KeyEventType::KeyDown, 0x0D)).unwrap();
        assert_eq!(json["eventType"], "KeyDown");
        assert_eq!(json["windowsKeyCode"], 0x0D);
        assert_eq!(json["isSystemKey"], false);
    }
}
