//! Keyboard adapter contract
//!
//! The manager treats keymap handling as a pluggable backend:
//! - `KeyboardBackend` is the manager-level keymap description
//!   (built once, dropped with the manager)
//! - `KeyboardDevice` is the per-device state (modifiers, compose, LEDs)
//!
//! Backends are pure state machines. The device glue owns the I/O:
//! it writes LED changes to the device, arms the repeat timer and
//! calls the key hook with the event the backend filled in.

use bitflags::bitflags;

use crate::error::Result;

/// Codepoint reported for keysyms without a Unicode value
pub const INPUT_INVALID: u32 = 0xffff_ffff;

bitflags! {
    /// Modifier state carried by key events
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u32 {
        const SHIFT = 1 << 0;
        const LOCK = 1 << 1;
        const CONTROL = 1 << 2;
        const ALT = 1 << 3;
        const LOGO = 1 << 4;
    }
}

bitflags! {
    /// Keyboard LED state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Leds: u32 {
        const NUM = 1 << 0;
        const CAPS = 1 << 1;
        const SCROLL = 1 << 2;
    }
}

/// Key event action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyAction {
    #[default]
    Press,
    Release,
    /// Software auto-repeat of a held key
    Repeat,
}

/// Key event delivered to the key hook
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyEvent {
    /// evdev keycode
    pub keycode: u16,
    /// ASCII interpretation of the key on its base level, if any
    pub ascii: Option<char>,
    pub modifiers: Modifiers,
    /// Keysyms produced by the key (one per press on most keymaps)
    pub keysyms: Vec<u32>,
    /// Unicode codepoint per keysym (`INPUT_INVALID` if none)
    pub codepoints: Vec<u32>,
    pub action: KeyAction,
}

impl KeyEvent {
    /// Event record with room for `num_syms` keysyms (at least 1)
    pub fn with_capacity(num_syms: usize) -> Self {
        let num_syms = num_syms.max(1);
        Self {
            keysyms: Vec::with_capacity(num_syms),
            codepoints: Vec::with_capacity(num_syms),
            ..Self::default()
        }
    }

    /// First keysym, or 0 (NoSymbol)
    pub fn keysym(&self) -> u32 {
        self.keysyms.first().copied().unwrap_or(0)
    }
}

/// Keymap description parameters, passed through to the backend
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeymapParams {
    pub model: Option<String>,
    pub layout: Option<String>,
    pub variant: Option<String>,
    pub options: Option<String>,
    /// Locale for the compose table
    pub locale: Option<String>,
    /// Textual keymap overriding RMLVO
    pub keymap: Option<String>,
    /// Textual compose definitions overriding the locale's table
    pub compose_file: Option<String>,
}

impl KeymapParams {
    /// Collapse all-empty RMLVO names to "use the system defaults"
    pub fn normalize(mut self) -> Self {
        let rmlvo = [&self.model, &self.layout, &self.variant, &self.options];
        if rmlvo.iter().all(|s| s.as_deref() == Some("")) {
            self.model = None;
            self.layout = None;
            self.variant = None;
            self.options = None;
        }
        self
    }
}

/// What the device glue must do after `KeyboardDevice::process`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatChange {
    #[default]
    Unchanged,
    /// Start repeating the event just filled in
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyOutcome {
    /// Deliver the filled event to the key hook
    pub emit: bool,
    pub repeat: RepeatChange,
    /// New LED state to write to the device
    pub leds: Option<Leds>,
}

/// Manager-level keymap description (desc_init / desc_destroy)
pub trait KeyboardBackend {
    /// Per-device state for a new keyboard (dev_init).
    /// Dropping the returned state is dev_destroy.
    fn new_device(&self) -> Result<Box<dyn KeyboardDevice>>;
}

/// Per-device keyboard state
pub trait KeyboardDevice {
    /// The device fd was opened; returns the LED state to write
    fn wake_up(&mut self) -> Leds;

    /// The device fd is about to close; drop held-key state
    fn sleep(&mut self);

    /// Feed one EV_KEY record. `event` is the device's pre-allocated
    /// record and is only meaningful when the outcome says `emit`.
    fn process(&mut self, value: i32, code: u16, event: &mut KeyEvent) -> KeyOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_capacity() {
        let event = KeyEvent::with_capacity(0);
        assert!(event.keysyms.capacity() >= 1);
        assert!(event.codepoints.capacity() >= 1);
        assert_eq!(event.keysym(), 0);
    }

    #[test]
    fn test_normalize_empty_rmlvo() {
        let empty = Some(String::new());
        let params = KeymapParams {
            model: empty.clone(),
            layout: empty.clone(),
            variant: empty.clone(),
            options: empty,
            locale: Some("C".into()),
            ..Default::default()
        }
        .normalize();
        assert_eq!(params.layout, None);
        assert_eq!(params.locale.as_deref(), Some("C"));

        let partial = KeymapParams {
            model: Some(String::new()),
            layout: Some("us".into()),
            ..Default::default()
        }
        .normalize();
        assert_eq!(partial.model.as_deref(), Some(""));
        assert_eq!(partial.layout.as_deref(), Some("us"));
    }
}
