//! xkbcommon keyboard backend
//!
//! Keymap from RMLVO names or a textual keymap, optional compose table
//! from a compose buffer or the user's locale, and LED tracking.

use log::{debug, info, warn};
use std::ffi::OsStr;
use xkbcommon::xkb;

use super::codes::*;
use super::keyboard::{
    KeyAction, KeyEvent, KeyOutcome, KeyboardBackend, KeyboardDevice, KeymapParams, Leds,
    Modifiers, RepeatChange, INPUT_INVALID,
};
use crate::error::{InputError, Result};

/// evdev keycode -> xkb keycode
fn xkb_keycode(code: u16) -> xkb::Keycode {
    xkb::Keycode::new(code as u32 + 8)
}

/// Locale for the compose table: explicit, then the usual environment
/// variables, then "C"
fn compose_locale(explicit: Option<&str>) -> String {
    if let Some(locale) = explicit.filter(|l| !l.is_empty()) {
        return locale.to_string();
    }
    for var in ["LC_ALL", "LC_CTYPE", "LANG"] {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                return value;
            }
        }
    }
    "C".to_string()
}

/// Manager-level keymap description
pub struct XkbBackend {
    keymap: xkb::Keymap,
    compose: Option<xkb::compose::Table>,
}

impl XkbBackend {
    pub fn new(params: &KeymapParams) -> Result<Self> {
        let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);

        let mut keymap = None;
        if let Some(text) = params.keymap.as_deref().filter(|t| !t.is_empty()) {
            keymap = xkb::Keymap::new_from_string(
                &context,
                text.to_string(),
                xkb::KEYMAP_FORMAT_TEXT_V1,
                xkb::COMPILE_NO_FLAGS,
            );
            if keymap.is_none() {
                warn!("failed to parse keymap, reverting to default");
            }
        }

        let keymap = match keymap {
            Some(keymap) => keymap,
            None => {
                let model = params.model.as_deref().unwrap_or("");
                let layout = params.layout.as_deref().unwrap_or("");
                let variant = params.variant.as_deref().unwrap_or("");
                let options = params.options.clone().filter(|o| !o.is_empty());
                let options_for_error = options.clone();

                xkb::Keymap::new_from_names(
                    &context,
                    "",
                    model,
                    layout,
                    variant,
                    options,
                    xkb::COMPILE_NO_FLAGS,
                )
                .ok_or_else(|| {
                    InputError::Keymap(format!(
                        "failed to create xkb keymap (model={}, layout={}, variant={}, options={:?})",
                        model, layout, variant, options_for_error
                    ))
                })?
            }
        };

        let locale = compose_locale(params.locale.as_deref());
        let compose = match params.compose_file.as_deref().filter(|c| !c.is_empty()) {
            Some(buffer) => xkb::compose::Table::new_from_buffer(
                &context,
                buffer.as_bytes(),
                &locale,
                xkb::compose::FORMAT_TEXT_V1,
                xkb::compose::COMPILE_NO_FLAGS,
            ),
            None => xkb::compose::Table::new_from_locale(
                &context,
                OsStr::new(&locale),
                xkb::compose::COMPILE_NO_FLAGS,
            ),
        };
        let compose = match compose {
            Ok(table) => Some(table),
            Err(()) => {
                warn!("cannot create compose table for locale {}, composing disabled", locale);
                None
            }
        };

        info!(
            "xkb keymap ready (layout={}, compose={})",
            params.layout.as_deref().filter(|l| !l.is_empty()).unwrap_or("default"),
            if compose.is_some() { locale.as_str() } else { "off" }
        );

        Ok(Self { keymap, compose })
    }
}

impl KeyboardBackend for XkbBackend {
    fn new_device(&self) -> Result<Box<dyn KeyboardDevice>> {
        Ok(Box::new(XkbDevice {
            keymap: self.keymap.clone(),
            state: xkb::State::new(&self.keymap),
            compose: self
                .compose
                .as_ref()
                .map(|table| xkb::compose::State::new(table, xkb::compose::STATE_NO_FLAGS)),
            leds: Leds::empty(),
            repeat_code: None,
        }))
    }
}

/// Per-device xkb state
pub struct XkbDevice {
    keymap: xkb::Keymap,
    state: xkb::State,
    compose: Option<xkb::compose::State>,
    leds: Leds,
    /// Key currently auto-repeating
    repeat_code: Option<u16>,
}

impl XkbDevice {
    fn modifiers(&self) -> Modifiers {
        let mut mods = Modifiers::empty();
        let active = |name: &str| self.state.mod_name_is_active(name, xkb::STATE_MODS_EFFECTIVE);
        if active(xkb::MOD_NAME_SHIFT) {
            mods |= Modifiers::SHIFT;
        }
        if active(xkb::MOD_NAME_CAPS) {
            mods |= Modifiers::LOCK;
        }
        if active(xkb::MOD_NAME_CTRL) {
            mods |= Modifiers::CONTROL;
        }
        if active(xkb::MOD_NAME_ALT) {
            mods |= Modifiers::ALT;
        }
        if active(xkb::MOD_NAME_LOGO) {
            mods |= Modifiers::LOGO;
        }
        mods
    }

    fn current_leds(&self) -> Leds {
        let mut leds = Leds::empty();
        if self.state.led_name_is_active(xkb::LED_NAME_NUM) {
            leds |= Leds::NUM;
        }
        if self.state.led_name_is_active(xkb::LED_NAME_CAPS) {
            leds |= Leds::CAPS;
        }
        if self.state.led_name_is_active(xkb::LED_NAME_SCROLL) {
            leds |= Leds::SCROLL;
        }
        leds
    }

    /// First ASCII keysym on the base level of any layout
    fn ascii(&self, kc: xkb::Keycode) -> Option<char> {
        let layouts = self.keymap.num_layouts_for_key(kc);
        (0..layouts)
            .flat_map(|layout| self.keymap.key_get_syms_by_level(kc, layout, 0).iter())
            .find_map(|sym| {
                let cp = xkb::keysym_to_utf32(*sym);
                char::from_u32(cp).filter(|c| *c != '\0' && c.is_ascii())
            })
    }

    /// Feed the first keysym of a press to the compose state.
    /// Returns the keysyms to report, or None to swallow the press.
    fn compose(&mut self, first: xkb::Keysym) -> Option<Option<xkb::Keysym>> {
        let Some(compose) = self.compose.as_mut() else {
            return Some(None);
        };
        compose.feed(first);
        match compose.status() {
            xkb::compose::Status::Composing => None,
            xkb::compose::Status::Cancelled => {
                compose.reset();
                None
            }
            xkb::compose::Status::Composed => {
                let sym = compose.keysym();
                compose.reset();
                Some(sym)
            }
            xkb::compose::Status::Nothing => Some(None),
        }
    }
}

fn fill_event(event: &mut KeyEvent, code: u16, syms: &[xkb::Keysym]) {
    event.keycode = code;
    event.keysyms.clear();
    event.codepoints.clear();
    for sym in syms {
        event.keysyms.push(sym.raw());
        let cp = xkb::keysym_to_utf32(*sym);
        event.codepoints.push(if cp == 0 { INPUT_INVALID } else { cp });
    }
}

impl KeyboardDevice for XkbDevice {
    fn wake_up(&mut self) -> Leds {
        self.leds
    }

    fn sleep(&mut self) {
        // Keys held while asleep would stay down forever
        self.state = xkb::State::new(&self.keymap);
        if let Some(compose) = self.compose.as_mut() {
            compose.reset();
        }
        self.repeat_code = None;
    }

    fn process(&mut self, value: i32, code: u16, event: &mut KeyEvent) -> KeyOutcome {
        let mut outcome = KeyOutcome::default();

        // Auto-repeat is done in software
        let action = match value {
            KEY_PRESSED => KeyAction::Press,
            KEY_RELEASED => KeyAction::Release,
            _ => return outcome,
        };

        let kc = xkb_keycode(code);
        let syms: Vec<xkb::Keysym> = self.state.key_get_syms(kc).to_vec();
        let direction = match action {
            KeyAction::Press => xkb::KeyDirection::Down,
            _ => xkb::KeyDirection::Up,
        };
        self.state.update_key(kc, direction);

        let leds = self.current_leds();
        if leds != self.leds {
            self.leds = leds;
            outcome.leds = Some(leds);
        }

        if action == KeyAction::Release && self.repeat_code == Some(code) {
            self.repeat_code = None;
            outcome.repeat = RepeatChange::Stop;
        }

        let Some(&first) = syms.first() else {
            return outcome;
        };

        if action == KeyAction::Press {
            match self.compose(first) {
                None => return outcome,
                Some(Some(composed)) => fill_event(event, code, &[composed]),
                Some(None) => fill_event(event, code, &syms),
            }
        } else {
            fill_event(event, code, &syms);
        }

        event.ascii = self.ascii(kc);
        event.modifiers = self.modifiers();
        event.action = action;
        outcome.emit = true;

        if action == KeyAction::Press && self.keymap.key_repeats(kc) {
            debug!("key {} starts repeating", code);
            self.repeat_code = Some(code);
            outcome.repeat = RepeatChange::Start;
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_1: u16 = 2;
    const KEY_2: u16 = 3;

    const TEST_KEYMAP: &str = r#"
xkb_keymap {
    xkb_keycodes "test" {
        minimum = 8;
        maximum = 255;
        <ESC> = 9;
        <AE01> = 10;
        <AE02> = 11;
        <AC01> = 38;
        <LFSH> = 50;
        <CAPS> = 66;
        indicator 1 = "Caps Lock";
    };
    xkb_types "test" {
        type "ONE_LEVEL" {
            modifiers = none;
            level_name[Level1] = "Any";
        };
        type "TWO_LEVEL" {
            modifiers = Shift;
            map[Shift] = Level2;
            level_name[Level1] = "Base";
            level_name[Level2] = "Shift";
        };
        type "ALPHABETIC" {
            modifiers = Shift+Lock;
            map[Shift] = Level2;
            map[Lock] = Level2;
            level_name[Level1] = "Base";
            level_name[Level2] = "Caps";
        };
    };
    xkb_compatibility "test" {
        interpret Shift_L {
            repeat = False;
            action = SetMods(modifiers=Shift);
        };
        interpret Caps_Lock {
            repeat = False;
            action = LockMods(modifiers=Lock);
        };
        indicator "Caps Lock" {
            whichModState = Locked;
            modifiers = Lock;
        };
    };
    xkb_symbols "test" {
        key <ESC> { [ Escape ] };
        key <AE01> { [ 1, exclam ] };
        key <AE02> { [ dead_acute ] };
        key <AC01> { type = "ALPHABETIC", [ a, A ] };
        key <LFSH> { [ Shift_L ] };
        key <CAPS> { [ Caps_Lock ] };
        modifier_map Shift { <LFSH> };
        modifier_map Lock { <CAPS> };
    };
};
"#;

    const TEST_COMPOSE: &str = "<dead_acute> <a> : \"\u{e1}\" aacute\n";

    fn backend() -> XkbBackend {
        XkbBackend::new(&KeymapParams {
            keymap: Some(TEST_KEYMAP.to_string()),
            compose_file: Some(TEST_COMPOSE.to_string()),
            locale: Some("C".to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    fn press(dev: &mut dyn KeyboardDevice, code: u16) -> (KeyOutcome, KeyEvent) {
        let mut event = KeyEvent::with_capacity(1);
        let outcome = dev.process(KEY_PRESSED, code, &mut event);
        (outcome, event)
    }

    #[test]
    fn test_compose_locale_explicit() {
        assert_eq!(compose_locale(Some("ja_JP.UTF-8")), "ja_JP.UTF-8");
    }

    #[test]
    fn test_press_fills_event() {
        let backend = backend();
        let mut dev = backend.new_device().unwrap();

        let (outcome, event) = press(dev.as_mut(), KEY_A);
        assert!(outcome.emit);
        assert_eq!(outcome.repeat, RepeatChange::Start);
        assert_eq!(event.keycode, KEY_A);
        assert_eq!(event.keysyms, vec![0x61]);
        assert_eq!(event.codepoints, vec!['a' as u32]);
        assert_eq!(event.ascii, Some('a'));
        assert_eq!(event.action, KeyAction::Press);
    }

    #[test]
    fn test_shift_level_keeps_base_ascii() {
        let backend = backend();
        let mut dev = backend.new_device().unwrap();

        let (shift, _) = press(dev.as_mut(), KEY_LEFTSHIFT);
        assert!(shift.emit);
        assert_eq!(shift.repeat, RepeatChange::Unchanged);

        let (_, event) = press(dev.as_mut(), KEY_1);
        assert_eq!(event.codepoints, vec!['!' as u32]);
        assert_eq!(event.ascii, Some('1'));
        assert!(event.modifiers.contains(Modifiers::SHIFT));
    }

    #[test]
    fn test_kernel_repeat_ignored() {
        let backend = backend();
        let mut dev = backend.new_device().unwrap();
        let mut event = KeyEvent::with_capacity(1);
        let outcome = dev.process(KEY_REPEATED, KEY_A, &mut event);
        assert_eq!(outcome, KeyOutcome::default());
    }

    #[test]
    fn test_release_stops_repeat() {
        let backend = backend();
        let mut dev = backend.new_device().unwrap();
        press(dev.as_mut(), KEY_A);

        // Releasing another key leaves the repeat alone
        let mut event = KeyEvent::with_capacity(1);
        let other = dev.process(KEY_RELEASED, KEY_ESC, &mut event);
        assert_eq!(other.repeat, RepeatChange::Unchanged);

        let outcome = dev.process(KEY_RELEASED, KEY_A, &mut event);
        assert_eq!(outcome.repeat, RepeatChange::Stop);
        assert!(outcome.emit);
        assert_eq!(event.action, KeyAction::Release);
    }

    #[test]
    fn test_caps_lock_led() {
        let backend = backend();
        let mut dev = backend.new_device().unwrap();
        assert_eq!(dev.wake_up(), Leds::empty());

        let (outcome, _) = press(dev.as_mut(), KEY_CAPSLOCK);
        assert_eq!(outcome.leds, Some(Leds::CAPS));
        let mut event = KeyEvent::with_capacity(1);
        let released = dev.process(KEY_RELEASED, KEY_CAPSLOCK, &mut event);
        assert_eq!(released.leds, None);
        assert_eq!(dev.wake_up(), Leds::CAPS);

        let (_, event) = press(dev.as_mut(), KEY_A);
        assert_eq!(event.codepoints, vec!['A' as u32]);
        assert!(event.modifiers.contains(Modifiers::LOCK));
    }

    #[test]
    fn test_compose_sequence() {
        let backend = backend();
        let mut dev = backend.new_device().unwrap();

        let (dead, _) = press(dev.as_mut(), KEY_2);
        assert!(!dead.emit);
        assert_eq!(dead.repeat, RepeatChange::Unchanged);

        let (outcome, event) = press(dev.as_mut(), KEY_A);
        assert!(outcome.emit);
        assert_eq!(event.codepoints, vec![0xe1]);
    }

    #[test]
    fn test_sleep_drops_held_keys() {
        let backend = backend();
        let mut dev = backend.new_device().unwrap();
        press(dev.as_mut(), KEY_LEFTSHIFT);
        dev.sleep();

        let (_, event) = press(dev.as_mut(), KEY_A);
        assert_eq!(event.codepoints, vec!['a' as u32]);
        assert!(!event.modifiers.contains(Modifiers::SHIFT));
    }

    #[test]
    fn test_unknown_key_emits_nothing() {
        let backend = backend();
        let mut dev = backend.new_device().unwrap();
        let (outcome, _) = press(dev.as_mut(), 200);
        assert!(!outcome.emit);
    }

    #[test]
    #[ignore]
    fn test_system_keymap() {
        // Requires xkeyboard-config
        let backend = XkbBackend::new(&KeymapParams {
            layout: Some("us".into()),
            ..Default::default()
        })
        .unwrap();
        let mut dev = backend.new_device().unwrap();
        let (_, event) = press(dev.as_mut(), KEY_A);
        assert_eq!(event.ascii, Some('a'));
    }
}
