//! Pointer state machine
//!
//! Per-device cursor kinematics for relative mice, absolute tablets
//! ("virtual mice") and touchpads, plus button decoding.
//!
//! Handlers append the resulting events to a caller-supplied buffer;
//! the device glue delivers them to the pointer hook once the device
//! is no longer borrowed.

use std::time::{Duration, Instant};

use super::codes::*;
use super::evdev::{AbsCalibration, Capabilities};

/// Two left presses closer than this form a double click
pub const DOUBLE_CLICK_TIMEOUT: Duration = Duration::from_millis(500);

/// Pointer inactivity before `HideTimeout` fires
pub const HIDE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointerKind {
    /// Not a pointer; emits nothing
    #[default]
    None,
    /// Relative mouse
    Mouse,
    /// Absolute device without touch (tablet, digitizer)
    VMouse,
    /// Absolute device with touch; motion is tracked relative to where
    /// the finger landed
    Touchpad,
}

impl PointerKind {
    /// Kind for a device with `caps`; relative axes win over absolute ones
    pub fn from_capabilities(caps: Capabilities) -> Self {
        if caps.contains(Capabilities::REL) {
            PointerKind::Mouse
        } else if caps.contains(Capabilities::ABS) {
            if caps.contains(Capabilities::TOUCH) {
                PointerKind::Touchpad
            } else {
                PointerKind::VMouse
            }
        } else {
            PointerKind::None
        }
    }
}

/// Logical pointer button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Left = 0,
    Right = 1,
    Middle = 2,
}

impl PointerButton {
    pub fn index(self) -> u8 {
        self as u8
    }
}

/// Event delivered to the pointer hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerEvent {
    /// Cursor position after motion
    Moved { x: i32, y: i32 },
    /// Wheel notches (REL_WHEEL value)
    Wheel { delta: i32 },
    /// `double_click` is only set on left presses
    Button {
        button: PointerButton,
        pressed: bool,
        double_click: bool,
    },
    /// End of a device frame
    Sync,
    /// No pointer frame for `HIDE_TIMEOUT`
    HideTimeout,
}

/// Cursor bounds (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PointerMax {
    pub x: i32,
    pub y: i32,
}

impl PointerMax {
    pub fn new(max_x: u32, max_y: u32) -> Self {
        Self {
            x: max_x.min(i32::MAX as u32) as i32,
            y: max_y.min(i32::MAX as u32) as i32,
        }
    }
}

/// One pointer
#[derive(Debug, Clone, Default)]
pub struct PointerState {
    pub kind: PointerKind,
    pub x: i32,
    pub y: i32,
    /// Touchpad drag offset (cursor = offset + finger position)
    pub off_x: i32,
    pub off_y: i32,
    /// Finger landed in the current frame
    pub touchpad_down: bool,
    pub calibration: AbsCalibration,
    pub last_click: Option<Instant>,
    pub pressed_button: Option<PointerButton>,
}

impl PointerState {
    pub fn new(kind: PointerKind, calibration: AbsCalibration) -> Self {
        Self {
            kind,
            calibration,
            ..Self::default()
        }
    }

    fn send_move(&mut self, max: PointerMax, out: &mut Vec<PointerEvent>) {
        // Bounds may have shrunk since the last motion on the other axis
        self.x = self.x.clamp(0, max.x.max(0));
        self.y = self.y.clamp(0, max.y.max(0));
        out.push(PointerEvent::Moved {
            x: self.x,
            y: self.y,
        });
    }

    fn send_button(
        &mut self,
        button: PointerButton,
        pressed: bool,
        double_click: bool,
        out: &mut Vec<PointerEvent>,
    ) {
        if pressed {
            self.pressed_button = Some(button);
        } else if self.pressed_button == Some(button) {
            self.pressed_button = None;
        }
        out.push(PointerEvent::Button {
            button,
            pressed,
            double_click,
        });
    }

    /// EV_REL
    pub fn rel(&mut self, code: u16, value: i32, max: PointerMax, out: &mut Vec<PointerEvent>) {
        if self.kind == PointerKind::None {
            return;
        }
        match code {
            REL_X => {
                self.x = self.x.saturating_add(value).clamp(0, max.x.max(0));
                self.send_move(max, out);
            }
            REL_Y => {
                self.y = self.y.saturating_add(value).clamp(0, max.y.max(0));
                self.send_move(max, out);
            }
            REL_WHEEL => out.push(PointerEvent::Wheel { delta: value }),
            _ => {}
        }
    }

    /// EV_ABS
    pub fn abs(&mut self, code: u16, value: i32, max: PointerMax, out: &mut Vec<PointerEvent>) {
        let cal = self.calibration;
        match (code, self.kind) {
            (ABS_X, PointerKind::Touchpad) => {
                let (pos, off) = drag(self.x, self.off_x, value, self.touchpad_down, max.x);
                self.x = pos;
                self.off_x = off;
            }
            (ABS_Y, PointerKind::Touchpad) => {
                let (pos, off) = drag(self.y, self.off_y, value, self.touchpad_down, max.y);
                self.y = pos;
                self.off_y = off;
            }
            (ABS_X, PointerKind::VMouse) => match rescale(value, cal.min_x, cal.max_x, max.x) {
                Some(x) => self.x = x,
                None => return,
            },
            (ABS_Y, PointerKind::VMouse) => match rescale(value, cal.min_y, cal.max_y, max.y) {
                Some(y) => self.y = y,
                None => return,
            },
            _ => return,
        }
        self.send_move(max, out);
    }

    /// EV_KEY: buttons and touch
    pub fn button(&mut self, code: u16, value: i32, now: Instant, out: &mut Vec<PointerEvent>) {
        if self.kind == PointerKind::None {
            return;
        }
        let pressed = value == KEY_PRESSED;
        match code {
            BTN_LEFT => {
                let mut double_click = false;
                if pressed {
                    double_click = self
                        .last_click
                        .map_or(false, |last| now.saturating_duration_since(last) < DOUBLE_CLICK_TIMEOUT);
                    self.last_click = Some(now);
                }
                self.send_button(PointerButton::Left, pressed, double_click, out);
            }
            BTN_RIGHT => self.send_button(PointerButton::Right, pressed, false, out),
            BTN_MIDDLE | BTN_TOOL_DOUBLETAP | BTN_TOOL_TRIPLETAP => {
                self.send_button(PointerButton::Middle, pressed, false, out)
            }
            BTN_TOUCH => self.touchpad_down = true,
            _ => {}
        }
    }

    /// EV_SYN. Returns whether a frame ended (the hide timer must be re-armed).
    pub fn sync(&mut self, out: &mut Vec<PointerEvent>) -> bool {
        if self.kind == PointerKind::None {
            return false;
        }
        out.push(PointerEvent::Sync);
        self.touchpad_down = false;
        true
    }
}

/// Touchpad axis update: (new position, new offset)
///
/// When the finger lands the offset is chosen so the cursor stays put.
/// Hitting an edge rebalances the offset so motion back away from the
/// edge takes effect immediately.
fn drag(pos: i32, off: i32, value: i32, down: bool, max: i32) -> (i32, i32) {
    let max = max.max(0);
    let mut off = if down { pos.saturating_sub(value) } else { off };
    let mut pos = off.saturating_add(value);
    if pos < 0 {
        pos = 0;
        off = value.saturating_neg();
    }
    if pos > max {
        pos = max;
        off = max.saturating_sub(value);
    }
    (pos, off)
}

/// Absolute axis rescale from the device range to [0, max]
fn rescale(value: i32, min: i32, dev_max: i32, max: i32) -> Option<i32> {
    let range = dev_max as i64 - min as i64;
    if range <= 0 {
        return None;
    }
    let scaled = (value as i64 - min as i64) * max as i64 / range;
    Some(scaled.clamp(0, max.max(0) as i64) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: PointerMax = PointerMax { x: 1000, y: 1000 };

    fn touchpad() -> PointerState {
        PointerState::new(
            PointerKind::Touchpad,
            AbsCalibration {
                min_x: 0,
                max_x: 2000,
                min_y: 0,
                max_y: 2000,
            },
        )
    }

    #[test]
    fn test_kind_from_capabilities() {
        assert_eq!(
            PointerKind::from_capabilities(Capabilities::REL | Capabilities::MOUSE_BTN),
            PointerKind::Mouse
        );
        assert_eq!(
            PointerKind::from_capabilities(Capabilities::ABS | Capabilities::TOUCH),
            PointerKind::Touchpad
        );
        assert_eq!(
            PointerKind::from_capabilities(Capabilities::ABS | Capabilities::MOUSE_BTN),
            PointerKind::VMouse
        );
        assert_eq!(
            PointerKind::from_capabilities(Capabilities::ABS | Capabilities::REL | Capabilities::TOUCH),
            PointerKind::Mouse
        );
        assert_eq!(PointerKind::from_capabilities(Capabilities::KEYS), PointerKind::None);
    }

    #[test]
    fn test_rel_clamps() {
        let mut p = PointerState::new(PointerKind::Mouse, AbsCalibration::default());
        let mut out = Vec::new();
        p.rel(REL_X, -50, MAX, &mut out);
        p.rel(REL_Y, 5000, MAX, &mut out);
        p.rel(REL_X, 30, MAX, &mut out);
        assert_eq!(
            out,
            vec![
                PointerEvent::Moved { x: 0, y: 0 },
                PointerEvent::Moved { x: 0, y: 1000 },
                PointerEvent::Moved { x: 30, y: 1000 },
            ]
        );
    }

    #[test]
    fn test_wheel_passthrough() {
        let mut p = PointerState::new(PointerKind::Mouse, AbsCalibration::default());
        let mut out = Vec::new();
        p.rel(REL_WHEEL, 1, MAX, &mut out);
        assert_eq!(out, vec![PointerEvent::Wheel { delta: 1 }]);
    }

    #[test]
    fn test_vmouse_linear_scale() {
        let mut p = PointerState::new(
            PointerKind::VMouse,
            AbsCalibration {
                min_x: 0,
                max_x: 2000,
                min_y: 0,
                max_y: 2000,
            },
        );
        let mut out = Vec::new();
        p.abs(ABS_X, 1000, MAX, &mut out);
        assert_eq!(out, vec![PointerEvent::Moved { x: 500, y: 0 }]);
    }

    #[test]
    fn test_vmouse_degenerate_calibration() {
        let mut p = PointerState::new(PointerKind::VMouse, AbsCalibration::default());
        let mut out = Vec::new();
        p.abs(ABS_X, 10, MAX, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_touchpad_drag_offset() {
        let mut p = touchpad();
        p.x = 500;
        let mut out = Vec::new();

        p.button(BTN_TOUCH, 1, Instant::now(), &mut out);
        assert!(out.is_empty());
        p.abs(ABS_X, 1200, MAX, &mut out);
        assert_eq!(p.off_x, -700);
        assert!(p.sync(&mut out));
        assert!(!p.touchpad_down);
        assert_eq!(out, vec![PointerEvent::Moved { x: 500, y: 0 }, PointerEvent::Sync]);

        out.clear();
        p.abs(ABS_X, 1250, MAX, &mut out);
        assert_eq!(out, vec![PointerEvent::Moved { x: 550, y: 0 }]);
    }

    #[test]
    fn test_touchpad_edge_rebalance() {
        let mut p = touchpad();
        p.x = 990;
        let mut out = Vec::new();
        p.button(BTN_TOUCH, 1, Instant::now(), &mut out);
        p.abs(ABS_X, 100, MAX, &mut out);
        p.sync(&mut out);

        // Overshoot the right edge by 40
        p.abs(ABS_X, 150, MAX, &mut out);
        assert_eq!(p.x, 1000);
        assert_eq!(p.off_x, 850);

        // Moving back leaves the edge at once
        p.abs(ABS_X, 140, MAX, &mut out);
        assert_eq!(p.x, 990);

        // Same on the left edge
        p.abs(ABS_X, -900, MAX, &mut out);
        assert_eq!(p.x, 0);
        assert_eq!(p.off_x, 900);
        p.abs(ABS_X, -890, MAX, &mut out);
        assert_eq!(p.x, 10);
    }

    #[test]
    fn test_double_click() {
        let mut p = PointerState::new(PointerKind::Mouse, AbsCalibration::default());
        let t0 = Instant::now();
        let mut out = Vec::new();
        p.button(BTN_LEFT, 1, t0, &mut out);
        p.button(BTN_LEFT, 0, t0 + Duration::from_millis(100), &mut out);
        p.button(BTN_LEFT, 1, t0 + Duration::from_millis(200), &mut out);
        // Third press is 600 ms after the second one
        p.button(BTN_LEFT, 1, t0 + Duration::from_millis(800), &mut out);

        let clicks: Vec<_> = out
            .iter()
            .map(|e| match e {
                PointerEvent::Button {
                    pressed,
                    double_click,
                    ..
                } => (*pressed, *double_click),
                _ => panic!("unexpected {:?}", e),
            })
            .collect();
        assert_eq!(clicks, vec![(true, false), (false, false), (true, true), (true, false)]);
    }

    #[test]
    fn test_button_mapping() {
        let mut p = PointerState::new(PointerKind::Mouse, AbsCalibration::default());
        let now = Instant::now();
        let mut out = Vec::new();
        p.button(BTN_RIGHT, 1, now, &mut out);
        assert_eq!(p.pressed_button, Some(PointerButton::Right));
        p.button(BTN_TOOL_DOUBLETAP, 1, now, &mut out);
        p.button(BTN_TOOL_TRIPLETAP, 0, now, &mut out);
        // Kernel autorepeat value counts as released
        p.button(BTN_MIDDLE, 2, now, &mut out);
        p.button(BTN_RIGHT, 0, now, &mut out);
        assert_eq!(p.pressed_button, None);

        let buttons: Vec<_> = out
            .iter()
            .map(|e| match e {
                PointerEvent::Button { button, pressed, .. } => (button.index(), *pressed),
                _ => panic!("unexpected {:?}", e),
            })
            .collect();
        assert_eq!(buttons, vec![(1, true), (2, true), (2, false), (2, false), (1, false)]);
    }

    #[test]
    fn test_kind_none_is_silent() {
        let mut p = PointerState::default();
        let mut out = Vec::new();
        p.rel(REL_X, 5, MAX, &mut out);
        p.abs(ABS_X, 5, MAX, &mut out);
        p.button(BTN_LEFT, 1, Instant::now(), &mut out);
        assert!(!p.sync(&mut out));
        assert!(out.is_empty());
    }

    #[test]
    fn test_shrunk_bounds_clamp_both_axes() {
        let mut p = PointerState::new(PointerKind::Mouse, AbsCalibration::default());
        p.x = 900;
        let mut out = Vec::new();
        p.rel(REL_Y, 10, PointerMax::new(640, 480), &mut out);
        assert_eq!(out, vec![PointerEvent::Moved { x: 640, y: 10 }]);
    }
}
