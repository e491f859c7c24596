//! evdev event codes
//!
//! Linux input event codes used by the input core.
//! Values from <linux/input-event-codes.h>.

#![allow(dead_code)]

// ============================================================================
// Event Types
// ============================================================================

pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;
pub const EV_ABS: u16 = 0x03;
pub const EV_MSC: u16 = 0x04;
pub const EV_LED: u16 = 0x11;
pub const EV_REP: u16 = 0x14;
pub const EV_MAX: u16 = 0x1f;
pub const EV_CNT: usize = EV_MAX as usize + 1;

// ============================================================================
// Synchronization
// ============================================================================

pub const SYN_REPORT: u16 = 0;

// ============================================================================
// Keys and Buttons
// ============================================================================

pub const KEY_RESERVED: u16 = 0;
pub const KEY_ESC: u16 = 1;
pub const KEY_A: u16 = 30;
pub const KEY_LEFTSHIFT: u16 = 42;
pub const KEY_CAPSLOCK: u16 = 58;
pub const KEY_NUMLOCK: u16 = 69;
pub const KEY_SCROLLLOCK: u16 = 70;

/// Last code of the classic keyboard block (KEY_MUTE).
/// A device reporting any key in `KEY_RESERVED..=KEY_MIN_INTERESTING`
/// is treated as a keyboard.
pub const KEY_MIN_INTERESTING: u16 = 113;

pub const KEY_MAX: u16 = 0x2ff;
pub const KEY_CNT: usize = KEY_MAX as usize + 1;

pub const BTN_LEFT: u16 = 0x110;
pub const BTN_RIGHT: u16 = 0x111;
pub const BTN_MIDDLE: u16 = 0x112;
pub const BTN_TOUCH: u16 = 0x14a;
pub const BTN_TOOL_DOUBLETAP: u16 = 0x14d;
pub const BTN_TOOL_TRIPLETAP: u16 = 0x14e;

// ============================================================================
// Relative Axes
// ============================================================================

pub const REL_X: u16 = 0x00;
pub const REL_Y: u16 = 0x01;
pub const REL_WHEEL: u16 = 0x08;
pub const REL_MAX: u16 = 0x0f;
pub const REL_CNT: usize = REL_MAX as usize + 1;

// ============================================================================
// Absolute Axes
// ============================================================================

pub const ABS_X: u16 = 0x00;
pub const ABS_Y: u16 = 0x01;
pub const ABS_MAX: u16 = 0x3f;
pub const ABS_CNT: usize = ABS_MAX as usize + 1;

// ============================================================================
// LEDs
// ============================================================================

pub const LED_NUML: u16 = 0x00;
pub const LED_CAPSL: u16 = 0x01;
pub const LED_SCROLLL: u16 = 0x02;

// ============================================================================
// Key values
// ============================================================================

pub const KEY_RELEASED: i32 = 0;
pub const KEY_PRESSED: i32 = 1;
/// Kernel autorepeat
pub const KEY_REPEATED: i32 = 2;
