//! Input handling
//!
//! evdev devices feeding keyboard and pointer events to observers.
//! - `manager`: device collection, awake/sleep, hooks
//! - `device` + `pointer`: per-device read loop and pointer state machine
//! - `keyboard` + `xkb`: keyboard adapter contract and its xkbcommon backend
//! - `hotplug`: udev monitor (Linux only)

pub mod codes;
pub mod device;
pub mod evdev;
pub mod hook;
#[cfg(target_os = "linux")]
pub mod hotplug;
pub mod ioctl;
pub mod keyboard;
pub mod manager;
pub mod pointer;
pub mod xkb;

pub use device::DeviceId;
pub use evdev::{AbsCalibration, Capabilities, DeviceInterface, EvdevInterface, RawEvent};
#[cfg(target_os = "linux")]
pub use hotplug::InputHotplug;
pub use keyboard::{
    KeyAction, KeyEvent, KeyOutcome, KeyboardBackend, KeyboardDevice, KeymapParams, Leds,
    Modifiers, RepeatChange, INPUT_INVALID,
};
pub use manager::{InputManager, KeyCallback, PointerCallback, WeakInputManager};
pub use pointer::{PointerButton, PointerEvent, PointerKind};
pub use xkb::XkbBackend;
