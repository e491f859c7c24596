//! evdev device access
//!
//! Opening and probing of /dev/input/eventN nodes and decoding of the
//! raw `input_event` records read from them.

use anyhow::Context;
use bitflags::bitflags;
use log::{debug, warn};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, OwnedFd};
use std::path::Path;

use super::codes::*;
use super::ioctl;
use super::keyboard::Leds;
use crate::error::{InputError, Result};

/// Size of one kernel `input_event` record
pub const INPUT_EVENT_SIZE: usize = std::mem::size_of::<libc::input_event>();

bitflags! {
    /// What an evdev node has to offer
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Capabilities: u32 {
        /// Any key of the classic keyboard block
        const KEYS = 1 << 0;
        /// REL_X and REL_Y
        const REL = 1 << 1;
        /// ABS_X and ABS_Y
        const ABS = 1 << 2;
        /// BTN_TOUCH
        const TOUCH = 1 << 3;
        /// BTN_LEFT
        const MOUSE_BTN = 1 << 4;
        /// REL_WHEEL
        const WHEEL = 1 << 5;
        const LEDS = 1 << 6;
    }
}

impl Capabilities {
    /// Relative mouse, touchpad or tablet
    pub fn is_pointer(self) -> bool {
        self.contains(Capabilities::REL | Capabilities::MOUSE_BTN)
            || self.contains(Capabilities::ABS | Capabilities::TOUCH)
            || self.contains(Capabilities::ABS | Capabilities::MOUSE_BTN)
    }
}

/// Calibrated range of the ABS_X / ABS_Y axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AbsCalibration {
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
}

/// Open flags for probing
pub const PROBE_FLAGS: i32 = libc::O_RDONLY | libc::O_NONBLOCK | libc::O_CLOEXEC;
/// Open flags for a device being read (read-write for LED updates)
pub const DEVICE_FLAGS: i32 = libc::O_RDWR | libc::O_NONBLOCK | libc::O_CLOEXEC;

/// Access to evdev nodes
///
/// `EvdevInterface` talks to the kernel. Session managers (seatd/logind)
/// or tests provide their own implementation.
pub trait DeviceInterface {
    /// Open `path`; errors are positive errno values
    fn open_restricted(&self, path: &Path, flags: i32) -> std::result::Result<OwnedFd, i32>;

    fn close_restricted(&self, fd: OwnedFd) {
        drop(fd);
    }

    /// Capabilities of `path`; any failure yields none
    fn probe(&self, path: &Path) -> Capabilities {
        let fd = match self.open_restricted(path, PROBE_FLAGS) {
            Ok(fd) => fd,
            Err(errno) => {
                debug!(
                    "cannot open {} for probing: {}",
                    path.display(),
                    std::io::Error::from_raw_os_error(errno)
                );
                return Capabilities::empty();
            }
        };
        let caps = match probe_capabilities(fd.as_raw_fd()) {
            Ok(caps) => caps,
            Err(e) => {
                warn!("cannot probe capabilities of device {}: {:#}", path.display(), e);
                Capabilities::empty()
            }
        };
        self.close_restricted(fd);
        caps
    }

    /// Read the ABS_X / ABS_Y calibration of `path`
    fn abs_calibration(&self, path: &Path) -> Result<AbsCalibration> {
        let fd = self
            .open_restricted(path, PROBE_FLAGS)
            .map_err(|errno| InputError::device_io(path, std::io::Error::from_raw_os_error(errno)))?;
        let raw = fd.as_raw_fd();
        let read = || -> anyhow::Result<AbsCalibration> {
            let x = ioctl::read_absinfo(raw, ABS_X).context("ABS_X")?;
            let y = ioctl::read_absinfo(raw, ABS_Y).context("ABS_Y")?;
            Ok(AbsCalibration {
                min_x: x.minimum,
                max_x: x.maximum,
                min_y: y.minimum,
                max_y: y.maximum,
            })
        };
        let result = read();
        self.close_restricted(fd);
        result.map_err(|e| {
            InputError::device_io(path, std::io::Error::new(std::io::ErrorKind::Other, format!("{:#}", e)))
        })
    }
}

/// DeviceInterface opening nodes directly
pub struct EvdevInterface;

impl DeviceInterface for EvdevInterface {
    fn open_restricted(&self, path: &Path, flags: i32) -> std::result::Result<OwnedFd, i32> {
        let f = OpenOptions::new()
            .read(true)
            .write((flags & libc::O_WRONLY != 0) || (flags & libc::O_RDWR != 0))
            .custom_flags(flags & !libc::O_WRONLY & !libc::O_RDWR & !libc::O_RDONLY)
            .open(path)
            .map_err(|e| {
                warn!("Cannot open device: {:?}: {}", path, e);
                e.raw_os_error().unwrap_or(libc::ENOENT)
            })?;
        Ok(OwnedFd::from(f))
    }
}

/// Probe the capabilities of an open evdev fd
pub fn probe_capabilities(fd: std::os::unix::io::RawFd) -> anyhow::Result<Capabilities> {
    let mut caps = Capabilities::empty();

    let evbits = ioctl::read_bits(fd, 0, EV_CNT).context("event types")?;

    if evbits.is_set(EV_KEY) {
        let keybits = ioctl::read_bits(fd, EV_KEY, KEY_CNT).context("key bits")?;
        // Any ordinary key will do, the keymap can map it to anything
        if keybits.any_in(KEY_RESERVED..=KEY_MIN_INTERESTING) {
            caps |= Capabilities::KEYS;
        }
        if keybits.is_set(BTN_LEFT) {
            caps |= Capabilities::MOUSE_BTN;
        }
        if keybits.is_set(BTN_TOUCH) {
            caps |= Capabilities::TOUCH;
        }
    }

    if evbits.is_set(EV_SYN) && evbits.is_set(EV_REL) {
        let relbits = ioctl::read_bits(fd, EV_REL, REL_CNT).context("rel bits")?;
        if relbits.is_set(REL_X) && relbits.is_set(REL_Y) {
            caps |= Capabilities::REL;
        }
        if relbits.is_set(REL_WHEEL) {
            caps |= Capabilities::WHEEL;
        }
    }

    if evbits.is_set(EV_SYN) && evbits.is_set(EV_ABS) {
        let absbits = ioctl::read_bits(fd, EV_ABS, ABS_CNT).context("abs bits")?;
        if absbits.is_set(ABS_X) && absbits.is_set(ABS_Y) {
            caps |= Capabilities::ABS;
        }
    }

    if evbits.is_set(EV_LED) {
        caps |= Capabilities::LEDS;
    }

    Ok(caps)
}

/// One decoded `input_event` (timestamp dropped)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub type_: u16,
    pub code: u16,
    pub value: i32,
}

impl RawEvent {
    pub fn new(type_: u16, code: u16, value: i32) -> Self {
        Self { type_, code, value }
    }

    /// Decode one record; None if `buf` is too short
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < INPUT_EVENT_SIZE {
            return None;
        }
        let ev: libc::input_event =
            unsafe { std::ptr::read_unaligned(buf.as_ptr() as *const libc::input_event) };
        Some(Self::new(ev.type_, ev.code, ev.value))
    }

    /// Encode as a kernel record with a zero timestamp
    pub fn to_bytes(self) -> [u8; INPUT_EVENT_SIZE] {
        let mut ev: libc::input_event = unsafe { std::mem::zeroed() };
        ev.type_ = self.type_;
        ev.code = self.code;
        ev.value = self.value;
        let mut out = [0u8; INPUT_EVENT_SIZE];
        unsafe {
            std::ptr::copy_nonoverlapping(
                &ev as *const libc::input_event as *const u8,
                out.as_mut_ptr(),
                INPUT_EVENT_SIZE,
            );
        }
        out
    }
}

/// Write the LED state to a keyboard
pub fn write_leds(file: &File, leds: Leds) -> std::io::Result<()> {
    let records = [
        RawEvent::new(EV_LED, LED_NUML, leds.contains(Leds::NUM) as i32),
        RawEvent::new(EV_LED, LED_CAPSL, leds.contains(Leds::CAPS) as i32),
        RawEvent::new(EV_LED, LED_SCROLLL, leds.contains(Leds::SCROLL) as i32),
        RawEvent::new(EV_SYN, SYN_REPORT, 0),
    ];
    let mut buf = Vec::with_capacity(records.len() * INPUT_EVENT_SIZE);
    for record in records {
        buf.extend_from_slice(&record.to_bytes());
    }
    let mut file = file;
    file.write_all(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_combinations() {
        assert!((Capabilities::REL | Capabilities::MOUSE_BTN).is_pointer());
        assert!((Capabilities::ABS | Capabilities::TOUCH).is_pointer());
        assert!((Capabilities::ABS | Capabilities::MOUSE_BTN).is_pointer());
        assert!(!Capabilities::REL.is_pointer());
        assert!(!(Capabilities::KEYS | Capabilities::LEDS).is_pointer());
        assert!(!(Capabilities::TOUCH | Capabilities::MOUSE_BTN).is_pointer());
    }

    #[test]
    fn test_record_codec() {
        let ev = RawEvent::new(EV_REL, REL_WHEEL, -1);
        let bytes = ev.to_bytes();
        assert_eq!(RawEvent::parse(&bytes), Some(ev));
        assert_eq!(RawEvent::parse(&bytes[..INPUT_EVENT_SIZE - 1]), None);
    }

    #[test]
    fn test_probe_missing_node() {
        let caps = EvdevInterface.probe(Path::new("/nonexistent/event99"));
        assert_eq!(caps, Capabilities::empty());
    }

    #[test]
    fn test_probe_non_evdev_node() {
        // ioctl fails on a regular device node
        let caps = EvdevInterface.probe(Path::new("/dev/null"));
        assert_eq!(caps, Capabilities::empty());
    }

    #[test]
    #[ignore]
    fn test_probe_real_devices() {
        // Requires read access to /dev/input
        for entry in std::fs::read_dir("/dev/input").unwrap() {
            let path = entry.unwrap().path();
            if path.file_name().and_then(|n| n.to_str()).map_or(false, |n| n.starts_with("event")) {
                eprintln!("{}: {:?}", path.display(), EvdevInterface.probe(&path));
            }
        }
    }
}
