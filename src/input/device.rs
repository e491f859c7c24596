//! Input device
//!
//! One evdev node bound to a keyboard state and/or a pointer state.
//! The device owns its fd and the fd's event loop registration; the
//! manager owns the device and calls the hooks.

use log::{debug, warn};
use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::codes::*;
use super::evdev::{self, Capabilities, DeviceInterface, RawEvent, DEVICE_FLAGS, INPUT_EVENT_SIZE};
use super::keyboard::{KeyAction, KeyEvent, KeyboardDevice, Leds, RepeatChange};
use super::pointer::{PointerEvent, PointerMax, PointerState};
use crate::eloop::{EventLoop, FdSource, Readiness, Timer, TimerSpec};
use crate::error::{InputError, Result};

/// Records fetched per read()
pub const READ_BATCH: usize = 16;

/// Stable handle of a device inside its manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub(crate) u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of one read() on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Buffer was filled; more records may be pending
    More,
    /// Nothing more to read right now
    Drained,
    /// End of file (device unplugged)
    Eof,
    /// Read failed; the device is unusable
    Failed,
}

pub(crate) struct KeyboardState {
    pub(crate) dev: Box<dyn KeyboardDevice>,
    /// Pre-allocated current event; taken while the key hook runs
    pub(crate) event: Option<KeyEvent>,
    pub(crate) repeat_event: KeyEvent,
    pub(crate) repeat_timer: Timer,
}

/// What processing one record produced
#[derive(Default)]
pub(crate) struct Dispatch {
    pub(crate) key: Option<KeyEvent>,
    pub(crate) pointer: Vec<PointerEvent>,
    /// A pointer frame ended
    pub(crate) sync: bool,
}

pub struct InputDevice {
    pub(crate) id: DeviceId,
    node: PathBuf,
    caps: Capabilities,
    file: Option<File>,
    source: Option<FdSource>,
    pub(crate) keyboard: Option<KeyboardState>,
    pub(crate) pointer: PointerState,
}

impl InputDevice {
    pub(crate) fn new(
        id: DeviceId,
        node: PathBuf,
        caps: Capabilities,
        keyboard: Option<KeyboardState>,
        pointer: PointerState,
    ) -> Self {
        Self {
            id,
            node,
            caps,
            file: None,
            source: None,
            keyboard,
            pointer,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn node(&self) -> &Path {
        &self.node
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Open fd, or None while asleep
    pub fn fd(&self) -> Option<RawFd> {
        self.file.as_ref().map(|f| f.as_raw_fd())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Open the node and register it with the event loop
    pub(crate) fn open<F>(&mut self, iface: &dyn DeviceInterface, eloop: &EventLoop, on_ready: F) -> Result<()>
    where
        F: Fn(Readiness) + 'static,
    {
        if self.file.is_some() {
            return Ok(());
        }

        let fd = iface
            .open_restricted(&self.node, DEVICE_FLAGS)
            .map_err(|errno| InputError::device_io(&self.node, std::io::Error::from_raw_os_error(errno)))?;
        let file = File::from(fd);

        let source = match eloop.add_fd(file.as_raw_fd(), Readiness::READABLE, on_ready) {
            Ok(source) => source,
            Err(e) => {
                iface.close_restricted(OwnedFd::from(file));
                return Err(InputError::EventLoop(format!("{:#}", e)));
            }
        };
        self.file = Some(file);
        self.source = Some(source);

        if let Some(kb) = self.keyboard.as_mut() {
            let leds = kb.dev.wake_up();
            self.write_leds(leds);
        }

        debug!("opened device {} ({})", self.node.display(), self.id);
        Ok(())
    }

    /// Deregister and close the fd; the device object stays
    pub(crate) fn close(&mut self, iface: &dyn DeviceInterface) {
        if let Some(kb) = self.keyboard.as_mut() {
            kb.repeat_timer.update(None);
            kb.dev.sleep();
        }
        // Deregister before closing
        self.source.take();
        if let Some(file) = self.file.take() {
            iface.close_restricted(OwnedFd::from(file));
            debug!("closed device {} ({})", self.node.display(), self.id);
        }
    }

    fn write_leds(&self, leds: Leds) {
        if !self.caps.contains(Capabilities::LEDS) {
            return;
        }
        if let Some(file) = self.file.as_ref() {
            if let Err(e) = evdev::write_leds(file, leds) {
                warn!("cannot write LED state of {}: {}", self.node.display(), e);
            }
        }
    }

    /// One read() of up to `READ_BATCH` records
    pub(crate) fn read_batch(&self) -> (Vec<RawEvent>, ReadStatus) {
        let Some(mut file) = self.file.as_ref() else {
            return (Vec::new(), ReadStatus::Drained);
        };

        let mut buf = [0u8; INPUT_EVENT_SIZE * READ_BATCH];
        let len = loop {
            match file.read(&mut buf) {
                Ok(len) => break len,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return (Vec::new(), ReadStatus::Drained),
                Err(e) => {
                    warn!("reading from device {} failed: {}", self.node.display(), e);
                    return (Vec::new(), ReadStatus::Failed);
                }
            }
        };

        if len == 0 {
            debug!("EOF on device {}", self.node.display());
            return (Vec::new(), ReadStatus::Eof);
        }
        // Trailing partial record is dropped; keep reading
        let malformed = len % INPUT_EVENT_SIZE != 0;
        if malformed {
            warn!("invalid input_event frame on {} ({} bytes)", self.node.display(), len);
        }

        let records = buf[..len]
            .chunks_exact(INPUT_EVENT_SIZE)
            .filter_map(RawEvent::parse)
            .collect();
        let status = if len == buf.len() || malformed {
            ReadStatus::More
        } else {
            ReadStatus::Drained
        };
        (records, status)
    }

    /// Feed one record to the keyboard and pointer state
    pub(crate) fn process(
        &mut self,
        ev: RawEvent,
        max: PointerMax,
        now: Instant,
        repeat_delay: Duration,
        repeat_rate: Duration,
    ) -> Dispatch {
        let mut out = Dispatch::default();
        match ev.type_ {
            EV_KEY => {
                out.key = self.process_key(ev.value, ev.code, repeat_delay, repeat_rate);
                self.pointer.button(ev.code, ev.value, now, &mut out.pointer);
            }
            EV_REL => self.pointer.rel(ev.code, ev.value, max, &mut out.pointer),
            EV_ABS => self.pointer.abs(ev.code, ev.value, max, &mut out.pointer),
            EV_SYN => out.sync = self.pointer.sync(&mut out.pointer),
            _ => {}
        }
        out
    }

    fn process_key(
        &mut self,
        value: i32,
        code: u16,
        repeat_delay: Duration,
        repeat_rate: Duration,
    ) -> Option<KeyEvent> {
        let kb = self.keyboard.as_mut()?;
        let mut event = kb.event.take().unwrap_or_else(|| KeyEvent::with_capacity(1));
        let outcome = kb.dev.process(value, code, &mut event);

        match outcome.repeat {
            RepeatChange::Start if outcome.emit => {
                kb.repeat_event.clone_from(&event);
                kb.repeat_event.action = KeyAction::Repeat;
                kb.repeat_timer
                    .update(Some(TimerSpec::periodic(repeat_delay, repeat_rate)));
            }
            RepeatChange::Stop => kb.repeat_timer.update(None),
            _ => {}
        }

        let event = if outcome.emit {
            Some(event)
        } else {
            kb.event = Some(event);
            None
        };
        if let Some(leds) = outcome.leds {
            self.write_leds(leds);
        }
        event
    }

    /// Hand the current event back after the key hook ran
    pub(crate) fn restore_key_event(&mut self, event: KeyEvent) {
        if let Some(kb) = self.keyboard.as_mut() {
            kb.event = Some(event);
        }
    }

    /// Copy of the repeat event for one timer expiration
    pub(crate) fn repeat_event(&self) -> Option<KeyEvent> {
        self.keyboard.as_ref().map(|kb| kb.repeat_event.clone())
    }
}

impl fmt::Debug for InputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputDevice")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("caps", &self.caps)
            .field("fd", &self.fd())
            .field("pointer", &self.pointer.kind)
            .finish()
    }
}
