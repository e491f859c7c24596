//! Input manager
//!
//! Owns every input device, the keymap description and the key/pointer
//! hooks. Devices are opened while the manager is awake and closed
//! while it sleeps; `sleep()` and `wake_up()` nest.
//!
//! `InputManager` is a cheap handle: cloning takes a reference, dropping
//! the last clone frees the devices, then the keymap, then the hooks.

use log::{debug, info, warn};
use std::cell::{Cell, RefCell};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use std::time::Duration;

use super::device::{DeviceId, InputDevice, KeyboardState, ReadStatus};
use super::evdev::{AbsCalibration, Capabilities, DeviceInterface, EvdevInterface, RawEvent};
use super::hook::Hook;
use super::keyboard::{KeyEvent, KeyboardBackend, KeymapParams};
use super::pointer::{PointerEvent, PointerKind, PointerMax, PointerState, HIDE_TIMEOUT};
use super::xkb::XkbBackend;
use crate::eloop::{EventLoop, Readiness, Timer, TimerSpec};
use crate::error::{InputError, Result};

/// Default delay before a held key starts repeating (ms)
pub const DEFAULT_REPEAT_DELAY: u32 = 250;
/// Default interval between repeats (ms)
pub const DEFAULT_REPEAT_RATE: u32 = 50;

pub type KeyCallback = Rc<dyn Fn(&InputManager, &KeyEvent)>;
pub type PointerCallback = Rc<dyn Fn(&InputManager, &PointerEvent)>;

/// 0 selects the default, anything from one second up is cut to 999 ms
fn clamp_repeat(value: u32, default: u32) -> u32 {
    match value {
        0 => default,
        v if v >= 1000 => 999,
        v => v,
    }
}

struct Inner {
    eloop: EventLoop,
    interface: Box<dyn DeviceInterface>,
    keyboard: RefCell<Option<Box<dyn KeyboardBackend>>>,
    devices: RefCell<Vec<InputDevice>>,
    next_id: Cell<u64>,
    awake: Cell<u32>,
    key_hook: Hook<InputManager, KeyEvent>,
    pointer_hook: Hook<InputManager, PointerEvent>,
    hide_timer: Timer,
    pointer_max: Cell<PointerMax>,
    repeat_delay: Duration,
    repeat_rate: Duration,
}

#[derive(Clone)]
pub struct InputManager {
    inner: Rc<Inner>,
}

/// Non-owning manager handle
#[derive(Clone)]
pub struct WeakInputManager {
    inner: Weak<Inner>,
}

impl WeakInputManager {
    pub fn upgrade(&self) -> Option<InputManager> {
        self.inner.upgrade().map(|inner| InputManager { inner })
    }
}

impl InputManager {
    /// Manager with an xkbcommon keymap reading evdev nodes directly.
    ///
    /// `repeat_delay` / `repeat_rate` are in milliseconds.
    pub fn new(
        eloop: &EventLoop,
        params: KeymapParams,
        repeat_delay: u32,
        repeat_rate: u32,
    ) -> Result<Self> {
        let params = params.normalize();
        validate(&params)?;
        let backend = XkbBackend::new(&params).map_err(|e| {
            warn!("cannot create keymap: {}", e);
            e
        })?;
        Ok(Self::with_backends(
            eloop,
            Box::new(EvdevInterface),
            Box::new(backend),
            repeat_delay,
            repeat_rate,
        ))
    }

    /// Manager with caller-provided device access and keyboard backend
    pub fn with_backends(
        eloop: &EventLoop,
        interface: Box<dyn DeviceInterface>,
        keyboard: Box<dyn KeyboardBackend>,
        repeat_delay: u32,
        repeat_rate: u32,
    ) -> Self {
        let repeat_delay = clamp_repeat(repeat_delay, DEFAULT_REPEAT_DELAY);
        let repeat_rate = clamp_repeat(repeat_rate, DEFAULT_REPEAT_RATE);

        let inner = Rc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let hide_timer = eloop.add_timer(move |_| {
                if let Some(inner) = weak.upgrade() {
                    let manager = InputManager { inner };
                    manager.inner.pointer_hook.call(&manager, &PointerEvent::HideTimeout);
                }
            });
            Inner {
                eloop: eloop.clone(),
                interface,
                keyboard: RefCell::new(Some(keyboard)),
                devices: RefCell::new(Vec::new()),
                next_id: Cell::new(1),
                awake: Cell::new(0),
                key_hook: Hook::new(),
                pointer_hook: Hook::new(),
                hide_timer,
                pointer_max: Cell::new(PointerMax::default()),
                repeat_delay: Duration::from_millis(repeat_delay as u64),
                repeat_rate: Duration::from_millis(repeat_rate as u64),
            }
        });

        debug!(
            "input manager created (repeat_delay={}ms, repeat_rate={}ms)",
            repeat_delay, repeat_rate
        );
        Self { inner }
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.eloop
    }

    pub fn downgrade(&self) -> WeakInputManager {
        WeakInputManager {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Probe `node` and adopt it if it is a keyboard, or a pointer while
    /// `allow_mouse` is set. Failures only drop the device.
    pub fn add_dev(&self, node: impl AsRef<Path>, allow_mouse: bool) {
        let node = node.as_ref();
        let caps = self.inner.interface.probe(node);
        let has_keys = caps.contains(Capabilities::KEYS);
        let is_pointer = caps.is_pointer();

        if !has_keys && !(allow_mouse && is_pointer) {
            debug!("ignoring non-keyboard device {} ({:?})", node.display(), caps);
            return;
        }

        // An adopted keyboard keeps whatever pointer axes it also has
        let kind = PointerKind::from_capabilities(caps);

        let mut calibration = AbsCalibration::default();
        if matches!(kind, PointerKind::VMouse | PointerKind::Touchpad) {
            match self.inner.interface.abs_calibration(node) {
                Ok(cal) => calibration = cal,
                Err(e) => warn!("cannot read absolute axis range of {}: {}", node.display(), e),
            }
        }

        let id = DeviceId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);

        let keyboard = if has_keys {
            match self.new_keyboard_state(id) {
                Ok(kb) => Some(kb),
                Err(e) => {
                    warn!("cannot create keyboard state for {}: {}", node.display(), e);
                    return;
                }
            }
        } else {
            None
        };

        let mut dev = InputDevice::new(
            id,
            node.to_path_buf(),
            caps,
            keyboard,
            PointerState::new(kind, calibration),
        );

        if self.is_awake() {
            if let Err(e) = self.open_device(&mut dev) {
                warn!("cannot open device {}: {}", node.display(), e);
                return;
            }
        }

        info!("new input device {} ({:?}, pointer {:?})", node.display(), caps, kind);
        self.inner.devices.borrow_mut().push(dev);
    }

    /// Free the first device opened from `node`, if any
    pub fn remove_dev(&self, node: impl AsRef<Path>) {
        let node = node.as_ref();
        let id = self
            .inner
            .devices
            .borrow()
            .iter()
            .find(|d| d.node() == node)
            .map(|d| d.id);
        if let Some(id) = id {
            self.free_device(id);
        }
    }

    pub fn register_key_cb(&self, cb: KeyCallback) {
        self.inner.key_hook.add(cb);
    }

    pub fn unregister_key_cb(&self, cb: &KeyCallback) {
        self.inner.key_hook.remove(cb);
    }

    pub fn register_pointer_cb(&self, cb: PointerCallback) {
        self.inner.pointer_hook.add(cb);
    }

    pub fn unregister_pointer_cb(&self, cb: &PointerCallback) {
        self.inner.pointer_hook.remove(cb);
    }

    /// Leave one awake level; the last one closes every device fd
    pub fn sleep(&self) {
        let awake = self.inner.awake.get();
        if awake == 0 {
            debug!("input: sleep() while asleep");
            return;
        }
        self.inner.awake.set(awake - 1);
        if awake > 1 {
            return;
        }

        debug!("going to sleep");
        let iface = &*self.inner.interface;
        for dev in self.inner.devices.borrow_mut().iter_mut() {
            dev.close(iface);
        }
    }

    /// Enter one awake level; the first one re-opens every device.
    /// Devices that fail to open are freed.
    pub fn wake_up(&self) {
        let awake = self.inner.awake.get();
        self.inner.awake.set(awake.saturating_add(1));
        if awake > 0 {
            return;
        }

        debug!("waking up");
        let ids: Vec<DeviceId> = self.inner.devices.borrow().iter().map(|d| d.id).collect();
        for id in ids {
            let result = {
                let mut devices = self.inner.devices.borrow_mut();
                match devices.iter_mut().find(|d| d.id == id) {
                    Some(dev) => self.open_device(dev).map_err(|e| (dev.node().to_path_buf(), e)),
                    None => continue,
                }
            };
            if let Err((node, e)) = result {
                warn!("cannot wake up device {}: {}", node.display(), e);
                self.free_device(id);
            }
        }
    }

    pub fn is_awake(&self) -> bool {
        self.inner.awake.get() > 0
    }

    /// Cursor bounds for every pointer (inclusive)
    pub fn set_pointer_max(&self, max_x: u32, max_y: u32) {
        self.inner.pointer_max.set(PointerMax::new(max_x, max_y));
    }

    pub fn pointer_max(&self) -> (u32, u32) {
        let max = self.inner.pointer_max.get();
        (max.x as u32, max.y as u32)
    }

    pub fn device_count(&self) -> usize {
        self.inner.devices.borrow().len()
    }

    /// Nodes of all devices in list order
    pub fn devices(&self) -> Vec<PathBuf> {
        self.inner
            .devices
            .borrow()
            .iter()
            .map(|d| d.node().to_path_buf())
            .collect()
    }

    pub fn has_device(&self, node: impl AsRef<Path>) -> bool {
        let node = node.as_ref();
        self.inner.devices.borrow().iter().any(|d| d.node() == node)
    }

    /// Open fd of the first device for `node`
    pub fn device_fd(&self, node: impl AsRef<Path>) -> Option<RawFd> {
        let node = node.as_ref();
        self.inner
            .devices
            .borrow()
            .iter()
            .find(|d| d.node() == node)
            .and_then(|d| d.fd())
    }

    /// Pointer kind of the first device for `node`
    pub fn pointer_kind(&self, node: impl AsRef<Path>) -> Option<PointerKind> {
        let node = node.as_ref();
        self.inner
            .devices
            .borrow()
            .iter()
            .find(|d| d.node() == node)
            .map(|d| d.pointer.kind)
    }

    /// Cursor position of the first device for `node`
    pub fn pointer_position(&self, node: impl AsRef<Path>) -> Option<(i32, i32)> {
        let node = node.as_ref();
        self.inner
            .devices
            .borrow()
            .iter()
            .find(|d| d.node() == node)
            .map(|d| (d.pointer.x, d.pointer.y))
    }

    /// Place the cursor of the first device for `node`
    pub fn set_pointer_position(&self, node: impl AsRef<Path>, x: i32, y: i32) {
        let node = node.as_ref();
        let max = self.inner.pointer_max.get();
        if let Some(dev) = self
            .inner
            .devices
            .borrow_mut()
            .iter_mut()
            .find(|d| d.node() == node)
        {
            dev.pointer.x = x.clamp(0, max.x);
            dev.pointer.y = y.clamp(0, max.y);
        }
    }

    fn new_keyboard_state(&self, id: DeviceId) -> Result<KeyboardState> {
        let dev = {
            let keyboard = self.inner.keyboard.borrow();
            let backend = keyboard
                .as_ref()
                .ok_or_else(|| InputError::Keymap("keymap description is gone".to_string()))?;
            backend.new_device()?
        };
        let weak = Rc::downgrade(&self.inner);
        let repeat_timer = self.inner.eloop.add_timer(move |_| {
            if let Some(inner) = weak.upgrade() {
                InputManager { inner }.repeat_fired(id);
            }
        });
        Ok(KeyboardState {
            dev,
            event: Some(KeyEvent::with_capacity(1)),
            repeat_event: KeyEvent::with_capacity(1),
            repeat_timer,
        })
    }

    fn open_device(&self, dev: &mut InputDevice) -> Result<()> {
        let weak = Rc::downgrade(&self.inner);
        let id = dev.id;
        dev.open(&*self.inner.interface, &self.inner.eloop, move |mask| {
            if let Some(inner) = weak.upgrade() {
                InputManager { inner }.device_ready(id, mask);
            }
        })
    }

    /// Unlink and close a device
    fn free_device(&self, id: DeviceId) {
        let mut dev = {
            let mut devices = self.inner.devices.borrow_mut();
            match devices.iter().position(|d| d.id == id) {
                Some(pos) => devices.remove(pos),
                None => return,
            }
        };
        dev.close(&*self.inner.interface);
        info!("free device {}", dev.node().display());
    }

    fn with_device<T>(&self, id: DeviceId, f: impl FnOnce(&mut InputDevice) -> T) -> Option<T> {
        let mut devices = self.inner.devices.borrow_mut();
        devices.iter_mut().find(|d| d.id == id).map(f)
    }

    fn device_ready(&self, id: DeviceId, mask: Readiness) {
        if mask.contains(Readiness::ERR) {
            if let Some(node) = self.with_device(id, |d| d.node().to_path_buf()) {
                warn!("error condition on device {}", node.display());
            }
            self.free_device(id);
            return;
        }

        loop {
            let Some((records, status)) = self.with_device(id, |d| d.read_batch()) else {
                return;
            };
            for ev in records {
                // A hook may have removed the device
                if !self.dispatch_record(id, ev) {
                    return;
                }
            }
            match status {
                ReadStatus::More => continue,
                ReadStatus::Drained => return,
                ReadStatus::Eof | ReadStatus::Failed => {
                    self.free_device(id);
                    return;
                }
            }
        }
    }

    /// Process one record and run the hooks. Returns false once the
    /// device is gone.
    fn dispatch_record(&self, id: DeviceId, ev: RawEvent) -> bool {
        let inner = &self.inner;
        let max = inner.pointer_max.get();
        let now = inner.eloop.now();
        let Some(out) = self.with_device(id, |d| {
            d.process(ev, max, now, inner.repeat_delay, inner.repeat_rate)
        }) else {
            return false;
        };

        if out.sync {
            inner.hide_timer.update(Some(TimerSpec::oneshot(HIDE_TIMEOUT)));
        }

        if let Some(event) = out.key {
            inner.key_hook.call(self, &event);
            self.with_device(id, |d| d.restore_key_event(event));
        }
        for event in &out.pointer {
            inner.pointer_hook.call(self, event);
        }

        self.with_device(id, |_| ()).is_some()
    }

    fn repeat_fired(&self, id: DeviceId) {
        if let Some(event) = self.with_device(id, |d| d.repeat_event()).flatten() {
            self.inner.key_hook.call(self, &event);
        }
    }
}

/// xkbcommon takes C strings
fn validate(params: &KeymapParams) -> Result<()> {
    let fields = [
        ("model", &params.model),
        ("layout", &params.layout),
        ("variant", &params.variant),
        ("options", &params.options),
        ("locale", &params.locale),
    ];
    for (name, value) in fields {
        if value.as_deref().map_or(false, |v| v.contains('\0')) {
            return Err(InputError::InvalidArgument(format!("{} contains a NUL byte", name)));
        }
    }
    Ok(())
}

impl Drop for Inner {
    fn drop(&mut self) {
        let devices = std::mem::take(self.devices.get_mut());
        for mut dev in devices {
            dev.close(&*self.interface);
        }
        self.keyboard.get_mut().take();
        self.key_hook.clear();
        self.pointer_hook.clear();
        debug!("input manager destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::keyboard::KeyboardDevice;
    use std::os::unix::io::OwnedFd;
    use std::os::unix::net::UnixStream;

    /// Every node is a mouse backed by a socket pair
    struct MiceOnly {
        peers: RefCell<Vec<UnixStream>>,
    }

    impl DeviceInterface for MiceOnly {
        fn open_restricted(&self, _path: &Path, _flags: i32) -> std::result::Result<OwnedFd, i32> {
            let (ours, theirs) = UnixStream::pair().map_err(|_| libc::EMFILE)?;
            ours.set_nonblocking(true).map_err(|_| libc::EIO)?;
            self.peers.borrow_mut().push(theirs);
            Ok(OwnedFd::from(ours))
        }

        fn probe(&self, _path: &Path) -> Capabilities {
            Capabilities::REL | Capabilities::MOUSE_BTN
        }
    }

    struct NoKeyboards;

    impl KeyboardBackend for NoKeyboards {
        fn new_device(&self) -> Result<Box<dyn KeyboardDevice>> {
            Err(InputError::Keymap("no keyboards here".into()))
        }
    }

    #[test]
    fn test_clamp_repeat() {
        assert_eq!(clamp_repeat(0, DEFAULT_REPEAT_DELAY), 250);
        assert_eq!(clamp_repeat(0, DEFAULT_REPEAT_RATE), 50);
        assert_eq!(clamp_repeat(1000, DEFAULT_REPEAT_DELAY), 999);
        assert_eq!(clamp_repeat(5000, DEFAULT_REPEAT_RATE), 999);
        assert_eq!(clamp_repeat(660, DEFAULT_REPEAT_DELAY), 660);
    }

    #[test]
    fn test_validate_rejects_nul() {
        let params = KeymapParams {
            layout: Some("us\0de".into()),
            ..Default::default()
        };
        assert!(matches!(validate(&params), Err(InputError::InvalidArgument(_))));
        assert!(validate(&KeymapParams::default()).is_ok());
    }

    #[test]
    fn test_error_readiness_frees_device() {
        let eloop = EventLoop::new().unwrap();
        let iface = MiceOnly {
            peers: RefCell::new(Vec::new()),
        };
        let manager = InputManager::with_backends(&eloop, Box::new(iface), Box::new(NoKeyboards), 0, 0);
        manager.wake_up();
        manager.add_dev("/dev/input/event1", true);
        manager.add_dev("/dev/input/event2", true);
        assert_eq!(eloop.fd_count(), 2);

        let id = manager.inner.devices.borrow()[0].id;
        manager.device_ready(id, Readiness::READABLE | Readiness::ERR);
        assert_eq!(manager.devices(), vec![PathBuf::from("/dev/input/event2")]);
        assert_eq!(eloop.fd_count(), 1);
    }
}
