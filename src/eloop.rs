//! Event loop
//!
//! Single-threaded reactor over calloop. Every callback runs to completion
//! on the thread calling `dispatch()`; the only suspension point is the
//! epoll wait inside it.
//!
//! Handles returned by the loop (`FdSource`, `Timer`) hold a weak
//! reference, so the loop never keeps its users alive and a user never
//! keeps the loop alive through a registration.
//!
//! With `Clock::Manual` no calloop timers are created: armed timers fire
//! from `dispatch()` once the manual clock has passed their deadline.

use anyhow::{anyhow, Context, Result};
use bitflags::bitflags;
use calloop::generic::Generic;
use calloop::timer::TimeoutAction;
use calloop::{Interest, LoopHandle, LoopSignal, Mode, PostAction, RegistrationToken};
use log::{debug, trace, warn};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::os::unix::io::{AsFd, BorrowedFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

bitflags! {
    /// fd interest / readiness mask
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Readiness: u32 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        /// Error condition on the fd
        const ERR = 1 << 2;
    }
}

impl Readiness {
    fn interest(self) -> Interest {
        Interest {
            readable: self.contains(Readiness::READABLE),
            writable: self.contains(Readiness::WRITABLE),
        }
    }

    fn from_calloop(readiness: calloop::Readiness) -> Self {
        let mut mask = Readiness::empty();
        mask.set(Readiness::READABLE, readiness.readable);
        mask.set(Readiness::WRITABLE, readiness.writable);
        mask.set(Readiness::ERR, readiness.error);
        mask
    }
}

/// Manually advanced monotonic clock
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }

    pub fn now(&self) -> Instant {
        self.base + self.offset.get()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Time source for timer deadlines and event timestamps
#[derive(Debug, Clone, Default)]
pub enum Clock {
    /// `Instant::now()` (CLOCK_MONOTONIC)
    #[default]
    Monotonic,
    /// Test clock, only moves when advanced
    Manual(ManualClock),
}

impl Clock {
    pub fn now(&self) -> Instant {
        match self {
            Clock::Monotonic => Instant::now(),
            Clock::Manual(clock) => clock.now(),
        }
    }
}

/// Timer arming parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSpec {
    /// Time until the first expiration
    pub value: Duration,
    /// Period after the first expiration (None = one-shot)
    pub interval: Option<Duration>,
}

impl TimerSpec {
    pub fn oneshot(value: Duration) -> Self {
        Self {
            value,
            interval: None,
        }
    }

    pub fn periodic(value: Duration, interval: Duration) -> Self {
        Self {
            value,
            interval: Some(interval),
        }
    }
}

/// Expirations due by `now` for a timer that was due at `deadline`, and its
/// following deadline (None once a one-shot has fired)
fn expirations(deadline: Instant, interval: Option<Duration>, now: Instant) -> (u64, Option<Instant>) {
    let Some(interval) = interval.filter(|i| !i.is_zero()) else {
        return (1, None);
    };
    let period = interval.as_nanos();
    let late = now.saturating_duration_since(deadline).as_nanos();
    let count = u64::try_from(1 + late / period).unwrap_or(u64::MAX);
    let next = u64::try_from(period.saturating_mul(u128::from(count)))
        .ok()
        .and_then(|step| deadline.checked_add(Duration::from_nanos(step)))
        .or_else(|| now.checked_add(interval));
    (count, next)
}

/// Borrowed fd handed to calloop; the owner keeps closing rights
struct WatchedFd(RawFd);

impl AsFd for WatchedFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // The registration is removed before the owner closes the fd
        unsafe { BorrowedFd::borrow_raw(self.0) }
    }
}

struct TimerEntry {
    deadline: Option<Instant>,
    interval: Option<Duration>,
    /// Bumped on every `update()`, stale calloop timers drop themselves
    generation: u64,
    token: Option<RegistrationToken>,
    callback: Rc<dyn Fn(u64)>,
}

struct Inner {
    clock: Clock,
    event_loop: RefCell<calloop::EventLoop<'static, ()>>,
    handle: LoopHandle<'static, ()>,
    signal: LoopSignal,
    fds: RefCell<BTreeMap<u64, RawFd>>,
    timers: RefCell<BTreeMap<u64, TimerEntry>>,
    next_id: Cell<u64>,
    exit: Cell<bool>,
}

impl Inner {
    fn alloc_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn is_manual(&self) -> bool {
        matches!(self.clock, Clock::Manual(_))
    }

    /// Run one expiration of timer `id` and tell calloop what comes next
    fn expire(&self, id: u64, generation: u64) -> TimeoutAction {
        let now = self.clock.now();
        let (callback, count) = {
            let mut timers = self.timers.borrow_mut();
            let Some(timer) = timers.get_mut(&id) else {
                return TimeoutAction::Drop;
            };
            if timer.generation != generation {
                return TimeoutAction::Drop;
            }
            let Some(deadline) = timer.deadline else {
                return TimeoutAction::Drop;
            };
            if deadline > now {
                return TimeoutAction::ToInstant(deadline);
            }
            let (count, next) = expirations(deadline, timer.interval, now);
            timer.deadline = next;
            if next.is_none() {
                timer.token = None;
            }
            (timer.callback.clone(), count)
        };

        trace!("timer {} expired {} time(s)", id, count);
        callback(count);

        // The callback may have re-armed, disarmed or dropped the timer
        let mut timers = self.timers.borrow_mut();
        match timers.get_mut(&id) {
            Some(timer) if timer.generation == generation => match timer.deadline {
                Some(next) => TimeoutAction::ToInstant(next),
                None => {
                    timer.token = None;
                    TimeoutAction::Drop
                }
            },
            _ => TimeoutAction::Drop,
        }
    }

    /// Fire manual-clock timers whose deadline has passed
    fn fire_manual_timers(&self) {
        let now = self.clock.now();
        let due: Vec<(u64, u64)> = self
            .timers
            .borrow()
            .iter()
            .filter(|(_, t)| t.deadline.map_or(false, |d| d <= now))
            .map(|(id, t)| (*id, t.generation))
            .collect();
        for (id, generation) in due {
            self.expire(id, generation);
        }
    }

    fn has_due_manual_timer(&self) -> bool {
        let now = self.clock.now();
        self.timers
            .borrow()
            .values()
            .any(|t| t.deadline.map_or(false, |d| d <= now))
    }
}

/// Reactor handle; clones share the same loop
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<Inner>,
}

impl EventLoop {
    pub fn new() -> Result<Self> {
        Self::with_clock(Clock::Monotonic)
    }

    pub fn with_clock(clock: Clock) -> Result<Self> {
        let event_loop = calloop::EventLoop::try_new().context("Failed to create event loop")?;
        let handle = event_loop.handle();
        let signal = event_loop.get_signal();
        Ok(Self {
            inner: Rc::new(Inner {
                clock,
                event_loop: RefCell::new(event_loop),
                handle,
                signal,
                fds: RefCell::new(BTreeMap::new()),
                timers: RefCell::new(BTreeMap::new()),
                next_id: Cell::new(1),
                exit: Cell::new(false),
            }),
        })
    }

    /// Current time on the loop's clock
    pub fn now(&self) -> Instant {
        self.inner.clock.now()
    }

    /// Watch `fd`; `callback` gets the readiness mask each time it is ready.
    /// The caller keeps ownership of the fd and must drop the source first.
    pub fn add_fd<F>(&self, fd: RawFd, interest: Readiness, mut callback: F) -> Result<FdSource>
    where
        F: FnMut(Readiness) + 'static,
    {
        if fd < 0 {
            return Err(anyhow!("invalid fd {}", fd));
        }
        let source = Generic::new(WatchedFd(fd), interest.interest(), Mode::Level);
        let token = self
            .inner
            .handle
            .insert_source(source, move |readiness, _, _| {
                callback(Readiness::from_calloop(readiness));
                Ok(PostAction::Continue)
            })
            .map_err(|e| anyhow!("cannot watch fd {}: {}", fd, e.error))?;

        let id = self.inner.alloc_id();
        self.inner.fds.borrow_mut().insert(id, fd);
        debug!("fd {} registered as source {}", fd, id);
        Ok(FdSource {
            id,
            fd,
            token,
            eloop: Rc::downgrade(&self.inner),
        })
    }

    /// New disarmed timer; `callback` gets the number of expirations
    pub fn add_timer<F>(&self, callback: F) -> Timer
    where
        F: Fn(u64) + 'static,
    {
        let id = self.inner.alloc_id();
        self.inner.timers.borrow_mut().insert(
            id,
            TimerEntry {
                deadline: None,
                interval: None,
                generation: 0,
                token: None,
                callback: Rc::new(callback),
            },
        );
        Timer {
            id,
            eloop: Rc::downgrade(&self.inner),
        }
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.inner.fds.borrow().values().any(|f| *f == fd)
    }

    pub fn fd_count(&self) -> usize {
        self.inner.fds.borrow().len()
    }

    /// Wait up to `timeout` (None = forever) and run ready callbacks
    pub fn dispatch(&self, timeout: Option<Duration>) -> Result<()> {
        let manual = self.inner.is_manual();
        let timeout = if manual && self.inner.has_due_manual_timer() {
            Some(Duration::ZERO)
        } else {
            timeout
        };
        {
            let mut event_loop = self
                .inner
                .event_loop
                .try_borrow_mut()
                .map_err(|_| anyhow!("dispatch() called from a callback"))?;
            event_loop
                .dispatch(timeout, &mut ())
                .context("event loop dispatch failed")?;
        }
        if manual {
            self.inner.fire_manual_timers();
        }
        Ok(())
    }

    /// Dispatch until `exit()`
    pub fn run(&self) -> Result<()> {
        self.inner.exit.set(false);
        while !self.inner.exit.get() {
            self.dispatch(None)?;
        }
        Ok(())
    }

    pub fn exit(&self) {
        self.inner.exit.set(true);
        self.inner.signal.wakeup();
    }
}

/// fd registration, removed on drop
pub struct FdSource {
    id: u64,
    fd: RawFd,
    token: RegistrationToken,
    eloop: Weak<Inner>,
}

impl FdSource {
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn remove(self) {}
}

impl Drop for FdSource {
    fn drop(&mut self) {
        if let Some(inner) = self.eloop.upgrade() {
            inner.handle.remove(self.token);
            inner.fds.borrow_mut().remove(&self.id);
            debug!("fd {} unregistered", self.fd);
        }
    }
}

/// Timer handle, removed on drop
pub struct Timer {
    id: u64,
    eloop: Weak<Inner>,
}

impl Timer {
    /// Arm (`Some`) or disarm (`None`); re-arming replaces the deadline
    pub fn update(&self, spec: Option<TimerSpec>) {
        let Some(inner) = self.eloop.upgrade() else {
            return;
        };
        let now = inner.clock.now();
        let (stale, generation) = {
            let mut timers = inner.timers.borrow_mut();
            let Some(timer) = timers.get_mut(&self.id) else {
                return;
            };
            timer.generation += 1;
            timer.deadline = spec.map(|s| now + s.value);
            timer.interval = spec.and_then(|s| s.interval);
            (timer.token.take(), timer.generation)
        };
        if let Some(token) = stale {
            inner.handle.remove(token);
        }

        let Some(deadline) = spec.map(|s| now + s.value) else {
            return;
        };
        if inner.is_manual() {
            return;
        }

        let id = self.id;
        let weak = self.eloop.clone();
        let source = calloop::timer::Timer::from_deadline(deadline);
        let inserted = inner.handle.insert_source(source, move |_, _, _| match weak.upgrade() {
            Some(inner) => inner.expire(id, generation),
            None => TimeoutAction::Drop,
        });
        match inserted {
            Ok(token) => {
                let mut timers = inner.timers.borrow_mut();
                if let Some(timer) = timers.get_mut(&self.id) {
                    timer.token = Some(token);
                }
            }
            Err(e) => warn!("cannot arm timer {}: {}", self.id, e.error),
        };
    }

    /// Next expiration, if armed
    pub fn deadline(&self) -> Option<Instant> {
        let inner = self.eloop.upgrade()?;
        let timers = inner.timers.borrow();
        timers.get(&self.id).and_then(|t| t.deadline)
    }

    pub fn is_armed(&self) -> bool {
        self.deadline().is_some()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(inner) = self.eloop.upgrade() {
            let entry = inner.timers.borrow_mut().remove(&self.id);
            if let Some(token) = entry.and_then(|t| t.token) {
                inner.handle.remove(token);
            }
        }
    }
}
