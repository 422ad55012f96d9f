// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test doubles for founts and drains, gated behind `test-util` so integration
//! tests elsewhere in a consuming crate can write pipelines against fakes
//! instead of standing up real I/O.
//!
//! Mirrors the `FakeFount`/`FakeDrain`/`FakeFountWithBuffer` triad used
//! throughout the original tube test suite this crate's behavior was checked
//! against: a fount/drain pair that simply record what flowed through them,
//! plus a buffering variant for founts that start producing before anything
//! is attached downstream.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::drain::Drain;
use crate::error::{TubeError, TubeErrorKind};
use crate::fount::Fount;
use crate::pauser::{PauseHandle, Pauser};

/// A drain that records every item and stop reason it receives.
///
/// Calling [`receive`](Drain::receive) before a fount has attached via
/// [`flowing_from`](Drain::flowing_from) is a programmer error, just as it is
/// for the fake this was grounded on -- an attached-but-unused drain is a
/// useless test double, so this fails loudly instead of quietly recording
/// meaningless data.
pub struct FakeDrain<T> {
    fount: RefCell<Option<Rc<dyn Fount<T>>>>,
    /// Every item delivered so far, in delivery order.
    pub received: RefCell<Vec<T>>,
    /// Every stop notification seen so far, in order.
    pub stopped: RefCell<Vec<Result<(), TubeError>>>,
}

impl<T> Default for FakeDrain<T> {
    fn default() -> Self {
        Self {
            fount: RefCell::new(None),
            received: RefCell::new(Vec::new()),
            stopped: RefCell::new(Vec::new()),
        }
    }
}

impl<T> FakeDrain<T> {
    /// Creates a `FakeDrain` with nothing received yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the attached fount to pause. Panics if nothing is attached.
    #[must_use]
    pub fn pause_upstream(&self) -> PauseHandle {
        self.fount
            .borrow()
            .as_ref()
            .expect("FakeDrain.pause_upstream called before flowing_from")
            .pause_flow()
    }

    /// How many `flow_stopped` notifications have been delivered so far.
    #[must_use]
    pub fn stop_count(&self) -> usize {
        self.stopped.borrow().len()
    }

    /// Whether the most recent `flow_stopped` notification carried `Ok(())`
    /// (`Some(true)`) or an error (`Some(false)`); `None` if none arrived yet.
    #[must_use]
    pub fn last_stop_was_ok(&self) -> Option<bool> {
        self.stopped.borrow().last().map(Result::is_ok)
    }
}

impl<T> Drain<T> for FakeDrain<T> {
    fn flowing_from(self: Rc<Self>, fount: Option<Rc<dyn Fount<T>>>) -> Option<Rc<dyn Fount<T>>> {
        *self.fount.borrow_mut() = fount;
        None
    }

    fn receive(&self, item: T) -> Result<(), TubeError> {
        if self.fount.borrow().is_none() {
            return Err(TubeError::already_stopped("FakeDrain.receive before flowing_from"));
        }
        self.received.borrow_mut().push(item);
        Ok(())
    }

    fn flow_stopped(&self, reason: Result<(), TubeError>) {
        self.stopped.borrow_mut().push(reason);
    }
}

/// A fount that delivers items on demand via [`deliver`](FakeFount::deliver)
/// and tracks its own pause/stop state through an owned [`Pauser`].
///
/// The pauser's callbacks reach back into `self` through a `Weak`, following
/// the same self-referential construction [`Siphon`](crate::siphon::Siphon)
/// uses, so `FakeFount::new` can hand back a plain, not-yet-`Rc`-wrapped
/// value -- callers wrap it in their own `Rc` once, the same `Rc` the
/// pauser's callbacks then upgrade against.
pub struct FakeFount<T> {
    drain: RefCell<Option<Rc<dyn Drain<T>>>>,
    pauser: Pauser,
    pause_count: Rc<RefCell<u32>>,
    stopped: RefCell<bool>,
}

impl<T: 'static> Default for FakeFount<T> {
    fn default() -> Self {
        let pause_count = Rc::new(RefCell::new(0));
        let inc = Rc::clone(&pause_count);
        let dec = Rc::clone(&pause_count);
        Self {
            drain: RefCell::new(None),
            pauser: Pauser::new(move || *inc.borrow_mut() += 1, move || *dec.borrow_mut() -= 1),
            pause_count,
            stopped: RefCell::new(false),
        }
    }
}

impl<T: 'static> FakeFount<T> {
    /// Creates a `FakeFount` with nothing attached yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `item` to the attached drain. Fails if nothing is attached
    /// yet or the flow has already stopped -- mirroring the real failure mode
    /// a production fount would hit in the same situation.
    pub fn deliver(&self, item: T) -> Result<(), TubeError> {
        if *self.stopped.borrow() {
            return Err(TubeError::already_stopped("FakeFount.deliver after stop_flow"));
        }
        let drain = self.drain.borrow().clone();
        match drain {
            Some(drain) => drain.receive(item),
            None => Err(TubeError::already_stopped("FakeFount.deliver before a drain attached")),
        }
    }

    /// Notifies the attached drain that the flow ended.
    pub fn finish(&self, reason: Result<(), TubeError>) {
        *self.stopped.borrow_mut() = true;
        if let Some(drain) = self.drain.borrow().clone() {
            drain.flow_stopped(reason);
        }
    }

    /// Whether [`stop_flow`](Fount::stop_flow) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Whether this fount currently has at least one outstanding pause.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.pause_count.borrow() > 0
    }

    /// Whether a drain has been attached via `note_downstream` yet.
    #[must_use]
    pub fn has_drain(&self) -> bool {
        self.drain.borrow().is_some()
    }
}

impl<T: 'static> Fount<T> for FakeFount<T> {
    fn pause_flow(&self) -> PauseHandle {
        self.pauser.pause()
    }

    fn stop_flow(&self) {
        *self.stopped.borrow_mut() = true;
    }

    fn note_downstream(&self, drain: Option<Rc<dyn Drain<T>>>) {
        *self.drain.borrow_mut() = drain;
    }
}

/// A [`FakeFount`] variant that buffers items handed to
/// [`buffer_up`](BufferedFount::buffer_up) before a drain attaches (or while
/// paused), and drains that backlog, in order, the moment it's safe to.
///
/// Grounded on `FakeFountWithBuffer` from the tube test suite this crate's
/// behavior was checked against: founts sometimes start producing before
/// anyone downstream is ready to listen, and pausing mid-drain must not drop
/// what's left in the backlog.
pub struct BufferedFount<T> {
    inner: FakeFount<T>,
    buffer: RefCell<VecDeque<T>>,
}

impl<T: 'static> Default for BufferedFount<T> {
    fn default() -> Self {
        Self {
            inner: FakeFount::new(),
            buffer: RefCell::new(VecDeque::new()),
        }
    }
}

impl<T: 'static> BufferedFount<T> {
    /// Creates a `BufferedFount` with an empty backlog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `item` to the backlog, then immediately tries to drain it if a
    /// drain is attached and the flow isn't currently paused.
    pub fn buffer_up(&self, item: T) {
        self.buffer.borrow_mut().push_back(item);
        self.drain_backlog();
    }

    /// Whether `pause_flow` has an outstanding handle against this fount.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.is_paused()
    }

    fn drain_backlog(&self) {
        // `has_drain` is checked up front, not inferred from a failed
        // `deliver`: `FakeFount::deliver` doesn't hand a rejected item back,
        // so popping before we know delivery can succeed would lose it.
        while !self.inner.is_paused() && !self.inner.is_stopped() && self.inner.has_drain() {
            let Some(item) = self.buffer.borrow_mut().pop_front() else {
                break;
            };
            if self.inner.deliver(item).is_err() {
                break;
            }
        }
    }
}

impl<T: 'static> Fount<T> for BufferedFount<T> {
    fn pause_flow(&self) -> PauseHandle {
        self.inner.pause_flow()
    }

    fn stop_flow(&self) {
        self.inner.stop_flow();
    }

    fn note_downstream(&self, drain: Option<Rc<dyn Drain<T>>>) {
        self.inner.note_downstream(drain);
        self.drain_backlog();
    }
}

/// A no-op tube usable wherever a test needs a tube but not a transformation:
/// output is identical to input, and `reassemble` (when the `divert` feature
/// is enabled) hands unconsumed items back unchanged.
#[derive(Default)]
pub struct PassthroughTube;

impl<T: 'static> crate::tube::Tube<T, T> for PassthroughTube {
    fn received(&mut self, item: T) -> Result<crate::outcome::LazySeq<T>, TubeError> {
        Ok(crate::outcome::one(item))
    }
}

#[cfg(feature = "divert")]
impl<T: 'static> crate::tube::Divertable<T, T> for PassthroughTube {
    fn reassemble(&mut self, unconsumed: Vec<T>) -> Result<crate::outcome::LazySeq<T>, TubeError> {
        Ok(crate::outcome::from_values(unconsumed))
    }
}

/// A future that stays `Pending` until [`DeferHandle::resolve`] is called,
/// waking whatever polled it.
///
/// Grounded on the crate's own manually-constructed [`Waker`](std::task::Waker)
/// (see `src/waker.rs`): this is the simplest possible future that actually
/// exercises it, since `async { value }` literals resolve on their first poll
/// and never register a waker at all.
pub struct Defer<T> {
    shared: Rc<RefCell<DeferShared<T>>>,
}

struct DeferShared<T> {
    value: Option<T>,
    waker: Option<std::task::Waker>,
}

/// The other half of a [`Defer`] future: call [`resolve`](DeferHandle::resolve)
/// to make the future it's paired with ready.
#[derive(Clone)]
pub struct DeferHandle<T> {
    shared: Rc<RefCell<DeferShared<T>>>,
}

/// Creates a not-yet-resolved future and the handle used to resolve it later.
#[must_use]
pub fn defer<T>() -> (DeferHandle<T>, Defer<T>) {
    let shared = Rc::new(RefCell::new(DeferShared { value: None, waker: None }));
    (DeferHandle { shared: Rc::clone(&shared) }, Defer { shared })
}

impl<T> DeferHandle<T> {
    /// Resolves the paired future with `value`, waking its poller if one
    /// already registered.
    pub fn resolve(&self, value: T) {
        let waker = {
            let mut shared = self.shared.borrow_mut();
            shared.value = Some(value);
            shared.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> std::future::Future for Defer<T> {
    type Output = T;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<T> {
        let mut shared = self.shared.borrow_mut();
        match shared.value.take() {
            Some(value) => std::task::Poll::Ready(value),
            None => {
                shared.waker = Some(cx.waker().clone());
                std::task::Poll::Pending
            }
        }
    }
}

/// A tube whose `received` raises on a configured sentinel value, used to
/// exercise failure-kind plumbing without a full tube implementation.
pub struct FailOn<T> {
    sentinel: T,
    kind: TubeErrorKind,
}

impl<T: PartialEq + Clone + 'static> FailOn<T> {
    /// Creates a tube that raises `kind` the moment `sentinel` flows through it.
    #[must_use]
    pub fn new(sentinel: T, kind: TubeErrorKind) -> Self {
        Self { sentinel, kind }
    }
}

impl<T: PartialEq + Clone + 'static> crate::tube::Tube<T, T> for FailOn<T> {
    fn received(&mut self, item: T) -> Result<crate::outcome::LazySeq<T>, TubeError> {
        if item == self.sentinel {
            return Err(TubeError::tube_failure(self.kind, "received", "sentinel value encountered"));
        }
        Ok(crate::outcome::one(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fount::FountConnect;

    #[test]
    fn fake_drain_rejects_receive_before_attach() {
        let drain = FakeDrain::<i32>::new();
        assert!(Drain::receive(&drain, 1).is_err());
    }

    #[test]
    fn fake_fount_delivers_to_attached_drain_in_order() {
        let fount = Rc::new(FakeFount::new());
        let drain = Rc::new(FakeDrain::new());
        (fount.clone() as Rc<dyn Fount<i32>>).flow_to(Some(drain.clone()));
        fount.deliver(1).unwrap();
        fount.deliver(2).unwrap();
        assert_eq!(*drain.received.borrow(), vec![1, 2]);
    }

    #[test]
    fn fake_fount_pause_count_reflects_attached_pauser() {
        let fount = FakeFount::<i32>::new();
        assert!(!fount.is_paused());
        let handle = fount.pause_flow();
        assert!(fount.is_paused());
        handle.release().unwrap();
        assert!(!fount.is_paused());
    }

    #[test]
    fn buffered_fount_holds_items_until_attached() {
        let fount = Rc::new(BufferedFount::new());
        fount.buffer_up(1);
        fount.buffer_up(2);
        let drain = Rc::new(FakeDrain::new());
        (fount.clone() as Rc<dyn Fount<i32>>).flow_to(Some(drain.clone()));
        assert_eq!(*drain.received.borrow(), vec![1, 2]);
    }

    #[test]
    fn buffered_fount_stops_draining_while_paused() {
        let fount = Rc::new(BufferedFount::new());
        let drain = Rc::new(FakeDrain::new());
        (fount.clone() as Rc<dyn Fount<i32>>).flow_to(Some(drain.clone()));
        let handle = fount.pause_flow();
        fount.buffer_up(1);
        assert!(drain.received.borrow().is_empty());
        handle.release().unwrap();
        assert_eq!(*drain.received.borrow(), vec![1]);
    }
}
