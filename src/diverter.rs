// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mid-flow rerouting of a tube's downstream.
//!
//! A [`Diverter`] wraps a [`Divertable`] tube the same way a
//! [`Siphon`](crate::siphon::Siphon) wraps a plain [`Tube`] -- it exposes a
//! [`Drain<In>`]/[`Fount<Out>`] pair -- but additionally exposes
//! [`Diverter::divert`], which atomically swaps the drain receiving this
//! tube's output for a new one, reassembling whatever output had already
//! been produced but not yet delivered so that no in-flight item is lost.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use futures_util::StreamExt;

use crate::drain::Drain;
use crate::error::{TubeError, TubeErrorKind};
use crate::fount::Fount;
use crate::outcome::{self, BoxFuture, LazySeq, Outcome};
use crate::pauser::{PauseHandle, Pauser};
use crate::tube::Divertable;

struct DiverterState<In, Out, Tb> {
    tube: Tb,
    upstream: Option<Rc<dyn Fount<In>>>,
    downstream: Option<Rc<dyn Drain<Out>>>,
    /// Once set, every `receive` bypasses `tube` entirely and forwards
    /// straight to this drain instead -- re-read fresh at each delivery so a
    /// diversion triggered while a prior diversion's reassembly is still
    /// being delivered routes to whichever target is current at that moment.
    ///
    /// Typed `Drain<In>`, not `Drain<Out>`: once diverted, the tube is cut
    /// out of the path entirely, so the new drain receives the same item
    /// type the old upstream was feeding in, not whatever `tube` used to
    /// produce.
    diverted_to: Option<Rc<dyn Drain<In>>>,
    /// Output already produced by `tube` but not yet delivered downstream
    /// (no downstream attached yet, or downstream/self paused).
    buffer: VecDeque<Out>,
    started: bool,
    stopped: bool,
    stop_requested: bool,
    pause_from_downstream: Option<PauseHandle>,
    pause_for_absent_downstream: Option<PauseHandle>,
    pause_for_pending_future: Option<PauseHandle>,
    /// The tail of the tube's output sequence not yet drained, stashed while
    /// waiting on `pending_future` to resolve.
    suspended_seq: Option<LazySeq<Out>>,
    pending_future: Option<BoxFuture<Out>>,
    pauser: Pauser,
    /// Set for the duration of a logical drain (including across a
    /// suspend/resume cycle) so a reentrant `divert()` (called from a
    /// downstream tube's `received`, synchronously underneath our own
    /// delivery loop) knows the loop itself will notice and settle the
    /// diversion, rather than trying to drain the live sequence out from
    /// underneath it.
    draining: bool,
    /// Set by `divert()` when it fires while `draining` is true; the next
    /// iteration of the active drain loop consumes this and performs the
    /// one-time reassembly handoff.
    needs_settle: bool,
    /// Set while draining the sequence `tube.stopped()` produced, including
    /// across a suspend/resume cycle, so `flow_stopped` isn't delivered to
    /// whichever drain is current until that sequence is truly exhausted.
    draining_for_stop: bool,
    /// The reason to hand `flow_stopped` once the `stopped()` sequence
    /// currently being drained finishes.
    finishing_stop_reason: Option<Result<(), TubeError>>,
}

/// A tube wired into the middle of a pipeline with the additional ability to
/// have its output rerouted mid-flow.
///
/// Produced directly (unlike a plain [`Siphon`](crate::siphon::Siphon),
/// which is normally only built through [`series`](crate::series::series)):
/// callers need to keep a `Diverter` handle around to call
/// [`divert`](Diverter::divert) on later, so it isn't folded into the
/// fluent series builder.
pub struct Diverter<In, Out, Tb> {
    state: Rc<RefCell<DiverterState<In, Out, Tb>>>,
}

impl<In, Out, Tb> Diverter<In, Out, Tb>
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    /// Wraps `tube` in a new diverter, not yet connected to any upstream
    /// fount or downstream drain.
    #[must_use]
    pub fn new(tube: Tb) -> Self {
        let state = Rc::new_cyclic(|weak: &Weak<RefCell<DiverterState<In, Out, Tb>>>| {
            let weak_for_pause = weak.clone();
            RefCell::new(DiverterState {
                tube,
                upstream: None,
                downstream: None,
                diverted_to: None,
                buffer: VecDeque::new(),
                started: false,
                stopped: false,
                stop_requested: false,
                pause_from_downstream: None,
                pause_for_absent_downstream: None,
                pause_for_pending_future: None,
                suspended_seq: None,
                pending_future: None,
                pauser: Pauser::new(
                    {
                        let weak = weak_for_pause.clone();
                        move || actually_pause(&weak)
                    },
                    move || actually_resume(&weak_for_pause),
                ),
                draining: false,
                needs_settle: false,
                draining_for_stop: false,
                finishing_stop_reason: None,
            })
        });
        Self { state }
    }

    /// The drain-half of this diverter: feed it items from an upstream fount
    /// via [`FountConnect::flow_to`](crate::fount::FountConnect::flow_to).
    #[must_use]
    pub fn drain_half(&self) -> Rc<DiverterDrainHalf<In, Out, Tb>> {
        Rc::new(DiverterDrainHalf { state: Rc::clone(&self.state) })
    }

    /// The fount-half of this diverter: connect it to a downstream drain.
    #[must_use]
    pub fn fount_half(&self) -> Rc<DiverterFountHalf<In, Out, Tb>> {
        Rc::new(DiverterFountHalf { state: Rc::clone(&self.state) })
    }

    /// Reroutes this diverter's input to `new_downstream`.
    ///
    /// Every item received from here on bypasses the wrapped tube and goes
    /// straight to `new_downstream`, typed the same as this diverter's own
    /// input. Output the tube had already produced but which had not yet
    /// reached the old downstream -- buffered items, and anything left
    /// un-pulled in a sequence currently being delivered -- is handed to
    /// [`Divertable::reassemble`] and the result delivered to
    /// `new_downstream` instead, so nothing in flight at the moment of
    /// diversion is lost. Once the one-time reassembly handoff completes,
    /// the old downstream is detached: this diverter forgets it entirely.
    ///
    /// Calling `divert` again after an earlier call just retargets future
    /// deliveries to the newest drain; the one-time reassembly handoff only
    /// ever happens for the very first diversion.
    pub fn divert(&self, new_downstream: Rc<dyn Drain<In>>) {
        let (already_diverted, draining) = {
            let mut s = self.state.borrow_mut();
            let already_diverted = s.diverted_to.is_some();
            s.diverted_to = Some(new_downstream);
            (already_diverted, s.draining)
        };
        if already_diverted {
            return;
        }
        if draining {
            self.state.borrow_mut().needs_settle = true;
        } else {
            run_settle(&self.state, outcome::empty());
        }
    }
}

fn actually_pause<In, Out, Tb>(state: &Weak<RefCell<DiverterState<In, Out, Tb>>>) {
    if let Some(state) = state.upgrade() {
        let upstream = state.borrow().upstream.clone();
        if let Some(upstream) = upstream {
            let handle = upstream.pause_flow();
            state.borrow_mut().pause_from_downstream = Some(handle);
        }
    }
}

fn actually_resume<In, Out, Tb>(state: &Weak<RefCell<DiverterState<In, Out, Tb>>>)
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    if let Some(state) = state.upgrade() {
        let handle = state.borrow_mut().pause_from_downstream.take();
        if let Some(handle) = handle {
            let _ = handle.release();
        }
        flush_buffer(&state);
    }
}

/// The [`Drain<In>`] side of a [`Diverter`].
pub struct DiverterDrainHalf<In, Out, Tb> {
    state: Rc<RefCell<DiverterState<In, Out, Tb>>>,
}

impl<In, Out, Tb> Drain<In> for DiverterDrainHalf<In, Out, Tb>
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    /// Always returns `None`: this diverter's real outward fount is
    /// [`fount_half`](Diverter::fount_half), of type `Out`, which can't be
    /// expressed as the `Rc<dyn Fount<In>>` this method's signature allows.
    fn flowing_from(self: Rc<Self>, fount: Option<Rc<dyn Fount<In>>>) -> Option<Rc<dyn Fount<In>>> {
        flowing_from(&self.state, fount);
        None
    }

    fn receive(&self, item: In) -> Result<(), TubeError> {
        let diverted = self.state.borrow().diverted_to.clone();
        if let Some(diverted) = diverted {
            return diverted.receive(item);
        }
        deliver_received(&self.state, item)
    }

    fn flow_stopped(&self, reason: Result<(), TubeError>) {
        deliver_stopped(&self.state, reason);
    }
}

/// The [`Fount<Out>`] side of a [`Diverter`].
pub struct DiverterFountHalf<In, Out, Tb> {
    state: Rc<RefCell<DiverterState<In, Out, Tb>>>,
}

impl<In, Out, Tb> Fount<Out> for DiverterFountHalf<In, Out, Tb>
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    fn pause_flow(&self) -> PauseHandle {
        self.state.borrow().pauser.pause()
    }

    fn stop_flow(&self) {
        let upstream = {
            let mut s = self.state.borrow_mut();
            s.stop_requested = true;
            s.upstream.clone()
        };
        if let Some(upstream) = upstream {
            upstream.stop_flow();
        }
    }

    fn note_downstream(&self, drain: Option<Rc<dyn Drain<Out>>>) {
        note_downstream(&self.state, drain);
    }
}

/// Attaches (or detaches) `drain` as the downstream. Attaching releases any
/// self-pause held against upstream on account of no downstream being
/// present, flushes whatever backed up while it was gone, and -- if upstream
/// is already attached too -- fires `tube.started()` for a diverter that
/// never got the chance to start.
fn note_downstream<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>, drain: Option<Rc<dyn Drain<Out>>>)
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    match drain {
        Some(drain) => {
            let released = {
                let mut s = state.borrow_mut();
                s.downstream = Some(drain);
                s.pause_for_absent_downstream.take()
            };
            if let Some(released) = released {
                let _ = released.release();
            }
            flush_buffer(state);
            maybe_fire_started(state);
        }
        None => {
            state.borrow_mut().downstream = None;
        }
    }
}

/// Connects (or detaches) the upstream half of this diverter's flow.
///
/// On reattach, releases any self-pause held against the *old* upstream
/// before recording the new one, and re-applies an equivalent pause against
/// the new upstream if the condition that caused it still holds. Detaching
/// (`fount` is `None`) resets `started`, so a later reattach fires
/// `tube.started()` again.
fn flowing_from<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>, fount: Option<Rc<dyn Fount<In>>>)
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    let (stop_requested, downstream_absent, future_pending) = {
        let mut s = state.borrow_mut();
        if let Some(handle) = s.pause_for_absent_downstream.take() {
            let _ = handle.release();
        }
        if let Some(handle) = s.pause_for_pending_future.take() {
            let _ = handle.release();
        }
        s.upstream = fount.clone();
        if fount.is_none() {
            s.started = false;
        }
        (s.stop_requested, s.downstream.is_none(), s.pending_future.is_some())
    };
    let Some(fount) = fount else {
        return;
    };
    if stop_requested {
        fount.stop_flow();
        return;
    }
    if downstream_absent {
        let handle = fount.pause_flow();
        state.borrow_mut().pause_for_absent_downstream = Some(handle);
    }
    if future_pending {
        let handle = fount.pause_flow();
        state.borrow_mut().pause_for_pending_future = Some(handle);
    }
    maybe_fire_started(state);
}

/// Invokes `tube.started()`, but only the first time both upstream and
/// downstream are attached -- a diverter whose downstream never connects
/// never starts its tube at all.
fn maybe_fire_started<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>)
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    let seq = {
        let mut s = state.borrow_mut();
        if s.started || s.upstream.is_none() || s.downstream.is_none() {
            return;
        }
        s.started = true;
        s.tube.started()
    };
    run_guarded(state, seq);
}

fn deliver_received<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>, item: In) -> Result<(), TubeError>
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    if state.borrow().stopped {
        return Err(TubeError::already_stopped("receive"));
    }
    debug_assert!(
        state.borrow().pending_future.is_none() && state.borrow().suspended_seq.is_none(),
        "received() called while a previous sequence is still draining; the self-pause upstream \
         should have prevented this"
    );
    let seq_result = {
        let mut s = state.borrow_mut();
        s.tube.received(item)
    };
    match seq_result {
        Ok(seq) => {
            let result = run_lazy_seq(state, seq);
            if let Err(ref err) = result {
                tracing::error!(kind = ?err.kind(), "divertable tube failed while receiving");
                stop_upstream(state);
                deliver_stopped(state, Err(err.with_kind(TubeErrorKind::Received)));
            }
            result
        }
        Err(err) => {
            tracing::error!(kind = ?err.kind(), "divertable tube failed while receiving");
            stop_upstream(state);
            deliver_stopped(state, Err(TubeError::new(err.kind(), err.to_string())));
            Err(err)
        }
    }
}

fn stop_upstream<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>) {
    let upstream = state.borrow().upstream.clone();
    if let Some(upstream) = upstream {
        upstream.stop_flow();
    }
}

fn deliver_stopped<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>, reason: Result<(), TubeError>)
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    let already_stopped = {
        let mut s = state.borrow_mut();
        let was = s.stopped;
        s.stopped = true;
        was
    };
    if already_stopped {
        return;
    }

    let seq = {
        let mut s = state.borrow_mut();
        s.tube.stopped(clone_reason(&reason))
    };
    state.borrow_mut().finishing_stop_reason = Some(reason);
    state.borrow_mut().draining_for_stop = true;
    if let DrainProgress::Done(result) = run_lazy_seq_progress(state, seq) {
        complete_stop(state, result);
    }
    // else: still draining across a suspended future; `resume_pending` will
    // call `complete_stop` once it's truly exhausted.
}

/// Delivers the stashed `flow_stopped` reason to whichever drain is current
/// (the switchee, if one has already been diverted to, otherwise the
/// original downstream) now that the `stopped()` sequence has fully drained.
fn complete_stop<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>, stop_result: Result<(), TubeError>)
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    state.borrow_mut().draining_for_stop = false;
    if let Err(err) = stop_result {
        tracing::error!(kind = ?err.kind(), "divertable tube failed during stopped");
    }
    let reason = match state.borrow_mut().finishing_stop_reason.take() {
        Some(reason) => reason,
        None => return,
    };
    let diverted = state.borrow().diverted_to.clone();
    let downstream = state.borrow().downstream.clone();
    if let Some(diverted) = diverted {
        diverted.flow_stopped(reason);
    } else if let Some(downstream) = downstream {
        downstream.flow_stopped(reason);
    }
}

fn clone_reason(reason: &Result<(), TubeError>) -> Result<(), TubeError> {
    match reason {
        Ok(()) => Ok(()),
        Err(_) => Err(TubeError::new(TubeErrorKind::Stopped, "upstream flow stopped with an error".to_string())),
    }
}

/// Runs a lazy sequence (from `started`/`stopped`, which have no `Result` to
/// report failures through) logging and tearing down the flow on error
/// instead of propagating it to a caller.
fn run_guarded<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>, seq: LazySeq<Out>)
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    if let Err(err) = run_lazy_seq(state, seq) {
        tracing::error!(kind = ?err.kind(), "divertable tube failed");
        stop_upstream(state);
        deliver_stopped(state, Err(err));
    }
}

fn flush_buffer<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>)
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    loop {
        let (item, downstream) = {
            let mut s = state.borrow_mut();
            if s.diverted_to.is_some() || s.pauser.is_paused() {
                return;
            }
            let Some(downstream) = s.downstream.clone() else {
                return;
            };
            let Some(item) = s.buffer.pop_front() else {
                return;
            };
            (item, downstream)
        };
        if let Err(err) = downstream.receive(item) {
            tracing::error!(kind = ?err.kind(), "downstream drain failed while draining buffer");
            deliver_stopped(state, Err(err));
            return;
        }
    }
}

/// What a single invocation of the drain loop accomplished: either it ran to
/// completion (possibly settling a diversion along the way), or it suspended
/// partway through, waiting on a pending future.
enum DrainProgress {
    Done(Result<(), TubeError>),
    Suspended,
}

/// Drains `seq`, delivering each produced item downstream -- unless a
/// diversion happens along the way, in which case the rest of `seq` is
/// reassembled and handed to the new downstream instead (see
/// [`settle_diversion`]) -- suspending instead of blocking if a yielded
/// future isn't ready yet.
fn run_lazy_seq<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>, seq: LazySeq<Out>) -> Result<(), TubeError>
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    match run_lazy_seq_progress(state, seq) {
        DrainProgress::Done(result) => result,
        DrainProgress::Suspended => Ok(()),
    }
}

fn run_lazy_seq_progress<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>, seq: LazySeq<Out>) -> DrainProgress
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    state.borrow_mut().draining = true;
    match drive(state, seq) {
        DrainProgress::Done(result) => {
            state.borrow_mut().draining = false;
            DrainProgress::Done(result)
        }
        DrainProgress::Suspended => DrainProgress::Suspended,
    }
}

fn drive<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>, mut seq: LazySeq<Out>) -> DrainProgress
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    loop {
        let should_settle = {
            let mut s = state.borrow_mut();
            if s.needs_settle {
                s.needs_settle = false;
                true
            } else {
                false
            }
        };
        if should_settle {
            return DrainProgress::Done(settle_diversion(state, seq));
        }
        match crate::executor::block_on(seq.next()) {
            None => return DrainProgress::Done(Ok(())),
            Some(Err(err)) => return DrainProgress::Done(Err(err)),
            Some(Ok(Outcome::Value(value))) => {
                if let Err(err) = deliver_one(state, value) {
                    return DrainProgress::Done(Err(err));
                }
            }
            Some(Ok(Outcome::Pending(fut))) => return suspend_on_future(state, seq, fut),
        }
    }
}

fn suspend_on_future<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>, seq: LazySeq<Out>, mut fut: BoxFuture<Out>) -> DrainProgress
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    let waker = make_resume_waker(state);
    let mut cx = Context::from_waker(&waker);
    match fut.as_mut().poll(&mut cx) {
        Poll::Ready(value) => drive(state, prepend_value(value, seq)),
        Poll::Pending => {
            take_pending_future_pause(state);
            let mut s = state.borrow_mut();
            s.suspended_seq = Some(seq);
            s.pending_future = Some(fut);
            DrainProgress::Suspended
        }
    }
}

/// Splices a just-resolved value back onto the front of the sequence it was
/// pulled from, so it flows through the same `drive` loop (and its
/// `needs_settle` check) as every other item instead of bypassing it --
/// otherwise a `divert()` that lands while we're suspended on this value's
/// future would still hand it to the old downstream instead of reassembling it.
fn prepend_value<T: 'static>(value: T, seq: LazySeq<T>) -> LazySeq<T> {
    Box::pin(futures_util::stream::once(async move { Ok(Outcome::Value(value)) }).chain(seq))
}

fn make_resume_waker<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>) -> std::task::Waker
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    let weak = Rc::downgrade(state);
    crate::waker::local_waker(Rc::new(move || {
        if let Some(state) = weak.upgrade() {
            resume_pending(&state);
        }
    }))
}

/// Called from the waker handed out by `suspend_on_future`: re-polls the
/// stashed future and, if it's now ready, resumes the same drain loop
/// `run_lazy_seq` would have continued, including re-checking `needs_settle`
/// in case a divert arrived while we were suspended.
fn resume_pending<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>)
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    let mut fut = match state.borrow_mut().pending_future.take() {
        Some(fut) => fut,
        None => return,
    };
    let waker = make_resume_waker(state);
    let mut cx = Context::from_waker(&waker);
    match fut.as_mut().poll(&mut cx) {
        Poll::Pending => {
            state.borrow_mut().pending_future = Some(fut);
        }
        Poll::Ready(value) => {
            release_pending_future_pause(state);
            let seq = state.borrow_mut().suspended_seq.take().unwrap_or_else(outcome::empty);
            let progress = drive(state, prepend_value(value, seq));
            if let DrainProgress::Done(result) = progress {
                state.borrow_mut().draining = false;
                if state.borrow().draining_for_stop {
                    complete_stop(state, result);
                } else if let Err(err) = result {
                    tracing::error!(kind = ?err.kind(), "divertable tube failed resuming after a pending future");
                    stop_upstream(state);
                    deliver_stopped(state, Err(err));
                }
            }
        }
    }
}

fn take_pending_future_pause<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>)
where
    In: 'static,
{
    let upstream = {
        let s = state.borrow();
        if s.pause_for_pending_future.is_some() {
            return;
        }
        s.upstream.clone()
    };
    if let Some(upstream) = upstream {
        let handle = upstream.pause_flow();
        state.borrow_mut().pause_for_pending_future = Some(handle);
    }
}

fn release_pending_future_pause<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>) {
    let handle = state.borrow_mut().pause_for_pending_future.take();
    if let Some(handle) = handle {
        let _ = handle.release();
    }
}

fn resolve<T>(outcome: Outcome<T>) -> Result<T, TubeError> {
    Ok(match outcome {
        Outcome::Value(v) => v,
        // Reassembly is a one-time, synchronous handoff triggered from
        // inside `divert()`; a future yielded here is assumed to resolve
        // promptly rather than getting its own suspend/resume cycle.
        Outcome::Pending(fut) => crate::executor::block_on(fut),
    })
}

fn deliver_one<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>, item: Out) -> Result<(), TubeError>
where
    In: 'static,
{
    let (downstream, take_absent_pause) = {
        let s = state.borrow();
        if s.pauser.is_paused() {
            (None, false)
        } else if let Some(downstream) = s.downstream.clone() {
            (Some(downstream), false)
        } else {
            (None, true)
        }
    };
    if take_absent_pause {
        let upstream = {
            let s = state.borrow();
            if s.pause_for_absent_downstream.is_some() { None } else { s.upstream.clone() }
        };
        if let Some(upstream) = upstream {
            let handle = upstream.pause_flow();
            state.borrow_mut().pause_for_absent_downstream = Some(handle);
        }
    }
    match downstream {
        Some(downstream) => downstream.receive(item),
        None => {
            state.borrow_mut().buffer.push_back(item);
            Ok(())
        }
    }
}

/// Performs the one-time reassembly handoff: collects everything produced
/// but not yet delivered (the buffer, plus whatever is left un-pulled in
/// `seq`), reassembles it through the tube into a sequence of *inputs*, and
/// delivers the result to whichever drain is current at each step. The old
/// downstream is detached once this completes: from here on only
/// `diverted_to` is ever consulted.
fn run_settle<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>, seq: LazySeq<Out>)
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    if let Err(err) = settle_diversion(state, seq) {
        tracing::error!(kind = ?err.kind(), "divertable tube failed while reassembling diverted output");
        stop_upstream(state);
        deliver_stopped(state, Err(err));
    }
}

fn settle_diversion<In, Out, Tb>(state: &Rc<RefCell<DiverterState<In, Out, Tb>>>, mut seq: LazySeq<Out>) -> Result<(), TubeError>
where
    In: 'static,
    Out: 'static,
    Tb: Divertable<In, Out> + 'static,
{
    let mut unconsumed: Vec<Out> = {
        let mut s = state.borrow_mut();
        s.downstream = None;
        s.buffer.drain(..).collect()
    };
    while let Some(next) = crate::executor::block_on(seq.next()) {
        unconsumed.push(resolve(next?)?);
    }

    let reassembled = {
        let mut s = state.borrow_mut();
        s.tube.reassemble(unconsumed)
    };
    let mut reassembled: LazySeq<In> = reassembled.map_err(|err| err.with_kind(TubeErrorKind::Received))?;

    while let Some(next) = crate::executor::block_on(reassembled.next()) {
        let value = resolve(next?)?;
        let target = state.borrow().diverted_to.clone();
        if let Some(target) = target {
            target.receive(value)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell as StdRefCell;

    use super::*;
    use crate::fount::FountConnect;
    use crate::tube::Tube;
    use crate::testing::{FakeDrain, FakeFount};

    struct DivertablePassthrough;
    impl Tube<String, String> for DivertablePassthrough {
        fn received(&mut self, item: String) -> Result<LazySeq<String>, TubeError> {
            Ok(outcome::one(item))
        }
    }
    impl Divertable<String, String> for DivertablePassthrough {
        fn reassemble(&mut self, unconsumed: Vec<String>) -> Result<LazySeq<String>, TubeError> {
            Ok(outcome::from_values(unconsumed))
        }
    }

    struct Switcher {
        diverter: Rc<Diverter<String, String, DivertablePassthrough>>,
        switchee_drain: Rc<FakeDrain<String>>,
    }
    impl Tube<String, String> for Switcher {
        fn received(&mut self, data: String) -> Result<LazySeq<String>, TubeError> {
            assert_eq!(data, "switch");
            let switchee = crate::siphon::Siphon::new(Switchee);
            switchee.fount_half().flow_to(Some(self.switchee_drain.clone()));
            self.diverter.divert(switchee.drain_half());
            Ok(outcome::empty())
        }
    }

    struct Switchee;
    impl Tube<String, String> for Switchee {
        fn received(&mut self, data: String) -> Result<LazySeq<String>, TubeError> {
            Ok(outcome::one(format!("switched {data}")))
        }
    }

    #[test]
    fn divert_routes_output_to_new_drain_and_bypasses_old_tube() {
        let ff = Rc::new(FakeFount::new());
        let diverter = Rc::new(Diverter::new(DivertablePassthrough));
        let fake_drain: Rc<FakeDrain<String>> = Rc::new(FakeDrain::new());

        let switcher = crate::siphon::Siphon::new(Switcher {
            diverter: diverter.clone(),
            switchee_drain: fake_drain.clone(),
        });
        diverter.fount_half().flow_to(Some(switcher.drain_half()));
        (ff.clone() as Rc<dyn Fount<String>>).flow_to(Some(diverter.drain_half()));

        ff.deliver("switch".to_string()).unwrap();
        ff.deliver("to switchee".to_string()).unwrap();

        assert_eq!(*fake_drain.received.borrow(), vec!["switched to switchee".to_string()]);
    }

    struct BorkSplitter;
    impl Tube<String, String> for BorkSplitter {
        fn received(&mut self, item: String) -> Result<LazySeq<String>, TubeError> {
            let parts: Vec<String> = item.split("BORK").map(str::to_string).collect();
            Ok(outcome::from_values(parts))
        }
    }
    impl Divertable<String, String> for BorkSplitter {
        fn reassemble(&mut self, unconsumed: Vec<String>) -> Result<LazySeq<String>, TubeError> {
            let mut out = Vec::with_capacity(unconsumed.len() * 2);
            for item in unconsumed {
                out.push("(bork was here)".to_string());
                out.push(item);
            }
            Ok(outcome::from_values(out))
        }
    }

    struct PreSwitchRecorder {
        seen: Rc<StdRefCell<Vec<String>>>,
        diverter: Rc<Diverter<String, String, BorkSplitter>>,
        switchee_drain: Rc<FakeDrain<String>>,
    }
    impl Tube<String, String> for PreSwitchRecorder {
        fn received(&mut self, data: String) -> Result<LazySeq<String>, TubeError> {
            self.seen.borrow_mut().push(data);
            let switchee = crate::siphon::Siphon::new(Switchee);
            switchee.fount_half().flow_to(Some(self.switchee_drain.clone()));
            self.diverter.divert(switchee.drain_half());
            Ok(outcome::empty())
        }
    }

    #[test]
    fn divert_reassembles_unconsumed_output_from_the_same_call() {
        let ff = Rc::new(FakeFount::new());
        let diverter = Rc::new(Diverter::new(BorkSplitter));
        let fake_drain: Rc<FakeDrain<String>> = Rc::new(FakeDrain::new());
        let seen = Rc::new(StdRefCell::new(Vec::new()));

        let recorder = crate::siphon::Siphon::new(PreSwitchRecorder {
            seen: seen.clone(),
            diverter: diverter.clone(),
            switchee_drain: fake_drain.clone(),
        });
        diverter.fount_half().flow_to(Some(recorder.drain_half()));
        (ff.clone() as Rc<dyn Fount<String>>).flow_to(Some(diverter.drain_half()));

        ff.deliver("beforeBORKto switchee".to_string()).unwrap();

        assert_eq!(*seen.borrow(), vec!["before".to_string()]);
        assert_eq!(
            *fake_drain.received.borrow(),
            vec!["switched (bork was here)".to_string(), "switched to switchee".to_string()]
        );
    }

    #[test]
    fn divert_detaches_the_old_downstream() {
        let ff = Rc::new(FakeFount::new());
        let diverter = Rc::new(Diverter::new(DivertablePassthrough));
        let old_drain: Rc<FakeDrain<String>> = Rc::new(FakeDrain::new());
        let switchee_drain: Rc<FakeDrain<String>> = Rc::new(FakeDrain::new());

        diverter.fount_half().flow_to(Some(old_drain.clone()));
        (ff.clone() as Rc<dyn Fount<String>>).flow_to(Some(diverter.drain_half()));

        let switchee = crate::siphon::Siphon::new(Switchee);
        switchee.fount_half().flow_to(Some(switchee_drain.clone()));
        diverter.divert(switchee.drain_half());

        ff.deliver("more".to_string()).unwrap();

        assert!(old_drain.received.borrow().is_empty(), "old downstream must never see post-divert input");
        assert_eq!(*switchee_drain.received.borrow(), vec!["switched more".to_string()]);
    }
}
