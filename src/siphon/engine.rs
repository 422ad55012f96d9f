// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The delivery loop that pulls items out of a [`Tube`](crate::tube::Tube)'s
//! [`LazySeq`] and pushes them downstream.
//!
//! Every function here follows one discipline: borrow the shared
//! [`SiphonState`] just long enough to read or mutate it, then drop the
//! borrow *before* calling into the tube or the downstream drain. Those calls
//! can re-enter this module -- a [`Diverter`](crate::diverter::Diverter)
//! switching drains mid-delivery calls back into a siphon's own machinery
//! from inside `downstream.receive()` -- and a `RefCell` already borrowed
//! higher up the same call stack would panic on the second borrow.
//!
//! Pulling the *next element* of a [`LazySeq`] is always assumed to resolve
//! immediately -- every stream combinator this crate hands a tube is built
//! from `futures_util::stream::{once, iter}`, neither of which ever stalls on
//! `poll_next`. What a tube yields through that stream, an
//! [`Outcome::Pending`](crate::outcome::Outcome::Pending) future, is not
//! assumed to resolve immediately: `run_lazy_seq` polls it once and, if it
//! isn't ready, suspends -- stashing the rest of the sequence and a waker
//! that resumes draining the moment the future completes -- instead of
//! blocking the call stack until it does.

use std::cell::RefCell;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use futures_util::StreamExt;

use crate::drain::Drain;
use crate::error::{TubeError, TubeErrorKind};
use crate::outcome::{BoxFuture, LazySeq, Outcome};
use crate::tube::Tube;

use super::core::SiphonState;

pub(super) fn actually_pause<In, Out, Tb>(state: &Weak<RefCell<SiphonState<In, Out, Tb>>>) {
    if let Some(state) = state.upgrade() {
        let upstream = state.borrow().upstream.clone();
        if let Some(upstream) = upstream {
            let handle = upstream.pause_flow();
            state.borrow_mut().pause_from_downstream = Some(handle);
        }
    }
}

pub(super) fn actually_resume<In, Out, Tb>(state: &Weak<RefCell<SiphonState<In, Out, Tb>>>)
where
    In: 'static,
    Out: 'static,
    Tb: Tube<In, Out> + 'static,
{
    if let Some(state) = state.upgrade() {
        let handle = state.borrow_mut().pause_from_downstream.take();
        if let Some(handle) = handle {
            let _ = handle.release();
        }
        flush_buffer(&state);
    }
}

/// Connects (or detaches) the upstream half of this siphon's flow.
///
/// On reattach, releases any self-pause this siphon was holding against the
/// *old* upstream before recording the new one, and re-applies an equivalent
/// pause against the new upstream if the condition that caused it (no
/// downstream attached, or a tube future still pending) still holds.
/// Detaching (`fount` is `None`) resets `started`, so a later reattach fires
/// `tube.started()` again instead of treating the siphon as already running.
pub(super) fn flowing_from<In, Out, Tb>(state: &Rc<RefCell<SiphonState<In, Out, Tb>>>, fount: Option<Rc<dyn crate::fount::Fount<In>>>)
where
    In: 'static,
    Out: 'static,
    Tb: Tube<In, Out> + 'static,
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
        // `stop_flow` was called before any upstream existed to forward it
        // to; honor it on the newly attached one instead of dropping it on
        // the floor.
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
/// downstream are attached -- a siphon whose downstream never connects never
/// starts its tube at all.
pub(super) fn maybe_fire_started<In, Out, Tb>(state: &Rc<RefCell<SiphonState<In, Out, Tb>>>)
where
    In: 'static,
    Out: 'static,
    Tb: Tube<In, Out> + 'static,
{
    let seq = {
        let mut s = state.borrow_mut();
        if s.started || s.upstream.is_none() || s.downstream.is_none() {
            return;
        }
        s.started = true;
        s.tube.started()
    };
    if let Err(err) = run_lazy_seq(state, seq) {
        tracing::error!(kind = ?err.kind(), "tube failed during started");
        stop_upstream(state);
        deliver_stopped(state, Err(err));
    }
}

fn stop_upstream<In, Out, Tb>(state: &Rc<RefCell<SiphonState<In, Out, Tb>>>) {
    let upstream = state.borrow().upstream.clone();
    if let Some(upstream) = upstream {
        upstream.stop_flow();
    }
}

pub(super) fn deliver_received<In, Out, Tb>(state: &Rc<RefCell<SiphonState<In, Out, Tb>>>, item: In) -> Result<(), TubeError>
where
    In: 'static,
    Out: 'static,
    Tb: Tube<In, Out> + 'static,
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
    let result = match seq_result {
        Ok(seq) => run_lazy_seq(state, seq),
        Err(err) => Err(err),
    };
    if let Err(ref err) = result {
        tracing::error!(kind = ?err.kind(), "tube failed while receiving");
        stop_upstream(state);
        deliver_stopped(state, Err(error_with_kind(err, TubeErrorKind::Received)));
    }
    result
}

pub(super) fn deliver_stopped<In, Out, Tb>(state: &Rc<RefCell<SiphonState<In, Out, Tb>>>, reason: Result<(), TubeError>)
where
    In: 'static,
    Out: 'static,
    Tb: Tube<In, Out> + 'static,
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
    if let DrainOutcome::Done(result) = drive(state, seq) {
        complete_stop(state, result);
    }
    // else: still draining across a suspended future; `resume_pending` will
    // call `complete_stop` once it's truly exhausted.
}

/// Delivers the stashed `flow_stopped` reason downstream (or stashes it for
/// later if no downstream is attached yet) now that the `stopped()` sequence
/// has fully drained. `stop_result` is the outcome of draining that sequence,
/// logged on failure but otherwise discarded -- the reason handed downstream
/// is always the original one flow stopped with, not a secondary failure in
/// the teardown hook.
fn complete_stop<In, Out, Tb>(state: &Rc<RefCell<SiphonState<In, Out, Tb>>>, stop_result: Result<(), TubeError>)
where
    In: 'static,
    Out: 'static,
    Tb: Tube<In, Out> + 'static,
{
    state.borrow_mut().draining_for_stop = false;
    if let Err(err) = stop_result {
        tracing::error!(kind = ?err.kind(), "tube failed during stopped");
    }
    let reason = match state.borrow_mut().finishing_stop_reason.take() {
        Some(reason) => reason,
        None => return,
    };
    let downstream = state.borrow().downstream.clone();
    match downstream {
        Some(downstream) => downstream.flow_stopped(reason),
        None => state.borrow_mut().pending_stop = Some(reason),
    }
}

fn clone_reason(reason: &Result<(), TubeError>) -> Result<(), TubeError> {
    match reason {
        Ok(()) => Ok(()),
        Err(_) => Err(TubeError::new(TubeErrorKind::Stopped, "upstream flow stopped with an error".to_string())),
    }
}

fn error_with_kind(err: &TubeError, kind: TubeErrorKind) -> TubeError {
    TubeError::new(kind, err.to_string())
}

/// Attaches (or detaches) `drain` as the downstream. Attaching releases any
/// self-pause held against upstream on account of no downstream being
/// present, flushes whatever backed up while it was gone, and -- if upstream
/// is already attached too -- fires `tube.started()` for a siphon that never
/// got the chance to start.
pub(super) fn note_downstream<In, Out, Tb>(state: &Rc<RefCell<SiphonState<In, Out, Tb>>>, drain: Option<Rc<dyn Drain<Out>>>)
where
    In: 'static,
    Out: 'static,
    Tb: Tube<In, Out> + 'static,
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

pub(super) fn flush_buffer<In, Out, Tb>(state: &Rc<RefCell<SiphonState<In, Out, Tb>>>)
where
    In: 'static,
    Out: 'static,
    Tb: Tube<In, Out> + 'static,
{
    loop {
        let (item, downstream) = {
            let mut s = state.borrow_mut();
            if s.pauser.is_paused() {
                return;
            }
            let Some(downstream) = s.downstream.clone() else {
                return;
            };
            let Some(item) = s.buffer.pop_front() else {
                if let Some(reason) = s.pending_stop.take() {
                    drop(s);
                    downstream.flow_stopped(reason);
                }
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

/// Whether a call into [`drive`] ran `seq` to exhaustion (or failure) or had
/// to suspend partway through, waiting on a pending future.
enum DrainOutcome {
    Done(Result<(), TubeError>),
    Suspended,
}

/// Drains `seq`, delivering each produced item downstream immediately (or
/// buffering it, if no downstream is attached or it's paused), suspending
/// instead of blocking if a yielded future isn't ready yet.
pub(super) fn run_lazy_seq<In, Out, Tb>(state: &Rc<RefCell<SiphonState<In, Out, Tb>>>, seq: LazySeq<Out>) -> Result<(), TubeError>
where
    In: 'static,
    Out: 'static,
    Tb: Tube<In, Out> + 'static,
{
    match drive(state, seq) {
        DrainOutcome::Done(result) => result,
        DrainOutcome::Suspended => Ok(()),
    }
}

fn drive<In, Out, Tb>(state: &Rc<RefCell<SiphonState<In, Out, Tb>>>, mut seq: LazySeq<Out>) -> DrainOutcome
where
    In: 'static,
    Out: 'static,
    Tb: Tube<In, Out> + 'static,
{
    loop {
        match crate::executor::block_on(seq.next()) {
            None => return DrainOutcome::Done(Ok(())),
            Some(Err(err)) => return DrainOutcome::Done(Err(err)),
            Some(Ok(Outcome::Value(value))) => {
                if let Err(err) = deliver_one(state, value) {
                    return DrainOutcome::Done(Err(err));
                }
            }
            Some(Ok(Outcome::Pending(fut))) => return suspend_on_future(state, seq, fut),
        }
    }
}

fn suspend_on_future<In, Out, Tb>(state: &Rc<RefCell<SiphonState<In, Out, Tb>>>, seq: LazySeq<Out>, mut fut: BoxFuture<Out>) -> DrainOutcome
where
    In: 'static,
    Out: 'static,
    Tb: Tube<In, Out> + 'static,
{
    let waker = make_resume_waker(state);
    let mut cx = Context::from_waker(&waker);
    match fut.as_mut().poll(&mut cx) {
        Poll::Ready(value) => match deliver_one(state, value) {
            Ok(()) => drive(state, seq),
            Err(err) => DrainOutcome::Done(Err(err)),
        },
        Poll::Pending => {
            take_pending_future_pause(state);
            let mut s = state.borrow_mut();
            s.suspended_seq = Some(seq);
            s.pending_future = Some(fut);
            DrainOutcome::Suspended
        }
    }
}

fn make_resume_waker<In, Out, Tb>(state: &Rc<RefCell<SiphonState<In, Out, Tb>>>) -> std::task::Waker
where
    In: 'static,
    Out: 'static,
    Tb: Tube<In, Out> + 'static,
{
    let weak = Rc::downgrade(state);
    crate::waker::local_waker(Rc::new(move || {
        if let Some(state) = weak.upgrade() {
            resume_pending(&state);
        }
    }))
}

/// Called from the waker handed out by `suspend_on_future`: re-polls the
/// stashed future, and if it's now ready, delivers its value and resumes
/// draining the rest of the sequence.
fn resume_pending<In, Out, Tb>(state: &Rc<RefCell<SiphonState<In, Out, Tb>>>)
where
    In: 'static,
    Out: 'static,
    Tb: Tube<In, Out> + 'static,
{
    let mut fut = match state.borrow_mut().pending_future.take() {
        Some(fut) => fut,
        None => return, // spurious or duplicate wake; nothing outstanding
    };
    let waker = make_resume_waker(state);
    let mut cx = Context::from_waker(&waker);
    match fut.as_mut().poll(&mut cx) {
        Poll::Pending => {
            state.borrow_mut().pending_future = Some(fut);
        }
        Poll::Ready(value) => {
            release_pending_future_pause(state);
            let seq = state.borrow_mut().suspended_seq.take();
            let outcome = match deliver_one(state, value) {
                Ok(()) => match seq {
                    Some(seq) => drive(state, seq),
                    None => DrainOutcome::Done(Ok(())),
                },
                Err(err) => DrainOutcome::Done(Err(err)),
            };
            match outcome {
                DrainOutcome::Suspended => {}
                DrainOutcome::Done(result) => {
                    if state.borrow().draining_for_stop {
                        complete_stop(state, result);
                    } else if let Err(err) = result {
                        tracing::error!(kind = ?err.kind(), "tube failed resuming after a pending future");
                        stop_upstream(state);
                        deliver_stopped(state, Err(err));
                    }
                }
            }
        }
    }
}

fn take_pending_future_pause<In, Out, Tb>(state: &Rc<RefCell<SiphonState<In, Out, Tb>>>)
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

fn release_pending_future_pause<In, Out, Tb>(state: &Rc<RefCell<SiphonState<In, Out, Tb>>>) {
    let handle = state.borrow_mut().pause_for_pending_future.take();
    if let Some(handle) = handle {
        let _ = handle.release();
    }
}

fn deliver_one<In, Out, Tb>(state: &Rc<RefCell<SiphonState<In, Out, Tb>>>, item: Out) -> Result<(), TubeError>
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
