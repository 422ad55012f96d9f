// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::drain::Drain;
use crate::error::TubeError;
use crate::fount::Fount;
use crate::outcome::{BoxFuture, LazySeq};
use crate::pauser::{PauseHandle, Pauser};
use crate::tube::Tube;

use super::engine;

/// Shared state between a siphon's [`SiphonDrainHalf`] and [`SiphonFountHalf`].
pub(crate) struct SiphonState<In, Out, Tb> {
    pub(crate) tube: Tb,
    pub(crate) upstream: Option<Rc<dyn Fount<In>>>,
    pub(crate) downstream: Option<Rc<dyn Drain<Out>>>,
    /// Items produced before a downstream drain was attached, delivered in
    /// order as soon as one is.
    pub(crate) buffer: VecDeque<Out>,
    pub(crate) started: bool,
    pub(crate) stopped: bool,
    /// Latched by `stop_flow` when there's no upstream yet to forward it to;
    /// reapplied the moment one attaches instead of silently swallowed.
    pub(crate) stop_requested: bool,
    /// Set when the flow stopped before a downstream was attached to hear
    /// about it; replayed as soon as one is.
    pub(crate) pending_stop: Option<Result<(), TubeError>>,
    /// Non-`None` while our downstream has asked us to pause; released (and
    /// cleared) the moment the downstream resumes.
    pub(crate) pause_from_downstream: Option<PauseHandle>,
    /// Non-`None` while this siphon is self-pausing upstream because it has
    /// no downstream to hand output to.
    pub(crate) pause_for_absent_downstream: Option<PauseHandle>,
    /// Non-`None` while a self-pause is held against upstream because the
    /// tube's output sequence yielded a future that hasn't resolved yet.
    pub(crate) pause_for_pending_future: Option<PauseHandle>,
    /// The tail of the tube's output sequence not yet drained, stashed here
    /// while waiting on `pending_future` to resolve.
    pub(crate) suspended_seq: Option<LazySeq<Out>>,
    /// The outstanding future a `started`/`received`/`stopped` call yielded,
    /// polled again once its waker fires.
    pub(crate) pending_future: Option<BoxFuture<Out>>,
    /// Set while draining the sequence `tube.stopped()` produced, including
    /// across a suspend/resume cycle, so the engine knows not to deliver
    /// `flow_stopped` downstream until that sequence is truly exhausted.
    pub(crate) draining_for_stop: bool,
    /// The reason to hand `flow_stopped` once the `stopped()` sequence
    /// currently being drained finishes.
    pub(crate) finishing_stop_reason: Option<Result<(), TubeError>>,
    pub(crate) pauser: Pauser,
}

/// A tube wired into the middle of a pipeline.
///
/// Produced by [`series`](crate::series::series); rarely constructed
/// directly outside of tests that want to exercise a bare siphon.
pub struct Siphon<In, Out, Tb> {
    state: Rc<RefCell<SiphonState<In, Out, Tb>>>,
}

impl<In, Out, Tb> Siphon<In, Out, Tb>
where
    In: 'static,
    Out: 'static,
    Tb: Tube<In, Out> + 'static,
{
    /// Wraps `tube` in a new siphon, not yet connected to any upstream fount
    /// or downstream drain.
    #[must_use]
    pub fn new(tube: Tb) -> Self {
        let state = Rc::new_cyclic(|weak: &std::rc::Weak<RefCell<SiphonState<In, Out, Tb>>>| {
            let weak_for_pause = weak.clone();
            RefCell::new(SiphonState {
                tube,
                upstream: None,
                downstream: None,
                buffer: VecDeque::new(),
                started: false,
                stopped: false,
                stop_requested: false,
                pending_stop: None,
                pause_from_downstream: None,
                pause_for_absent_downstream: None,
                pause_for_pending_future: None,
                suspended_seq: None,
                pending_future: None,
                draining_for_stop: false,
                finishing_stop_reason: None,
                pauser: Pauser::new(
                    {
                        let weak = weak_for_pause.clone();
                        move || engine::actually_pause(&weak)
                    },
                    move || engine::actually_resume(&weak_for_pause)
                ),
            })
        });
        Self { state }
    }

    /// The drain-half of this siphon: feed it items from an upstream fount
    /// via [`FountConnect::flow_to`](crate::fount::FountConnect::flow_to).
    #[must_use]
    pub fn drain_half(&self) -> Rc<SiphonDrainHalf<In, Out, Tb>> {
        Rc::new(SiphonDrainHalf { state: Rc::clone(&self.state) })
    }

    /// The fount-half of this siphon: connect it to a downstream drain.
    #[must_use]
    pub fn fount_half(&self) -> Rc<SiphonFountHalf<In, Out, Tb>> {
        Rc::new(SiphonFountHalf { state: Rc::clone(&self.state) })
    }
}

/// The [`Drain<In>`] side of a [`Siphon`].
pub struct SiphonDrainHalf<In, Out, Tb> {
    pub(crate) state: Rc<RefCell<SiphonState<In, Out, Tb>>>,
}

impl<In, Out, Tb> Drain<In> for SiphonDrainHalf<In, Out, Tb>
where
    In: 'static,
    Out: 'static,
    Tb: Tube<In, Out> + 'static,
{
    /// Always returns `None`: this siphon's real outward fount is
    /// [`fount_half`](Siphon::fount_half), of type `Out`, which can't be
    /// expressed as the `Rc<dyn Fount<In>>` this method's signature allows.
    fn flowing_from(self: Rc<Self>, fount: Option<Rc<dyn Fount<In>>>) -> Option<Rc<dyn Fount<In>>> {
        engine::flowing_from(&self.state, fount);
        None
    }

    fn receive(&self, item: In) -> Result<(), TubeError> {
        engine::deliver_received(&self.state, item)
    }

    fn flow_stopped(&self, reason: Result<(), TubeError>) {
        engine::deliver_stopped(&self.state, reason);
    }
}

/// The [`Fount<Out>`] side of a [`Siphon`].
pub struct SiphonFountHalf<In, Out, Tb> {
    pub(crate) state: Rc<RefCell<SiphonState<In, Out, Tb>>>,
}

impl<In, Out, Tb> Fount<Out> for SiphonFountHalf<In, Out, Tb>
where
    In: 'static,
    Out: 'static,
    Tb: Tube<In, Out> + 'static,
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
        engine::note_downstream(&self.state, drain);
    }
}

