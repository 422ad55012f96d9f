// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The upstream half of a connection: something that produces items of type
//! `T` and can be asked to pause, resume, or stop producing them.

use std::fmt;
use std::rc::Rc;

use crate::drain::Drain;
use crate::pauser::PauseHandle;

/// A source of items flowing downstream to a single [`Drain`].
///
/// Kept free of generic methods so that `Rc<dyn Fount<T>>` is itself a usable
/// trait object; the connection logic that needs to own `self` as an `Rc`
/// lives on [`FountConnect`] instead.
pub trait Fount<T> {
    /// Requests that this fount stop delivering items until the returned
    /// handle is released.
    ///
    /// Multiple outstanding pauses compose: the fount only actually resumes
    /// once every handle has been released.
    #[must_use]
    fn pause_flow(&self) -> PauseHandle;

    /// Permanently stops this fount. No further items will be delivered to
    /// its drain; `flow_stopped` will still be called.
    fn stop_flow(&self);

    /// Lets this fount remember `drain` as the one it should push produced
    /// items into, if it needs to keep that around itself (most terminal
    /// founts don't; a [`Siphon`](crate::siphon::Siphon)'s fount-half does,
    /// since it's the one pushing tube output downstream).
    ///
    /// `None` detaches: the fount no longer has anywhere to push items, the
    /// same as if it had never been connected.
    ///
    /// The default is a no-op -- overridden by founts that deliver items
    /// outside of the immediate `flowing_from` call.
    fn note_downstream(&self, drain: Option<Rc<dyn Drain<T>>>) {
        let _ = drain;
    }
}

impl<T> fmt::Debug for dyn Fount<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Fount<_>")
    }
}

/// Extension trait providing the `flow_to` connection operation.
///
/// Split out from [`Fount`] itself because it needs to take `self` by `Rc`
/// in order to hand a reference-counted handle to itself to `drain`.
///
/// Implemented twice rather than as a single blanket impl over `F: Fount<T> +
/// ?Sized`: a method that unsizes `Rc<Self>` into `Rc<dyn Fount<T>>` needs
/// `Self: Sized` to make that coercion well-formed for an arbitrary concrete
/// fount, but a bound like that would make the method uncallable on an
/// already-erased `Rc<dyn Fount<T>>` (the same reason `Iterator::collect`
/// can't be called through `dyn Iterator`). So concrete founts get the
/// coercing blanket impl below, and `dyn Fount<T>` gets its own impl where
/// `self` is already the right type and no coercion is needed.
pub trait FountConnect<T>: Fount<T> {
    /// Connects this fount to `drain`, or detaches its current downstream
    /// when `drain` is `None`.
    ///
    /// Calling this on a fount that already has a drain replaces it; the
    /// previous drain simply stops receiving items (this mirrors `flow_to`
    /// being re-callable to re-pipe a flow). Passing `None` detaches without
    /// calling `flowing_from` on anything -- there is no new drain to notify.
    ///
    /// Returns whatever `drain.flowing_from` returned, forwarded verbatim,
    /// or `None` when detaching.
    fn flow_to(self: Rc<Self>, drain: Option<Rc<dyn Drain<T>>>) -> Option<Rc<dyn Fount<T>>>
    where
        T: 'static;
}

impl<T: 'static, F: Fount<T> + 'static> FountConnect<T> for F {
    fn flow_to(self: Rc<Self>, drain: Option<Rc<dyn Drain<T>>>) -> Option<Rc<dyn Fount<T>>> {
        let erased: Rc<dyn Fount<T>> = self;
        erased.note_downstream(drain.clone());
        drain.and_then(|drain| drain.flowing_from(Some(erased)))
    }
}

impl<T: 'static> FountConnect<T> for dyn Fount<T> {
    fn flow_to(self: Rc<Self>, drain: Option<Rc<dyn Drain<T>>>) -> Option<Rc<dyn Fount<T>>> {
        self.note_downstream(drain.clone());
        drain.and_then(|drain| drain.flowing_from(Some(self)))
    }
}
