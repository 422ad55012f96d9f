// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The downstream half of a connection: something that consumes items of
//! type `T` produced by a connected [`Fount`].

use std::fmt;
use std::rc::Rc;

use crate::error::TubeError;
use crate::fount::Fount;

/// A sink that items of type `T` flow into from a single [`Fount`].
pub trait Drain<T> {
    /// Called each time a fount connects to this drain via
    /// [`FountConnect::flow_to`](crate::fount::FountConnect::flow_to), to
    /// record the upstream fount -- or, when `fount` is `None`, to record
    /// that this drain has been detached from whatever it was attached to.
    ///
    /// Calling this again with a different fount re-points the drain at its
    /// new upstream; any self-pause this drain was holding against the old
    /// one is released first, and re-applied against the new one if it's
    /// still warranted (for instance, a [`Siphon`](crate::siphon::Siphon)
    /// drain-half that's self-pausing because it has no downstream yet).
    ///
    /// A plain terminal drain just stashes `fount` to call `pause_flow`/
    /// `stop_flow` on later, and always returns `None` here. A siphon
    /// drain-half does the same bookkeeping, but callers that want to
    /// continue wiring a chain past a siphon use its
    /// [`fount_half`](crate::siphon::Siphon::fount_half), not the return
    /// value of this method -- unlike the upstream fount's item type, a
    /// siphon's outward fount produces a different item type, so it can't
    /// be expressed as an `Rc<dyn Fount<T>>` with the same `T`.
    fn flowing_from(self: Rc<Self>, fount: Option<Rc<dyn Fount<T>>>) -> Option<Rc<dyn Fount<T>>>;

    /// Delivers one item. Returns an error if the drain (or a tube wrapping
    /// it) fails while processing the item.
    fn receive(&self, item: T) -> Result<(), TubeError>;

    /// Called when the upstream flow has ended, successfully or not.
    ///
    /// `reason` is `Ok(())` for a clean stop, or `Err(_)` describing why the
    /// flow failed. A drain that itself fails while handling this is only
    /// logged, never re-raised: there is nothing further downstream of a
    /// `flow_stopped` call to propagate an error to.
    fn flow_stopped(&self, reason: Result<(), TubeError>);
}

impl<T> fmt::Debug for dyn Drain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Drain<_>")
    }
}
