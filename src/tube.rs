// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The per-item transform plugged into a [`Siphon`](crate::siphon::Siphon) to
//! turn a `Fount<In>`/`Drain<In>` pair into a `Fount<Out>`/`Drain<Out>` pair.

use crate::error::TubeError;
use crate::outcome::{self, LazySeq};

/// A stateful transform from a stream of `In` items to a stream of `Out`
/// items.
///
/// None of these hooks take `&mut self` directly -- a [`Siphon`](crate::siphon::Siphon)
/// owns the tube behind a `RefCell` and is responsible for the borrow
/// discipline around calling into it, since `received` can itself trigger
/// reentrant calls back into the siphon (for instance via a
/// [`Diverter`](crate::diverter::Diverter) mid-delivery).
#[allow(unused_variables)]
pub trait Tube<In, Out: 'static> {
    /// Called once, before the first item is received, to let the tube
    /// produce any items it wants to emit before consuming any input.
    ///
    /// The default produces nothing.
    fn started(&mut self) -> LazySeq<Out> {
        outcome::empty()
    }

    /// Called for each item flowing in. May produce zero, one, or many
    /// output items per input item.
    fn received(&mut self, item: In) -> Result<LazySeq<Out>, TubeError>;

    /// Called once the upstream flow has ended, to let the tube flush any
    /// buffered state into final output items before `flow_stopped`
    /// propagates further downstream.
    ///
    /// The default produces nothing.
    fn stopped(&mut self, reason: Result<(), TubeError>) -> LazySeq<Out> {
        outcome::empty()
    }
}

/// Extends [`Tube`] with the ability to take part in mid-flow diversion.
///
/// A divertable tube must be able to turn output it has already produced,
/// but which never reached the old downstream, back into a replacement
/// output sequence to hand to the *new* downstream a
/// [`Diverter`](crate::diverter::Diverter) has just switched in -- so that
/// diverting never silently drops in-flight data.
#[cfg(feature = "divert")]
pub trait Divertable<In: 'static, Out>: Tube<In, Out> {
    /// Reassembles output produced before a divert, but not yet delivered to
    /// the old downstream, into the sequence that should replace it -- routed
    /// to the new downstream directly, bypassing this tube entirely.
    ///
    /// `unconsumed` holds every such item, oldest first. Note the result is a
    /// lazy sequence of *inputs*, not outputs: once a diverter switches
    /// drains, the tube is cut out of the path between upstream and the new
    /// downstream, so there is nothing left to turn these outputs back into
    /// except more of the new downstream's own input type. For a tube whose
    /// `Out` already equals its `In`, this can simply hand the items back
    /// unchanged via [`outcome::from_values`](crate::outcome::from_values).
    fn reassemble(&mut self, unconsumed: Vec<Out>) -> Result<LazySeq<In>, TubeError>;
}
