// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fluent composition of founts, tubes, and a terminal drain into one
//! connected pipeline.
//!
//! `series(fount)` wraps a fount in a builder; each `.pipe(tube)` call wraps
//! the next tube in a [`Siphon`](crate::siphon::Siphon), wires it to the
//! fount so far, and hands back a builder over the siphon's own output type.
//! The chain is finished with either [`Series::into_fount`] (to keep
//! composing downstream later) or [`Series::to_drain`] (to close the
//! pipeline off).

use std::rc::Rc;

use crate::drain::Drain;
use crate::fount::{Fount, FountConnect};
use crate::siphon::Siphon;
use crate::tube::Tube;

/// Starts a fluent pipeline from `fount`.
#[must_use]
pub fn series<T: 'static>(fount: Rc<dyn Fount<T>>) -> Series<T> {
    Series { fount }
}

/// A pipeline under construction, currently producing items of type `T`.
#[must_use = "a Series does nothing until it reaches a drain via `to_drain`"]
pub struct Series<T> {
    fount: Rc<dyn Fount<T>>,
}

impl<T: 'static> Series<T> {
    /// Appends `tube`, returning a builder over its output type.
    pub fn pipe<Out, Tb>(self, tube: Tb) -> Series<Out>
    where
        Out: 'static,
        Tb: Tube<T, Out> + 'static,
    {
        let siphon = Siphon::new(tube);
        self.fount.flow_to(Some(siphon.drain_half()));
        Series { fount: siphon.fount_half() }
    }

    /// Closes the pipeline by connecting it to a terminal drain.
    pub fn to_drain(self, drain: Rc<dyn Drain<T>>) {
        self.fount.flow_to(Some(drain));
    }

    /// Stops building and returns the fount representing everything
    /// assembled so far, to be wired up (or composed further) later.
    #[must_use]
    pub fn into_fount(self) -> Rc<dyn Fount<T>> {
        self.fount
    }
}
