// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The coordinator that plugs a [`Tube`] into the middle of a pipeline,
//! turning a `Fount<In>`/`Drain<In>` boundary into a `Fount<Out>`/`Drain<Out>`
//! boundary.
//!
//! A siphon's two halves -- [`SiphonDrainHalf`] and [`SiphonFountHalf`] --
//! share one [`SiphonState`] through an `Rc<RefCell<_>>`. Neither half owns
//! the other; both hold the same shared cell, which is what lets a
//! downstream drain that later calls back into the fount-half (to pause it,
//! say) see the same state the drain-half is feeding.

mod core;
mod engine;

pub use core::{Siphon, SiphonDrainHalf, SiphonFountHalf};
