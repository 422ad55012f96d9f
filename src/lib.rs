// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(docsrs, feature(doc_cfg))]

//! A typed dataflow pipeline runtime: [`Fount`]s produce items, [`Drain`]s
//! consume them, and [`Tube`]s sit in between transforming one into the
//! other.
//!
//! The four concepts compose like this:
//!
//! - A [`Fount<T>`] is a source of `T`s that can be paused, resumed, or
//!   stopped -- backpressure is cooperative: a fount only delivers while its
//!   [`Pauser`] is unpaused.
//! - A [`Drain<T>`] is a sink that a fount's items flow into.
//! - A [`Tube<In, Out>`] is a stateful transform plugged into a [`Siphon`],
//!   which wraps it into a `Fount<Out>`/`Drain<In>` pair so it can sit in the
//!   middle of a chain.
//! - [`series`] strings founts, tubes, and a terminal drain together fluently.
//!
//! Everything here is single-threaded and cooperative: types are `!Send`,
//! coordination happens through `Rc<RefCell<_>>` rather than locks, and a
//! tube that needs to wait on something returns a pending
//! [`Outcome`](outcome::Outcome). The owning siphon polls that future once
//! and, if it isn't ready yet, suspends delivery and self-pauses its
//! upstream rather than blocking -- resuming automatically, through a waker,
//! the moment the future completes.
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use tubes::outcome::{self, LazySeq};
//! use tubes::{series, Drain, Fount, FountConnect, TubeError};
//!
//! struct Greeter;
//! impl tubes::Tube<(), &'static str> for Greeter {
//!     fn started(&mut self) -> LazySeq<&'static str> {
//!         outcome::one("greeting")
//!     }
//!     fn received(&mut self, _item: ()) -> Result<LazySeq<&'static str>, TubeError> {
//!         Ok(outcome::empty())
//!     }
//! }
//!
//! struct PrintingFount;
//! impl Fount<()> for PrintingFount {
//!     fn pause_flow(&self) -> tubes::PauseHandle {
//!         tubes::Pauser::new(|| {}, || {}).pause()
//!     }
//!     fn stop_flow(&self) {}
//! }
//!
//! #[derive(Default)]
//! struct CollectingDrain {
//!     received: RefCell<Vec<&'static str>>,
//! }
//! impl Drain<&'static str> for CollectingDrain {
//!     fn flowing_from(self: Rc<Self>, _fount: Option<Rc<dyn Fount<&'static str>>>) -> Option<Rc<dyn Fount<&'static str>>> {
//!         None
//!     }
//!     fn receive(&self, item: &'static str) -> Result<(), TubeError> {
//!         self.received.borrow_mut().push(item);
//!         Ok(())
//!     }
//!     fn flow_stopped(&self, _reason: Result<(), TubeError>) {}
//! }
//!
//! let fount: Rc<dyn Fount<()>> = Rc::new(PrintingFount);
//! let drain = Rc::new(CollectingDrain::default());
//! series(fount).pipe(Greeter).to_drain(drain.clone());
//! assert_eq!(*drain.received.borrow(), vec!["greeting"]);
//! ```

pub mod drain;
pub mod error;
pub mod executor;
pub mod fount;
pub mod outcome;
pub mod pauser;
pub mod prelude;
pub mod series;
pub mod siphon;
pub mod tube;

mod waker;

#[cfg(feature = "divert")]
pub mod diverter;

#[cfg(feature = "dynamic")]
pub mod dynamic;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use drain::Drain;
pub use error::{TubeError, TubeErrorKind};
pub use fount::{Fount, FountConnect};
pub use pauser::{PauseHandle, Pauser};
pub use series::{series, Series};
pub use siphon::{Siphon, SiphonDrainHalf, SiphonFountHalf};
pub use tube::Tube;

#[cfg(feature = "divert")]
pub use diverter::{Diverter, DiverterDrainHalf, DiverterFountHalf};
#[cfg(feature = "divert")]
pub use tube::Divertable;

#[cfg(feature = "dynamic")]
pub use dynamic::{flow_to_dynamic, AnyDrain, AnyFount, TypeTag};
