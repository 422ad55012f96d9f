// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A pipeline that splits its input on a keyword and reroutes everything
//! after the keyword to a different drain, demonstrating [`Diverter::divert`].

use std::cell::RefCell;
use std::rc::Rc;

use tubes::outcome::{self, LazySeq};
use tubes::{Diverter, Divertable, Drain, Fount, FountConnect, PauseHandle, Pauser, Siphon, Tube, TubeError};

/// Splits incoming text on `"BORK"`, emitting each piece as a separate item.
/// When diverted mid-flow, reassembles unconsumed pieces by marking each with
/// a `"(bork was here)"` sentinel ahead of it.
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

/// Prefixes every item with `"switched "` -- the tube routed to after a
/// diversion has taken place.
struct Switchee;

impl Tube<String, String> for Switchee {
    fn received(&mut self, item: String) -> Result<LazySeq<String>, TubeError> {
        Ok(outcome::one(format!("switched {item}")))
    }
}

/// Diverts as soon as the first item flows, switching the diverter's output
/// from this (plain, un-prefixed) tube over to a fresh [`Switchee`] siphon.
struct Switcher {
    diverter: Rc<Diverter<String, String, BorkSplitter>>,
    switchee_drain: Rc<dyn Drain<String>>,
}

impl Tube<String, String> for Switcher {
    fn received(&mut self, _item: String) -> Result<LazySeq<String>, TubeError> {
        let switchee = Siphon::new(Switchee);
        switchee.fount_half().flow_to(Some(Rc::clone(&self.switchee_drain)));
        self.diverter.divert(switchee.drain_half());
        Ok(outcome::empty())
    }
}

struct PrintingDrain(&'static str);

impl Drain<String> for PrintingDrain {
    fn flowing_from(self: Rc<Self>, _fount: Option<Rc<dyn Fount<String>>>) -> Option<Rc<dyn Fount<String>>> {
        None
    }

    fn receive(&self, item: String) -> Result<(), TubeError> {
        println!("[{}] {item}", self.0);
        Ok(())
    }

    fn flow_stopped(&self, _reason: Result<(), TubeError>) {}
}

struct OneShotFount {
    drain: RefCell<Option<Rc<dyn Drain<String>>>>,
    pauser: Pauser,
}

impl OneShotFount {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            drain: RefCell::new(None),
            pauser: Pauser::new(|| {}, || {}),
        })
    }

    fn push(&self, line: &str) {
        if let Some(drain) = self.drain.borrow().clone() {
            drain.receive(line.to_string()).expect("line accepted");
        }
    }
}

impl Fount<String> for OneShotFount {
    fn pause_flow(&self) -> PauseHandle {
        self.pauser.pause()
    }

    fn stop_flow(&self) {}

    fn note_downstream(&self, drain: Option<Rc<dyn Drain<String>>>) {
        *self.drain.borrow_mut() = drain;
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let source = OneShotFount::new();
    let diverter = Rc::new(Diverter::new(BorkSplitter));
    let switchee_drain: Rc<dyn Drain<String>> = Rc::new(PrintingDrain("switchee"));

    let switcher_siphon = Siphon::new(Switcher {
        diverter: Rc::clone(&diverter),
        switchee_drain,
    });
    let switcher_drain: Rc<dyn Drain<String>> = Rc::new(PrintingDrain("switcher"));
    switcher_siphon.fount_half().flow_to(Some(switcher_drain));

    diverter.fount_half().flow_to(Some(switcher_siphon.drain_half()));
    (source.clone() as Rc<dyn Fount<String>>).flow_to(Some(diverter.drain_half()));

    source.push("beforeBORKto switchee");
}
