// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A tube that greets before it processes any input, wired into a pipeline
//! with [`series`] and a plain terminal drain.

use std::cell::RefCell;
use std::rc::Rc;

use tubes::outcome::{self, LazySeq};
use tubes::{series, Drain, Fount, PauseHandle, Pauser, Tube, TubeError};

struct Greeter;

impl Tube<String, String> for Greeter {
    fn started(&mut self) -> LazySeq<String> {
        outcome::one("hello there".to_string())
    }

    fn received(&mut self, item: String) -> Result<LazySeq<String>, TubeError> {
        Ok(outcome::one(item.to_uppercase()))
    }
}

struct StdinLikeFount {
    drain: RefCell<Option<Rc<dyn Drain<String>>>>,
    pauser: Pauser,
}

impl StdinLikeFount {
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

impl Fount<String> for StdinLikeFount {
    fn pause_flow(&self) -> PauseHandle {
        self.pauser.pause()
    }

    fn stop_flow(&self) {
        if let Some(drain) = self.drain.borrow().clone() {
            drain.flow_stopped(Ok(()));
        }
    }

    fn note_downstream(&self, drain: Option<Rc<dyn Drain<String>>>) {
        *self.drain.borrow_mut() = drain;
    }
}

struct PrintingDrain;

impl Drain<String> for PrintingDrain {
    fn flowing_from(self: Rc<Self>, _fount: Option<Rc<dyn Fount<String>>>) -> Option<Rc<dyn Fount<String>>> {
        None
    }

    fn receive(&self, item: String) -> Result<(), TubeError> {
        println!("{item}");
        Ok(())
    }

    fn flow_stopped(&self, reason: Result<(), TubeError>) {
        match reason {
            Ok(()) => println!("(flow stopped cleanly)"),
            Err(err) => println!("(flow stopped: {err})"),
        }
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let fount = StdinLikeFount::new();
    let drain: Rc<dyn Drain<String>> = Rc::new(PrintingDrain);

    series(fount.clone() as Rc<dyn Fount<String>>).pipe(Greeter).to_drain(drain);

    fount.push("good morning");
    fount.push("good night");
    fount.stop_flow();
}
