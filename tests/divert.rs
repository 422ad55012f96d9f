// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end exercise of [`Diverter`], reached entirely through the crate's
//! public API plus its `test-util` doubles.

use std::rc::Rc;

use tubes::fount::FountConnect;
use tubes::outcome::{self, LazySeq};
use tubes::testing::{self, FakeDrain, FakeFount};
use tubes::{Diverter, Divertable, Fount, Siphon, Tube, TubeError};

/// Splits incoming text on `"BORK"`, emitting each piece as a separate item;
/// reassembles unconsumed pieces by marking each with a `"(bork was here)"`
/// sentinel ahead of it.
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

struct Switchee;
impl Tube<String, String> for Switchee {
    fn received(&mut self, item: String) -> Result<LazySeq<String>, TubeError> {
        Ok(outcome::one(format!("switched {item}")))
    }
}

/// Diverts as soon as it sees its first item, switching the diverter's
/// output away from the plain tail drain over to a fresh `Switchee`.
struct Switcher {
    diverter: Rc<Diverter<String, String, BorkSplitter>>,
    switchee_drain: Rc<FakeDrain<String>>,
}
impl Tube<String, String> for Switcher {
    fn received(&mut self, item: String) -> Result<LazySeq<String>, TubeError> {
        let switchee = Siphon::new(Switchee);
        switchee.fount_half().flow_to(Some(self.switchee_drain.clone()));
        self.diverter.divert(switchee.drain_half());
        Ok(outcome::one(item))
    }
}

#[test]
fn divert_with_reassembly_routes_and_prefixes_as_the_scenario_describes() {
    let source = Rc::new(FakeFount::new());
    let diverter = Rc::new(Diverter::new(BorkSplitter));
    let switchee_drain: Rc<FakeDrain<String>> = Rc::new(FakeDrain::new());

    let switcher = Siphon::new(Switcher {
        diverter: diverter.clone(),
        switchee_drain: switchee_drain.clone(),
    });
    let tail_drain: Rc<FakeDrain<String>> = Rc::new(FakeDrain::new());
    switcher.fount_half().flow_to(Some(tail_drain.clone()));

    diverter.fount_half().flow_to(Some(switcher.drain_half()));
    (source.clone() as Rc<dyn Fount<String>>).flow_to(Some(diverter.drain_half()));

    source.deliver("beforeBORKto switchee".to_string()).unwrap();

    assert_eq!(
        *switchee_drain.received.borrow(),
        vec!["switched (bork was here)".to_string(), "switched to switchee".to_string()]
    );
    assert!(tail_drain.received.borrow().is_empty(), "the old downstream must never see post-divert input");
}

/// A divertable passthrough whose `reassemble` hands items straight back
/// unchanged, the setup the "Divert conservation" invariant is stated against.
struct DivertablePassthrough;
impl Tube<i32, i32> for DivertablePassthrough {
    fn received(&mut self, item: i32) -> Result<LazySeq<i32>, TubeError> {
        Ok(outcome::one(item))
    }
}
impl Divertable<i32, i32> for DivertablePassthrough {
    fn reassemble(&mut self, unconsumed: Vec<i32>) -> Result<LazySeq<i32>, TubeError> {
        Ok(outcome::from_values(unconsumed))
    }
}

#[test]
fn divert_conservation_loses_nothing_received_before_or_after_the_switch() {
    let source = Rc::new(FakeFount::new());
    let diverter = Rc::new(Diverter::new(DivertablePassthrough));
    let old_drain: Rc<FakeDrain<i32>> = Rc::new(FakeDrain::new());
    let new_drain: Rc<FakeDrain<i32>> = Rc::new(FakeDrain::new());

    diverter.fount_half().flow_to(Some(old_drain.clone()));
    (source.clone() as Rc<dyn Fount<i32>>).flow_to(Some(diverter.drain_half()));

    source.deliver(1).unwrap();
    source.deliver(2).unwrap();

    diverter.divert(new_drain.clone());

    source.deliver(3).unwrap();
    source.deliver(4).unwrap();

    assert_eq!(*old_drain.received.borrow(), vec![1, 2], "everything received before divert() must reach the old drain");
    assert_eq!(*new_drain.received.borrow(), vec![3, 4], "everything received after divert() must reach the new drain");
}

/// A divertable tube whose `received` hook suspends on a not-yet-resolved
/// future, so diverting while that call is still outstanding has to settle
/// correctly once the future (and the delivery loop it's driving) resumes.
struct SlowSplitter {
    handle: Rc<std::cell::RefCell<Option<testing::DeferHandle<String>>>>,
}
impl Tube<String, String> for SlowSplitter {
    fn received(&mut self, item: String) -> Result<LazySeq<String>, TubeError> {
        let (tx, rx) = testing::defer();
        *self.handle.borrow_mut() = Some(tx);
        Ok(Box::pin(futures_util::stream::once(async move {
            let _ = item;
            Ok(outcome::Outcome::Pending(Box::pin(rx)))
        })))
    }
}
impl Divertable<String, String> for SlowSplitter {
    fn reassemble(&mut self, unconsumed: Vec<String>) -> Result<LazySeq<String>, TubeError> {
        Ok(outcome::from_values(unconsumed))
    }
}

#[test]
fn divert_settles_after_a_suspended_future_resolves() {
    let source = Rc::new(FakeFount::new());
    let handle = Rc::new(std::cell::RefCell::new(None));
    let diverter = Rc::new(Diverter::new(SlowSplitter { handle: handle.clone() }));
    let old_drain: Rc<FakeDrain<String>> = Rc::new(FakeDrain::new());
    let new_drain: Rc<FakeDrain<String>> = Rc::new(FakeDrain::new());

    diverter.fount_half().flow_to(Some(old_drain.clone()));
    (source.clone() as Rc<dyn Fount<String>>).flow_to(Some(diverter.drain_half()));

    source.deliver("pending".to_string()).unwrap();
    assert!(old_drain.received.borrow().is_empty(), "the item must still be suspended on its pending future");

    diverter.divert(new_drain.clone());
    assert!(old_drain.received.borrow().is_empty());
    assert!(new_drain.received.borrow().is_empty(), "settling the diversion only happens once the suspended call truly finishes");

    handle.borrow().as_ref().unwrap().resolve("pending".to_string());

    assert!(old_drain.received.borrow().is_empty(), "the old drain must never see output settled after a divert");
    assert_eq!(*new_drain.received.borrow(), vec!["pending".to_string()]);
}
