// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end pipeline scenarios and quantified invariants, exercised
//! entirely through the crate's public API plus its `test-util` doubles.

use std::rc::Rc;

use tubes::fount::FountConnect;
use tubes::outcome::{self, LazySeq};
use tubes::testing::{self, BufferedFount, FakeDrain, FakeFount, PassthroughTube};
use tubes::{series, Drain, Fount, Pauser, Tube, TubeError};

struct Greeter;
impl Tube<(), &'static str> for Greeter {
    fn started(&mut self) -> LazySeq<&'static str> {
        outcome::one("greeting")
    }
    fn received(&mut self, _item: ()) -> Result<LazySeq<&'static str>, TubeError> {
        Ok(outcome::empty())
    }
}

#[test]
fn greeting_arrives_before_any_input_is_pushed() {
    let fount = Rc::new(FakeFount::<()>::new());
    let drain = Rc::new(FakeDrain::<&'static str>::new());

    series(fount as Rc<dyn Fount<()>>).pipe(Greeter).to_drain(drain.clone());

    assert_eq!(*drain.received.borrow(), vec!["greeting"]);
}

/// A `stopped` hook whose conclusion only resolves once the test calls
/// [`testing::DeferHandle::resolve`] on the handle it stashes -- unlike an
/// `async { value }` literal, which resolves on its very first poll and so
/// never actually exercises a siphon's suspend/resume path.
struct SlowStop {
    handle: Rc<std::cell::RefCell<Option<testing::DeferHandle<String>>>>,
}

impl Tube<String, String> for SlowStop {
    fn received(&mut self, item: String) -> Result<LazySeq<String>, TubeError> {
        Ok(outcome::one(item))
    }

    fn stopped(&mut self, _reason: Result<(), TubeError>) -> LazySeq<String> {
        let (tx, rx) = testing::defer();
        *self.handle.borrow_mut() = Some(tx);
        Box::pin(futures_util::stream::once(async move { Ok(outcome::Outcome::Pending(Box::pin(rx))) }))
    }
}

#[test]
fn slow_stop_delivers_its_pending_conclusion_before_flow_stopped() {
    let fount = Rc::new(FakeFount::<String>::new());
    let drain = Rc::new(FakeDrain::<String>::new());
    let handle = Rc::new(std::cell::RefCell::new(None));

    series(fount.clone() as Rc<dyn Fount<String>>).pipe(SlowStop { handle: handle.clone() }).to_drain(drain.clone());

    fount.finish(Err(TubeError::already_stopped("upstream failed")));

    assert!(drain.received.borrow().is_empty(), "conclusion must not arrive until its future resolves");
    assert_eq!(drain.stop_count(), 0, "flow_stopped must wait for stopped()'s output to drain first");

    handle.borrow().as_ref().unwrap().resolve("conclusion".to_string());

    assert_eq!(*drain.received.borrow(), vec!["conclusion".to_string()]);
    assert_eq!(drain.stop_count(), 1);
    assert_eq!(drain.last_stop_was_ok(), Some(false));
}

#[test]
fn buffered_fount_unspools_into_a_downstream_attached_later() {
    let fount = Rc::new(BufferedFount::<i32>::new());
    fount.buffer_up(1);
    fount.buffer_up(2);

    let drain = Rc::new(FakeDrain::<i32>::new());
    series(fount as Rc<dyn Fount<i32>>).pipe(PassthroughTube).to_drain(drain.clone());

    assert_eq!(*drain.received.borrow(), vec![1, 2]);
}

/// Echoes its input back through an `Outcome::Pending` future that only
/// resolves once the test calls [`testing::DeferHandle::resolve`], so a pause
/// applied before delivery has to hold across a genuine suspend, not just a
/// future that happens to resolve on its first poll.
struct DeferredEcho {
    handle: Rc<std::cell::RefCell<Option<testing::DeferHandle<String>>>>,
}
impl Tube<String, String> for DeferredEcho {
    fn received(&mut self, item: String) -> Result<LazySeq<String>, TubeError> {
        let (tx, rx) = testing::defer();
        *self.handle.borrow_mut() = Some(tx);
        Ok(Box::pin(futures_util::stream::once(async move {
            let _ = item;
            Ok(outcome::Outcome::Pending(Box::pin(rx)))
        })))
    }
}

#[test]
fn pause_applied_before_delivery_buffers_the_resolved_item() {
    let fount = Rc::new(FakeFount::<String>::new());
    let drain = Rc::new(FakeDrain::<String>::new());
    let handle = Rc::new(std::cell::RefCell::new(None));

    series(fount.clone() as Rc<dyn Fount<String>>).pipe(DeferredEcho { handle: handle.clone() }).to_drain(drain.clone());

    let pause = drain.pause_upstream();
    fount.deliver("y".to_string()).unwrap();
    assert!(drain.received.borrow().is_empty(), "paused downstream must not receive the resolved item yet");

    handle.borrow().as_ref().unwrap().resolve("y".to_string());
    assert!(drain.received.borrow().is_empty(), "still paused: resolving the future must not bypass the pause");

    pause.release().unwrap();
    assert_eq!(*drain.received.borrow(), vec!["y".to_string()]);
}

struct RaisingStart;
impl Tube<String, String> for RaisingStart {
    fn started(&mut self) -> LazySeq<String> {
        Box::pin(futures_util::stream::once(async { Err(TubeError::tube_failure(tubes::TubeErrorKind::Started, "started", "boom")) }))
    }
    fn received(&mut self, item: String) -> Result<LazySeq<String>, TubeError> {
        Ok(outcome::one(item))
    }
}

#[test]
fn started_raising_stops_upstream_and_notifies_downstream() {
    let fount = Rc::new(FakeFount::<String>::new());
    let drain = Rc::new(FakeDrain::<String>::new());

    series(fount.clone() as Rc<dyn Fount<String>>).pipe(RaisingStart).to_drain(drain.clone());

    assert!(fount.is_stopped(), "upstream must observe stop_flow after started raises");
    assert_eq!(drain.stop_count(), 1);
    assert_eq!(drain.last_stop_was_ok(), Some(false));
}

#[test]
fn order_preservation_through_a_passthrough_tube() {
    let fount = Rc::new(FakeFount::<i32>::new());
    let drain = Rc::new(FakeDrain::<i32>::new());

    series(fount.clone() as Rc<dyn Fount<i32>>).pipe(PassthroughTube).to_drain(drain.clone());

    for item in 1..=5 {
        fount.deliver(item).unwrap();
    }
    assert_eq!(*drain.received.borrow(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn pause_idempotence_fires_first_pause_and_last_resume_exactly_once() {
    use std::cell::Cell;

    let pauses = Rc::new(Cell::new(0));
    let resumes = Rc::new(Cell::new(0));
    let p = Rc::clone(&pauses);
    let r = Rc::clone(&resumes);
    let pauser = Pauser::new(move || p.set(p.get() + 1), move || r.set(r.get() + 1));

    let handles: Vec<_> = (0..4).map(|_| pauser.pause()).collect();
    assert_eq!(pauses.get(), 1);
    assert_eq!(resumes.get(), 0);

    for handle in &handles {
        handle.release().unwrap();
    }
    assert_eq!(pauses.get(), 1);
    assert_eq!(resumes.get(), 1);

    for handle in &handles {
        assert!(handle.release().is_err(), "double release of an already-released handle must report misuse");
    }
    assert_eq!(resumes.get(), 1, "double release of already-released handles must not re-fire on_last_resume");
}

struct Double;
impl Tube<i32, i32> for Double {
    fn received(&mut self, item: i32) -> Result<LazySeq<i32>, TubeError> {
        Ok(outcome::one(item * 2))
    }
}

struct Increment;
impl Tube<i32, i32> for Increment {
    fn received(&mut self, item: i32) -> Result<LazySeq<i32>, TubeError> {
        Ok(outcome::one(item + 1))
    }
}

#[test]
fn series_flattening_matches_nested_composition() {
    let flat_fount = Rc::new(FakeFount::<i32>::new());
    let flat_drain = Rc::new(FakeDrain::<i32>::new());
    series(flat_fount.clone() as Rc<dyn Fount<i32>>)
        .pipe(Double)
        .pipe(Increment)
        .pipe(PassthroughTube)
        .to_drain(flat_drain.clone());

    let nested_fount = Rc::new(FakeFount::<i32>::new());
    let nested_drain = Rc::new(FakeDrain::<i32>::new());
    let inner = series(nested_fount.clone() as Rc<dyn Fount<i32>>).pipe(Double).pipe(Increment).into_fount();
    series(inner).pipe(PassthroughTube).to_drain(nested_drain.clone());

    for item in [1, 2, 3] {
        flat_fount.deliver(item).unwrap();
        nested_fount.deliver(item).unwrap();
    }

    assert_eq!(*flat_drain.received.borrow(), *nested_drain.received.borrow());
}
