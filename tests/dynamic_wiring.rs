// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end exercise of runtime-typed wiring via [`AnyFount`]/[`AnyDrain`],
//! reached entirely through the crate's public API plus its `test-util` doubles.

use std::rc::Rc;

use tubes::fount::FountConnect;
use tubes::testing::{FakeDrain, FakeFount};
use tubes::{flow_to_dynamic, AnyDrain, AnyFount, Fount, TubeErrorKind};

#[test]
fn matching_type_tags_connect_and_items_flow_through() {
    let fount = Rc::new(FakeFount::<i32>::new());
    let drain = Rc::new(FakeDrain::<i32>::new());

    let any_fount = AnyFount::new(fount.clone() as Rc<dyn Fount<i32>>);
    let any_drain = AnyDrain::new(drain.clone() as Rc<dyn tubes::Drain<i32>>);
    assert_eq!(any_fount.tag(), any_drain.tag(), "same item type must produce the same tag");

    flow_to_dynamic::<i32>(any_fount, any_drain).unwrap();

    fount.deliver(1).unwrap();
    fount.deliver(2).unwrap();
    assert_eq!(*drain.received.borrow(), vec![1, 2]);
}

#[test]
fn mismatched_type_tags_report_type_mismatch_and_connect_nothing() {
    let fount = Rc::new(FakeFount::<i32>::new());
    let drain = Rc::new(FakeDrain::<String>::new());

    let any_fount = AnyFount::new(fount.clone() as Rc<dyn Fount<i32>>);
    let any_drain = AnyDrain::new(drain.clone() as Rc<dyn tubes::Drain<String>>);
    assert_ne!(any_fount.tag(), any_drain.tag());

    let err = flow_to_dynamic::<i32>(any_fount, any_drain).unwrap_err();
    assert_eq!(err.kind(), TubeErrorKind::TypeMismatch);

    assert!(fount.deliver(1).is_err(), "a fount that failed to connect must still reject delivery");
}

#[test]
fn downcasting_with_the_wrong_type_parameter_also_reports_type_mismatch() {
    let fount = Rc::new(FakeFount::<i32>::new());
    let any_fount = AnyFount::new(fount as Rc<dyn Fount<i32>>);

    let err = any_fount.downcast::<String>().unwrap_err();
    assert_eq!(err.kind(), TubeErrorKind::TypeMismatch);
}
