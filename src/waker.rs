// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A `Waker` for this crate's single-threaded, `!Send` pipelines.
//!
//! `std::task::Wake` only builds a `Waker` from an `Arc<T: Send + Sync>`,
//! which a siphon's `Rc<RefCell<_>>` state can never be. Every pipeline in
//! this crate lives entirely on one thread (see the crate-level docs), so a
//! hand-built `RawWaker` around an `Rc` is sound as long as it is never
//! cloned, woken, or dropped off that thread -- which nothing in this crate
//! ever does.

use std::rc::Rc;
use std::task::{RawWaker, RawWakerVTable, Waker};

type Resume = Rc<dyn Fn()>;

/// Builds a `Waker` that calls `resume` the moment it's woken.
///
/// Used by a siphon's delivery engine to resume draining a tube's output
/// sequence once a pending future it yielded completes.
pub(crate) fn local_waker(resume: Resume) -> Waker {
    let raw = RawWaker::new(into_ptr(resume), &VTABLE);
    unsafe { Waker::from_raw(raw) }
}

fn into_ptr(resume: Resume) -> *const () {
    Box::into_raw(Box::new(resume)) as *const ()
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop_resume);

unsafe fn clone(ptr: *const ()) -> RawWaker {
    let resume = unsafe { &*(ptr as *const Resume) };
    RawWaker::new(into_ptr(Rc::clone(resume)), &VTABLE)
}

unsafe fn wake(ptr: *const ()) {
    let resume = unsafe { Box::from_raw(ptr as *mut Resume) };
    resume();
}

unsafe fn wake_by_ref(ptr: *const ()) {
    let resume = unsafe { &*(ptr as *const Resume) };
    resume();
}

unsafe fn drop_resume(ptr: *const ()) {
    drop(unsafe { Box::from_raw(ptr as *mut Resume) });
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::task::{Context, Poll};

    use super::*;

    #[test]
    fn wake_invokes_the_closure() {
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let waker = local_waker(Rc::new(move || c.set(c.get() + 1)));
        waker.wake_by_ref();
        waker.wake_by_ref();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn clone_keeps_the_same_callback_alive() {
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let waker = local_waker(Rc::new(move || c.set(c.get() + 1)));
        let cloned = waker.clone();
        drop(waker);
        cloned.wake();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn usable_as_a_poll_context() {
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let waker = local_waker(Rc::new(move || c.set(c.get() + 1)));
        let mut cx = Context::from_waker(&waker);
        let mut fut = Box::pin(async { 1 });
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Ready(1));
    }
}
