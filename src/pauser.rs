// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reference-counted backpressure signaling shared by every [`Fount`](crate::Fount)
//! implementation.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::TubeError;

/// Tracks how many outstanding pause requests are active against a flow, and
/// invokes an `actually_pause`/`actually_resume` pair of callbacks exactly
/// once each time the outstanding count transitions to/from zero.
///
/// Cloning a [`Pauser`] (via [`PauseHandle::release`] bookkeeping) never
/// clones the underlying counter: all [`PauseHandle`]s minted by one `Pauser`
/// share it through an `Rc`.
pub struct Pauser {
    inner: Rc<Inner>,
}

struct Inner {
    count: Cell<u32>,
    actually_pause: RefCell<Box<dyn FnMut()>>,
    actually_resume: RefCell<Box<dyn FnMut()>>,
}

impl fmt::Debug for Pauser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pauser")
            .field("count", &self.inner.count.get())
            .finish_non_exhaustive()
    }
}

impl Pauser {
    /// Creates a new `Pauser`, given the callbacks to invoke when the flow
    /// first becomes paused and when it returns to a fully unpaused state.
    pub fn new(actually_pause: impl FnMut() + 'static, actually_resume: impl FnMut() + 'static) -> Self {
        Self {
            inner: Rc::new(Inner {
                count: Cell::new(0),
                actually_pause: RefCell::new(Box::new(actually_pause)),
                actually_resume: RefCell::new(Box::new(actually_resume)),
            }),
        }
    }

    /// Registers a new pause against the flow, returning a handle that must
    /// be [`release`](PauseHandle::release)d to undo it.
    ///
    /// Calls `actually_pause` the moment the outstanding count transitions
    /// from zero to one; subsequent calls while already paused are no-ops
    /// besides bumping the count.
    #[must_use]
    pub fn pause(&self) -> PauseHandle {
        let was_zero = self.inner.count.get() == 0;
        self.inner.count.set(self.inner.count.get() + 1);
        if was_zero {
            (self.inner.actually_pause.borrow_mut())();
        }
        PauseHandle {
            inner: Rc::clone(&self.inner),
            released: Cell::new(false),
        }
    }

    /// Whether at least one [`PauseHandle`] minted by this `Pauser` is still
    /// outstanding.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.count.get() > 0
    }
}

/// A single outstanding pause request against a [`Pauser`].
///
/// Deliberately does not release on [`Drop`]: a dropped-without-releasing
/// handle is a programmer error (a permanently stuck flow), not something
/// this type should paper over by guessing at the right moment to resume.
#[derive(Debug)]
pub struct PauseHandle {
    inner: Rc<Inner>,
    released: Cell<bool>,
}

impl PauseHandle {
    /// Releases this pause request.
    ///
    /// Calls `actually_resume` the moment the outstanding count returns to
    /// zero. Releasing the same handle twice reports
    /// [`TubeErrorKind::PauseHandleMisuse`](crate::error::TubeErrorKind::PauseHandleMisuse)
    /// instead of silently doing nothing -- a double release is a programmer
    /// error worth surfacing, not a condition to paper over.
    pub fn release(&self) -> Result<(), TubeError> {
        if self.released.replace(true) {
            return Err(TubeError::pause_handle_misuse());
        }
        let count = self.inner.count.get() - 1;
        self.inner.count.set(count);
        if count == 0 {
            (self.inner.actually_resume.borrow_mut())();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_and_release_toggle_exactly_on_transitions() {
        let pauses = Rc::new(Cell::new(0));
        let resumes = Rc::new(Cell::new(0));
        let p1 = Rc::clone(&pauses);
        let r1 = Rc::clone(&resumes);
        let pauser = Pauser::new(move || p1.set(p1.get() + 1), move || r1.set(r1.get() + 1));

        let a = pauser.pause();
        assert_eq!(pauses.get(), 1);
        let b = pauser.pause();
        assert_eq!(pauses.get(), 1, "second concurrent pause must not re-invoke actually_pause");

        a.release().unwrap();
        assert_eq!(resumes.get(), 0, "still one outstanding pause");
        b.release().unwrap();
        assert_eq!(resumes.get(), 1);
    }

    #[test]
    fn releasing_twice_reports_misuse() {
        let resumes = Rc::new(Cell::new(0));
        let r1 = Rc::clone(&resumes);
        let pauser = Pauser::new(|| {}, move || r1.set(r1.get() + 1));
        let handle = pauser.pause();
        handle.release().unwrap();
        assert!(handle.release().is_err());
        assert_eq!(resumes.get(), 1);
    }

    #[test]
    fn is_paused_reflects_outstanding_handles() {
        let pauser = Pauser::new(|| {}, || {});
        assert!(!pauser.is_paused());
        let handle = pauser.pause();
        assert!(pauser.is_paused());
        handle.release().unwrap();
        assert!(!pauser.is_paused());
    }
}
