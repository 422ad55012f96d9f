// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The ambient reactor that drives [`Outcome::Pending`](crate::outcome::Outcome::Pending)
//! futures to completion.
//!
//! Pipelines built from this crate are single-threaded and `!Send`, so they
//! cannot be driven by a work-stealing multi-thread runtime. A siphon's
//! engine resolves a pending output by parking the current call on it here,
//! which is sufficient for a cooperative, single-threaded pipeline: there is
//! no other flow making progress on this thread while one item's future is
//! outstanding, so blocking this call is indistinguishable from yielding to
//! it.

use std::future::Future;

/// Drives `fut` to completion on this thread.
pub fn block_on<F: Future>(fut: F) -> F::Output {
    futures_executor::block_on(fut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_on_resolves_a_ready_future() {
        assert_eq!(block_on(async { 1 + 1 }), 2);
    }
}
