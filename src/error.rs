// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The error type propagated through a pipeline when a fount, drain, or tube
//! fails.
//!
//! A [`TubeError`] always carries a [`TubeErrorKind`] identifying which stage
//! of the pipeline raised it, plus an optional chained cause. It is the single
//! error type this crate exposes: tubes, founts, and drains all fail with it
//! so that a pipeline's failure path never needs `Box<dyn Error>` fan-in.

use ohno::{Error, OhnoCore};

/// Identifies which part of a pipeline a [`TubeError`] originated in.
///
/// `reassemble` and `received` share [`TubeErrorKind::Received`] because, from
/// a drain's point of view downstream of a siphon, both are just "the tube
/// blew up while processing an item" -- there is no observable difference
/// between a tube raising while consuming fresh input and raising while
/// reassembling diverted output back into input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TubeErrorKind {
    /// A tube's `started` hook raised before any item flowed.
    Started,
    /// A tube's `received` or `reassemble` hook raised while processing an item.
    Received,
    /// A tube's `stopped` hook raised while tearing down the flow.
    Stopped,
    /// A pending output future resolved to an error.
    Pending,
    /// A fount or drain was asked to connect to a peer whose item type did
    /// not match, discovered at a dynamic (type-erased) wiring boundary.
    TypeMismatch,
    /// An operation was attempted on a flow that had already stopped.
    AlreadyStopped,
    /// A [`PauseHandle`](crate::pauser::PauseHandle) was released more than once.
    PauseHandleMisuse,
}

impl std::fmt::Display for TubeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Received => "received",
            Self::Stopped => "stopped",
            Self::Pending => "pending",
            Self::TypeMismatch => "type mismatch",
            Self::AlreadyStopped => "already stopped",
            Self::PauseHandleMisuse => "pause handle misuse",
        };
        f.write_str(s)
    }
}

/// The error type for every fallible operation in this crate.
#[derive(Error)]
#[display("{kind} in tube pipeline: {message}")]
pub struct TubeError {
    kind: TubeErrorKind,
    message: String,
    #[error]
    inner: OhnoCore,
}

impl TubeError {
    /// The pipeline stage that produced this error.
    #[must_use]
    pub fn kind(&self) -> TubeErrorKind {
        self.kind
    }

    /// Builds a [`TubeErrorKind::TypeMismatch`] describing the expected and found type names.
    #[must_use]
    pub fn type_mismatch(expected: &str, found: &str) -> Self {
        Self::new(TubeErrorKind::TypeMismatch, format!("expected item type `{expected}`, found `{found}`"))
    }

    /// Builds a [`TubeErrorKind::AlreadyStopped`] for an operation attempted on a stopped flow.
    #[must_use]
    pub fn already_stopped(context: &str) -> Self {
        Self::new(TubeErrorKind::AlreadyStopped, context.to_string())
    }

    /// Builds a [`TubeErrorKind::PauseHandleMisuse`] for a double-released pause handle.
    #[must_use]
    pub fn pause_handle_misuse() -> Self {
        Self::new(TubeErrorKind::PauseHandleMisuse, "pause handle released more than once".to_string())
    }

    /// Wraps a tube callback's own failure (`started`, `received`, `stopped`, or `reassemble`),
    /// attributing it to the stage name that raised it.
    #[must_use]
    pub fn tube_failure(kind: TubeErrorKind, stage: &'static str, cause: impl std::fmt::Display) -> Self {
        Self::new(kind, format!("tube raised in `{stage}`: {cause}"))
    }

    /// Builds a [`TubeErrorKind::Pending`] error for a future that resolved with a failure.
    #[must_use]
    pub fn awaited_future_failure(cause: impl std::fmt::Display) -> Self {
        Self::new(TubeErrorKind::Pending, format!("deferred output failed: {cause}"))
    }

    /// Re-kinds an error produced deeper in the delivery engine (which doesn't know which stage
    /// is running) with the caller's more specific kind, preserving the message.
    #[must_use]
    pub fn with_kind(&self, kind: TubeErrorKind) -> Self {
        Self::new(kind, self.message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrips_through_display() {
        let err = TubeError::type_mismatch("i32", "String");
        assert_eq!(err.kind(), TubeErrorKind::TypeMismatch);
        assert!(err.to_string().contains("type mismatch"));
        assert!(err.to_string().contains("i32"));
    }

    #[test]
    fn with_kind_preserves_message() {
        let err = TubeError::already_stopped("receive");
        let reported = err.with_kind(TubeErrorKind::Received);
        assert_eq!(reported.kind(), TubeErrorKind::Received);
        assert!(reported.to_string().contains("receive"));
    }
}
