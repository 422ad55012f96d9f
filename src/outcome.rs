// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The lazy, possibly-asynchronous sequence type yielded by tube operations.
//!
//! A tube's `received`/`reassemble`/`stopped` hooks don't return a plain
//! `Vec<Out>`: each produced item may need to wait on a future before it's
//! ready (a tube performing a lookup mid-stream, say). [`Outcome`] carries
//! either case uniformly, and [`LazySeq`] is the stream of them that a
//! siphon's engine drains, driving any pending futures on the ambient
//! [executor](crate::executor) as it goes.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use futures_core::Stream;

use crate::error::TubeError;

/// A future yielding a single already-`'static`, unpinned value, boxed for
/// storage in a non-generic sequence.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T>>>;

/// One element of a tube's output sequence: either ready now, or pending on
/// a future that will resolve to it.
pub enum Outcome<T> {
    /// The value is ready.
    Value(T),
    /// The value is not ready yet; the engine must poll this future to
    /// completion (via the ambient executor) before delivering it downstream.
    Pending(BoxFuture<T>),
}

impl<T: fmt::Debug> fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Pending(_) => f.debug_tuple("Pending").field(&"<future>").finish(),
        }
    }
}

impl<T> Outcome<T> {
    /// Wraps an already-available value.
    pub fn ready(value: T) -> Self {
        Self::Value(value)
    }

    /// Wraps a future that will resolve to the value.
    pub fn pending(fut: impl Future<Output = T> + 'static) -> Self {
        Self::Pending(Box::pin(fut))
    }
}

/// The lazy output sequence produced by a tube's `started`, `received`,
/// `reassemble`, or `stopped` hook.
///
/// Modeled as a `Stream` rather than an `Iterator` so that a siphon's engine
/// can interleave polling it with polling the pending futures of items it has
/// already pulled, instead of blocking the whole pipeline on one slow item
/// before looking at the next.
pub type LazySeq<T> = Pin<Box<dyn Stream<Item = Result<Outcome<T>, TubeError>>>>;

/// Builds a [`LazySeq`] that yields no items at all.
pub fn empty<T: 'static>() -> LazySeq<T> {
    Box::pin(futures_util::stream::empty())
}

/// Builds a [`LazySeq`] that yields exactly one ready value.
pub fn one<T: 'static>(value: T) -> LazySeq<T> {
    Box::pin(futures_util::stream::once(async move { Ok(Outcome::ready(value)) }))
}

/// Builds a [`LazySeq`] from an iterator of already-ready values.
pub fn from_values<T: 'static>(values: impl IntoIterator<Item = T, IntoIter: 'static>) -> LazySeq<T> {
    Box::pin(futures_util::stream::iter(values.into_iter().map(|v| Ok(Outcome::ready(v)))))
}
