// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Type-erased founts and drains for pipelines whose item types are only
//! known at runtime.
//!
//! [`series`](crate::series::series) wires founts to drains entirely
//! statically: the compiler rejects a type mismatch before the program ever
//! runs. That isn't available to code assembling a pipeline from pieces
//! chosen dynamically -- a plugin loader matching founts and drains up by a
//! registered name, say. For that boundary, [`AnyFount`]/[`AnyDrain`] hold an
//! item type's name alongside a boxed, type-erased handle, so that connecting
//! two dynamically-typed pieces fails with a real [`TubeError::TypeMismatch`]
//! instead of a panic -- the caller still has to name the concrete type it
//! believes both sides share (there is no way around that in Rust without
//! reflection), but the tag check confirms that belief before the downcast.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::drain::Drain;
use crate::error::TubeError;
use crate::fount::Fount;

/// The name of a Rust type, used to check that two dynamically-typed pipeline
/// pieces agree on their item type before they're connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag(&'static str);

impl TypeTag {
    /// The tag for `T`.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self(std::any::type_name::<T>())
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A [`Fount`] whose item type has been erased.
pub struct AnyFount {
    tag: TypeTag,
    payload: Box<dyn Any>,
}

impl fmt::Debug for AnyFount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyFount").field("tag", &self.tag).finish_non_exhaustive()
    }
}

impl AnyFount {
    /// Erases the item type of `fount`.
    pub fn new<T: 'static>(fount: Rc<dyn Fount<T>>) -> Self {
        Self {
            tag: TypeTag::of::<T>(),
            payload: Box::new(fount),
        }
    }

    /// The erased item type.
    #[must_use]
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Recovers the concrete fount, failing with [`TubeError::TypeMismatch`]
    /// if `T` doesn't match the type this `AnyFount` was built from.
    pub fn downcast<T: 'static>(self) -> Result<Rc<dyn Fount<T>>, TubeError> {
        let wanted = TypeTag::of::<T>();
        if wanted != self.tag {
            return Err(TubeError::type_mismatch(&wanted.to_string(), &self.tag.to_string()));
        }
        self.payload
            .downcast::<Rc<dyn Fount<T>>>()
            .map(|boxed| *boxed)
            .map_err(|_| TubeError::type_mismatch(&wanted.to_string(), &self.tag.to_string()))
    }
}

/// A [`Drain`] whose item type has been erased.
pub struct AnyDrain {
    tag: TypeTag,
    payload: Box<dyn Any>,
}

impl fmt::Debug for AnyDrain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyDrain").field("tag", &self.tag).finish_non_exhaustive()
    }
}

impl AnyDrain {
    /// Erases the item type of `drain`.
    pub fn new<T: 'static>(drain: Rc<dyn Drain<T>>) -> Self {
        Self {
            tag: TypeTag::of::<T>(),
            payload: Box::new(drain),
        }
    }

    /// The erased item type.
    #[must_use]
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Recovers the concrete drain, failing with [`TubeError::TypeMismatch`]
    /// if `T` doesn't match the type this `AnyDrain` was built from.
    pub fn downcast<T: 'static>(self) -> Result<Rc<dyn Drain<T>>, TubeError> {
        let wanted = TypeTag::of::<T>();
        if wanted != self.tag {
            return Err(TubeError::type_mismatch(&wanted.to_string(), &self.tag.to_string()));
        }
        self.payload
            .downcast::<Rc<dyn Drain<T>>>()
            .map(|boxed| *boxed)
            .map_err(|_| TubeError::type_mismatch(&wanted.to_string(), &self.tag.to_string()))
    }
}

/// Connects a dynamically-typed fount to a dynamically-typed drain, given the
/// item type `T` the caller believes they share.
///
/// Checks both tags against `T` -- and against each other -- before
/// downcasting either side, so a mismatch on *either* fount or drain reports
/// [`TubeError::TypeMismatch`] the same way regardless of which one was
/// actually wrong.
pub fn flow_to_dynamic<T: 'static>(fount: AnyFount, drain: AnyDrain) -> Result<(), TubeError> {
    if fount.tag != drain.tag {
        return Err(TubeError::type_mismatch(&fount.tag.to_string(), &drain.tag.to_string()));
    }
    let fount = fount.downcast::<T>()?;
    let drain = drain.downcast::<T>()?;
    drain.flowing_from(Some(fount));
    Ok(())
}
