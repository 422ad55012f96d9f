// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Common imports for building a pipeline.
//!
//! Re-exports the most commonly used types from [`tubes`][crate].

pub use crate::{series, Drain, Fount, FountConnect, Series, Siphon, Tube, TubeError, TubeErrorKind};

#[cfg(feature = "divert")]
pub use crate::{Diverter, Divertable};
