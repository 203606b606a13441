// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

pub mod prequery;
pub mod sequence;

pub use prequery::PrequeryCache;
pub use sequence::{
    Element, Goto, PrecomputedResolver, ResolvedSegment, ResolvedSequence, TimingResolver,
};
