// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Upload and synchronization of compiled pulse sequences.
//!
//! Instruments are registered with a [`driver::AwgDriver`] giving access to the
//! hardware. [`Pulsar::program`] compiles a sequence for all of them, and
//! [`Pulsar::start`] starts the trigger slaves before the trigger master.

pub mod backend;
pub mod driver;
pub mod error;
mod session;

pub use error::{Error, Result, create_error_message};
pub use session::{Pulsar, PulsarState};

pub use pulsar_codegen::channel::{Channel, DistortionMode, OffsetMode};
pub use pulsar_codegen::ir::{
    Element, Goto, PrecomputedResolver, PrequeryCache, ResolvedSegment, ResolvedSequence,
    TimingResolver,
};
pub use pulsar_codegen::result::{CompileReport, CompiledProgram, DeviceReport};
pub use pulsar_codegen::settings::{CompilerSettings, InterElementSpacing};
pub use pulsar_common::DeviceClass;

#[cfg(test)]
mod tests;
