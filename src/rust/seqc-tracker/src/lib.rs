// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Sequencer programs for devices that are driven by a sequencer core.
//!
//! Programs are assembled as typed statements and only rendered to text once
//! they are complete, so goto targets, codewords and the program size are
//! checked before any source exists.

pub mod awg_program;
pub mod codeword_tracker;
pub mod seqc_generator;
pub mod seqc_statements;

pub use pulsar_codegen::{Error, Result};
