// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Compilation of resolved pulse sequences into per-device waveform memories
//! and sequence tables.
//!
//! The crate is free of hardware access. Everything here is a pure function of
//! the resolved sequence, the channel registry and the device capabilities, so
//! compiling the same input twice yields identical output.

pub mod channel;
pub mod distortion;
pub mod grid;
pub mod ir;
pub mod result;
pub mod sample_waveforms;
pub mod sequence_table;
pub mod settings;
pub mod signature;
pub(crate) mod utils;

pub use utils::string_sanitize;

use pulsar_common::Samples;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid value: {0}")]
    Validation(String),
    #[error("Device '{0}' is already registered")]
    DuplicateDevice(String),
    #[error("Channel '{channel}' is already registered on device '{device}'")]
    DuplicateChannel { channel: String, device: String },
    #[error("Device '{0}' is not registered")]
    UnknownDevice(String),
    #[error("Channel '{0}' not found")]
    NotFound(String),
    #[error(
        "Element '{element}' on device '{device}': {what} {value} is not a multiple of the granularity {granularity}"
    )]
    Granularity {
        device: String,
        element: String,
        what: &'static str,
        value: Samples,
        granularity: u16,
    },
    #[error(
        "Element '{element}' on device '{device}': length {length} is below the minimum waveform length {min_length}"
    )]
    WaveformTooShort {
        device: String,
        element: String,
        length: Samples,
        min_length: u16,
    },
    #[error("Element '{element}' on device '{device}': invalid goto target '{target}'")]
    InvalidGotoTarget {
        device: String,
        element: String,
        target: String,
    },
    #[error("Codeword {codeword} on device '{device}': {reason}")]
    CodewordConflict {
        device: String,
        codeword: u32,
        reason: String,
    },
    #[error("Element '{element}' uses codewords, which device '{device}' does not support")]
    CodewordsUnsupported { device: String, element: String },
    #[error("Program for device '{device}' is too large: {size} exceeds the limit of {limit}")]
    ProgramTooLarge { device: String, size: u64, limit: u64 },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    pub fn new(msg: &str) -> Self {
        Error::Anyhow(anyhow::anyhow!(msg.to_string()))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
