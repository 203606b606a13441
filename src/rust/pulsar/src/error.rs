// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Errors of the orchestration layer.
//!
//! Compilation failures are carried as [`pulsar_codegen::Error`]; hardware
//! driver failures arrive as [`anyhow::Error`] with their context chain.

use pulsar_codegen::Error as CodegenError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("No backend supports device '{device}' of class '{class}'")]
    UnsupportedDevice { device: String, class: String },
    #[error("Device '{device}' did not start within {timeout} s")]
    SlaveStartTimeout { device: String, timeout: f64 },
    #[error(transparent)]
    Codegen(#[from] CodegenError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    pub fn new(msg: &str) -> Self {
        Error::Anyhow(anyhow::anyhow!(msg.to_string()))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Collect the source errors and format them into a string.
///
/// The original error message is excluded from the context.
fn create_context_message(error: &anyhow::Error) -> Option<String> {
    let mut causes = error
        .chain()
        .skip(1)
        .map(|cause| format!("{cause}"))
        .collect::<Vec<_>>();
    if causes.is_empty() {
        return None;
    }
    // Reverse to show the most last cause first
    causes.reverse();
    let msg = format!("Caused by:\n  {:}", causes.join("\n  "));
    Some(msg)
}

fn get_anyhow_error(error: &Error) -> Option<&anyhow::Error> {
    match error {
        Error::Anyhow(e) => Some(e),
        Error::Codegen(CodegenError::Anyhow(e)) => Some(e),
        _ => None,
    }
}

/// Format an error together with the chain of contexts it was raised in.
pub fn create_error_message(error: &Error) -> String {
    if let Some(error_context) = get_anyhow_error(error).and_then(create_context_message) {
        return format!("{error}\n{error_context}");
    }
    format!("{error}")
}
