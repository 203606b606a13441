// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Logging macros shared by the pulsar crates.
//!
//! The macros forward to the [`log`] facade with a `pulsar::<module>` target so that
//! an application can filter compiler and orchestration output independently.

use std::sync::{atomic::AtomicBool, atomic::Ordering};

#[doc(hidden)]
pub use log as _log;

#[macro_export]
macro_rules! debug {
    ($msg:literal, $($arg:tt)+) => {
        pulsar_log::_log::debug!(target: concat!("pulsar::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        pulsar_log::_log::debug!(target: concat!("pulsar::", module_path!()), $msg);
    };
}

#[macro_export]
macro_rules! info {
    ($msg:literal, $($arg:tt)+) => {
        pulsar_log::_log::info!(target: concat!("pulsar::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        pulsar_log::_log::info!(target: concat!("pulsar::", module_path!()), $msg);
    };
}

#[macro_export]
macro_rules! warn {
    ($msg:literal, $($arg:tt)+) => {
        pulsar_log::_log::warn!(target: concat!("pulsar::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        pulsar_log::_log::warn!(target: concat!("pulsar::", module_path!()), $msg);
    };
}

/// Log a diagnostic message at info level if diagnostics logging is enabled.
///
/// Diagnostics cover per-waveform and per-statement detail that is too noisy
/// for regular compilation runs.
#[macro_export]
macro_rules! diagnostic {
    ($msg:literal, $($arg:tt)+) => {
        if pulsar_log::is_diagnostics_enabled() {
             pulsar_log::_log::info!(target: concat!("pulsar::", module_path!()), $msg, $($arg)+);
        }
    };
    ($msg:literal) => {
        if pulsar_log::is_diagnostics_enabled() {
            pulsar_log::_log::info!(target: concat!("pulsar::", module_path!()), $msg);
        }
    };
}

static DIAGNOSTICS_ENABLED: AtomicBool = AtomicBool::new(false);

#[inline]
pub fn is_diagnostics_enabled() -> bool {
    DIAGNOSTICS_ENABLED.load(Ordering::Acquire)
}

/// Initialize the logging.
///
/// Call once at session start. No concrete logger is installed here; the
/// embedding application picks one (e.g. `env_logger`) for the `log` facade.
pub fn init_logging(with_diagnostics: bool) {
    DIAGNOSTICS_ENABLED.store(with_diagnostics, Ordering::Release);
}
