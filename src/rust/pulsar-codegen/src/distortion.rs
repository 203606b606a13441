// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Precompensation of known output distortions.

use crate::channel::{Channel, DistortionMode};

/// Causal convolution of `samples` with the FIR `kernel`, truncated to the input length.
pub fn apply_fir(samples: &[f64], kernel: &[f64]) -> Vec<f64> {
    (0..samples.len())
        .map(|n| {
            kernel
                .iter()
                .take(n + 1)
                .enumerate()
                .map(|(k, h)| h * samples[n - k])
                .sum()
        })
        .collect()
}

/// Samples as they must be played on `channel`.
///
/// Channels with precalculated distortion get every kernel applied in order.
pub fn precompensate(channel: &Channel, samples: &[f64]) -> Vec<f64> {
    match channel.distortion() {
        DistortionMode::Off => samples.to_vec(),
        DistortionMode::Precalculate => channel
            .distortion_kernels()
            .values()
            .fold(samples.to_vec(), |acc, kernel| apply_fir(&acc, kernel)),
    }
}
