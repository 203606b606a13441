// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Content keys of waveforms as stored in waveform memory.
//!
//! Two channel-group waveforms with the same key are guaranteed to hold the
//! same samples on every channel of the group, so only one of them is uploaded.
//! The key is computed over the padded, un-packed samples; packing markers into
//! the device word format happens afterwards and never changes the key.
use serde::Serialize;
use sha1::{Digest, Sha1};

use crate::utils::{normalize_f64, string_sanitize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WaveformKey {
    /// SHA-1 over the analog and all marker samples of the group.
    key: String,
    /// SHA-1 over the analog samples only.
    analog_key: String,
}

fn update_with_samples(hasher: &mut Sha1, samples: &[f64]) {
    hasher.update((samples.len() as u64).to_le_bytes());
    for sample in samples {
        hasher.update(normalize_f64(*sample).to_le_bytes());
    }
}

impl WaveformKey {
    /// Number of hex digits of the key used in waveform names.
    const NAME_HASH_LEN: usize = 16;

    pub fn new(analog: &[f64], markers: &[Vec<f64>]) -> Self {
        let mut hasher = Sha1::new();
        update_with_samples(&mut hasher, analog);
        let analog_key = format!("{:x}", hasher.clone().finalize());
        for marker in markers {
            update_with_samples(&mut hasher, marker);
        }
        let key = format!("{:x}", hasher.finalize());
        WaveformKey { key, analog_key }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn analog_key(&self) -> &str {
        &self.analog_key
    }

    /// Deterministic storage name of the waveform on `device`.
    pub fn waveform_name(&self, device: &str) -> String {
        string_sanitize(&format!("{device}_{}", &self.key[..Self::NAME_HASH_LEN]))
    }
}

/// Quantize a sample to the given amplitude resolution.
pub fn quantize_amplitude(value: f64, amplitude_resolution_range: u64) -> f64 {
    (value * amplitude_resolution_range as f64).round() / amplitude_resolution_range as f64
}
