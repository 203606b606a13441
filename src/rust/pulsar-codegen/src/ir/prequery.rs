// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use pulsar_common::DeviceUid;

/// Device clocks and channel amplitudes read once before a compilation.
///
/// Filled before timing resolution and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct PrequeryCache {
    clocks: HashMap<DeviceUid, f64>,
    amplitudes: HashMap<String, f64>,
}

impl PrequeryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_clock(&mut self, device: DeviceUid, clock: f64) {
        self.clocks.insert(device, clock);
    }

    pub fn insert_amplitude(&mut self, channel: &str, amplitude: f64) {
        self.amplitudes.insert(channel.to_string(), amplitude);
    }

    pub fn clock(&self, device: &str) -> Option<f64> {
        self.clocks.get(device).copied()
    }

    pub fn amplitude(&self, channel: &str) -> Option<f64> {
        self.amplitudes.get(channel).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty() && self.amplitudes.is_empty()
    }
}
