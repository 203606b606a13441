// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Module for defining settings for the compiler and the orchestrator.
use serde::Deserialize;

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct SanitizationChange {
    pub field: &'static str,
    pub original: String,
    pub sanitized: String,
    pub reason: String,
}

/// Time between two consecutive elements on one device.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InterElementSpacing {
    /// Largest dead time of all registered devices.
    #[default]
    Auto,
    /// Fixed spacing in seconds.
    Fixed(f64),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompilerSettings {
    amplitude_resolution_bits: u64,
    pub loop_sequence: bool,
    pub emit_timing_comments: bool,
    pub inter_element_spacing: InterElementSpacing,
    /// Seconds to wait for trigger slaves to report running.
    pub slave_start_timeout: f64,
    pub slave_poll_interval: f64,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        CompilerSettings {
            amplitude_resolution_bits: 0,
            loop_sequence: true,
            emit_timing_comments: false,
            inter_element_spacing: InterElementSpacing::Auto,
            slave_start_timeout: 10.0,
            slave_poll_interval: 0.1,
        }
    }
}

impl CompilerSettings {
    const MAX_AMPLITUDE_RESOLUTION_BITS: u64 = 52;
    const MAX_SLAVE_START_TIMEOUT: f64 = 3600.0;

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Anyhow(anyhow::Error::new(e).context("Invalid compiler settings")))
    }

    /// Bits of amplitude resolution waveforms are quantized to before deduplication.
    ///
    /// Zero disables quantization, so only bit identical waveforms are shared.
    pub fn with_amplitude_resolution_bits(mut self, bits: u64) -> Self {
        self.amplitude_resolution_bits = bits;
        self
    }

    pub fn with_loop_sequence(mut self, loop_sequence: bool) -> Self {
        self.loop_sequence = loop_sequence;
        self
    }

    pub fn with_timing_comments(mut self, emit: bool) -> Self {
        self.emit_timing_comments = emit;
        self
    }

    pub fn amplitude_resolution_bits(&self) -> u64 {
        self.amplitude_resolution_bits
    }

    pub(crate) fn amplitude_resolution_range(&self) -> u64 {
        if self.amplitude_resolution_bits > 0 {
            1 << self.amplitude_resolution_bits
        } else {
            0
        }
    }

    pub fn sanitize(&mut self) -> Result<Vec<SanitizationChange>> {
        let mut changes = vec![];
        if !self.slave_start_timeout.is_finite() || !self.slave_poll_interval.is_finite() {
            return Err(Error::new(
                "Expected the slave start timeout and poll interval to be finite",
            ));
        }
        if self.amplitude_resolution_bits > Self::MAX_AMPLITUDE_RESOLUTION_BITS {
            changes.push(SanitizationChange {
                field: "amplitude_resolution_bits",
                original: self.amplitude_resolution_bits.to_string(),
                sanitized: Self::MAX_AMPLITUDE_RESOLUTION_BITS.to_string(),
                reason: "Exceeds the f64 mantissa.".to_string(),
            });
            self.amplitude_resolution_bits = Self::MAX_AMPLITUDE_RESOLUTION_BITS;
        }
        if self.slave_start_timeout < 0.0 {
            changes.push(SanitizationChange {
                field: "slave_start_timeout",
                original: self.slave_start_timeout.to_string(),
                sanitized: "0".to_string(),
                reason: "Negative timeout.".to_string(),
            });
            self.slave_start_timeout = 0.0;
        }
        if self.slave_start_timeout > Self::MAX_SLAVE_START_TIMEOUT {
            changes.push(SanitizationChange {
                field: "slave_start_timeout",
                original: self.slave_start_timeout.to_string(),
                sanitized: Self::MAX_SLAVE_START_TIMEOUT.to_string(),
                reason: "Exceeds one hour.".to_string(),
            });
            self.slave_start_timeout = Self::MAX_SLAVE_START_TIMEOUT;
        }
        if self.slave_poll_interval <= 0.0 || self.slave_poll_interval > self.slave_start_timeout {
            let sanitized = Self::default()
                .slave_poll_interval
                .min(self.slave_start_timeout);
            changes.push(SanitizationChange {
                field: "slave_poll_interval",
                original: self.slave_poll_interval.to_string(),
                sanitized: sanitized.to_string(),
                reason: "Must be positive and not exceed the timeout.".to_string(),
            });
            self.slave_poll_interval = sanitized;
        }
        if let InterElementSpacing::Fixed(spacing) = self.inter_element_spacing {
            if !spacing.is_finite() || spacing < 0.0 {
                changes.push(SanitizationChange {
                    field: "inter_element_spacing",
                    original: spacing.to_string(),
                    sanitized: "auto".to_string(),
                    reason: "Must be a non-negative number of seconds.".to_string(),
                });
                self.inter_element_spacing = InterElementSpacing::Auto;
            }
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = CompilerSettings::default();
        assert_eq!(settings.amplitude_resolution_range(), 0);
        assert_eq!(settings.slave_start_timeout, 10.0);
        assert_eq!(settings.slave_poll_interval, 0.1);
        assert_eq!(settings.inter_element_spacing, InterElementSpacing::Auto);
        assert_eq!(
            settings
                .with_amplitude_resolution_bits(4)
                .amplitude_resolution_range(),
            16
        );
    }

    #[test]
    fn test_from_json() {
        let settings = CompilerSettings::from_json(
            r#"{"loop_sequence": false, "inter_element_spacing": {"fixed": 1e-7}, "amplitude_resolution_bits": 20}"#,
        )
        .unwrap();
        assert!(!settings.loop_sequence);
        assert_eq!(
            settings.inter_element_spacing,
            InterElementSpacing::Fixed(1e-7)
        );
        assert_eq!(settings.amplitude_resolution_bits(), 20);
        assert_eq!(settings.slave_start_timeout, 10.0);

        let settings = CompilerSettings::from_json(r#"{"inter_element_spacing": "auto"}"#).unwrap();
        assert_eq!(settings.inter_element_spacing, InterElementSpacing::Auto);
        assert!(CompilerSettings::from_json(r#"{"loop_sequence": 3}"#).is_err());
    }

    #[test]
    fn test_sanitization_change() {
        let mut settings = CompilerSettings {
            slave_poll_interval: 20.0,
            inter_element_spacing: InterElementSpacing::Fixed(-1.0),
            ..Default::default()
        }
        .with_amplitude_resolution_bits(64);
        let changes = settings.sanitize().unwrap();
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].field, "amplitude_resolution_bits");
        assert_eq!(settings.amplitude_resolution_bits(), 52);
        assert_eq!(changes[1].field, "slave_poll_interval");
        assert_eq!(settings.slave_poll_interval, 0.1);
        assert_eq!(changes[2].field, "inter_element_spacing");
        assert_eq!(settings.inter_element_spacing, InterElementSpacing::Auto);

        assert!(settings.sanitize().unwrap().is_empty());

        settings.slave_start_timeout = f64::NAN;
        assert!(settings.sanitize().is_err());
    }

    #[test]
    fn test_slave_start_timeout_is_bounded() {
        let mut settings = CompilerSettings {
            slave_start_timeout: 1e19,
            ..Default::default()
        };
        let changes = settings.sanitize().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "slave_start_timeout");
        assert_eq!(settings.slave_start_timeout, 3600.0);
        assert_eq!(settings.slave_poll_interval, 0.1);
    }
}
