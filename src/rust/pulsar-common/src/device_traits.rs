// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

/// How a device is told the order in which to play its waveforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequencing {
    /// A table of (waveform, trigger wait, repetitions, goto) rows.
    Table,
    /// A sequencer program in text form, one per core.
    SeqC,
}

/// Device specific capabilities used for compiling and uploading.
///
/// All lengths are in samples at `sampling_rate`.
pub struct DeviceTraits {
    pub type_str: &'static str,
    pub sampling_rate: f64,
    /// Every waveform length must be a multiple of this.
    pub granularity: u16,
    /// Element start times must be multiples of this.
    pub element_start_granularity: u16,
    pub min_length: u16,
    /// Samples that must pass between two elements on the same core.
    pub inter_element_deadtime: u16,
    pub supports_codewords: bool,
    pub analog_channels: u16,
    /// Analog channels driven by one sequencer core.
    pub channels_per_awg: u16,
    /// Marker id suffixes appended to the analog id, e.g. `ch1` + `m1`.
    pub marker_suffixes: &'static [&'static str],
    /// Markers are packed with the analog samples into one waveform word.
    pub packs_markers: bool,
    pub sequencing: Sequencing,
    pub max_elements: Option<usize>,
    /// Sequencer instruction memory, in estimated instructions.
    pub max_instructions: Option<u64>,
}

pub const AWG5014_TRAITS: DeviceTraits = DeviceTraits {
    type_str: "AWG5014",
    sampling_rate: 1.2e9,
    granularity: 4,
    element_start_granularity: 4,
    min_length: 252,
    inter_element_deadtime: 0,
    supports_codewords: false,
    analog_channels: 4,
    channels_per_awg: 4,
    marker_suffixes: &["m1", "m2"],
    packs_markers: true,
    sequencing: Sequencing::Table,
    max_elements: Some(8000),
    max_instructions: None,
};

pub const HDAWG8_TRAITS: DeviceTraits = DeviceTraits {
    type_str: "HDAWG8",
    sampling_rate: 2.4e9,
    granularity: 16,
    element_start_granularity: 8,
    min_length: 16,
    inter_element_deadtime: 8,
    supports_codewords: true,
    analog_channels: 8,
    channels_per_awg: 2,
    marker_suffixes: &["m"],
    packs_markers: false,
    sequencing: Sequencing::SeqC,
    max_elements: None,
    max_instructions: Some(16384),
};

pub const UHFQC_TRAITS: DeviceTraits = DeviceTraits {
    type_str: "UHFQC",
    sampling_rate: 1.8e9,
    granularity: 8,
    element_start_granularity: 8,
    min_length: 8,
    inter_element_deadtime: 8,
    supports_codewords: false,
    analog_channels: 2,
    channels_per_awg: 2,
    marker_suffixes: &[],
    packs_markers: false,
    sequencing: Sequencing::SeqC,
    max_elements: None,
    max_instructions: Some(8192),
};

impl DeviceTraits {
    pub fn awg_count(&self) -> u16 {
        self.analog_channels / self.channels_per_awg
    }

    /// One analog output plus its marker bits.
    pub fn channel_group_width(&self) -> u16 {
        1 + self.marker_suffixes.len() as u16
    }

    pub fn analog_ids(&self) -> impl Iterator<Item = String> {
        (1..=self.analog_channels).map(|n| format!("ch{n}"))
    }

    /// Analog ids driven by the sequencer core `awg`.
    pub fn awg_channel_ids(&self, awg: u16) -> Vec<String> {
        let first = awg * self.channels_per_awg + 1;
        (first..first + self.channels_per_awg)
            .map(|n| format!("ch{n}"))
            .collect()
    }

    pub fn marker_ids(&self, analog_id: &str) -> Vec<String> {
        self.marker_suffixes
            .iter()
            .map(|suffix| format!("{analog_id}{suffix}"))
            .collect()
    }

    /// Split a hardware channel id into its 1-based analog output number and
    /// the marker suffix, if any.
    ///
    /// Returns `None` for ids the device does not have.
    pub fn parse_channel_id<'a>(&self, id: &'a str) -> Option<(u16, Option<&'a str>)> {
        let rest = id.strip_prefix("ch")?;
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let number: u16 = rest[..digits].parse().ok()?;
        if number == 0 || number > self.analog_channels {
            return None;
        }
        let suffix = &rest[digits..];
        if suffix.is_empty() {
            return Some((number, None));
        }
        self.marker_suffixes
            .iter()
            .find(|s| **s == suffix)
            .map(|_| (number, Some(suffix)))
    }

    /// Zero-based index of the sequencer core that drives the given channel id.
    pub fn awg_index(&self, id: &str) -> Option<u16> {
        self.parse_channel_id(id)
            .map(|(number, _)| (number - 1) / self.channels_per_awg)
    }

    pub fn samples_to_seconds(&self, samples: i64) -> f64 {
        samples as f64 / self.sampling_rate
    }

    pub fn inter_element_deadtime_seconds(&self) -> f64 {
        self.samples_to_seconds(self.inter_element_deadtime.into())
    }

    pub fn min_length_seconds(&self) -> f64 {
        self.samples_to_seconds(self.min_length.into())
    }
}
