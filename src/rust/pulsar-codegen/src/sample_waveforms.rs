// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Deduplication and packing of the waveforms of one device.
//!
//! For every element the samples of each channel group are padded with trailing
//! zeros to the element length on that sequencer core, keyed by content and
//! stored once per key. Devices that pack markers into the analog word get their
//! blobs packed after keying.

use std::collections::{BTreeMap, HashSet};

use indexmap::IndexMap;
use pulsar_common::{DeviceTraits, DeviceUid, Samples, Sequencing};
use pulsar_log::{diagnostic, warn};
use serde::Serialize;

use crate::channel::ChannelRegistry;
use crate::distortion::precompensate;
use crate::grid::{ceil_to_grid, is_on_grid};
use crate::ir::{Element, Goto, ResolvedSequence};
use crate::settings::CompilerSettings;
use crate::signature::{WaveformKey, quantize_amplitude};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum WaveformData {
    /// 14 bit analog samples with marker 1 and 2 in the two upper bits.
    Packed(Vec<u16>),
    Channels {
        analog: Vec<f64>,
        markers: Vec<Vec<f64>>,
    },
}

impl WaveformData {
    pub fn len(&self) -> usize {
        match self {
            WaveformData::Packed(words) => words.len(),
            WaveformData::Channels { analog, .. } => analog.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackedWaveform {
    pub name: String,
    pub key: WaveformKey,
    pub data: WaveformData,
    /// Any marker sample is set.
    pub has_markers: bool,
}

/// Waveform name per channel group.
pub type GroupWaveforms = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct PackedElement {
    pub name: String,
    pub segment: String,
    pub start: Samples,
    pub trigger_wait: bool,
    pub repetitions: u32,
    pub goto: Option<Goto>,
    pub readout: bool,
    pub waveforms: GroupWaveforms,
    pub codewords: IndexMap<u32, GroupWaveforms>,
}

impl PackedElement {
    pub fn is_codeword_element(&self) -> bool {
        !self.codewords.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceWaveforms {
    pub device: DeviceUid,
    pub waveforms: IndexMap<String, PackedWaveform>,
    pub elements: Vec<PackedElement>,
    /// Channel groups with at least one active channel that has samples.
    pub active_groups: Vec<String>,
}

impl DeviceWaveforms {
    /// The device has nothing to play in this sequence.
    pub fn is_empty(&self) -> bool {
        self.active_groups.is_empty()
    }
}

/// Pack analog samples in [-1, 1] and two markers into AWG5014 waveform words.
pub fn pack_waveform(analog: &[f64], marker1: &[f64], marker2: &[f64]) -> Result<Vec<u16>> {
    analog
        .iter()
        .enumerate()
        .map(|(i, &sample)| {
            if !(-1.0..=1.0).contains(&sample) {
                return Err(Error::Validation(format!(
                    "Sample {sample} at index {i} is outside [-1, 1] and cannot be packed"
                )));
            }
            let word = (sample * 8191.0 + 8191.5).trunc() as u16;
            let m1 = marker1.get(i).is_some_and(|m| *m != 0.0) as u16;
            let m2 = marker2.get(i).is_some_and(|m| *m != 0.0) as u16;
            Ok(word + 16384 * m1 + 32768 * m2)
        })
        .collect()
}

#[derive(Debug, Default)]
struct GroupSamples {
    analog: Option<Vec<f64>>,
    markers: Vec<Option<Vec<f64>>>,
}

impl GroupSamples {
    fn length(&self) -> usize {
        self.analog
            .iter()
            .chain(self.markers.iter().flatten())
            .map(Vec::len)
            .max()
            .unwrap_or(0)
    }
}

type Branch = (Option<u32>, IndexMap<String, GroupSamples>);

fn collect_branch(
    device: &DeviceUid,
    traits: &DeviceTraits,
    registry: &ChannelRegistry,
    waveforms: &IndexMap<String, Vec<f64>>,
) -> Result<IndexMap<String, GroupSamples>> {
    let mut groups: IndexMap<String, GroupSamples> = IndexMap::new();
    for (name, samples) in waveforms {
        let channel = registry.lookup(name)?;
        if channel.device() != device {
            return Err(Error::Validation(format!(
                "Channel '{name}' belongs to device '{}', not to '{device}'",
                channel.device()
            )));
        }
        if !channel.active() {
            continue;
        }
        let (_, marker) = traits.parse_channel_id(channel.id()).ok_or_else(|| {
            Error::Validation(format!(
                "Device '{device}' has no output '{}'",
                channel.id()
            ))
        })?;
        let samples = precompensate(channel, samples);
        let entry = groups
            .entry(channel.group().to_string())
            .or_insert_with(|| GroupSamples {
                analog: None,
                markers: vec![None; traits.marker_suffixes.len()],
            });
        match marker {
            None => entry.analog = Some(samples),
            Some(suffix) => {
                if let Some(index) = traits.marker_suffixes.iter().position(|s| *s == suffix) {
                    entry.markers[index] = Some(samples);
                }
            }
        }
    }
    Ok(groups)
}

fn collect_element(
    device: &DeviceUid,
    traits: &DeviceTraits,
    registry: &ChannelRegistry,
    element: &Element,
) -> Result<Vec<Branch>> {
    if !element.is_codeword_element() {
        let groups = collect_branch(device, traits, registry, &element.waveforms)?;
        return Ok(vec![(None, groups)]);
    }
    element
        .codewords
        .iter()
        .map(|(codeword, waveforms)| {
            // Plain waveforms of a codeword element are played by every branch.
            let mut merged = element.waveforms.clone();
            merged.extend(waveforms.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok((
                Some(*codeword),
                collect_branch(device, traits, registry, &merged)?,
            ))
        })
        .collect()
}

fn padded(samples: Option<&Vec<f64>>, length: usize, resolution: u64) -> Vec<f64> {
    let mut out = samples.cloned().unwrap_or_default();
    out.resize(length, 0.0);
    if resolution > 0 {
        out.iter_mut()
            .for_each(|s| *s = quantize_amplitude(*s, resolution));
    }
    out
}

struct Packer<'a> {
    device: &'a DeviceUid,
    traits: &'a DeviceTraits,
    settings: &'a CompilerSettings,
    waveforms: IndexMap<String, PackedWaveform>,
}

impl Packer<'_> {
    fn check_length(&self, element: &Element, length: Samples) -> Result<()> {
        if !is_on_grid(length, self.traits.granularity) {
            return Err(Error::Granularity {
                device: self.device.to_string(),
                element: element.name.clone(),
                what: "length",
                value: length,
                granularity: self.traits.granularity,
            });
        }
        if length < self.traits.min_length.into() {
            return Err(Error::WaveformTooShort {
                device: self.device.to_string(),
                element: element.name.clone(),
                length,
                min_length: self.traits.min_length,
            });
        }
        Ok(())
    }

    fn insert(
        &mut self,
        element: &Element,
        analog: Vec<f64>,
        markers: Vec<Vec<f64>>,
    ) -> Result<String> {
        let key = WaveformKey::new(&analog, &markers);
        let name = key.waveform_name(self.device);
        if let Some(existing) = self.waveforms.get(&name) {
            if existing.key != key {
                return Err(anyhow::anyhow!(
                    "Waveforms '{}' and '{}' on device '{}' map to the same name '{name}'",
                    existing.key.as_str(),
                    key.as_str(),
                    self.device
                )
                .into());
            }
            diagnostic!("Element '{}' reuses waveform '{}'", element.name, name);
            return Ok(name);
        }
        let has_markers = markers.iter().flatten().any(|m| *m != 0.0);
        let data = if self.traits.packs_markers {
            let empty = vec![];
            let marker1 = markers.first().unwrap_or(&empty);
            let marker2 = markers.get(1).unwrap_or(&empty);
            let words = pack_waveform(&analog, marker1, marker2).map_err(|e| {
                Error::Validation(format!(
                    "Element '{}' on device '{}': {e}",
                    element.name, self.device
                ))
            })?;
            WaveformData::Packed(words)
        } else {
            WaveformData::Channels { analog, markers }
        };
        self.waveforms.insert(
            name.clone(),
            PackedWaveform {
                name: name.clone(),
                key,
                data,
                has_markers,
            },
        );
        Ok(name)
    }

    fn pack_element(
        &mut self,
        segment: &str,
        element: &Element,
        branches: Vec<Branch>,
        active_groups: &[String],
    ) -> Result<PackedElement> {
        if !is_on_grid(element.start, self.traits.element_start_granularity) {
            return Err(Error::Granularity {
                device: self.device.to_string(),
                element: element.name.clone(),
                what: "start",
                value: element.start,
                granularity: self.traits.element_start_granularity,
            });
        }

        // Element length per sequencer core.
        let mut core_lengths: BTreeMap<u16, usize> = BTreeMap::new();
        for (_, groups) in &branches {
            for (group, samples) in groups {
                let core = self.traits.awg_index(group).unwrap_or(0);
                let length = core_lengths.entry(core).or_default();
                *length = (*length).max(samples.length());
            }
        }
        core_lengths.retain(|_, length| *length > 0);
        if core_lengths.is_empty()
            && self.traits.sequencing == Sequencing::Table
            && !active_groups.is_empty()
        {
            // Table rows always play every channel, so an element without
            // samples on this device idles for the minimum length.
            let idle = ceil_to_grid(
                self.traits.min_length.into(),
                self.traits.granularity.into(),
            );
            core_lengths.insert(0, idle as usize);
        }
        for length in core_lengths.values() {
            self.check_length(element, *length as Samples)?;
        }

        let mut packed = PackedElement {
            name: element.name.clone(),
            segment: segment.to_string(),
            start: element.start,
            trigger_wait: element.trigger_wait,
            repetitions: element.repetitions,
            goto: element.goto.clone(),
            readout: element.readout,
            waveforms: IndexMap::new(),
            codewords: IndexMap::new(),
        };
        let resolution = self.settings.amplitude_resolution_range();
        let mut warned = false;
        for (codeword, groups) in branches {
            let mut names = GroupWaveforms::new();
            for group in active_groups {
                let Some(core) = self.traits.awg_index(group) else {
                    continue;
                };
                let Some(&length) = core_lengths.get(&core) else {
                    continue;
                };
                let samples = groups.get(group);
                let analog = padded(
                    samples.and_then(|s| s.analog.as_ref()),
                    length,
                    resolution,
                );
                let markers: Vec<Vec<f64>> = (0..self.traits.marker_suffixes.len())
                    .map(|i| {
                        padded(
                            samples.and_then(|s| s.markers[i].as_ref()),
                            length,
                            resolution,
                        )
                    })
                    .collect();
                let first_sample_set = analog.first().is_some_and(|s| *s != 0.0)
                    || markers.iter().any(|m| m.first().is_some_and(|s| *s != 0.0));
                if element.trigger_wait && first_sample_set && !warned {
                    warn!(
                        "Trigger wait set for element '{}' on device '{}' with a non-zero first sample",
                        element.name,
                        self.device
                    );
                    warned = true;
                }
                let name = self.insert(element, analog, markers)?;
                names.insert(group.clone(), name);
            }
            match codeword {
                None => packed.waveforms = names,
                Some(codeword) => {
                    packed.codewords.insert(codeword, names);
                }
            }
        }
        Ok(packed)
    }
}

/// Deduplicate and pack the waveforms `device` plays in `sequence`.
pub fn sample_waveforms(
    device: &DeviceUid,
    traits: &DeviceTraits,
    registry: &ChannelRegistry,
    settings: &CompilerSettings,
    sequence: &ResolvedSequence,
) -> Result<DeviceWaveforms> {
    let mut collected = vec![];
    let mut used_groups = HashSet::new();
    for (segment, elements) in sequence.elements_of(device) {
        for element in elements {
            let branches = collect_element(device, traits, registry, element)?;
            for (_, groups) in &branches {
                used_groups.extend(
                    groups
                        .iter()
                        .filter(|(_, samples)| samples.length() > 0)
                        .map(|(group, _)| group.clone()),
                );
            }
            collected.push((segment, element, branches));
        }
    }
    let active_groups: Vec<String> = traits
        .analog_ids()
        .filter(|group| used_groups.contains(group))
        .collect();

    let mut packer = Packer {
        device,
        traits,
        settings,
        waveforms: IndexMap::new(),
    };
    let mut elements = vec![];
    if !active_groups.is_empty() {
        for (segment, element, branches) in collected {
            elements.push(packer.pack_element(segment, element, branches, &active_groups)?);
        }
    }
    diagnostic!(
        "Device '{}': {} element(s), {} unique waveform(s)",
        device,
        elements.len(),
        packer.waveforms.len()
    );
    Ok(DeviceWaveforms {
        device: device.clone(),
        waveforms: packer.waveforms,
        elements,
        active_groups,
    })
}
