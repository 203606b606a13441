// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Resolved sequences as delivered by the timing resolver.
//!
//! A sequence is an ordered list of segments. Every segment holds, per device,
//! the ordered elements that device plays. An element carries absolute sample
//! arrays keyed by channel name.

use indexmap::IndexMap;
use pulsar_common::{DeviceUid, Samples};

use super::PrequeryCache;
use crate::Result;
use crate::channel::ChannelRegistry;

/// Target of the jump taken after an element has been played.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Goto {
    /// Back to the first element of the sequence.
    First,
    /// To the first occurrence of the named element.
    Element(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    /// Offset in samples from the start of the segment.
    pub start: Samples,
    /// Samples per channel name.
    pub waveforms: IndexMap<String, Vec<f64>>,
    /// Samples per channel name for every codeword this element branches on.
    pub codewords: IndexMap<u32, IndexMap<String, Vec<f64>>>,
    pub trigger_wait: bool,
    pub repetitions: u32,
    pub goto: Option<Goto>,
    /// Acquire a readout after the element has been played.
    pub readout: bool,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Element {
            name: name.to_string(),
            start: 0,
            waveforms: IndexMap::new(),
            codewords: IndexMap::new(),
            trigger_wait: false,
            repetitions: 1,
            goto: None,
            readout: false,
        }
    }

    pub fn with_waveform(mut self, channel: &str, samples: Vec<f64>) -> Self {
        self.waveforms.insert(channel.to_string(), samples);
        self
    }

    pub fn with_codeword(mut self, codeword: u32, channel: &str, samples: Vec<f64>) -> Self {
        self.codewords
            .entry(codeword)
            .or_default()
            .insert(channel.to_string(), samples);
        self
    }

    pub fn with_trigger_wait(mut self) -> Self {
        self.trigger_wait = true;
        self
    }

    pub fn with_repetitions(mut self, repetitions: u32) -> Self {
        self.repetitions = repetitions;
        self
    }

    pub fn with_goto(mut self, goto: Goto) -> Self {
        self.goto = Some(goto);
        self
    }

    pub fn with_start(mut self, start: Samples) -> Self {
        self.start = start;
        self
    }

    pub fn with_readout(mut self) -> Self {
        self.readout = true;
        self
    }

    pub fn is_codeword_element(&self) -> bool {
        !self.codewords.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedSegment {
    pub name: String,
    pub elements: IndexMap<DeviceUid, Vec<Element>>,
}

impl ResolvedSegment {
    pub fn new(name: &str) -> Self {
        ResolvedSegment {
            name: name.to_string(),
            elements: IndexMap::new(),
        }
    }

    pub fn with_element(mut self, device: &str, element: Element) -> Self {
        self.elements
            .entry(DeviceUid::from(device))
            .or_default()
            .push(element);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedSequence {
    pub name: String,
    pub segments: Vec<ResolvedSegment>,
}

impl ResolvedSequence {
    pub fn new(name: &str) -> Self {
        ResolvedSequence {
            name: name.to_string(),
            segments: vec![],
        }
    }

    pub fn with_segment(mut self, segment: ResolvedSegment) -> Self {
        self.segments.push(segment);
        self
    }

    /// Elements of `device` grouped by segment, in sequence order.
    pub fn elements_of<'a>(
        &'a self,
        device: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a [Element])> + 'a {
        self.segments.iter().filter_map(move |segment| {
            segment
                .elements
                .get(device)
                .map(|elements| (segment.name.as_str(), elements.as_slice()))
        })
    }
}

/// Turns a hardware independent sequence into absolute per-channel samples.
///
/// Sample arrays of channels in the same group must be co-timed, and element
/// starts must respect the element start granularity of the device. Channel
/// delays and charge buildup compensation are read from `registry`.
pub trait TimingResolver {
    type Sequence;

    fn resolve(
        &self,
        sequence: &Self::Sequence,
        registry: &ChannelRegistry,
        prequery: &PrequeryCache,
    ) -> Result<ResolvedSequence>;
}

/// Resolver for sequences that are already resolved.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrecomputedResolver;

impl TimingResolver for PrecomputedResolver {
    type Sequence = ResolvedSequence;

    fn resolve(
        &self,
        sequence: &ResolvedSequence,
        _registry: &ChannelRegistry,
        _prequery: &PrequeryCache,
    ) -> Result<ResolvedSequence> {
        Ok(sequence.clone())
    }
}
