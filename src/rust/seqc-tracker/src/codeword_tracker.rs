// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use indexmap::IndexMap;
use pulsar_codegen::sample_waveforms::GroupWaveforms;
use pulsar_common::DeviceUid;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
struct CodewordUse {
    segment: String,
    element: String,
    waveforms: GroupWaveforms,
}

/// Collects the codeword dispatch table of one device.
///
/// A codeword selects the same waveforms wherever it appears, and within one
/// segment only one element may use it.
pub struct CodewordTracker {
    device: DeviceUid,
    codewords: IndexMap<u32, CodewordUse>,
}

impl CodewordTracker {
    pub fn new(device: DeviceUid) -> Self {
        Self {
            device,
            codewords: IndexMap::new(),
        }
    }

    pub fn register(
        &mut self,
        codeword: u32,
        segment: &str,
        element: &str,
        waveforms: &GroupWaveforms,
    ) -> Result<()> {
        let Some(existing) = self.codewords.get(&codeword) else {
            self.codewords.insert(
                codeword,
                CodewordUse {
                    segment: segment.to_string(),
                    element: element.to_string(),
                    waveforms: waveforms.clone(),
                },
            );
            return Ok(());
        };
        if existing.segment == segment && existing.element != element {
            return Err(Error::CodewordConflict {
                device: self.device.to_string(),
                codeword,
                reason: format!(
                    "used by elements '{}' and '{element}' of segment '{segment}'",
                    existing.element
                ),
            });
        }
        if &existing.waveforms != waveforms {
            return Err(Error::CodewordConflict {
                device: self.device.to_string(),
                codeword,
                reason: format!(
                    "element '{element}' of segment '{segment}' selects other waveforms than element '{}' of segment '{}'",
                    existing.element, existing.segment
                ),
            });
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.codewords.is_empty()
    }

    /// Waveforms per codeword, sorted by codeword.
    pub fn finish(self) -> IndexMap<u32, GroupWaveforms> {
        let mut table: IndexMap<u32, GroupWaveforms> = self
            .codewords
            .into_iter()
            .map(|(codeword, usage)| (codeword, usage.waveforms))
            .collect();
        table.sort_keys();
        table
    }
}
