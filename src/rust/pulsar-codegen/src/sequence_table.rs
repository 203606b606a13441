// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Sequence tables for devices that play their waveforms from a table of
//! (waveforms, repetitions, trigger wait, goto) rows.

use pulsar_common::{DeviceTraits, DeviceUid};
use serde::Serialize;

use crate::ir::Goto;
use crate::sample_waveforms::{DeviceWaveforms, GroupWaveforms};
use crate::{Error, Result};

const MAX_REPETITIONS: u32 = 65536;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceTableRow {
    pub element: String,
    pub waveforms: GroupWaveforms,
    pub repetitions: u32,
    pub trigger_wait: bool,
    /// One-based row to continue with; zero continues with the next row.
    pub goto: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SequenceTable {
    pub rows: Vec<SequenceTableRow>,
}

impl SequenceTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Anyhow(e.into()))
    }
}

fn resolve_goto(
    device: &DeviceUid,
    element: &str,
    goto: &Goto,
    rows: &[SequenceTableRow],
) -> Result<usize> {
    match goto {
        Goto::First => Ok(1),
        Goto::Element(target) => rows
            .iter()
            .position(|row| &row.element == target)
            .map(|index| index + 1)
            .ok_or_else(|| Error::InvalidGotoTarget {
                device: device.to_string(),
                element: element.to_string(),
                target: target.clone(),
            }),
    }
}

/// Build the sequence table of one device.
///
/// With `loop_sequence` the last row jumps back to the first one unless it
/// already has a goto.
pub fn build_sequence_table(
    traits: &DeviceTraits,
    waveforms: &DeviceWaveforms,
    loop_sequence: bool,
) -> Result<SequenceTable> {
    let device = &waveforms.device;
    let mut rows = Vec::with_capacity(waveforms.elements.len());
    for element in &waveforms.elements {
        if element.is_codeword_element() {
            return Err(Error::CodewordsUnsupported {
                device: device.to_string(),
                element: element.name.clone(),
            });
        }
        if !(1..=MAX_REPETITIONS).contains(&element.repetitions) {
            return Err(Error::Validation(format!(
                "Element '{}' on device '{device}' is repeated {} times, valid range is 1 to {MAX_REPETITIONS}",
                element.name, element.repetitions
            )));
        }
        rows.push(SequenceTableRow {
            element: element.name.clone(),
            waveforms: element.waveforms.clone(),
            repetitions: element.repetitions,
            trigger_wait: element.trigger_wait,
            goto: 0,
        });
    }
    if let Some(limit) = traits.max_elements {
        if rows.len() > limit {
            return Err(Error::ProgramTooLarge {
                device: device.to_string(),
                size: rows.len() as u64,
                limit: limit as u64,
            });
        }
    }
    for (index, element) in waveforms.elements.iter().enumerate() {
        if let Some(goto) = &element.goto {
            rows[index].goto = resolve_goto(device, &element.name, goto, &rows)?;
        }
    }
    if loop_sequence {
        if let Some(last) = rows.last_mut() {
            if last.goto == 0 {
                last.goto = 1;
            }
        }
    }
    Ok(SequenceTable { rows })
}
