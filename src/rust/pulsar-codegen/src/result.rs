// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use indexmap::IndexMap;
use pulsar_common::DeviceUid;
use serde::Serialize;

use crate::sample_waveforms::PackedWaveform;
use crate::sequence_table::SequenceTable;

/// Sequencer program of one core.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AwgProgram {
    pub awg_index: u16,
    pub source: String,
    pub estimated_instructions: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ProgramSource {
    Table(SequenceTable),
    SeqC(Vec<AwgProgram>),
}

/// Everything that is uploaded to one device.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledProgram {
    pub device: DeviceUid,
    pub waveforms: IndexMap<String, PackedWaveform>,
    pub program: ProgramSource,
    /// Waveform names per codeword, in channel group order.
    pub codeword_table: IndexMap<u32, Vec<String>>,
    pub active_groups: Vec<String>,
}

impl CompiledProgram {
    /// Rows of the sequence table or estimated instructions of all cores.
    pub fn program_size(&self) -> u64 {
        match &self.program {
            ProgramSource::Table(table) => table.len() as u64,
            ProgramSource::SeqC(programs) => {
                programs.iter().map(|p| p.estimated_instructions).sum()
            }
        }
    }

    pub fn waveform_count(&self) -> usize {
        self.waveforms.len()
    }

    pub fn has_waveforms(&self) -> bool {
        !self.active_groups.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceReport {
    pub device: DeviceUid,
    pub programmed: bool,
    pub waveform_count: usize,
    pub program_size: u64,
}

impl From<&CompiledProgram> for DeviceReport {
    fn from(program: &CompiledProgram) -> Self {
        DeviceReport {
            device: program.device.clone(),
            programmed: program.has_waveforms(),
            waveform_count: program.waveform_count(),
            program_size: program.program_size(),
        }
    }
}

/// Summary of a programming run.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CompileReport {
    pub devices: IndexMap<DeviceUid, DeviceReport>,
}

impl CompileReport {
    pub fn programmed_devices(&self) -> impl Iterator<Item = &DeviceUid> {
        self.devices
            .values()
            .filter(|report| report.programmed)
            .map(|report| &report.device)
    }
}
