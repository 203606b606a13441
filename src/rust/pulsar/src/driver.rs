// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use pulsar_codegen::sample_waveforms::WaveformData;
use pulsar_codegen::sequence_table::SequenceTable;

/// Hardware access to one instrument.
///
/// Node names are the instrument's own parameter names, e.g. `ch1_amp` on an
/// AWG5014 or `sigouts_0_range` on an HDAWG8. Failures are reported with as
/// much context as the driver has; they abort the current operation.
pub trait AwgDriver {
    fn name(&self) -> &str;

    fn get(&self, node: &str) -> anyhow::Result<f64>;

    fn set(&mut self, node: &str, value: f64) -> anyhow::Result<()>;

    /// Store a waveform under `name`, replacing a waveform of the same name.
    fn upload_waveform(&mut self, name: &str, data: &WaveformData) -> anyhow::Result<()>;

    fn upload_sequence_table(&mut self, table: &SequenceTable) -> anyhow::Result<()>;

    /// Compile and load a sequencer program on core `awg_index`.
    fn upload_program(&mut self, awg_index: u16, source: &str) -> anyhow::Result<()>;

    fn start(&mut self) -> anyhow::Result<()>;

    fn stop(&mut self) -> anyhow::Result<()>;
}
