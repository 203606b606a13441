// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Device class specific behaviour.
//!
//! Every supported device class has one backend. The backend of a device is
//! chosen once, when the device is registered, by asking the backends in a
//! fixed order whether they claim the device class.

mod awg5014;
mod hdawg8;
mod uhfqc;

pub use awg5014::Awg5014Backend;
pub use hdawg8::Hdawg8Backend;
pub use uhfqc::UhfqcBackend;

use anyhow::Context;
use indexmap::IndexMap;
use pulsar_codegen::channel::{Channel, ChannelLimits, ChannelRegistry};
use pulsar_codegen::result::{CompiledProgram, ProgramSource};
use pulsar_codegen::sample_waveforms::DeviceWaveforms;
use pulsar_codegen::settings::CompilerSettings;
use pulsar_common::{ChannelKind, DeviceClass, DeviceTraits};
use seqc_tracker::awg_program::SeqCPrograms;

use crate::Result;
use crate::driver::AwgDriver;

pub trait AwgBackend: Sync {
    fn name(&self) -> &'static str;

    fn claims(&self, class: &DeviceClass) -> bool;

    fn traits(&self) -> &'static DeviceTraits;

    /// Validators for the tunables of a new channel.
    fn channel_limits(&self, kind: ChannelKind) -> ChannelLimits;

    /// Write amplitude and offset of `channel` to the hardware.
    fn configure_channel(&self, driver: &mut dyn AwgDriver, channel: &Channel) -> Result<()>;

    /// Peak amplitude of `channel` as currently set on the hardware.
    fn channel_amplitude(&self, driver: &dyn AwgDriver, channel: &Channel) -> Result<f64>;

    fn clock(&self, driver: &dyn AwgDriver) -> Result<f64> {
        get_node(driver, "clock_freq")
    }

    fn generate_program(
        &self,
        waveforms: DeviceWaveforms,
        settings: &CompilerSettings,
    ) -> Result<CompiledProgram>;

    fn upload(
        &self,
        driver: &mut dyn AwgDriver,
        program: &CompiledProgram,
        registry: &ChannelRegistry,
    ) -> Result<()>;

    /// The device plays `program` and waits for triggers.
    fn is_running(&self, driver: &dyn AwgDriver, program: Option<&CompiledProgram>)
    -> Result<bool>;
}

static BACKENDS: [&dyn AwgBackend; 3] = [&Awg5014Backend, &Hdawg8Backend, &UhfqcBackend];

/// Backend of the first entry in the priority list that claims `class`.
pub fn select_backend(class: &DeviceClass) -> Option<&'static dyn AwgBackend> {
    BACKENDS
        .iter()
        .copied()
        .find(|backend| backend.claims(class))
}

pub(crate) fn get_node(driver: &dyn AwgDriver, node: &str) -> Result<f64> {
    let value = driver
        .get(node)
        .with_context(|| format!("Failed to read '{node}' of device '{}'", driver.name()))?;
    Ok(value)
}

pub(crate) fn set_node(driver: &mut dyn AwgDriver, node: &str, value: f64) -> Result<()> {
    let device = driver.name().to_string();
    driver
        .set(node, value)
        .with_context(|| format!("Failed to set '{node}' of device '{device}' to {value}"))?;
    Ok(())
}

/// Output number of an analog channel, counted from 1.
pub(crate) fn output_number(traits: &DeviceTraits, channel: &Channel) -> Result<u16> {
    traits
        .parse_channel_id(channel.id())
        .map(|(number, _)| number)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Device '{}' has no output '{}'",
                channel.device(),
                channel.id()
            )
            .into()
        })
}

pub(crate) fn seqc_program(waveforms: DeviceWaveforms, programs: SeqCPrograms) -> CompiledProgram {
    CompiledProgram {
        device: waveforms.device,
        waveforms: waveforms.waveforms,
        program: ProgramSource::SeqC(programs.programs),
        codeword_table: programs.codeword_table,
        active_groups: waveforms.active_groups,
    }
}

/// Load the sequencer programs of `program` core by core.
///
/// The DIO valid polarity of a core is reset when a program is compiled, so it
/// is read before and restored after every program upload.
pub(crate) fn upload_seqc_programs(
    driver: &mut dyn AwgDriver,
    program: &CompiledProgram,
) -> Result<()> {
    let ProgramSource::SeqC(programs) = &program.program else {
        return Err(anyhow::anyhow!(
            "Device '{}' expects sequencer programs, not a sequence table",
            program.device
        )
        .into());
    };
    for awg in programs {
        let polarity_node = format!("awgs_{}_dio_valid_polarity", awg.awg_index);
        let polarity = get_node(driver, &polarity_node)?;
        let device = driver.name().to_string();
        driver
            .upload_program(awg.awg_index, &awg.source)
            .with_context(|| {
                format!(
                    "Failed to load the program of core {} on device '{device}'",
                    awg.awg_index
                )
            })?;
        set_node(driver, &polarity_node, polarity)?;
    }
    Ok(())
}

/// Active channels by group, for output enables.
pub(crate) fn active_outputs<'a>(
    registry: &'a ChannelRegistry,
    program: &CompiledProgram,
) -> Result<IndexMap<&'a str, &'a Channel>> {
    Ok(registry
        .channels_of(&program.device)?
        .into_iter()
        .filter(|channel| channel.kind() == ChannelKind::Analog && channel.active())
        .map(|channel| (channel.group(), channel))
        .collect())
}
