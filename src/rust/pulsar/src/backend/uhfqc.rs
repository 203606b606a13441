// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use anyhow::Context;
use pulsar_codegen::channel::{Channel, ChannelLimits, ChannelRegistry};
use pulsar_codegen::result::CompiledProgram;
use pulsar_codegen::sample_waveforms::DeviceWaveforms;
use pulsar_codegen::settings::CompilerSettings;
use pulsar_common::device_traits::UHFQC_TRAITS;
use pulsar_common::{ChannelKind, DeviceClass, DeviceTraits};
use pulsar_log::debug;
use seqc_tracker::awg_program::uhfqc_program;

use super::{AwgBackend, get_node, seqc_program, upload_seqc_programs};
use crate::Result;
use crate::driver::AwgDriver;

/// Zurich Instruments UHFQC readout generator.
///
/// Amplitude and offset of the two outputs are applied in software when the
/// waveforms are sampled, so nothing is written to the instrument for them.
pub struct UhfqcBackend;

impl AwgBackend for UhfqcBackend {
    fn name(&self) -> &'static str {
        UHFQC_TRAITS.type_str
    }

    fn claims(&self, class: &DeviceClass) -> bool {
        matches!(class, DeviceClass::Uhfqc)
    }

    fn traits(&self) -> &'static DeviceTraits {
        &UHFQC_TRAITS
    }

    fn channel_limits(&self, _kind: ChannelKind) -> ChannelLimits {
        ChannelLimits::default()
    }

    fn configure_channel(&self, _driver: &mut dyn AwgDriver, _channel: &Channel) -> Result<()> {
        Ok(())
    }

    fn channel_amplitude(&self, _driver: &dyn AwgDriver, channel: &Channel) -> Result<f64> {
        Ok(channel.amp())
    }

    fn generate_program(
        &self,
        waveforms: DeviceWaveforms,
        settings: &CompilerSettings,
    ) -> Result<CompiledProgram> {
        let programs = uhfqc_program(self.traits(), &waveforms, settings)?;
        Ok(seqc_program(waveforms, programs))
    }

    fn upload(
        &self,
        driver: &mut dyn AwgDriver,
        program: &CompiledProgram,
        _registry: &ChannelRegistry,
    ) -> Result<()> {
        let device = driver.name().to_string();
        for waveform in program.waveforms.values() {
            driver
                .upload_waveform(&waveform.name, &waveform.data)
                .with_context(|| {
                    format!(
                        "Failed to upload waveform '{}' to device '{device}'",
                        waveform.name
                    )
                })?;
        }
        upload_seqc_programs(driver, program)?;
        debug!(
            "Device '{}': {} waveform(s) uploaded",
            device,
            program.waveforms.len()
        );
        Ok(())
    }

    fn is_running(
        &self,
        driver: &dyn AwgDriver,
        _program: Option<&CompiledProgram>,
    ) -> Result<bool> {
        Ok(get_node(driver, "awgs_0_enable")? != 0.0)
    }
}
