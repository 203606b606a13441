// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use anyhow::Context;
use pulsar_codegen::channel::{Channel, ChannelLimits, ChannelRegistry, ValueRange};
use pulsar_codegen::result::{CompiledProgram, ProgramSource};
use pulsar_codegen::sample_waveforms::{DeviceWaveforms, WaveformData};
use pulsar_codegen::settings::CompilerSettings;
use pulsar_common::device_traits::HDAWG8_TRAITS;
use pulsar_common::{ChannelKind, DeviceClass, DeviceTraits};
use pulsar_log::debug;
use seqc_tracker::awg_program::hdawg8_programs;
use seqc_tracker::seqc_statements::WaveExpr;

use super::{
    AwgBackend, active_outputs, get_node, output_number, seqc_program, set_node,
    upload_seqc_programs,
};
use crate::Result;
use crate::driver::AwgDriver;

const AMP: ValueRange = ValueRange::new(0.01, 5.0);

/// Zurich Instruments HDAWG8 with four sequencer cores of two outputs each.
///
/// The output range is twice the peak amplitude. Marker outputs are digital and
/// have no tunables on the instrument.
pub struct Hdawg8Backend;

/// Split a waveform into its analog blob and, if any marker bit is set, the
/// marker blob named after [`WaveExpr::marker_name`].
fn split_markers(
    name: &str,
    data: &WaveformData,
    has_markers: bool,
) -> Vec<(String, WaveformData)> {
    let WaveformData::Channels { analog, markers } = data else {
        return vec![(name.to_string(), data.clone())];
    };
    let mut blobs = vec![(
        name.to_string(),
        WaveformData::Channels {
            analog: analog.clone(),
            markers: vec![],
        },
    )];
    if has_markers {
        let mut marker_samples = vec![0.0; analog.len()];
        for marker in markers {
            for (sample, value) in marker_samples.iter_mut().zip(marker) {
                *sample += value;
            }
        }
        blobs.push((
            WaveExpr::marker_name(name),
            WaveformData::Channels {
                analog: marker_samples,
                markers: vec![],
            },
        ));
    }
    blobs
}

impl AwgBackend for Hdawg8Backend {
    fn name(&self) -> &'static str {
        HDAWG8_TRAITS.type_str
    }

    fn claims(&self, class: &DeviceClass) -> bool {
        matches!(class, DeviceClass::Hdawg8)
    }

    fn traits(&self) -> &'static DeviceTraits {
        &HDAWG8_TRAITS
    }

    fn channel_limits(&self, _kind: ChannelKind) -> ChannelLimits {
        ChannelLimits {
            amp: AMP,
            ..ChannelLimits::default()
        }
    }

    fn configure_channel(&self, driver: &mut dyn AwgDriver, channel: &Channel) -> Result<()> {
        if channel.kind() == ChannelKind::Marker {
            return Ok(());
        }
        let output = output_number(self.traits(), channel)? - 1;
        set_node(driver, &format!("sigouts_{output}_range"), 2.0 * channel.amp())?;
        set_node(driver, &format!("sigouts_{output}_offset"), channel.offset())
    }

    fn channel_amplitude(&self, driver: &dyn AwgDriver, channel: &Channel) -> Result<f64> {
        if channel.kind() == ChannelKind::Marker {
            return Ok(1.0);
        }
        let output = output_number(self.traits(), channel)? - 1;
        Ok(get_node(driver, &format!("sigouts_{output}_range"))? / 2.0)
    }

    fn generate_program(
        &self,
        waveforms: DeviceWaveforms,
        settings: &CompilerSettings,
    ) -> Result<CompiledProgram> {
        let programs = hdawg8_programs(self.traits(), &waveforms, settings)?;
        Ok(seqc_program(waveforms, programs))
    }

    fn upload(
        &self,
        driver: &mut dyn AwgDriver,
        program: &CompiledProgram,
        registry: &ChannelRegistry,
    ) -> Result<()> {
        let device = driver.name().to_string();
        let mut blob_count = 0;
        for waveform in program.waveforms.values() {
            for (name, data) in split_markers(&waveform.name, &waveform.data, waveform.has_markers)
            {
                driver.upload_waveform(&name, &data).with_context(|| {
                    format!("Failed to upload waveform '{name}' to device '{device}'")
                })?;
                blob_count += 1;
            }
        }
        upload_seqc_programs(driver, program)?;
        debug!(
            "Device '{}': {} waveform blob(s) and {} core program(s) uploaded",
            device,
            blob_count,
            match &program.program {
                ProgramSource::SeqC(programs) => programs.len(),
                ProgramSource::Table(_) => 0,
            }
        );

        let outputs = active_outputs(registry, program)?;
        for (output, analog) in self.traits().analog_ids().enumerate() {
            let on =
                program.active_groups.contains(&analog) && outputs.contains_key(analog.as_str());
            set_node(driver, &format!("sigouts_{output}_on"), f64::from(u8::from(on)))?;
        }
        Ok(())
    }

    fn is_running(
        &self,
        driver: &dyn AwgDriver,
        program: Option<&CompiledProgram>,
    ) -> Result<bool> {
        let mut cores = match program.map(|p| &p.program) {
            Some(ProgramSource::SeqC(programs)) => {
                programs.iter().map(|p| p.awg_index).collect::<Vec<_>>()
            }
            _ => vec![],
        };
        if cores.is_empty() {
            cores.push(0);
        }
        for core in cores {
            if get_node(driver, &format!("awgs_{core}_enable"))? == 0.0 {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
