// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use anyhow::Context;
use pulsar_codegen::channel::{Channel, ChannelLimits, ChannelRegistry, OffsetMode, ValueRange};
use pulsar_codegen::result::{CompiledProgram, ProgramSource};
use pulsar_codegen::sample_waveforms::DeviceWaveforms;
use pulsar_codegen::sequence_table::build_sequence_table;
use pulsar_codegen::settings::CompilerSettings;
use pulsar_common::device_traits::AWG5014_TRAITS;
use pulsar_common::{ChannelKind, DeviceClass, DeviceTraits};
use pulsar_log::debug;

use super::{AwgBackend, get_node, output_number, set_node};
use crate::Result;
use crate::driver::AwgDriver;

const ANALOG_AMP: ValueRange = ValueRange::new(0.01, 2.25);
const MARKER_AMP: ValueRange = ValueRange::new(-5.4, 5.4);
const MARKER_OFFSET: ValueRange = ValueRange::new(-2.7, 2.7);

/// Tektronix AWG5014, programmed with a sequence table.
///
/// Amplitudes are peak values; the instrument takes peak-to-peak. Marker
/// outputs are set by their low and high level.
pub struct Awg5014Backend;

fn marker_node(channel: &Channel, traits: &DeviceTraits, level: &str) -> Result<String> {
    let Some((number, Some(marker))) = traits.parse_channel_id(channel.id()) else {
        return Err(anyhow::anyhow!(
            "Device '{}' has no marker output '{}'",
            channel.device(),
            channel.id()
        )
        .into());
    };
    Ok(format!("ch{number}_{marker}_{level}"))
}

/// Nodes reset by a sequence upload that hold channel settings.
fn preserved_nodes(traits: &DeviceTraits) -> Vec<String> {
    let mut nodes = vec![];
    for analog in traits.analog_ids() {
        for marker in traits.marker_suffixes {
            nodes.push(format!("{analog}_{marker}_low"));
            nodes.push(format!("{analog}_{marker}_high"));
        }
        nodes.push(format!("{analog}_offset"));
    }
    nodes
}

impl AwgBackend for Awg5014Backend {
    fn name(&self) -> &'static str {
        AWG5014_TRAITS.type_str
    }

    fn claims(&self, class: &DeviceClass) -> bool {
        matches!(class, DeviceClass::Awg5014)
    }

    fn traits(&self) -> &'static DeviceTraits {
        &AWG5014_TRAITS
    }

    fn channel_limits(&self, kind: ChannelKind) -> ChannelLimits {
        match kind {
            ChannelKind::Analog => ChannelLimits {
                amp: ANALOG_AMP,
                ..ChannelLimits::default()
            },
            ChannelKind::Marker => ChannelLimits {
                amp: MARKER_AMP,
                offset: MARKER_OFFSET,
                ..ChannelLimits::default()
            },
        }
    }

    fn configure_channel(&self, driver: &mut dyn AwgDriver, channel: &Channel) -> Result<()> {
        match channel.kind() {
            ChannelKind::Analog => {
                let number = output_number(self.traits(), channel)?;
                set_node(driver, &format!("ch{number}_amp"), 2.0 * channel.amp())?;
                let offset_node = match channel.offset_mode() {
                    OffsetMode::Software => format!("ch{number}_offset"),
                    OffsetMode::Hardware => format!("ch{number}_DC_out"),
                };
                set_node(driver, &offset_node, channel.offset())
            }
            ChannelKind::Marker => {
                let low = marker_node(channel, self.traits(), "low")?;
                let high = marker_node(channel, self.traits(), "high")?;
                set_node(driver, &low, channel.offset())?;
                set_node(driver, &high, channel.offset() + channel.amp())
            }
        }
    }

    fn channel_amplitude(&self, driver: &dyn AwgDriver, channel: &Channel) -> Result<f64> {
        match channel.kind() {
            ChannelKind::Analog => {
                let number = output_number(self.traits(), channel)?;
                Ok(get_node(driver, &format!("ch{number}_amp"))? / 2.0)
            }
            ChannelKind::Marker => {
                let low = get_node(driver, &marker_node(channel, self.traits(), "low")?)?;
                let high = get_node(driver, &marker_node(channel, self.traits(), "high")?)?;
                Ok(high - low)
            }
        }
    }

    fn clock(&self, driver: &dyn AwgDriver) -> Result<f64> {
        get_node(driver, "clock")
    }

    fn generate_program(
        &self,
        waveforms: DeviceWaveforms,
        settings: &CompilerSettings,
    ) -> Result<CompiledProgram> {
        let table = build_sequence_table(self.traits(), &waveforms, settings.loop_sequence)?;
        Ok(CompiledProgram {
            device: waveforms.device,
            waveforms: waveforms.waveforms,
            program: ProgramSource::Table(table),
            codeword_table: Default::default(),
            active_groups: waveforms.active_groups,
        })
    }

    fn upload(
        &self,
        driver: &mut dyn AwgDriver,
        program: &CompiledProgram,
        registry: &ChannelRegistry,
    ) -> Result<()> {
        let ProgramSource::Table(table) = &program.program else {
            return Err(anyhow::anyhow!(
                "Device '{}' expects a sequence table, not sequencer programs",
                program.device
            )
            .into());
        };
        let saved = preserved_nodes(self.traits())
            .into_iter()
            .map(|node| get_node(driver, &node).map(|value| (node, value)))
            .collect::<Result<Vec<_>>>()?;

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
        driver
            .upload_sequence_table(table)
            .with_context(|| format!("Failed to upload the sequence table to device '{device}'"))?;
        debug!(
            "Device '{}': {} waveform(s), {} sequence row(s) uploaded",
            device,
            program.waveforms.len(),
            table.len()
        );

        for (node, value) in &saved {
            set_node(driver, node, *value)?;
        }

        let mut hardware_offsets = false;
        for analog in self.traits().analog_ids() {
            let active = program.active_groups.contains(&analog);
            set_node(driver, &format!("{analog}_state"), f64::from(u8::from(active)))?;
            if let Some(channel) = registry.channel_by_id(&program.device, &analog) {
                hardware_offsets |= active
                    && channel.active()
                    && channel.offset_mode() == OffsetMode::Hardware;
            }
        }
        set_node(driver, "DC_output", f64::from(u8::from(hardware_offsets)))
    }

    fn is_running(
        &self,
        driver: &dyn AwgDriver,
        _program: Option<&CompiledProgram>,
    ) -> Result<bool> {
        Ok(get_node(driver, "run_state")? != 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{MockDriver, event_log};
    use pulsar_codegen::channel::ChannelOptions;

    fn registry() -> ChannelRegistry {
        let mut registry = ChannelRegistry::new();
        registry.register_device("tek", DeviceClass::Awg5014).unwrap();
        for (name, id, kind) in [
            ("qb_x", "ch1", ChannelKind::Analog),
            ("qb_m1", "ch1m1", ChannelKind::Marker),
            ("flux", "ch3", ChannelKind::Analog),
        ] {
            registry
                .register_channel(
                    name,
                    "tek",
                    id,
                    kind,
                    Awg5014Backend.channel_limits(kind),
                    ChannelOptions {
                        amp: Some(0.5),
                        offset: Some(0.1),
                        offset_mode: if name == "flux" {
                            OffsetMode::Hardware
                        } else {
                            OffsetMode::Software
                        },
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_channel_limits() {
        let mut registry = registry();
        let channel = registry.lookup_mut("qb_x").unwrap();
        assert!(channel.set_amp(2.5).is_err());
        assert_eq!(channel.amp(), 0.5);
        let marker = registry.lookup_mut("qb_m1").unwrap();
        assert!(marker.set_amp(-5.0).is_ok());
        assert!(marker.set_offset(3.0).is_err());
    }

    #[test]
    fn test_configure_and_read_back() {
        let registry = registry();
        let mut driver = MockDriver::new("tek", &event_log());
        for channel in registry.channels() {
            Awg5014Backend
                .configure_channel(&mut driver, channel)
                .unwrap();
        }
        assert_eq!(driver.node("ch1_amp"), Some(1.0));
        assert_eq!(driver.node("ch1_offset"), Some(0.1));
        assert_eq!(driver.node("ch1_m1_low"), Some(0.1));
        assert_eq!(driver.node("ch1_m1_high"), Some(0.6));
        assert_eq!(driver.node("ch3_DC_out"), Some(0.1));
        assert_eq!(driver.node("ch3_offset"), None);

        let qb_x = registry.lookup("qb_x").unwrap();
        let qb_m1 = registry.lookup("qb_m1").unwrap();
        assert_eq!(
            Awg5014Backend.channel_amplitude(&driver, qb_x).unwrap(),
            0.5
        );
        assert!((Awg5014Backend.channel_amplitude(&driver, qb_m1).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_upload_restores_marker_levels() {
        let registry = registry();
        let mut driver = MockDriver::new("tek", &event_log());
        driver.preset("ch1_m1_high", 1.5);
        driver.preset("ch2_offset", -0.2);
        driver.reset_on_upload(&["ch1_m1_high", "ch2_offset"]);

        let program = CompiledProgram {
            device: "tek".into(),
            waveforms: Default::default(),
            program: ProgramSource::Table(Default::default()),
            codeword_table: Default::default(),
            active_groups: vec!["ch1".to_string(), "ch3".to_string()],
        };
        Awg5014Backend
            .upload(&mut driver, &program, &registry)
            .unwrap();
        assert_eq!(driver.node("ch1_m1_high"), Some(1.5));
        assert_eq!(driver.node("ch2_offset"), Some(-0.2));
        assert_eq!(driver.node("ch1_state"), Some(1.0));
        assert_eq!(driver.node("ch2_state"), Some(0.0));
        assert_eq!(driver.node("ch3_state"), Some(1.0));
        assert_eq!(driver.node("DC_output"), Some(1.0));
    }

    #[test]
    fn test_upload_rejects_sequencer_programs() {
        let mut driver = MockDriver::new("tek", &event_log());
        let program = CompiledProgram {
            device: "tek".into(),
            waveforms: Default::default(),
            program: ProgramSource::SeqC(vec![]),
            codeword_table: Default::default(),
            active_groups: vec![],
        };
        assert!(
            Awg5014Backend
                .upload(&mut driver, &program, &registry())
                .is_err()
        );
    }
}
