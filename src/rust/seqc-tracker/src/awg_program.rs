// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Program generation for HDAWG8 and UHFQC sequencer cores.
//!
//! The HDAWG8 gets one program per core holding the codeword dispatch table
//! followed by the playback loop. The UHFQC plays its two outputs from a single
//! core and pulses the integration trigger after readout elements.

use indexmap::IndexMap;
use pulsar_codegen::ir::Goto;
use pulsar_codegen::result::AwgProgram;
use pulsar_codegen::sample_waveforms::{DeviceWaveforms, GroupWaveforms, PackedElement};
use pulsar_codegen::settings::CompilerSettings;
use pulsar_common::DeviceTraits;
use pulsar_log::{diagnostic, warn};

use crate::codeword_tracker::CodewordTracker;
use crate::seqc_generator::SeqCGenerator;
use crate::seqc_statements::{PlaybackWaves, SeqCVariant, WaveExpr};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SeqCPrograms {
    pub programs: Vec<AwgProgram>,
    /// Waveform names per codeword, in channel group order.
    pub codeword_table: IndexMap<u32, Vec<String>>,
}

/// Whether the playback loop is closed after the last element.
///
/// A sequencer program can only jump back to its start, so the only goto
/// accepted is one to the first element placed on the last element.
fn closes_loop(waveforms: &DeviceWaveforms, loop_sequence: bool) -> Result<bool> {
    let last = waveforms.elements.len().saturating_sub(1);
    let mut looped = loop_sequence;
    for (index, element) in waveforms.elements.iter().enumerate() {
        match &element.goto {
            None => {}
            Some(Goto::First) if index == last => looped = true,
            Some(goto) => {
                let target = match goto {
                    Goto::First => "first element".to_string(),
                    Goto::Element(name) => name.clone(),
                };
                return Err(Error::InvalidGotoTarget {
                    device: waveforms.device.to_string(),
                    element: element.name.clone(),
                    target,
                });
            }
        }
    }
    Ok(looped)
}

fn wave_expr(waveforms: &DeviceWaveforms, name: Option<&String>) -> Option<WaveExpr> {
    name.map(|name| {
        let with_markers = waveforms
            .waveforms
            .get(name)
            .is_some_and(|waveform| waveform.has_markers);
        WaveExpr::new(name, with_markers)
    })
}

fn core_waves(
    waveforms: &DeviceWaveforms,
    channel_ids: &[String],
    names: &GroupWaveforms,
) -> Option<PlaybackWaves> {
    let mut ids = channel_ids.iter();
    let first = ids.next().and_then(|id| names.get(id));
    let second = ids.next().and_then(|id| names.get(id));
    PlaybackWaves::from_pair(wave_expr(waveforms, first), wave_expr(waveforms, second))
}

fn add_timing_comment(
    seqc: &mut SeqCGenerator,
    traits: &DeviceTraits,
    settings: &CompilerSettings,
    element: &PackedElement,
) {
    if settings.emit_timing_comments {
        seqc.add_comment(format!(
            "{} / {}: start {} samples ({:.3} us)",
            element.segment,
            element.name,
            element.start,
            traits.samples_to_seconds(element.start) * 1e6
        ));
    }
}

fn add_element_block(
    body: &mut SeqCGenerator,
    waveforms: &DeviceWaveforms,
    element: &PackedElement,
    block: SeqCGenerator,
) -> Result<()> {
    match element.repetitions {
        0 => Err(Error::Validation(format!(
            "Element '{}' on device '{}' has zero repetitions",
            element.name, waveforms.device
        ))),
        1 => {
            body.append_statements_from(block);
            Ok(())
        }
        n => {
            body.add_repeat(SeqCVariant::Integer(n.into()), block);
            Ok(())
        }
    }
}

fn check_program_size(
    waveforms: &DeviceWaveforms,
    traits: &DeviceTraits,
    seqc: &SeqCGenerator,
) -> Result<u64> {
    let size = seqc.estimate_complexity();
    if let Some(limit) = traits.max_instructions {
        if size > limit {
            return Err(Error::ProgramTooLarge {
                device: waveforms.device.to_string(),
                size,
                limit,
            });
        }
    }
    Ok(size)
}

fn codeword_table(waveforms: &DeviceWaveforms) -> Result<IndexMap<u32, GroupWaveforms>> {
    let mut tracker = CodewordTracker::new(waveforms.device.clone());
    for element in &waveforms.elements {
        if element.codewords.len() == 1 {
            warn!(
                "Only one codeword has been set for element '{}' on device '{}'",
                element.name,
                waveforms.device
            );
        }
        for (codeword, names) in &element.codewords {
            tracker.register(*codeword, &element.segment, &element.name, names)?;
        }
    }
    Ok(tracker.finish())
}

fn hdawg8_core_program(
    traits: &DeviceTraits,
    waveforms: &DeviceWaveforms,
    settings: &CompilerSettings,
    dio_table: &IndexMap<u32, GroupWaveforms>,
    looped: bool,
    awg_index: u16,
) -> Result<Option<AwgProgram>> {
    let channel_ids = traits.awg_channel_ids(awg_index);
    if !channel_ids
        .iter()
        .any(|id| waveforms.active_groups.contains(id))
    {
        return Ok(None);
    }

    let mut seqc = SeqCGenerator::new();
    for (codeword, names) in dio_table {
        if let Some(waves) = core_waves(waveforms, &channel_ids, names) {
            seqc.add_set_wave_dio(*codeword, waves);
        }
    }

    let mut body = SeqCGenerator::new();
    for element in &waveforms.elements {
        let mut block = SeqCGenerator::new();
        let waves = if element.is_codeword_element() {
            if element
                .codewords
                .values()
                .all(|names| core_waves(waveforms, &channel_ids, names).is_none())
            {
                continue;
            }
            None
        } else {
            let Some(waves) = core_waves(waveforms, &channel_ids, &element.waveforms) else {
                continue;
            };
            Some(waves)
        };
        add_timing_comment(&mut block, traits, settings, element);
        if let Some(waves) = &waves {
            block.add_prefetch(waves.clone());
        }
        if element.trigger_wait {
            block.add_function_call_statement(
                "waitDigTrigger",
                vec![SeqCVariant::Integer(1)],
                None::<String>,
            );
        }
        match waves {
            Some(waves) => block.add_play_wave_statement(waves),
            None => block.add_play_wave_dio_statement(),
        }
        add_element_block(&mut body, waveforms, element, block)?;
    }

    if looped {
        seqc.add_while_true(body);
    } else {
        seqc.append_statements_from(body);
    }
    seqc.add_function_call_statement("wait", vec![SeqCVariant::Integer(1000)], None::<String>);

    let estimated_instructions = check_program_size(waveforms, traits, &seqc)?;
    diagnostic!(
        "Device '{}' core {}: {} estimated instruction(s)",
        waveforms.device,
        awg_index,
        estimated_instructions
    );
    Ok(Some(AwgProgram {
        awg_index,
        source: seqc.generate_seq_c(),
        estimated_instructions,
    }))
}

/// Generate the programs of all HDAWG8 cores that drive a channel with waveforms.
pub fn hdawg8_programs(
    traits: &DeviceTraits,
    waveforms: &DeviceWaveforms,
    settings: &CompilerSettings,
) -> Result<SeqCPrograms> {
    if waveforms.is_empty() {
        return Ok(SeqCPrograms::default());
    }
    let looped = closes_loop(waveforms, settings.loop_sequence)?;
    let dio_table = codeword_table(waveforms)?;
    let mut programs = vec![];
    for awg_index in 0..traits.awg_count() {
        if let Some(program) =
            hdawg8_core_program(traits, waveforms, settings, &dio_table, looped, awg_index)?
        {
            programs.push(program);
        }
    }
    let codeword_table = dio_table
        .into_iter()
        .map(|(codeword, names)| (codeword, names.into_values().collect()))
        .collect();
    Ok(SeqCPrograms {
        programs,
        codeword_table,
    })
}

fn uhfqc_header(seqc: &mut SeqCGenerator) -> Result<()> {
    for (name, value) in [
        ("TRIGGER1", "0x00000001"),
        ("TRIGGER2", "0x00000002"),
        ("WINT_TRIG", "0x00000010"),
        ("IAVG_TRIG", "0x00000020"),
        ("WINT_EN", "0x01ff0000"),
    ] {
        seqc.add_constant_definition(name, SeqCVariant::String(value.to_string()), None::<String>);
    }
    seqc.add_function_call_statement(
        "setTrigger",
        vec![SeqCVariant::String("WINT_EN".to_string())],
        None::<String>,
    );
    seqc.add_variable_declaration(
        "loop_cnt",
        Some(SeqCVariant::String("getUserReg(0)".to_string())),
    )?;
    seqc.add_variable_declaration("RO_TRIG", None)?;
    let mut averaged = SeqCGenerator::new();
    averaged.add_variable_assignment("RO_TRIG", SeqCVariant::String("IAVG_TRIG".to_string()));
    let mut integrated = SeqCGenerator::new();
    integrated.add_variable_assignment("RO_TRIG", SeqCVariant::String("WINT_TRIG".to_string()));
    seqc.add_if(vec!["getUserReg(1)"], vec![averaged, integrated])
}

/// Generate the program of the single UHFQC core.
///
/// The element list is played `getUserReg(0)` times, then the integration
/// trigger is cleared. User register 1 selects between the averaged and the
/// integrated readout trigger.
pub fn uhfqc_program(
    traits: &DeviceTraits,
    waveforms: &DeviceWaveforms,
    settings: &CompilerSettings,
) -> Result<SeqCPrograms> {
    if let Some(element) = waveforms.elements.iter().find(|e| e.is_codeword_element()) {
        return Err(Error::CodewordsUnsupported {
            device: waveforms.device.to_string(),
            element: element.name.clone(),
        });
    }
    if waveforms.is_empty() {
        return Ok(SeqCPrograms::default());
    }
    // The element list is repeated a counted number of times, so a loop
    // closing goto only needs validating.
    closes_loop(waveforms, settings.loop_sequence)?;
    let channel_ids = traits.awg_channel_ids(0);

    let mut seqc = SeqCGenerator::new();
    uhfqc_header(&mut seqc)?;

    let mut body = SeqCGenerator::new();
    for element in &waveforms.elements {
        let Some(waves) = core_waves(waveforms, &channel_ids, &element.waveforms) else {
            continue;
        };
        let mut block = SeqCGenerator::new();
        add_timing_comment(&mut block, traits, settings, element);
        block.add_function_call_statement("waitWave", vec![], None::<String>);
        if element.trigger_wait {
            block.add_function_call_statement(
                "waitDigTrigger",
                vec![SeqCVariant::Integer(1), SeqCVariant::Integer(1)],
                None::<String>,
            );
        }
        block.add_play_wave_statement(waves);
        if element.readout {
            for trigger in ["WINT_EN+RO_TRIG", "WINT_EN"] {
                block.add_function_call_statement(
                    "setTrigger",
                    vec![SeqCVariant::String(trigger.to_string())],
                    None::<String>,
                );
            }
        }
        add_element_block(&mut body, waveforms, element, block)?;
    }
    seqc.add_repeat(SeqCVariant::String("loop_cnt".to_string()), body);
    seqc.add_function_call_statement("wait", vec![SeqCVariant::Integer(1000)], None::<String>);
    seqc.add_function_call_statement("setTrigger", vec![SeqCVariant::Integer(0)], None::<String>);

    let estimated_instructions = check_program_size(waveforms, traits, &seqc)?;
    Ok(SeqCPrograms {
        programs: vec![AwgProgram {
            awg_index: 0,
            source: seqc.generate_seq_c(),
            estimated_instructions,
        }],
        codeword_table: IndexMap::new(),
    })
}
