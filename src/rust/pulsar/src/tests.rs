// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use super::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use pulsar_codegen::Error as CodegenError;
use pulsar_codegen::channel::ChannelRegistry;
use pulsar_codegen::sample_waveforms::WaveformData;
use pulsar_codegen::sequence_table::SequenceTable;
use pulsar_common::DeviceUid;

use crate::driver::AwgDriver;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Set {
        device: String,
        node: String,
        value: f64,
    },
    Waveform {
        device: String,
        name: String,
    },
    SequenceTable {
        device: String,
        rows: usize,
    },
    Program {
        device: String,
        awg: u16,
    },
    Start(String),
    Stop(String),
}

impl Event {
    fn device(&self) -> &str {
        match self {
            Event::Set { device, .. }
            | Event::Waveform { device, .. }
            | Event::SequenceTable { device, .. }
            | Event::Program { device, .. }
            | Event::Start(device)
            | Event::Stop(device) => device,
        }
    }

    fn is_upload(&self) -> bool {
        matches!(
            self,
            Event::Waveform { .. } | Event::SequenceTable { .. } | Event::Program { .. }
        )
    }
}

/// Hardware events of all mock drivers, in call order.
pub(crate) type EventLog = Arc<Mutex<Vec<Event>>>;

pub(crate) fn event_log() -> EventLog {
    Arc::default()
}

#[derive(Default)]
struct MockState {
    nodes: HashMap<String, f64>,
    reset_on_upload: Vec<String>,
    failing_node: Option<String>,
    hangs: bool,
}

/// Driver double that records every call.
///
/// Clones share their state, so a test keeps a clone to inspect a driver that
/// was handed to [`Pulsar`]. Unset nodes read as zero.
#[derive(Clone)]
pub(crate) struct MockDriver {
    name: String,
    log: EventLog,
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub(crate) fn new(name: &str, log: &EventLog) -> Self {
        MockDriver {
            name: name.to_string(),
            log: Arc::clone(log),
            state: Arc::default(),
        }
    }

    /// The device never reports running after a start.
    pub(crate) fn hanging(self) -> Self {
        self.state.lock().unwrap().hangs = true;
        self
    }

    pub(crate) fn fail_on(&self, node: &str) {
        self.state.lock().unwrap().failing_node = Some(node.to_string());
    }

    pub(crate) fn preset(&self, node: &str, value: f64) {
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(node.to_string(), value);
    }

    /// Nodes the instrument resets to zero when it receives a program.
    ///
    /// Nodes under `awgs_<n>_` only belong to core `n` and are reset by the
    /// program upload of that core alone.
    pub(crate) fn reset_on_upload(&self, nodes: &[&str]) {
        self.state.lock().unwrap().reset_on_upload =
            nodes.iter().map(|node| node.to_string()).collect();
    }

    pub(crate) fn node(&self, node: &str) -> Option<f64> {
        self.state.lock().unwrap().nodes.get(node).copied()
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.device() == self.name)
            .cloned()
            .collect()
    }

    pub(crate) fn uploaded_waveforms(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Waveform { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn uploaded_programs(&self) -> Vec<u16> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Program { awg, .. } => Some(awg),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Event) {
        self.log.lock().unwrap().push(event);
    }

    fn reset_nodes(&self, awg_index: Option<u16>) {
        let mut state = self.state.lock().unwrap();
        for node in state.reset_on_upload.clone() {
            let core = node
                .strip_prefix("awgs_")
                .and_then(|rest| rest.split('_').next())
                .and_then(|core| core.parse::<u16>().ok());
            let affected = match (core, awg_index) {
                (Some(core), Some(awg_index)) => core == awg_index,
                _ => true,
            };
            if affected {
                state.nodes.insert(node, 0.0);
            }
        }
    }

    fn set_running(&self, running: bool) {
        let value = f64::from(u8::from(running));
        let mut state = self.state.lock().unwrap();
        state.nodes.insert("run_state".to_string(), value);
        for core in 0..4 {
            state.nodes.insert(format!("awgs_{core}_enable"), value);
        }
    }
}

impl AwgDriver for MockDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, node: &str) -> anyhow::Result<f64> {
        Ok(self.node(node).unwrap_or(0.0))
    }

    fn set(&mut self, node: &str, value: f64) -> anyhow::Result<()> {
        if self.state.lock().unwrap().failing_node.as_deref() == Some(node) {
            anyhow::bail!("Instrument rejected {value}");
        }
        self.preset(node, value);
        self.record(Event::Set {
            device: self.name.clone(),
            node: node.to_string(),
            value,
        });
        Ok(())
    }

    fn upload_waveform(&mut self, name: &str, _data: &WaveformData) -> anyhow::Result<()> {
        self.record(Event::Waveform {
            device: self.name.clone(),
            name: name.to_string(),
        });
        Ok(())
    }

    fn upload_sequence_table(&mut self, table: &SequenceTable) -> anyhow::Result<()> {
        self.reset_nodes(None);
        self.record(Event::SequenceTable {
            device: self.name.clone(),
            rows: table.len(),
        });
        Ok(())
    }

    fn upload_program(&mut self, awg_index: u16, _source: &str) -> anyhow::Result<()> {
        self.reset_nodes(Some(awg_index));
        self.record(Event::Program {
            device: self.name.clone(),
            awg: awg_index,
        });
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        self.record(Event::Start(self.name.clone()));
        let hangs = self.state.lock().unwrap().hangs;
        if !hangs {
            self.set_running(true);
        }
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.record(Event::Stop(self.name.clone()));
        self.set_running(false);
        Ok(())
    }
}

struct Setup {
    pulsar: Pulsar,
    log: EventLog,
    drivers: IndexMap<&'static str, MockDriver>,
}

fn setup_with(settings: CompilerSettings, hanging: &[&str]) -> Setup {
    let log = event_log();
    let mut pulsar = Pulsar::new(settings).unwrap();
    let mut drivers = IndexMap::new();
    for (name, class) in [
        ("tek", DeviceClass::Awg5014),
        ("hd", DeviceClass::Hdawg8),
        ("uhf", DeviceClass::Uhfqc),
    ] {
        let mut driver = MockDriver::new(name, &log);
        if hanging.contains(&name) {
            driver = driver.hanging();
        }
        pulsar
            .register_device(name, class, Box::new(driver.clone()), &IndexMap::new())
            .unwrap();
        drivers.insert(name, driver);
    }
    drivers["tek"].preset("clock", 1.2e9);
    drivers["tek"].preset("ch1_amp", 1.0);
    drivers["hd"].preset("clock_freq", 2.4e9);
    drivers["uhf"].preset("clock_freq", 1.8e9);
    pulsar.set_master("tek").unwrap();
    Setup {
        pulsar,
        log,
        drivers,
    }
}

fn setup() -> Setup {
    setup_with(CompilerSettings::default(), &[])
}

fn sequence() -> ResolvedSequence {
    ResolvedSequence::new("seq").with_segment(
        ResolvedSegment::new("s1")
            .with_element(
                "tek",
                Element::new("drive")
                    .with_trigger_wait()
                    .with_waveform("tek_ch1", vec![0.5; 256]),
            )
            .with_element(
                "hd",
                Element::new("flux")
                    .with_trigger_wait()
                    .with_waveform("hd_ch1", vec![0.25; 32]),
            )
            .with_element(
                "uhf",
                Element::new("readout")
                    .with_trigger_wait()
                    .with_readout()
                    .with_waveform("uhf_ch1", vec![0.1; 64]),
            ),
    )
}

fn starts(log: &EventLog) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            Event::Start(device) => Some(device.clone()),
            _ => None,
        })
        .collect()
}

fn names(devices: Vec<&DeviceUid>) -> Vec<String> {
    devices.into_iter().map(|uid| uid.to_string()).collect()
}

fn uploads(log: &EventLog) -> Vec<Event> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|event| event.is_upload())
        .cloned()
        .collect()
}

#[test]
fn test_register_device_channel_names() {
    let log = event_log();
    let mut pulsar = Pulsar::new(CompilerSettings::default()).unwrap();
    let names = IndexMap::from([("ch1".to_string(), "qb1_x".to_string())]);
    pulsar
        .register_device(
            "tek",
            DeviceClass::Awg5014,
            Box::new(MockDriver::new("tek", &log)),
            &names,
        )
        .unwrap();
    let channels: Vec<&str> = pulsar
        .registry()
        .channels_of("tek")
        .unwrap()
        .iter()
        .map(|channel| channel.name())
        .collect();
    assert_eq!(channels.len(), 12);
    assert_eq!(&channels[..4], &["qb1_x", "tek_ch1m1", "tek_ch1m2", "tek_ch2"]);
    assert_eq!(pulsar.channel("tek_ch2m1").unwrap().group(), "ch2");

    let result = pulsar.register_device(
        "tek",
        DeviceClass::Awg5014,
        Box::new(MockDriver::new("tek", &log)),
        &IndexMap::new(),
    );
    assert!(matches!(
        result,
        Err(Error::Codegen(CodegenError::DuplicateDevice(_)))
    ));

    // A taken channel name rejects the whole device.
    let result = pulsar.register_device(
        "hd",
        DeviceClass::Hdawg8,
        Box::new(MockDriver::new("hd", &log)),
        &names,
    );
    assert!(matches!(
        result,
        Err(Error::Codegen(CodegenError::DuplicateChannel { .. }))
    ));
    assert!(pulsar.registry().device_class("hd").is_err());
    assert!(pulsar.channel("hd_ch2").is_err());

    let unknown_output = IndexMap::from([("ch9".to_string(), "qb9".to_string())]);
    let result = pulsar.register_device(
        "hd",
        DeviceClass::Hdawg8,
        Box::new(MockDriver::new("hd", &log)),
        &unknown_output,
    );
    assert!(matches!(
        result,
        Err(Error::Codegen(CodegenError::Validation(_)))
    ));
}

#[test]
fn test_unsupported_device() {
    let log = event_log();
    let mut pulsar = Pulsar::new(CompilerSettings::default()).unwrap();
    pulsar
        .register_device(
            "shf",
            "SHFSG".parse().unwrap(),
            Box::new(MockDriver::new("shf", &log)),
            &IndexMap::new(),
        )
        .unwrap();
    assert!(pulsar.registry().channels_of("shf").unwrap().is_empty());
    assert!(matches!(
        pulsar.clock("shf"),
        Err(Error::UnsupportedDevice { .. })
    ));
    let err = pulsar
        .program(&sequence(), &PrecomputedResolver, None)
        .unwrap_err();
    assert_eq!(
        create_error_message(&err),
        "No backend supports device 'shf' of class 'SHFSG'"
    );
}

#[test]
fn test_program_and_start_order() {
    let Setup {
        mut pulsar,
        log,
        drivers,
    } = setup();
    let report = pulsar
        .program(&sequence(), &PrecomputedResolver, None)
        .unwrap();
    assert_eq!(report.programmed_devices().count(), 3);
    assert_eq!(pulsar.state(), PulsarState::Armed);
    assert_eq!(pulsar.devices_with_waveforms().len(), 3);
    assert_eq!(drivers["tek"].uploaded_waveforms().len(), 1);
    assert!(
        drivers["tek"]
            .events()
            .contains(&Event::SequenceTable {
                device: "tek".to_string(),
                rows: 1
            })
    );
    assert_eq!(drivers["hd"].uploaded_programs(), vec![0]);
    assert_eq!(drivers["uhf"].uploaded_programs(), vec![0]);

    pulsar.start().unwrap();
    assert_eq!(starts(&log), vec!["hd", "uhf", "tek"]);
    assert_eq!(pulsar.state(), PulsarState::Running);

    pulsar.stop().unwrap();
    let stops = log
        .lock()
        .unwrap()
        .iter()
        .filter(|event| matches!(event, Event::Stop(_)))
        .count();
    assert_eq!(stops, 3);
    assert_eq!(pulsar.state(), PulsarState::Stopped);
}

#[test]
fn test_slave_start_timeout() {
    let mut settings = CompilerSettings::default();
    settings.slave_start_timeout = 0.05;
    settings.slave_poll_interval = 0.01;
    let Setup {
        mut pulsar, log, ..
    } = setup_with(settings, &["uhf"]);
    pulsar
        .program(&sequence(), &PrecomputedResolver, None)
        .unwrap();
    let err = pulsar.start().unwrap_err();
    assert!(matches!(
        &err,
        Error::SlaveStartTimeout { device, .. } if device == "uhf"
    ));
    // The master is never started.
    assert_eq!(starts(&log), vec!["hd", "uhf"]);
}

#[test]
fn test_huge_slave_start_timeout_is_clamped() {
    let mut settings = CompilerSettings::default();
    settings.slave_start_timeout = 1e19;
    let Setup {
        mut pulsar, log, ..
    } = setup_with(settings, &[]);
    assert_eq!(pulsar.settings().slave_start_timeout, 3600.0);
    pulsar
        .program(&sequence(), &PrecomputedResolver, None)
        .unwrap();
    pulsar.start().unwrap();
    assert_eq!(starts(&log), vec!["hd", "uhf", "tek"]);
}

#[test]
fn test_start_without_master() {
    let log = event_log();
    let mut pulsar = Pulsar::new(CompilerSettings::default()).unwrap();
    for (name, class) in [("hd", DeviceClass::Hdawg8), ("uhf", DeviceClass::Uhfqc)] {
        let driver = MockDriver::new(name, &log).hanging();
        pulsar
            .register_device(name, class, Box::new(driver), &IndexMap::new())
            .unwrap();
    }
    pulsar
        .program(&sequence(), &PrecomputedResolver, None)
        .unwrap();
    // Nothing is polled, so devices that never report running do not matter.
    pulsar.start().unwrap();
    assert_eq!(starts(&log), vec!["hd", "uhf"]);
}

#[test]
fn test_compile_error_uploads_nothing() {
    let Setup {
        mut pulsar, log, ..
    } = setup();
    pulsar
        .program(&sequence(), &PrecomputedResolver, None)
        .unwrap();
    let uploaded = uploads(&log).len();
    let previous = pulsar.last_programs().clone();

    // 17 samples are off the UHFQC grid of 8.
    let broken = sequence().with_segment(ResolvedSegment::new("s2").with_element(
        "uhf",
        Element::new("odd").with_waveform("uhf_ch1", vec![0.1; 17]),
    ));
    let err = pulsar
        .program(&broken, &PrecomputedResolver, None)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Codegen(CodegenError::Granularity { .. })
    ));
    assert_eq!(uploads(&log).len(), uploaded);
    assert_eq!(pulsar.devices_with_waveforms().len(), 3);
    assert_eq!(pulsar.last_programs(), &previous);
    assert_eq!(pulsar.state(), PulsarState::Armed);
}

#[test]
fn test_generate_error_uploads_nothing() {
    let Setup {
        mut pulsar, log, ..
    } = setup();
    pulsar
        .program(&sequence(), &PrecomputedResolver, None)
        .unwrap();
    let uploaded = uploads(&log).len();
    let previous = pulsar.last_programs().clone();

    // Every device packs, but the UHFQC program exceeds its instruction memory
    // while the AWG5014 table and the HDAWG8 program would fit.
    let mut readouts = ResolvedSegment::new("s2");
    for i in 0..5000 {
        readouts = readouts.with_element(
            "uhf",
            Element::new(&format!("ro_{i}")).with_waveform("uhf_ch1", vec![0.1; 8]),
        );
    }
    let oversized = sequence().with_segment(readouts);
    let err = pulsar
        .program(&oversized, &PrecomputedResolver, None)
        .unwrap_err();
    assert!(matches!(
        &err,
        Error::Codegen(CodegenError::ProgramTooLarge { device, limit: 8192, .. })
            if device == "uhf"
    ));
    assert_eq!(uploads(&log).len(), uploaded);
    assert_eq!(names(pulsar.devices_with_waveforms()), vec!["tek", "hd", "uhf"]);
    assert_eq!(pulsar.last_programs(), &previous);
    assert_eq!(pulsar.state(), PulsarState::Armed);

    // Without an earlier program nothing is marked as holding waveforms.
    let Setup {
        mut pulsar, log, ..
    } = setup();
    assert!(pulsar.program(&oversized, &PrecomputedResolver, None).is_err());
    assert!(uploads(&log).is_empty());
    assert!(pulsar.devices_with_waveforms().is_empty());
    assert!(pulsar.last_programs().is_empty());
    assert_eq!(pulsar.state(), PulsarState::Idle);
}

#[test]
fn test_program_is_idempotent() {
    let Setup {
        mut pulsar, log, ..
    } = setup();
    pulsar
        .program(&sequence(), &PrecomputedResolver, None)
        .unwrap();
    let first_programs = pulsar.last_programs().clone();
    let first_uploads = uploads(&log);
    log.lock().unwrap().clear();

    pulsar
        .program(&sequence(), &PrecomputedResolver, None)
        .unwrap();
    assert_eq!(pulsar.last_programs(), &first_programs);
    assert_eq!(uploads(&log), first_uploads);
}

#[test]
fn test_devices_without_data_are_not_used() {
    let Setup {
        mut pulsar, log, ..
    } = setup();
    let sequence = ResolvedSequence::new("seq").with_segment(
        ResolvedSegment::new("s1").with_element(
            "hd",
            Element::new("flux").with_waveform("hd_ch3", vec![0.25; 32]),
        ),
    );
    let report = pulsar
        .program(&sequence, &PrecomputedResolver, None)
        .unwrap();
    assert!(!report.devices["uhf"].programmed);
    assert_eq!(
        names(report.programmed_devices().collect()),
        vec!["hd"]
    );
    assert_eq!(names(pulsar.devices_with_waveforms()), vec!["hd"]);
    assert!(uploads(&log).iter().all(|event| event.device() == "hd"));

    // The master is started even without waveforms.
    pulsar.start().unwrap();
    assert_eq!(starts(&log), vec!["hd", "tek"]);
}

#[test]
fn test_inactive_devices() {
    let Setup {
        mut pulsar, log, ..
    } = setup();
    pulsar.set_active("uhf", false).unwrap();
    let report = pulsar
        .program(&sequence(), &PrecomputedResolver, None)
        .unwrap();
    assert!(!report.devices.contains_key("uhf"));
    assert_eq!(names(pulsar.active_devices()), vec!["tek", "hd"]);

    pulsar
        .program(&sequence(), &PrecomputedResolver, Some(&["hd"]))
        .unwrap();
    assert_eq!(names(pulsar.devices_with_waveforms()), vec!["hd"]);

    pulsar
        .program(&sequence(), &PrecomputedResolver, None)
        .unwrap();
    pulsar.set_active("hd", false).unwrap();
    log.lock().unwrap().clear();
    pulsar.stop().unwrap();
    assert_eq!(*log.lock().unwrap(), vec![Event::Stop("tek".to_string())]);
}

#[test]
fn test_rejected_values_never_reach_hardware() {
    let Setup {
        mut pulsar,
        drivers,
        ..
    } = setup();
    let set_count = || {
        drivers["tek"]
            .events()
            .iter()
            .filter(|event| matches!(event, Event::Set { .. }))
            .count()
    };
    let result = pulsar.set_channel_amp("tek_ch1", 3.0);
    assert!(matches!(
        result,
        Err(Error::Codegen(CodegenError::Validation(_)))
    ));
    assert_eq!(set_count(), 0);
    assert_eq!(pulsar.channel("tek_ch1").unwrap().amp(), 1.0);

    pulsar.set_channel_amp("tek_ch1", 0.25).unwrap();
    assert_eq!(drivers["tek"].node("ch1_amp"), Some(0.5));
    assert_eq!(pulsar.channel_amp("tek_ch1").unwrap(), 0.25);

    drivers["tek"].fail_on("ch1_offset");
    let err = pulsar.set_channel_offset("tek_ch1", 0.1).unwrap_err();
    assert!(create_error_message(&err).contains("Failed to set 'ch1_offset'"));
    assert_eq!(pulsar.channel("tek_ch1").unwrap().offset(), 0.0);

    assert!(
        pulsar
            .set_channel_offset_mode("tek_ch1m1", OffsetMode::Hardware)
            .is_err()
    );
    assert!(matches!(
        pulsar.set_channel_amp("missing", 0.5),
        Err(Error::Codegen(CodegenError::NotFound(_)))
    ));
}

#[test]
fn test_clock() {
    let Setup { pulsar, .. } = setup();
    assert_eq!(pulsar.clock("tek").unwrap(), 1.2e9);
    assert_eq!(pulsar.clock("tek_ch2m1").unwrap(), 1.2e9);
    assert_eq!(pulsar.clock("hd_ch8").unwrap(), 2.4e9);
    assert!(matches!(
        pulsar.clock("missing"),
        Err(Error::Codegen(CodegenError::UnknownDevice(_)))
    ));
}

#[test]
fn test_inter_element_spacing() {
    let Setup { pulsar, .. } = setup();
    let expected = 8.0 / 1.8e9;
    assert!((pulsar.inter_element_spacing() - expected).abs() < 1e-18);

    let mut settings = CompilerSettings::default();
    settings.inter_element_spacing = InterElementSpacing::Fixed(1e-6);
    let Setup { pulsar, .. } = setup_with(settings, &[]);
    assert_eq!(pulsar.inter_element_spacing(), 1e-6);
}

/// Resolver that checks what was read from the hardware before compiling.
struct CheckingResolver {
    delay: f64,
}

impl TimingResolver for CheckingResolver {
    type Sequence = ResolvedSequence;

    fn resolve(
        &self,
        sequence: &ResolvedSequence,
        registry: &ChannelRegistry,
        prequery: &PrequeryCache,
    ) -> pulsar_codegen::Result<ResolvedSequence> {
        if prequery.clock("tek") != Some(1.2e9) || prequery.amplitude("tek_ch1") != Some(0.5) {
            return Err(CodegenError::new("Unexpected prequery"));
        }
        if prequery.amplitude("uhf_ch1") != Some(1.0) {
            return Err(CodegenError::new("Unexpected UHFQC amplitude"));
        }
        let channel = registry.lookup("hd_ch1")?;
        if channel.delay() != self.delay {
            return Err(CodegenError::new(&format!(
                "Unexpected delay {} of channel 'hd_ch1'",
                channel.delay()
            )));
        }
        Ok(sequence.clone())
    }
}

#[test]
fn test_prequery() {
    let Setup { mut pulsar, .. } = setup();
    pulsar
        .program(&sequence(), &CheckingResolver { delay: 0.0 }, None)
        .unwrap();
}

#[test]
fn test_resolver_sees_channel_tunables() {
    let Setup { mut pulsar, .. } = setup();
    let resolver = CheckingResolver { delay: 2e-8 };
    assert!(pulsar.program(&sequence(), &resolver, None).is_err());

    let channel = pulsar.channel_mut("hd_ch1").unwrap();
    channel.set_delay(2e-8).unwrap();
    channel.set_charge_buildup_compensation(true);
    channel.set_compensation_pulse_scale(0.5).unwrap();
    pulsar.program(&sequence(), &resolver, None).unwrap();

    let channel = pulsar.registry().lookup("hd_ch1").unwrap();
    assert!(channel.charge_buildup_compensation());
    assert_eq!(channel.compensation_pulse_scale(), 0.5);
}
