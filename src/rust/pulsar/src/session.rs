// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Session object that owns the registered instruments.
//!
//! [`Pulsar`] compiles a sequence for every active device, uploads the result
//! only once every device compiled, and starts the trigger slaves before the
//! trigger master so that no device misses the first trigger.

use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use indexmap::{IndexMap, IndexSet};
use pulsar_codegen::Error as CodegenError;
use pulsar_codegen::channel::{Channel, ChannelOptions, ChannelRegistry, OffsetMode};
use pulsar_codegen::ir::{PrequeryCache, TimingResolver};
use pulsar_codegen::result::{CompileReport, CompiledProgram, DeviceReport};
use pulsar_codegen::sample_waveforms::sample_waveforms;
use pulsar_codegen::settings::{CompilerSettings, InterElementSpacing};
use pulsar_common::{ChannelKind, DeviceClass, DeviceUid};
use pulsar_log::{debug, info, warn};

use crate::backend::{AwgBackend, select_backend};
use crate::driver::AwgDriver;
use crate::{Error, Result};

/// Stage of the programming and run cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulsarState {
    Idle,
    Prequery,
    ResolveTiming,
    Pack,
    Generate,
    Upload,
    /// Programs are loaded and the devices wait for `start`.
    Armed,
    Running,
    Stopped,
}

struct Device {
    uid: DeviceUid,
    class: DeviceClass,
    backend: Option<&'static dyn AwgBackend>,
    driver: Box<dyn AwgDriver>,
    active: bool,
}

impl Device {
    fn backend(&self) -> Result<&'static dyn AwgBackend> {
        self.backend.ok_or_else(|| Error::UnsupportedDevice {
            device: self.uid.to_string(),
            class: self.class.to_string(),
        })
    }

    fn start(&mut self) -> Result<()> {
        let uid = &self.uid;
        self.driver
            .start()
            .with_context(|| format!("Failed to start device '{uid}'"))?;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let uid = &self.uid;
        self.driver
            .stop()
            .with_context(|| format!("Failed to stop device '{uid}'"))?;
        Ok(())
    }
}

pub struct Pulsar {
    settings: CompilerSettings,
    registry: ChannelRegistry,
    devices: IndexMap<DeviceUid, Device>,
    master: Option<DeviceUid>,
    with_waveforms: IndexSet<DeviceUid>,
    last_programs: IndexMap<DeviceUid, CompiledProgram>,
    state: PulsarState,
}

impl Pulsar {
    pub fn new(mut settings: CompilerSettings) -> Result<Self> {
        for msg in settings.sanitize()? {
            warn!(
                "Compiler setting `{}` is sanitized from {} to {}. Reason: {}",
                msg.field.to_uppercase(),
                msg.original,
                msg.sanitized,
                msg.reason
            );
        }
        Ok(Pulsar {
            settings,
            registry: ChannelRegistry::new(),
            devices: IndexMap::new(),
            master: None,
            with_waveforms: IndexSet::new(),
            last_programs: IndexMap::new(),
            state: PulsarState::Idle,
        })
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn state(&self) -> PulsarState {
        self.state
    }

    fn device(&self, name: &str) -> Result<&Device> {
        self.devices
            .get(name)
            .ok_or_else(|| CodegenError::UnknownDevice(name.to_string()).into())
    }

    fn device_mut(&mut self, name: &str) -> Result<&mut Device> {
        self.devices
            .get_mut(name)
            .ok_or_else(|| CodegenError::UnknownDevice(name.to_string()).into())
    }

    /// Register an instrument and create a channel for each of its outputs.
    ///
    /// Channels are named `<device>_<id>` unless `channel_name_map` maps the
    /// hardware id to another name. Nothing is registered if any name is taken.
    /// A device no backend supports is registered without channels, and every
    /// later hardware operation on it fails.
    pub fn register_device(
        &mut self,
        name: &str,
        class: DeviceClass,
        driver: Box<dyn AwgDriver>,
        channel_name_map: &IndexMap<String, String>,
    ) -> Result<DeviceUid> {
        if self.devices.contains_key(name) {
            return Err(CodegenError::DuplicateDevice(name.to_string()).into());
        }
        let backend = select_backend(&class);
        let mut outputs = vec![];
        if let Some(backend) = backend {
            let traits = backend.traits();
            for analog in traits.analog_ids() {
                let markers = traits.marker_ids(&analog);
                outputs.push((analog, ChannelKind::Analog));
                outputs.extend(markers.into_iter().map(|id| (id, ChannelKind::Marker)));
            }
            if let Some(id) = channel_name_map
                .keys()
                .find(|id| !outputs.iter().any(|(output, _)| output == *id))
            {
                return Err(CodegenError::Validation(format!(
                    "Device '{name}' of class '{class}' has no output '{id}'"
                ))
                .into());
            }
        } else {
            warn!("No backend supports device '{}' of class '{}'", name, class);
        }

        let named: Vec<(String, String, ChannelKind)> = outputs
            .into_iter()
            .map(|(id, kind)| {
                let channel = channel_name_map
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| format!("{name}_{id}"));
                (channel, id, kind)
            })
            .collect();
        let mut seen = HashSet::new();
        for (channel, _, _) in &named {
            if let Ok(existing) = self.registry.lookup(channel) {
                return Err(CodegenError::DuplicateChannel {
                    channel: channel.clone(),
                    device: existing.device().to_string(),
                }
                .into());
            }
            if !seen.insert(channel.as_str()) {
                return Err(CodegenError::DuplicateChannel {
                    channel: channel.clone(),
                    device: name.to_string(),
                }
                .into());
            }
        }

        let uid = self.registry.register_device(name, class.clone())?;
        if let Some(backend) = backend {
            for (channel, id, kind) in &named {
                self.registry.register_channel(
                    channel,
                    name,
                    id,
                    *kind,
                    backend.channel_limits(*kind),
                    ChannelOptions::default(),
                )?;
            }
        }
        info!(
            "Registered device '{}' of class '{}' with {} channel(s)",
            name,
            class,
            named.len()
        );
        self.devices.insert(
            uid.clone(),
            Device {
                uid: uid.clone(),
                class,
                backend,
                driver,
                active: true,
            },
        );
        Ok(uid)
    }

    /// Device that sends the trigger all other devices wait for.
    pub fn set_master(&mut self, name: &str) -> Result<()> {
        let uid = self.device(name)?.uid.clone();
        self.master = Some(uid);
        Ok(())
    }

    pub fn master(&self) -> Option<&DeviceUid> {
        self.master.as_ref()
    }

    /// Inactive devices are neither programmed nor started.
    pub fn set_active(&mut self, name: &str, active: bool) -> Result<()> {
        self.device_mut(name)?.active = active;
        Ok(())
    }

    pub fn active_devices(&self) -> Vec<&DeviceUid> {
        self.devices
            .values()
            .filter(|device| device.active)
            .map(|device| &device.uid)
            .collect()
    }

    /// Devices holding waveforms of the last successful `program` call.
    pub fn devices_with_waveforms(&self) -> Vec<&DeviceUid> {
        self.with_waveforms.iter().collect()
    }

    /// Latest compiled program per device.
    pub fn last_programs(&self) -> &IndexMap<DeviceUid, CompiledProgram> {
        &self.last_programs
    }

    pub fn channel(&self, name: &str) -> Result<&Channel> {
        Ok(self.registry.lookup(name)?)
    }

    /// Tunables that are only used when sampling, e.g. delay or distortion.
    pub fn channel_mut(&mut self, name: &str) -> Result<&mut Channel> {
        Ok(self.registry.lookup_mut(name)?)
    }

    /// Change a channel and write it to the hardware.
    ///
    /// A value rejected by the channel or by the instrument leaves the channel
    /// as it was.
    fn update_channel(
        &mut self,
        name: &str,
        update: impl FnOnce(&mut Channel) -> pulsar_codegen::Result<()>,
    ) -> Result<()> {
        let channel = self.registry.lookup_mut(name)?;
        let previous = channel.clone();
        update(channel)?;
        let channel = self.registry.lookup(name)?;
        let device = self
            .devices
            .get_mut(channel.device())
            .ok_or_else(|| CodegenError::UnknownDevice(channel.device().to_string()))?;
        let result = device
            .backend()
            .and_then(|backend| backend.configure_channel(device.driver.as_mut(), channel));
        if result.is_err() {
            *self.registry.lookup_mut(name)? = previous;
        }
        result
    }

    pub fn set_channel_amp(&mut self, name: &str, value: f64) -> Result<()> {
        self.update_channel(name, |channel| channel.set_amp(value))
    }

    pub fn set_channel_offset(&mut self, name: &str, value: f64) -> Result<()> {
        self.update_channel(name, |channel| channel.set_offset(value))
    }

    pub fn set_channel_offset_mode(&mut self, name: &str, value: OffsetMode) -> Result<()> {
        self.update_channel(name, |channel| channel.set_offset_mode(value))
    }

    /// Peak amplitude of a channel as set on the instrument.
    pub fn channel_amp(&self, name: &str) -> Result<f64> {
        let channel = self.registry.lookup(name)?;
        let device = self.device(channel.device())?;
        device
            .backend()?
            .channel_amplitude(device.driver.as_ref(), channel)
    }

    /// Sampling clock of a device, or of the device owning a channel.
    pub fn clock(&self, name: &str) -> Result<f64> {
        let device = match self.registry.lookup(name) {
            Ok(channel) => self.device(channel.device())?,
            Err(_) => self.device(name)?,
        };
        device.backend()?.clock(device.driver.as_ref())
    }

    /// Time between two consecutive elements, in seconds.
    pub fn inter_element_spacing(&self) -> f64 {
        match self.settings.inter_element_spacing {
            InterElementSpacing::Fixed(spacing) => spacing,
            InterElementSpacing::Auto => self
                .devices
                .values()
                .filter_map(|device| device.backend)
                .map(|backend| backend.traits().inter_element_deadtime_seconds())
                .fold(0.0, f64::max),
        }
    }

    fn prequery(&self, targets: &[DeviceUid]) -> Result<PrequeryCache> {
        let mut cache = PrequeryCache::new();
        for uid in targets {
            let device = self.device(uid)?;
            let backend = device.backend()?;
            let driver = device.driver.as_ref();
            cache.insert_clock(uid.clone(), backend.clock(driver)?);
            for channel in self.registry.channels_of(uid)? {
                let amplitude = backend.channel_amplitude(driver, channel)?;
                cache.insert_amplitude(channel.name(), amplitude);
            }
        }
        Ok(cache)
    }

    /// Compile `sequence` for the active devices and upload the programs.
    ///
    /// `devices` restricts programming to the named devices; by default every
    /// registered device is programmed. Uploading starts only after all devices
    /// compiled, so a compile error leaves every instrument as it was.
    pub fn program<R: TimingResolver>(
        &mut self,
        sequence: &R::Sequence,
        resolver: &R,
        devices: Option<&[&str]>,
    ) -> Result<CompileReport> {
        let previous = self.state;
        let result = self.program_devices(sequence, resolver, devices);
        if result.is_err() {
            self.state = match self.state {
                PulsarState::Upload => PulsarState::Idle,
                _ => previous,
            };
        }
        result
    }

    fn program_devices<R: TimingResolver>(
        &mut self,
        sequence: &R::Sequence,
        resolver: &R,
        devices: Option<&[&str]>,
    ) -> Result<CompileReport> {
        let requested = match devices {
            Some(names) => names
                .iter()
                .map(|name| self.device(name).map(|device| device.uid.clone()))
                .collect::<Result<Vec<_>>>()?,
            None => self.devices.keys().cloned().collect(),
        };
        let mut targets = vec![];
        for uid in requested {
            let device = self.device(&uid)?;
            if !device.active {
                debug!("Device '{}' is inactive and not programmed", uid);
                continue;
            }
            device.backend()?;
            targets.push(uid);
        }

        self.state = PulsarState::Prequery;
        let prequery = self.prequery(&targets)?;

        self.state = PulsarState::ResolveTiming;
        let resolved = resolver.resolve(sequence, &self.registry, &prequery)?;

        self.state = PulsarState::Pack;
        let mut packed = vec![];
        for uid in &targets {
            let backend = self.device(uid)?.backend()?;
            let waveforms = sample_waveforms(
                uid,
                backend.traits(),
                &self.registry,
                &self.settings,
                &resolved,
            )?;
            packed.push((backend, waveforms));
        }

        self.state = PulsarState::Generate;
        let mut report = CompileReport::default();
        let mut programs = IndexMap::new();
        for (backend, waveforms) in packed {
            let uid = waveforms.device.clone();
            if waveforms.is_empty() {
                debug!("Device '{}' has no waveforms in this sequence", uid);
                report.devices.insert(
                    uid.clone(),
                    DeviceReport {
                        device: uid,
                        programmed: false,
                        waveform_count: 0,
                        program_size: 0,
                    },
                );
                continue;
            }
            let program = backend.generate_program(waveforms, &self.settings)?;
            report
                .devices
                .insert(uid.clone(), DeviceReport::from(&program));
            programs.insert(uid, (backend, program));
        }

        self.state = PulsarState::Upload;
        self.with_waveforms.clear();
        self.last_programs.clear();
        for (uid, (backend, program)) in programs {
            let device = self
                .devices
                .get_mut(&uid)
                .ok_or_else(|| CodegenError::UnknownDevice(uid.to_string()))?;
            backend.upload(device.driver.as_mut(), &program, &self.registry)?;
            info!(
                "Programmed device '{}': {} waveform(s), program size {}",
                uid,
                program.waveform_count(),
                program.program_size()
            );
            self.with_waveforms.insert(uid.clone());
            self.last_programs.insert(uid, program);
        }
        self.state = PulsarState::Armed;
        Ok(report)
    }

    /// Devices that are active and hold waveforms.
    fn used_devices(&self) -> Vec<DeviceUid> {
        self.devices
            .values()
            .filter(|device| device.active && self.with_waveforms.contains(&device.uid))
            .map(|device| device.uid.clone())
            .collect()
    }

    fn is_running(&self, uid: &DeviceUid) -> Result<bool> {
        let device = self.device(uid)?;
        device
            .backend()?
            .is_running(device.driver.as_ref(), self.last_programs.get(uid))
    }

    /// Start the used devices.
    ///
    /// Trigger slaves are started first and polled until they run; the master
    /// is started last. If a slave does not run within the configured timeout
    /// the master is not started.
    pub fn start(&mut self) -> Result<()> {
        let used = self.used_devices();
        let Some(master) = self.master.clone() else {
            for uid in &used {
                self.device_mut(uid)?.start()?;
            }
            info!("Started {} device(s)", used.len());
            self.state = PulsarState::Running;
            return Ok(());
        };

        let slaves: Vec<DeviceUid> = used.into_iter().filter(|uid| *uid != master).collect();
        for uid in &slaves {
            self.device_mut(uid)?.start()?;
        }
        let timeout = Duration::from_secs_f64(self.settings.slave_start_timeout);
        let poll_interval = Duration::from_secs_f64(self.settings.slave_poll_interval);
        let deadline = Instant::now() + timeout;
        let mut pending = slaves;
        loop {
            let mut waiting = vec![];
            for uid in pending {
                if !self.is_running(&uid)? {
                    waiting.push(uid);
                }
            }
            pending = waiting;
            let Some(first) = pending.first() else {
                break;
            };
            if Instant::now() >= deadline {
                return Err(Error::SlaveStartTimeout {
                    device: first.to_string(),
                    timeout: self.settings.slave_start_timeout,
                });
            }
            thread::sleep(poll_interval);
        }

        let master = self.device_mut(&master)?;
        if master.active {
            master.start()?;
        } else {
            warn!("Trigger master '{}' is inactive and not started", master.uid);
        }
        self.state = PulsarState::Running;
        Ok(())
    }

    /// Stop the devices that are active and hold waveforms.
    pub fn stop(&mut self) -> Result<()> {
        for uid in self.used_devices() {
            self.device_mut(&uid)?.stop()?;
        }
        self.state = PulsarState::Stopped;
        Ok(())
    }
}
