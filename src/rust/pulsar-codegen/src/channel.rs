// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Registry of the hardware outputs known to a session.
//!
//! Every channel belongs to exactly one device and one channel group. The group
//! of a channel is the analog output it is co-timed with, so `ch2`, `ch2m1` and
//! `ch2m2` on an AWG5014 share the group `ch2`.
//!
//! Tunables are validated on every write. A rejected value leaves the stored
//! value untouched.

use indexmap::IndexMap;
use pulsar_common::{ChannelKind, DeviceClass, DeviceUid};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistortionMode {
    #[default]
    Off,
    Precalculate,
}

/// Where the DC offset of an analog output is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetMode {
    /// Offset of the analog output stage.
    #[default]
    Software,
    /// Offset added by the separate DC output of the device.
    Hardware,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub const UNBOUNDED: ValueRange = ValueRange {
        min: f64::NEG_INFINITY,
        max: f64::INFINITY,
    };

    pub const fn new(min: f64, max: f64) -> Self {
        ValueRange { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// Validators for the tunables of one channel.
///
/// The ranges depend on the device class and on the channel kind, and are
/// provided by the backend of the owning device.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelLimits {
    pub amp: ValueRange,
    pub offset: ValueRange,
    pub delay: ValueRange,
}

impl Default for ChannelLimits {
    fn default() -> Self {
        ChannelLimits {
            amp: ValueRange::UNBOUNDED,
            offset: ValueRange::UNBOUNDED,
            delay: ValueRange::new(-1e-6, 1e-6),
        }
    }
}

/// Initial values of a channel's tunables.
#[derive(Debug, Clone, Default)]
pub struct ChannelOptions {
    pub amp: Option<f64>,
    pub offset: Option<f64>,
    pub delay: Option<f64>,
    pub offset_mode: OffsetMode,
}

#[derive(Debug, Clone)]
pub struct Channel {
    name: String,
    device: DeviceUid,
    id: String,
    kind: ChannelKind,
    group: String,
    limits: ChannelLimits,
    amp: f64,
    offset: f64,
    delay: f64,
    active: bool,
    distortion: DistortionMode,
    distortion_kernels: IndexMap<String, Vec<f64>>,
    charge_buildup_compensation: bool,
    compensation_pulse_scale: f64,
    offset_mode: OffsetMode,
}

fn check_range(channel: &str, parameter: &str, value: f64, range: &ValueRange) -> Result<()> {
    if range.contains(value) {
        return Ok(());
    }
    Err(Error::Validation(format!(
        "{value} for '{parameter}' of channel '{channel}' is outside [{}, {}]",
        range.min, range.max
    )))
}

impl Channel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &DeviceUid {
        &self.device
    }

    /// Device local id, e.g. `ch1` or `ch1m2`.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Id of the analog output this channel is co-timed with.
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn limits(&self) -> &ChannelLimits {
        &self.limits
    }

    pub fn amp(&self) -> f64 {
        self.amp
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn delay(&self) -> f64 {
        self.delay
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn distortion(&self) -> DistortionMode {
        self.distortion
    }

    pub fn distortion_kernels(&self) -> &IndexMap<String, Vec<f64>> {
        &self.distortion_kernels
    }

    pub fn charge_buildup_compensation(&self) -> bool {
        self.charge_buildup_compensation
    }

    pub fn compensation_pulse_scale(&self) -> f64 {
        self.compensation_pulse_scale
    }

    pub fn offset_mode(&self) -> OffsetMode {
        self.offset_mode
    }

    pub fn set_amp(&mut self, value: f64) -> Result<()> {
        check_range(&self.name, "amp", value, &self.limits.amp)?;
        self.amp = value;
        Ok(())
    }

    pub fn set_offset(&mut self, value: f64) -> Result<()> {
        check_range(&self.name, "offset", value, &self.limits.offset)?;
        self.offset = value;
        Ok(())
    }

    pub fn set_delay(&mut self, value: f64) -> Result<()> {
        check_range(&self.name, "delay", value, &self.limits.delay)?;
        self.delay = value;
        Ok(())
    }

    pub fn set_active(&mut self, value: bool) {
        self.active = value;
    }

    pub fn set_distortion(&mut self, value: DistortionMode) {
        self.distortion = value;
    }

    /// Add or replace a FIR kernel used when distortion is precalculated.
    pub fn set_distortion_kernel(&mut self, name: &str, coefficients: Vec<f64>) -> Result<()> {
        if coefficients.is_empty() || coefficients.iter().any(|c| !c.is_finite()) {
            return Err(Error::Validation(format!(
                "Distortion kernel '{name}' of channel '{}' must be a non-empty list of finite coefficients",
                self.name
            )));
        }
        self.distortion_kernels.insert(name.to_string(), coefficients);
        Ok(())
    }

    pub fn set_charge_buildup_compensation(&mut self, value: bool) {
        self.charge_buildup_compensation = value;
    }

    pub fn set_compensation_pulse_scale(&mut self, value: f64) -> Result<()> {
        check_range(
            &self.name,
            "compensation_pulse_scale",
            value,
            &ValueRange::new(0.0, 1.0),
        )?;
        self.compensation_pulse_scale = value;
        Ok(())
    }

    pub fn set_offset_mode(&mut self, value: OffsetMode) -> Result<()> {
        if self.kind != ChannelKind::Analog && value == OffsetMode::Hardware {
            return Err(Error::Validation(format!(
                "Marker channel '{}' has no hardware offset",
                self.name
            )));
        }
        self.offset_mode = value;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct DeviceEntry {
    class: DeviceClass,
    channels: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    devices: IndexMap<DeviceUid, DeviceEntry>,
    channels: IndexMap<String, Channel>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_device(&mut self, name: &str, class: DeviceClass) -> Result<DeviceUid> {
        if self.devices.contains_key(name) {
            return Err(Error::DuplicateDevice(name.to_string()));
        }
        let uid = DeviceUid::from(name);
        self.devices.insert(
            uid.clone(),
            DeviceEntry {
                class,
                channels: vec![],
            },
        );
        Ok(uid)
    }

    pub fn device_class(&self, device: &str) -> Result<&DeviceClass> {
        self.devices
            .get(device)
            .map(|entry| &entry.class)
            .ok_or_else(|| Error::UnknownDevice(device.to_string()))
    }

    pub fn devices(&self) -> impl Iterator<Item = (&DeviceUid, &DeviceClass)> {
        self.devices.iter().map(|(uid, entry)| (uid, &entry.class))
    }

    /// Register the hardware output `id` of `device` under the session wide `name`.
    pub fn register_channel(
        &mut self,
        name: &str,
        device: &str,
        id: &str,
        kind: ChannelKind,
        limits: ChannelLimits,
        options: ChannelOptions,
    ) -> Result<&Channel> {
        let (device_uid, entry) = self
            .devices
            .get_key_value(device)
            .ok_or_else(|| Error::UnknownDevice(device.to_string()))?;
        if let Some(existing) = self.channels.get(name) {
            return Err(Error::DuplicateChannel {
                channel: name.to_string(),
                device: existing.device.to_string(),
            });
        }
        if let Some(other) = entry
            .channels
            .iter()
            .filter_map(|n| self.channels.get(n))
            .find(|c| c.id == id)
        {
            return Err(Error::DuplicateChannel {
                channel: other.name.clone(),
                device: device.to_string(),
            });
        }
        let group = match entry.class.traits() {
            Some(traits) => {
                let (number, marker) = traits.parse_channel_id(id).ok_or_else(|| {
                    Error::Validation(format!(
                        "Device '{device}' of class '{}' has no output '{id}'",
                        entry.class
                    ))
                })?;
                let expected = if marker.is_some() {
                    ChannelKind::Marker
                } else {
                    ChannelKind::Analog
                };
                if expected != kind {
                    return Err(Error::Validation(format!(
                        "Output '{id}' of device '{device}' is {expected}, not {kind}"
                    )));
                }
                format!("ch{number}")
            }
            None => id.to_string(),
        };
        let mut channel = Channel {
            name: name.to_string(),
            device: device_uid.clone(),
            id: id.to_string(),
            kind,
            group,
            limits,
            amp: 1.0,
            offset: 0.0,
            delay: 0.0,
            active: true,
            distortion: DistortionMode::Off,
            distortion_kernels: IndexMap::new(),
            charge_buildup_compensation: false,
            compensation_pulse_scale: 0.5,
            offset_mode: OffsetMode::Software,
        };
        if let Some(amp) = options.amp {
            channel.set_amp(amp)?;
        }
        if let Some(offset) = options.offset {
            channel.set_offset(offset)?;
        }
        if let Some(delay) = options.delay {
            channel.set_delay(delay)?;
        }
        channel.set_offset_mode(options.offset_mode)?;

        if let Some(entry) = self.devices.get_mut(device) {
            entry.channels.push(name.to_string());
        }
        let channel: &Channel = self.channels.entry(name.to_string()).or_insert(channel);
        Ok(channel)
    }

    pub fn lookup(&self, name: &str) -> Result<&Channel> {
        self.channels
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn lookup_mut(&mut self, name: &str) -> Result<&mut Channel> {
        self.channels
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Channels of a device in registration order.
    pub fn channels_of(&self, device: &str) -> Result<Vec<&Channel>> {
        let entry = self
            .devices
            .get(device)
            .ok_or_else(|| Error::UnknownDevice(device.to_string()))?;
        Ok(entry
            .channels
            .iter()
            .filter_map(|name| self.channels.get(name))
            .collect())
    }

    pub fn channel_by_id(&self, device: &str, id: &str) -> Option<&Channel> {
        self.devices.get(device).and_then(|entry| {
            entry
                .channels
                .iter()
                .filter_map(|name| self.channels.get(name))
                .find(|c| c.id == id)
        })
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }
}
