// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::Serialize;

use crate::device_traits::{self, DeviceTraits};

pub type Samples = i64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceUid(Arc<String>);

impl Deref for DeviceUid {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Borrow<str> for DeviceUid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceUid {
    fn from(s: &str) -> Self {
        DeviceUid(Arc::new(s.to_string()))
    }
}

impl From<String> for DeviceUid {
    fn from(s: String) -> Self {
        DeviceUid(Arc::new(s))
    }
}

impl fmt::Display for DeviceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of a hardware output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChannelKind {
    Analog,
    Marker,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Analog => write!(f, "analog"),
            ChannelKind::Marker => write!(f, "marker"),
        }
    }
}

/// Device class tag of an instrument.
///
/// The tag selects the capability constants and the backend used for the device.
/// Instruments that none of the backends can drive are kept as [`DeviceClass::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceClass {
    Awg5014,
    Hdawg8,
    Uhfqc,
    Other(String),
}

impl DeviceClass {
    pub const fn traits(&self) -> Option<&'static DeviceTraits> {
        match self {
            DeviceClass::Awg5014 => Some(&device_traits::AWG5014_TRAITS),
            DeviceClass::Hdawg8 => Some(&device_traits::HDAWG8_TRAITS),
            DeviceClass::Uhfqc => Some(&device_traits::UHFQC_TRAITS),
            DeviceClass::Other(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeviceClass::Awg5014 => "AWG5014",
            DeviceClass::Hdawg8 => "HDAWG8",
            DeviceClass::Uhfqc => "UHFQC",
            DeviceClass::Other(name) => name,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeviceClass {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<DeviceClass, Self::Err> {
        let class = match s.to_uppercase().as_str() {
            "AWG5014" | "VIRTUALAWG5014" => DeviceClass::Awg5014,
            "HDAWG" | "HDAWG8" | "VIRTUALAWG8" => DeviceClass::Hdawg8,
            "UHFQC" | "UHFQA" => DeviceClass::Uhfqc,
            _ => DeviceClass::Other(s.to_string()),
        };
        Ok(class)
    }
}
