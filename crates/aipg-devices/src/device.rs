//! Detected devices and best-device selection.

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::arch::Arch;
use crate::error::DeviceError;

/// One compute unit as reported by the probe tool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProbeDevice {
    /// Index or vendor string identifying the device to its driver.
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    /// Human-readable device name.
    pub name: String,
    /// PCI device id.
    #[serde(alias = "deviceNumericId", deserialize_with = "numeric_id")]
    pub device_id: u32,
}

/// A detected device, as exposed to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    pub arch: Arch,
    pub selected: bool,
}

impl Device {
    /// Create an unselected device.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arch: Arch) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arch,
            selected: false,
        }
    }
}

impl From<ProbeDevice> for Device {
    fn from(probe: ProbeDevice) -> Self {
        let arch = Arch::from_device_id(probe.device_id);
        Device::new(probe.id, probe.name, arch)
    }
}

/// Parse the probe's JSON output (`[{id, name, device_id}, ...]`).
pub fn parse_probe_output(output: &str) -> Result<Vec<ProbeDevice>, DeviceError> {
    let devices: Vec<ProbeDevice> = serde_json::from_str(output.trim())?;
    if devices.is_empty() {
        return Err(DeviceError::NoDevices);
    }
    Ok(devices)
}

/// Classify probe output and select the best device.
pub fn devices_from_probe(output: &str) -> Result<Vec<Device>, DeviceError> {
    let mut devices: Vec<Device> = parse_probe_output(output)?
        .into_iter()
        .map(Device::from)
        .collect();
    select_best(&mut devices);
    Ok(devices)
}

/// Mark the highest-priority device as selected.
///
/// Ties go to the earliest device. Returns the index of the selected
/// device, or `None` for an empty slice.
pub fn select_best(devices: &mut [Device]) -> Option<usize> {
    let mut best: Option<(usize, u8)> = None;
    for (idx, device) in devices.iter().enumerate() {
        let priority = device.arch.priority();
        if best.map_or(true, |(_, p)| priority > p) {
            best = Some((idx, priority));
        }
    }

    let (selected, _) = best?;
    for (idx, device) in devices.iter_mut().enumerate() {
        device.selected = idx == selected;
    }
    debug!(
        "selected device {} ({}) out of {}",
        devices[selected].name,
        devices[selected].arch,
        devices.len()
    );
    Some(selected)
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}

fn numeric_id<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawNumeric {
        Number(u32),
        Text(String),
    }

    match RawNumeric::deserialize(deserializer)? {
        RawNumeric::Number(n) => Ok(n),
        RawNumeric::Text(s) => {
            let s = s.trim();
            let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u32::from_str_radix(hex, 16),
                None => s.parse(),
            };
            parsed.map_err(serde::de::Error::custom)
        }
    }
}
