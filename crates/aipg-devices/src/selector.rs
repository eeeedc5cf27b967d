//! Device-selector environment variables.

use serde::{Deserialize, Serialize};

use crate::device::Device;

/// Which driver stack a backend uses to pick its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelectorKind {
    /// oneAPI Level Zero (`ONEAPI_DEVICE_SELECTOR=level_zero:<index>`).
    LevelZero,
    /// ggml Vulkan backend (`GGML_VK_VISIBLE_DEVICES=<index>`).
    Vulkan,
    /// OpenVINO runtime (`OPENVINO_DEVICE=<name>`).
    OpenVino,
}

impl DeviceSelectorKind {
    /// Environment variable this selector is written to.
    pub fn env_key(self) -> &'static str {
        match self {
            DeviceSelectorKind::LevelZero => crate::LEVEL_ZERO_SELECTOR_VAR,
            DeviceSelectorKind::Vulkan => "GGML_VK_VISIBLE_DEVICES",
            DeviceSelectorKind::OpenVino => "OPENVINO_DEVICE",
        }
    }

    /// Render the selector value for a device id.
    ///
    /// `None` yields the driver's safe fallback: every device for Level
    /// Zero, the first device for Vulkan, automatic placement for OpenVINO.
    pub fn render(self, device_id: Option<&str>) -> String {
        match self {
            DeviceSelectorKind::LevelZero => {
                format!("level_zero:{}", device_id.unwrap_or("*"))
            }
            DeviceSelectorKind::Vulkan => device_id.unwrap_or("0").to_string(),
            DeviceSelectorKind::OpenVino => device_id.unwrap_or("AUTO").to_string(),
        }
    }

    /// Key/value pair for the selected device in `devices`, if any.
    ///
    /// Level Zero and Vulkan address devices by their position in the
    /// enumerated list, OpenVINO by device name.
    pub fn env_for(self, devices: &[Device]) -> (String, String) {
        let selected = devices.iter().position(|d| d.selected).map(|index| match self {
            DeviceSelectorKind::OpenVino => devices[index].id.clone(),
            DeviceSelectorKind::LevelZero | DeviceSelectorKind::Vulkan => index.to_string(),
        });
        (self.env_key().to_string(), self.render(selected.as_deref()))
    }

    /// Static device choices for drivers that do not need probing.
    pub fn static_devices(self) -> Option<Vec<Device>> {
        match self {
            DeviceSelectorKind::OpenVino => {
                let mut devices = vec![
                    Device::new("AUTO", "Auto select device", crate::Arch::Unknown),
                    Device::new("GPU", "GPU (Intel)", crate::Arch::Unknown),
                    Device::new("CPU", "CPU", crate::Arch::Unknown),
                ];
                devices[0].selected = true;
                Some(devices)
            }
            _ => None,
        }
    }
}
