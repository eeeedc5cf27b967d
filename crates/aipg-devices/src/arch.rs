//! GPU architecture table and ranking.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hardware architecture of a detected device.
///
/// Derived from the PCI device id reported by the probe. Ids absent from
/// the table map to [`Arch::Unknown`], which ranks below every known
/// architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    Bmg,
    Acm,
    ArlH,
    Lnl,
    Mtl,
    Unknown,
}

// Device ids follow intel/compute-runtime shared/source/dll/devices/devices_base.inl
const BMG_IDS: &[u32] = &[0xe202, 0xe20b, 0xe20c, 0xe20d, 0xe212];
const LNL_IDS: &[u32] = &[0x6420, 0x64a0, 0x64b0];
// dg2, under the "acm" alias
const ACM_IDS: &[u32] = &[
    0x4f80, 0x4f81, 0x4f82, 0x4f83, 0x4f84, 0x4f85, 0x4f86, 0x4f87, 0x4f88, 0x5690, 0x5691,
    0x5692, 0x5693, 0x5694, 0x5695, 0x5696, 0x5697, 0x56a0, 0x56a1, 0x56a2, 0x56a3, 0x56a4,
    0x56a5, 0x56a6, 0x56b0, 0x56b1, 0x56b2, 0x56b3, 0x56ba, 0x56bb, 0x56bc, 0x56bd, 0x56be,
    0x56bf, 0x56c0, 0x56c1, 0x56c2,
];
const MTL_IDS: &[u32] = &[0x7d40, 0x7d45, 0x7d55, 0x7dd5];
const ARL_H_IDS: &[u32] = &[0x7d51, 0x7dd1];

impl Arch {
    /// Every architecture, most capable first.
    pub const ALL: [Arch; 6] = [
        Arch::Bmg,
        Arch::Acm,
        Arch::ArlH,
        Arch::Lnl,
        Arch::Mtl,
        Arch::Unknown,
    ];

    /// Map a numeric hardware id to its architecture.
    pub fn from_device_id(device_id: u32) -> Self {
        let tables: [(&[u32], Arch); 5] = [
            (BMG_IDS, Arch::Bmg),
            (LNL_IDS, Arch::Lnl),
            (ACM_IDS, Arch::Acm),
            (MTL_IDS, Arch::Mtl),
            (ARL_H_IDS, Arch::ArlH),
        ];
        tables
            .iter()
            .find(|(ids, _)| ids.contains(&device_id))
            .map(|(_, arch)| *arch)
            .unwrap_or(Arch::Unknown)
    }

    /// Fixed ranking; higher wins.
    pub fn priority(self) -> u8 {
        match self {
            Arch::Bmg => 5,
            Arch::Acm => 4,
            Arch::ArlH => 3,
            Arch::Lnl => 2,
            Arch::Mtl => 1,
            Arch::Unknown => 0,
        }
    }

    /// Whether an XPU build of the python stack supports this architecture.
    pub fn is_xpu(self) -> bool {
        !matches!(self, Arch::Unknown)
    }

    /// Requirements-file suffix used for device-specific dependencies.
    pub fn requirements_flavor(self) -> &'static str {
        if self.is_xpu() {
            "xpu"
        } else {
            "unknown"
        }
    }

    /// Short lowercase tag, as used in file names and config.
    pub fn as_str(self) -> &'static str {
        match self {
            Arch::Bmg => "bmg",
            Arch::Acm => "acm",
            Arch::ArlH => "arl_h",
            Arch::Lnl => "lnl",
            Arch::Mtl => "mtl",
            Arch::Unknown => "unknown",
        }
    }

    /// Parse a tag produced by [`Arch::as_str`].
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|arch| arch.as_str().eq_ignore_ascii_case(tag.trim()))
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
