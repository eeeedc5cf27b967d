//! Compute device classification for aipg backends.
//!
//! A backend process is pinned to one detected device through an
//! environment variable. This crate holds the pure part of that decision:
//!
//! ```text
//! probe JSON ──► ProbeDevice ──► Arch (static id table) ──► priority
//!                                                              │
//!                      selector env var ◄── selected Device ◄──┘
//! ```
//!
//! Running the probe binary itself is left to `aipg-services`, which owns
//! the command runner.

mod arch;
mod device;
mod error;
mod selector;

pub use arch::Arch;
pub use device::{devices_from_probe, parse_probe_output, select_best, Device, ProbeDevice};
pub use error::DeviceError;
pub use selector::DeviceSelectorKind;

/// Environment variable used by the oneAPI Level Zero runtime.
pub const LEVEL_ZERO_SELECTOR_VAR: &str = "ONEAPI_DEVICE_SELECTOR";

/// Selector value meaning "every Level Zero device".
pub const LEVEL_ZERO_WILDCARD: &str = "level_zero:*";
