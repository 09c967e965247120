//! Check mode setting.

use serde::{Deserialize, Serialize};

/// Which probe tracks a check uses.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum CheckMode {
    #[default]
    DeviceOnly,
    ApiOnly,
    Both,
}

impl CheckMode {
    pub fn uses_devices(&self) -> bool {
        matches!(self, Self::DeviceOnly | Self::Both)
    }

    pub fn uses_api(&self) -> bool {
        matches!(self, Self::ApiOnly | Self::Both)
    }
}
