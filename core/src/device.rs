//! Discovered and paired devices

use serde::{Deserialize, Serialize};
use std::fmt;

/// Radio technology reported for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    #[default]
    Unknown,
    /// BR/EDR only
    Classic,
    /// Low Energy only
    Le,
    /// BR/EDR and Low Energy
    Dual,
}

impl DeviceType {
    /// Numeric code used in event records
    pub fn code(self) -> u8 {
        match self {
            DeviceType::Unknown => 0,
            DeviceType::Classic => 1,
            DeviceType::Le => 2,
            DeviceType::Dual => 3,
        }
    }

    /// Inverse of [`DeviceType::code`]; unrecognised codes map to `Unknown`
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => DeviceType::Classic,
            2 => DeviceType::Le,
            3 => DeviceType::Dual,
            _ => DeviceType::Unknown,
        }
    }
}

/// A device seen by the adapter.
///
/// Values are rebuilt for every discovery event and never merged, so two
/// events for the same address may disagree on the name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Hardware address, the device identity
    pub address: String,
    /// Advertised name, if the device reported one
    pub name: Option<String>,
    /// Radio technology
    #[serde(default)]
    pub kind: DeviceType,
}

impl Device {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            kind: DeviceType::Unknown,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_kind(mut self, kind: DeviceType) -> Self {
        self.kind = kind;
        self
    }

    /// Name for display, falling back to the address
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_codes() {
        for kind in [
            DeviceType::Unknown,
            DeviceType::Classic,
            DeviceType::Le,
            DeviceType::Dual,
        ] {
            assert_eq!(DeviceType::from_code(kind.code()), kind);
        }
        assert_eq!(DeviceType::from_code(42), DeviceType::Unknown);
    }

    #[test]
    fn test_display_name_falls_back_to_address() {
        let device = Device::new("00:11:22:33:44:55");
        assert_eq!(device.display_name(), "00:11:22:33:44:55");

        let named = device.with_name("RPP02N");
        assert_eq!(named.display_name(), "RPP02N");
        assert_eq!(named.to_string(), "RPP02N (00:11:22:33:44:55)");
    }

    #[test]
    fn test_device_deserialize_without_kind() {
        let device: Device =
            serde_json::from_str(r#"{"address": "AA:BB", "name": null}"#).expect("valid json");
        assert_eq!(device.kind, DeviceType::Unknown);
        assert!(device.name.is_none());
    }
}
