//! Platform integration layer
//!
//! The host platform (Android, a desktop stack, a test harness) supplies the
//! adapter and permission capabilities through these traits:
//! - paired-device enumeration and scan control on the local adapter
//! - the permission gate that must pass before scanning
//! - radio power transitions, pushed into the manager as [`RadioPower`]
//!
//! The byte channel itself lives in [`crate::transport`].

use crate::device::Device;
use crate::PrinterError;
use serde::{Deserialize, Serialize};

/// Result of checking or requesting the Bluetooth permission group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionStatus {
    /// Everything needed for scanning and connecting is granted
    Granted,
    /// At least one permission is missing
    Denied,
    /// The platform cannot ask right now (no foreground UI, no adapter)
    Unavailable,
}

impl PermissionStatus {
    pub fn is_granted(self) -> bool {
        self == PermissionStatus::Granted
    }
}

/// Permission capability.
///
/// `request` may prompt the user. Platforms that learn the answer later
/// return a non-granted status here and report the answer through
/// `PrinterManager::permission_result`.
#[cfg_attr(test, mockall::automock)]
pub trait PermissionGate: Send + Sync {
    /// Check without prompting
    fn check(&self) -> PermissionStatus;
    /// Check, prompting the user if needed
    fn request(&self) -> PermissionStatus;
}

/// Local Bluetooth adapter capability
#[cfg_attr(test, mockall::automock)]
pub trait Adapter: Send + Sync {
    /// Whether the radio is powered on
    fn is_enabled(&self) -> bool;
    /// Devices bonded ahead of time
    fn paired_devices(&self) -> Vec<Device>;
    /// Whether an inquiry scan is in flight
    fn is_discovering(&self) -> bool;
    /// Begin an inquiry scan; results arrive through the scan producer
    fn start_scan(&self) -> Result<(), PrinterError>;
    /// Cancel the in-flight scan, if any
    fn cancel_scan(&self);
}

/// Radio power transitions reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadioPower {
    Off,
    TurningOn,
    On,
    TurningOff,
}

/// Coarse adapter state reported to callers.
///
/// Codes: `Off = 1`, `On = 2`, `Unavailable = 3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BluetoothState {
    Off,
    On,
    /// Permission missing; reported regardless of radio power
    Unavailable,
}

impl BluetoothState {
    pub fn code(self) -> u8 {
        match self {
            BluetoothState::Off => 1,
            BluetoothState::On => 2,
            BluetoothState::Unavailable => 3,
        }
    }

    /// Derive the state from the two capabilities; permission wins
    pub fn resolve(permissions: &dyn PermissionGate, adapter: &dyn Adapter) -> Self {
        if !permissions.check().is_granted() {
            return BluetoothState::Unavailable;
        }
        if adapter.is_enabled() {
            BluetoothState::On
        } else {
            BluetoothState::Off
        }
    }
}
