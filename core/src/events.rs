//! Events fanned out to listeners
//!
//! Discovery and adapter events carry the numeric codes listeners key on
//! (`4` device, `1` radio disabled, `3` permission denied). Transfer state and
//! progress events are keyed by device address.

use crate::device::Device;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Code of a radio-disabled record
pub const CODE_RADIO_DISABLED: u8 = 1;
/// Code of a permission-denied record
pub const CODE_PERMISSION_DENIED: u8 = 3;
/// Code of a device record
pub const CODE_DEVICE: u8 = 4;

/// Lifecycle of a single transmission.
///
/// Transitions only move forward; `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferState {
    Idle,
    Connecting,
    Transmitting,
    Completed,
    Failed,
}

impl TransferState {
    /// Numeric code used in state records
    pub fn code(self) -> u8 {
        match self {
            TransferState::Idle => 0,
            TransferState::Connecting => 1,
            TransferState::Transmitting => 2,
            TransferState::Completed => 3,
            TransferState::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            TransferState::Idle => 0,
            TransferState::Connecting => 1,
            TransferState::Transmitting => 2,
            TransferState::Completed | TransferState::Failed => 3,
        }
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(self, next: TransferState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Transmitting => write!(f, "Transmitting"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Bytes handed to the channel so far out of the payload total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSample {
    pub total: usize,
    pub sent: usize,
}

impl ProgressSample {
    pub fn new(total: usize, sent: usize) -> Self {
        Self { total, sent }
    }

    pub fn is_complete(&self) -> bool {
        self.sent == self.total
    }
}

/// Everything a listener can observe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A paired or newly discovered device
    DeviceFound(Device),
    /// The radio was switched off
    RadioDisabled,
    /// The user declined the Bluetooth permission request
    PermissionDenied,
    /// A transmission moved to a new state
    StateChanged {
        address: String,
        state: TransferState,
    },
    /// More of a payload was handed to the channel
    Progress {
        address: String,
        sample: ProgressSample,
    },
}

impl Event {
    /// Discovery-stream code, `None` for transfer events
    pub fn code(&self) -> Option<u8> {
        match self {
            Event::DeviceFound(_) => Some(CODE_DEVICE),
            Event::RadioDisabled => Some(CODE_RADIO_DISABLED),
            Event::PermissionDenied => Some(CODE_PERMISSION_DENIED),
            Event::StateChanged { .. } | Event::Progress { .. } => None,
        }
    }

    /// Address the event concerns, if any
    pub fn address(&self) -> Option<&str> {
        match self {
            Event::DeviceFound(device) => Some(&device.address),
            Event::StateChanged { address, .. } | Event::Progress { address, .. } => {
                Some(address)
            }
            Event::RadioDisabled | Event::PermissionDenied => None,
        }
    }

    /// Render as the tagged record handed across language boundaries
    pub fn to_record(&self) -> Value {
        match self {
            Event::DeviceFound(device) => json!({
                "code": CODE_DEVICE,
                "name": device.name,
                "address": device.address,
                "type": device.kind.code(),
            }),
            Event::RadioDisabled => json!({ "code": CODE_RADIO_DISABLED }),
            Event::PermissionDenied => json!({ "code": CODE_PERMISSION_DENIED }),
            Event::StateChanged { address, state } => json!({
                "event": "state",
                "address": address,
                "state": state.code(),
            }),
            Event::Progress { address, sample } => json!({
                "event": "progress",
                "address": address,
                "total": sample.total,
                "progress": sample.sent,
            }),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::DeviceFound(device) => write!(f, "DeviceFound {{ {} }}", device),
            Event::RadioDisabled => write!(f, "RadioDisabled"),
            Event::PermissionDenied => write!(f, "PermissionDenied"),
            Event::StateChanged { address, state } => {
                write!(f, "StateChanged {{ address: {}, state: {} }}", address, state)
            }
            Event::Progress { address, sample } => write!(
                f,
                "Progress {{ address: {}, {}/{} }}",
                address, sample.sent, sample.total
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceType;

    #[test]
    fn test_state_codes() {
        assert_eq!(TransferState::Connecting.code(), 1);
        assert_eq!(TransferState::Transmitting.code(), 2);
        assert_eq!(TransferState::Completed.code(), 3);
    }

    #[test]
    fn test_state_transitions_forward_only() {
        use TransferState::*;
        assert!(Idle.can_advance_to(Connecting));
        assert!(Connecting.can_advance_to(Transmitting));
        assert!(Connecting.can_advance_to(Failed));
        assert!(Transmitting.can_advance_to(Completed));
        assert!(Transmitting.can_advance_to(Failed));

        assert!(!Transmitting.can_advance_to(Connecting));
        assert!(!Connecting.can_advance_to(Connecting));
        assert!(!Completed.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Completed));
    }

    #[test]
    fn test_device_record() {
        let event = Event::DeviceFound(
            Device::new("00:11:22:33:44:55")
                .with_name("PT-210")
                .with_kind(DeviceType::Classic),
        );
        let record = event.to_record();
        assert_eq!(record["code"], 4);
        assert_eq!(record["name"], "PT-210");
        assert_eq!(record["address"], "00:11:22:33:44:55");
        assert_eq!(record["type"], 1);
    }

    #[test]
    fn test_unnamed_device_record_has_null_name() {
        let record = Event::DeviceFound(Device::new("AA")).to_record();
        assert!(record["name"].is_null());
    }

    #[test]
    fn test_adapter_records() {
        assert_eq!(Event::RadioDisabled.to_record(), json!({ "code": 1 }));
        assert_eq!(Event::PermissionDenied.to_record(), json!({ "code": 3 }));
    }

    #[test]
    fn test_progress_record() {
        let event = Event::Progress {
            address: "AA".to_string(),
            sample: ProgressSample::new(1600, 512),
        };
        let record = event.to_record();
        assert_eq!(record["total"], 1600);
        assert_eq!(record["progress"], 512);
        assert_eq!(event.code(), None);
        assert_eq!(event.address(), Some("AA"));
    }

    #[test]
    fn test_progress_completion() {
        assert!(!ProgressSample::new(10, 4).is_complete());
        assert!(ProgressSample::new(10, 10).is_complete());
        assert!(ProgressSample::new(0, 0).is_complete());
    }
}
