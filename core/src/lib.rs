// BTPrint Core: serial-profile printer link
//
// Discovery of nearby printers, one channel per device address, and paced
// delivery of raw byte payloads to peripherals that never acknowledge what
// they receive.

pub mod broadcast;
pub mod config;
pub mod device;
pub mod discovery;
pub mod events;
pub mod manager;
pub mod method;
pub mod platform;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use thiserror::Error;

pub use broadcast::{EventBroadcaster, ListenerId};
pub use config::{LockScope, ManagerConfig, PacingConfig};
pub use device::{Device, DeviceType};
pub use discovery::{AdapterMonitor, DeviceDirectory, DiscoveryOutcome};
pub use events::{Event, ProgressSample, TransferState};
pub use manager::{Platform, PrinterManager, Subscription};
pub use method::MethodCall;
pub use platform::{Adapter, BluetoothState, PermissionGate, PermissionStatus, RadioPower};
pub use transport::{
    ConnectionHandle, ConnectionRegistry, Connector, DuplexChannel, TransferEngine,
    TransferReport, TransferRequest, SERIAL_PORT_PROFILE,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors surfaced by manager operations.
///
/// Every variant renders a non-empty, human-readable message; callers that
/// bridge to another runtime can forward `to_string()` as-is.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrinterError {
    #[error("Bluetooth permission denied")]
    PermissionDenied,

    #[error("Bluetooth radio is unavailable")]
    RadioUnavailable,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("No open connection for {0}")]
    NotFound(String),

    #[error("Method not implemented: {0}")]
    NotImplemented(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Printer manager is shut down")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PrinterError {
    /// Wrap a transport failure for `address`, keeping the underlying message
    pub fn connection(address: &str, err: std::io::Error) -> Self {
        let detail = err.to_string();
        if detail.is_empty() {
            PrinterError::Connection(format!("{}: {:?}", address, err.kind()))
        } else {
            PrinterError::Connection(format!("{}: {}", address, detail))
        }
    }
}

impl From<std::io::Error> for PrinterError {
    fn from(err: std::io::Error) -> Self {
        PrinterError::Connection(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PrinterError>;
