// Discovery module: paired/scanned devices and radio power tracking

pub mod directory;
pub mod monitor;

pub use directory::{DeviceDirectory, DiscoveryOutcome};
pub use monitor::AdapterMonitor;
