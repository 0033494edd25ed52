// Desktop platform backend
//
// The desktop host has no system-wide pairing database we can read
// portably, so configured printers stand in for the paired list. Printers
// with a bound device node are opened as files; everything else is dialled
// as `host:port` over TCP.

use crate::config::Config;
use async_trait::async_trait;
use btprint_core::transport::{DeviceFileConnector, TcpConnector};
use btprint_core::{
    Adapter, Connector, Device, DuplexChannel, PermissionGate, PermissionStatus, Platform,
    PrinterError,
};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Adapter whose paired devices are the configured printers
pub struct ConfiguredAdapter {
    printers: Vec<Device>,
    discovering: AtomicBool,
}

impl ConfiguredAdapter {
    pub fn new(printers: Vec<Device>) -> Self {
        Self {
            printers,
            discovering: AtomicBool::new(false),
        }
    }
}

impl Adapter for ConfiguredAdapter {
    fn is_enabled(&self) -> bool {
        true
    }

    fn paired_devices(&self) -> Vec<Device> {
        self.printers.clone()
    }

    fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    fn start_scan(&self) -> Result<(), PrinterError> {
        debug!("Configured adapter has no radio scan; paired list only");
        self.discovering.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn cancel_scan(&self) {
        self.discovering.store(false, Ordering::SeqCst);
    }
}

/// Desktop processes need no runtime permission
pub struct HostPermissions;

impl PermissionGate for HostPermissions {
    fn check(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }

    fn request(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }
}

/// Device node when one is configured, TCP otherwise
pub struct RoutedConnector {
    files: DeviceFileConnector,
    tcp: TcpConnector,
}

impl RoutedConnector {
    pub fn new(files: DeviceFileConnector) -> Self {
        Self {
            files,
            tcp: TcpConnector::new(),
        }
    }
}

#[async_trait]
impl Connector for RoutedConnector {
    async fn open(&self, address: &str, service: Uuid) -> io::Result<Box<dyn DuplexChannel>> {
        if self.files.path_for(address).is_some() {
            self.files.open(address, service).await
        } else {
            self.tcp.open(address, service).await
        }
    }
}

/// Build the platform capabilities described by `config`
pub fn platform(config: &Config) -> Platform {
    let files = config
        .printers
        .iter()
        .filter_map(|p| p.device.as_ref().map(|path| (p.address.clone(), path.clone())))
        .fold(DeviceFileConnector::new(), |files, (address, path)| {
            files.with_path(address, path)
        });

    Platform {
        adapter: Arc::new(ConfiguredAdapter::new(
            config.printers.iter().map(|p| p.to_device()).collect(),
        )),
        permissions: Arc::new(HostPermissions),
        connector: Arc::new(RoutedConnector::new(files)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrinterEntry;
    use btprint_core::{DeviceType, SERIAL_PORT_PROFILE};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_adapter_reports_configured_printers() {
        let adapter = ConfiguredAdapter::new(vec![Device::new("AA")]);
        assert!(adapter.is_enabled());
        assert_eq!(adapter.paired_devices(), vec![Device::new("AA")]);

        adapter.start_scan().unwrap();
        assert!(adapter.is_discovering());
        adapter.cancel_scan();
        assert!(!adapter.is_discovering());
    }

    #[tokio::test]
    async fn test_routes_device_nodes_to_files() {
        let dir = tempfile::tempdir().unwrap();
        let node = dir.path().join("rfcomm0");
        let connector = RoutedConnector::new(DeviceFileConnector::new().with_path("AA", &node));

        let mut channel = connector.open("AA", SERIAL_PORT_PROFILE).await.unwrap();
        channel.write(b"ticket").await.unwrap();
        channel.close().await.unwrap();
        assert_eq!(std::fs::read(&node).unwrap(), b"ticket".to_vec());
    }

    #[tokio::test]
    async fn test_routes_other_addresses_to_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        let connector = RoutedConnector::new(DeviceFileConnector::new());
        let mut channel = connector.open(&address, SERIAL_PORT_PROFILE).await.unwrap();
        channel.write(b"raw").await.unwrap();
        channel.close().await.unwrap();
        assert_eq!(server.await.unwrap(), b"raw".to_vec());
    }

    #[test]
    fn test_platform_from_config() {
        let mut config = Config::default();
        config.printers.push(PrinterEntry {
            address: "AA".to_string(),
            name: Some("Kitchen".to_string()),
            kind: DeviceType::Classic,
            device: None,
        });
        let platform = platform(&config);
        let paired = platform.adapter.paired_devices();
        assert_eq!(paired.len(), 1);
        assert_eq!(paired[0].display_name(), "Kitchen");
        assert!(platform.permissions.check().is_granted());
    }
}
