//! Device directory
//!
//! Paired devices are published as soon as discovery starts; devices found by
//! the platform scan arrive later through [`DeviceDirectory::device_found`].
//! Nothing is cached: every event carries a freshly built [`Device`].

use crate::broadcast::EventBroadcaster;
use crate::device::Device;
use crate::events::Event;
use crate::platform::{Adapter, PermissionGate};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What a discovery request ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// A scan was started and `paired` paired devices were published
    Started { paired: usize },
    /// Permission is missing; any request is still pending or was refused
    PermissionMissing,
    /// The radio is off; discovery resumes when it comes back on
    RadioOff,
}

pub struct DeviceDirectory {
    adapter: Arc<dyn Adapter>,
    permissions: Arc<dyn PermissionGate>,
    events: Arc<EventBroadcaster>,
}

impl DeviceDirectory {
    pub fn new(
        adapter: Arc<dyn Adapter>,
        permissions: Arc<dyn PermissionGate>,
        events: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            adapter,
            permissions,
            events,
        }
    }

    /// Restart the platform scan and publish every paired device.
    ///
    /// With `request_permission` a missing permission is requested; a request
    /// answered later is reported through [`Self::permission_result`].
    pub fn start_discovery(&self, request_permission: bool) -> DiscoveryOutcome {
        if !self.permissions.check().is_granted() {
            if !request_permission {
                debug!("Discovery skipped, permission missing");
                return DiscoveryOutcome::PermissionMissing;
            }
            if !self.permissions.request().is_granted() {
                info!("Bluetooth permission requested, discovery deferred");
                return DiscoveryOutcome::PermissionMissing;
            }
        }

        if !self.adapter.is_enabled() {
            debug!("Discovery skipped, radio is off");
            return DiscoveryOutcome::RadioOff;
        }

        if self.adapter.is_discovering() {
            self.adapter.cancel_scan();
        }
        match self.adapter.start_scan() {
            Ok(()) => info!("Discovery started"),
            Err(e) => warn!("Scan did not start: {}", e),
        }

        let paired = self.adapter.paired_devices();
        for device in &paired {
            self.events.publish(Event::DeviceFound(device.clone()));
        }
        debug!("Published {} paired device(s)", paired.len());
        DiscoveryOutcome::Started {
            paired: paired.len(),
        }
    }

    /// Cancel the platform scan if one is running
    pub fn stop_discovery(&self) {
        if self.adapter.is_discovering() {
            self.adapter.cancel_scan();
            info!("Discovery stopped");
        }
    }

    /// Publish a device reported by the platform scan
    pub fn device_found(&self, device: Device) {
        self.events.publish(Event::DeviceFound(device));
    }

    /// Handle the answer to an earlier permission request
    pub fn permission_result(&self, granted: bool) -> DiscoveryOutcome {
        if !granted {
            info!("Bluetooth permission denied");
            self.events.publish(Event::PermissionDenied);
            return DiscoveryOutcome::PermissionMissing;
        }
        if !self.adapter.is_enabled() {
            self.events.publish(Event::RadioDisabled);
            return DiscoveryOutcome::RadioOff;
        }
        self.start_discovery(false)
    }

    /// Publish every device a platform scan stream yields until it ends
    pub fn watch_scan<S>(&self, scan: S) -> JoinHandle<()>
    where
        S: Stream<Item = Device> + Send + 'static,
    {
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut scan = Box::pin(scan);
            while let Some(device) = scan.next().await {
                events.publish(Event::DeviceFound(device));
            }
            debug!("Scan stream ended");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceType;
    use crate::platform::{MockAdapter, MockPermissionGate, PermissionStatus};
    use crate::PrinterError;
    use mockall::Sequence;
    use tokio::sync::mpsc;

    fn printers() -> Vec<Device> {
        vec![
            Device::new("00:11:22:33:44:55")
                .with_name("PT-210")
                .with_kind(DeviceType::Classic),
            Device::new("66:77:88:99:AA:BB").with_kind(DeviceType::Dual),
        ]
    }

    fn granted() -> MockPermissionGate {
        let mut permissions = MockPermissionGate::new();
        permissions
            .expect_check()
            .returning(|| PermissionStatus::Granted);
        permissions
    }

    fn directory(
        adapter: MockAdapter,
        permissions: MockPermissionGate,
    ) -> (DeviceDirectory, Arc<EventBroadcaster>, mpsc::UnboundedReceiver<Event>) {
        let (events, stage) = EventBroadcaster::new();
        tokio::spawn(stage.run());
        let events = Arc::new(events);
        let (_id, rx) = events.attach();
        let directory = DeviceDirectory::new(Arc::new(adapter), Arc::new(permissions), events.clone());
        (directory, events, rx)
    }

    async fn delivered(events: &EventBroadcaster, rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        events.flush().await;
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        seen
    }

    #[tokio::test]
    async fn test_start_discovery_restarts_scan_and_publishes_paired() {
        let mut adapter = MockAdapter::new();
        let mut seq = Sequence::new();
        adapter.expect_is_enabled().return_const(true);
        adapter
            .expect_is_discovering()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);
        adapter
            .expect_cancel_scan()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        adapter
            .expect_start_scan()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        adapter.expect_paired_devices().returning(printers);

        let (directory, events, mut rx) = directory(adapter, granted());
        assert_eq!(
            directory.start_discovery(true),
            DiscoveryOutcome::Started { paired: 2 }
        );

        let seen = delivered(&events, &mut rx).await;
        assert_eq!(
            seen,
            printers()
                .into_iter()
                .map(Event::DeviceFound)
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_scan_failure_still_publishes_paired() {
        let mut adapter = MockAdapter::new();
        adapter.expect_is_enabled().return_const(true);
        adapter.expect_is_discovering().return_const(false);
        adapter.expect_cancel_scan().never();
        adapter
            .expect_start_scan()
            .returning(|| Err(PrinterError::RadioUnavailable));
        adapter.expect_paired_devices().returning(printers);

        let (directory, events, mut rx) = directory(adapter, granted());
        assert_eq!(
            directory.start_discovery(false),
            DiscoveryOutcome::Started { paired: 2 }
        );
        assert_eq!(delivered(&events, &mut rx).await.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_permission_without_request_is_silent() {
        let mut adapter = MockAdapter::new();
        adapter.expect_start_scan().never();
        adapter.expect_paired_devices().never();
        let mut permissions = MockPermissionGate::new();
        permissions
            .expect_check()
            .return_const(PermissionStatus::Denied);
        permissions.expect_request().never();

        let (directory, events, mut rx) = directory(adapter, permissions);
        assert_eq!(
            directory.start_discovery(false),
            DiscoveryOutcome::PermissionMissing
        );
        assert!(delivered(&events, &mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_permission_is_requested() {
        let mut adapter = MockAdapter::new();
        adapter.expect_start_scan().never();
        let mut permissions = MockPermissionGate::new();
        permissions
            .expect_check()
            .return_const(PermissionStatus::Denied);
        permissions
            .expect_request()
            .times(1)
            .return_const(PermissionStatus::Denied);

        let (directory, _events, _rx) = directory(adapter, permissions);
        assert_eq!(
            directory.start_discovery(true),
            DiscoveryOutcome::PermissionMissing
        );
    }

    #[tokio::test]
    async fn test_radio_off_skips_scan() {
        let mut adapter = MockAdapter::new();
        adapter.expect_is_enabled().return_const(false);
        adapter.expect_start_scan().never();
        adapter.expect_paired_devices().never();

        let (directory, _events, _rx) = directory(adapter, granted());
        assert_eq!(directory.start_discovery(true), DiscoveryOutcome::RadioOff);
    }

    #[tokio::test]
    async fn test_stop_discovery_is_idempotent() {
        let mut adapter = MockAdapter::new();
        let mut seq = Sequence::new();
        adapter
            .expect_is_discovering()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);
        adapter
            .expect_cancel_scan()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        adapter
            .expect_is_discovering()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(false);

        let (directory, _events, _rx) = directory(adapter, granted());
        directory.stop_discovery();
        directory.stop_discovery();
    }

    #[tokio::test]
    async fn test_permission_denied_result_is_published() {
        let (directory, events, mut rx) = directory(MockAdapter::new(), granted());
        assert_eq!(
            directory.permission_result(false),
            DiscoveryOutcome::PermissionMissing
        );
        assert_eq!(
            delivered(&events, &mut rx).await,
            vec![Event::PermissionDenied]
        );
    }

    #[tokio::test]
    async fn test_permission_granted_with_radio_off_reports_disabled() {
        let mut adapter = MockAdapter::new();
        adapter.expect_is_enabled().return_const(false);
        let (directory, events, mut rx) = directory(adapter, granted());

        assert_eq!(directory.permission_result(true), DiscoveryOutcome::RadioOff);
        assert_eq!(delivered(&events, &mut rx).await, vec![Event::RadioDisabled]);
    }

    #[tokio::test]
    async fn test_watch_scan_publishes_stream() {
        let (directory, events, mut rx) = directory(MockAdapter::new(), granted());
        let found = printers();
        directory
            .watch_scan(futures::stream::iter(found.clone()))
            .await
            .expect("scan watcher");

        let seen = delivered(&events, &mut rx).await;
        assert_eq!(seen.len(), found.len());
        assert!(seen.iter().all(|e| e.code() == Some(4)));
    }
}
