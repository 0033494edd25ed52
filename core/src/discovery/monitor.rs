//! Adapter monitor
//!
//! Reacts to radio power transitions: switching off is announced to every
//! listener (and registered channels are closed, since they are dead), and
//! switching back on resumes discovery without prompting for permission.

use super::directory::DeviceDirectory;
use crate::broadcast::EventBroadcaster;
use crate::events::Event;
use crate::platform::RadioPower;
use crate::transport::ConnectionRegistry;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct AdapterMonitor {
    directory: Arc<DeviceDirectory>,
    registry: Arc<ConnectionRegistry>,
    events: Arc<EventBroadcaster>,
    close_channels: bool,
}

impl AdapterMonitor {
    pub fn new(
        directory: Arc<DeviceDirectory>,
        registry: Arc<ConnectionRegistry>,
        events: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            directory,
            registry,
            events,
            close_channels: true,
        }
    }

    /// Whether registered channels are closed when the radio goes off
    pub fn close_channels_on_off(mut self, close: bool) -> Self {
        self.close_channels = close;
        self
    }

    /// Handle one power transition
    pub async fn power_changed(&self, power: RadioPower) {
        match power {
            RadioPower::Off => {
                info!("Bluetooth radio switched off");
                self.events.publish(Event::RadioDisabled);
                if self.close_channels {
                    self.close_registered().await;
                }
            }
            RadioPower::On => {
                info!("Bluetooth radio switched on");
                // Only resume scanning for someone who is listening.
                if self.events.listener_count() > 0 {
                    self.directory.start_discovery(false);
                }
            }
            RadioPower::TurningOn | RadioPower::TurningOff => {
                debug!("Radio transition {:?}", power);
            }
        }
    }

    async fn close_registered(&self) {
        let handles = self.registry.invalidate();
        if handles.is_empty() {
            return;
        }
        info!("Closing {} channel(s) after radio loss", handles.len());
        for handle in handles {
            let address = handle.address().to_string();
            if let Err(e) = handle.close().await {
                warn!("Closing stale channel to {} failed: {}", address, e);
            }
        }
    }

    /// Feed every transition from `transitions` into [`Self::power_changed`]
    pub fn watch<S>(self: Arc<Self>, transitions: S) -> JoinHandle<()>
    where
        S: Stream<Item = RadioPower> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut transitions = Box::pin(transitions);
            while let Some(power) = transitions.next().await {
                self.power_changed(power).await;
            }
            debug!("Radio state stream ended");
        })
    }
}
