//! Printer manager: the owned instance tying the components together
//!
//! `connect`, `disconnect` and `write` each run on their own worker task under
//! the operation lock for their address. Results travel back through the
//! delivery stage, behind every event the operation published, so a listener
//! has seen `Completed` by the time the caller sees success. Dropping the
//! caller's future does not cancel the worker: it still cleans up, and its
//! result is discarded.

use crate::broadcast::{EventBroadcaster, ListenerId};
use crate::config::ManagerConfig;
use crate::device::Device;
use crate::discovery::{AdapterMonitor, DeviceDirectory, DiscoveryOutcome};
use crate::events::Event;
use crate::platform::{Adapter, BluetoothState, PermissionGate, RadioPower};
use crate::transport::{
    ConnectionRegistry, Connector, OperationLocks, TransferEngine, TransferRequest,
};
use crate::{PrinterError, Result};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capabilities the host platform provides
#[derive(Clone)]
pub struct Platform {
    pub adapter: Arc<dyn Adapter>,
    pub permissions: Arc<dyn PermissionGate>,
    pub connector: Arc<dyn Connector>,
}

struct ManagerInner {
    config: ManagerConfig,
    adapter: Arc<dyn Adapter>,
    permissions: Arc<dyn PermissionGate>,
    events: Arc<EventBroadcaster>,
    registry: Arc<ConnectionRegistry>,
    directory: Arc<DeviceDirectory>,
    monitor: Arc<AdapterMonitor>,
    engine: TransferEngine,
    locks: OperationLocks,
    runtime: Handle,
    shut_down: AtomicBool,
}

impl ManagerInner {
    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    async fn connect_locked(&self, address: &str) -> Result<bool> {
        if self.registry.contains(address) {
            debug!("Already connected to {}", address);
            return Ok(true);
        }
        let generation = self.registry.generation();
        let handle = self.engine.open(address).await?;
        match self.registry.put_current(handle, generation) {
            Ok(displaced) => {
                if let Some(displaced) = displaced {
                    if let Err(e) = displaced.close().await {
                        debug!("Closing displaced channel to {} failed: {}", address, e);
                    }
                }
                Ok(true)
            }
            Err(stale) => {
                if let Err(e) = stale.close().await {
                    debug!("Closing stale channel to {} failed: {}", address, e);
                }
                Err(PrinterError::RadioUnavailable)
            }
        }
    }

    async fn disconnect_locked(&self, address: &str) -> Result<bool> {
        let closed = self
            .registry
            .close_and_remove(address)
            .await
            .map_err(|e| PrinterError::connection(address, e))?;
        if closed {
            info!("Disconnected from {}", address);
        } else {
            debug!("Disconnect from {}: nothing was connected", address);
        }
        Ok(closed)
    }

    async fn close_all(&self) {
        for handle in self.registry.drain() {
            let address = handle.address().to_string();
            if let Err(e) = handle.close().await {
                warn!("Closing channel to {} failed: {}", address, e);
            }
        }
    }
}

/// Handle to a running printer manager; clones share the same instance
#[derive(Clone)]
pub struct PrinterManager {
    inner: Arc<ManagerInner>,
}

impl PrinterManager {
    /// Validate `config` and start the delivery stage on the current tokio
    /// runtime
    pub fn start(config: ManagerConfig, platform: Platform) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| PrinterError::Internal(format!("no tokio runtime: {}", e)))?;

        let (events, stage) = EventBroadcaster::new();
        let events = Arc::new(events);
        runtime.spawn(stage.run());

        let registry = Arc::new(ConnectionRegistry::new());
        let directory = Arc::new(DeviceDirectory::new(
            platform.adapter.clone(),
            platform.permissions.clone(),
            events.clone(),
        ));
        let monitor = Arc::new(
            AdapterMonitor::new(directory.clone(), registry.clone(), events.clone())
                .close_channels_on_off(config.close_channels_on_radio_off),
        );
        let engine = TransferEngine::new(
            platform.connector,
            registry.clone(),
            events.clone(),
            config.pacing.clone(),
        )
        .with_failed_state(config.emit_failed_state);
        let locks = OperationLocks::new(config.lock_scope);

        info!(
            "Printer manager started (chunk {} bytes, lock scope {:?})",
            config.max_chunk_bytes, config.lock_scope
        );

        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                adapter: platform.adapter,
                permissions: platform.permissions,
                events,
                registry,
                directory,
                monitor,
                engine,
                locks,
                runtime,
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    fn ensure_running(&self) -> Result<()> {
        if self.inner.is_shut_down() {
            return Err(PrinterError::Shutdown);
        }
        Ok(())
    }

    /// Attach a listener and start discovery, requesting permission if needed.
    ///
    /// Paired devices are delivered to every attached listener, including
    /// this one. Dropping the last subscription stops discovery.
    pub fn subscribe(&self) -> Result<Subscription> {
        self.ensure_running()?;
        let (id, events) = self.inner.events.attach();
        let outcome = self.inner.directory.start_discovery(true);
        debug!("Listener {} subscribed, discovery {:?}", id, outcome);
        Ok(Subscription {
            id,
            events,
            owner: Arc::downgrade(&self.inner),
            detached: false,
        })
    }

    /// Open a channel to `address` and keep it registered.
    ///
    /// An already registered channel is reused, never duplicated.
    pub async fn connect(&self, address: &str) -> Result<bool> {
        let target = checked_address(address)?;
        self.run(target.clone(), "connect", move |inner| async move {
            inner.connect_locked(&target).await
        })
        .await
    }

    /// Close the registered channel for `address`.
    ///
    /// Returns `false` when nothing was connected; that is not an error.
    pub async fn disconnect(&self, address: &str) -> Result<bool> {
        let target = checked_address(address)?;
        self.run(target.clone(), "disconnect", move |inner| async move {
            inner.disconnect_locked(&target).await
        })
        .await
    }

    /// Send `data` to `address`, reporting state and progress to listeners.
    ///
    /// `max_chunk_bytes` falls back to the configured default.
    pub async fn write(
        &self,
        address: &str,
        data: Vec<u8>,
        keep_connected: bool,
        max_chunk_bytes: Option<usize>,
    ) -> Result<bool> {
        let target = checked_address(address)?;
        let chunk = max_chunk_bytes.unwrap_or(self.inner.config.max_chunk_bytes);
        if chunk == 0 {
            return Err(PrinterError::InvalidArgument(
                "max_buffer_size must be > 0".to_string(),
            ));
        }
        let request = TransferRequest::new(target.clone(), data)
            .keep_connected(keep_connected)
            .with_max_chunk_bytes(chunk);
        self.run(target, "write", move |inner| async move {
            inner.engine.transmit(&request).await.map(|_| true)
        })
        .await
    }

    /// Coarse adapter state; a missing permission wins over radio power
    pub fn get_state(&self) -> BluetoothState {
        BluetoothState::resolve(self.inner.permissions.as_ref(), self.inner.adapter.as_ref())
    }

    /// Report the answer to a permission request made during discovery
    pub fn permission_result(&self, granted: bool) -> DiscoveryOutcome {
        self.inner.directory.permission_result(granted)
    }

    /// Report a radio power transition
    pub async fn radio_power_changed(&self, power: RadioPower) {
        self.inner.monitor.power_changed(power).await;
    }

    /// Report a device found by the platform scan
    pub fn device_found(&self, device: Device) {
        self.inner.directory.device_found(device);
    }

    /// Consume a stream of radio transitions in the background
    pub fn watch_radio<S>(&self, transitions: S) -> JoinHandle<()>
    where
        S: Stream<Item = RadioPower> + Send + 'static,
    {
        let _runtime = self.inner.runtime.enter();
        self.inner.monitor.clone().watch(transitions)
    }

    /// Consume a stream of scan results in the background
    pub fn watch_scan<S>(&self, scan: S) -> JoinHandle<()>
    where
        S: Stream<Item = Device> + Send + 'static,
    {
        let _runtime = self.inner.runtime.enter();
        self.inner.directory.watch_scan(scan)
    }

    pub fn is_connected(&self, address: &str) -> bool {
        self.inner.registry.contains(address)
    }

    pub fn connected_addresses(&self) -> Vec<String> {
        self.inner.registry.addresses()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.events.listener_count()
    }

    /// Wait until every event published so far has reached the listeners
    pub async fn flush_events(&self) {
        if !self.inner.is_shut_down() {
            self.inner.events.flush().await;
        }
    }

    /// Stop discovery, close every registered channel and stop delivery.
    ///
    /// Operations started afterwards fail with [`PrinterError::Shutdown`].
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.directory.stop_discovery();
        self.inner.close_all().await;
        self.inner.events.detach_all();
        self.inner.events.shutdown();
        info!("Printer manager shut down");
    }

    /// Run `work` on a worker task under the lock for `address`
    async fn run<F, Fut>(&self, address: String, op: &'static str, work: F) -> Result<bool>
    where
        F: FnOnce(Arc<ManagerInner>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        self.ensure_running()?;
        let (reply, result) = oneshot::channel();
        let inner = self.inner.clone();

        self.inner.runtime.spawn(async move {
            let _guard = inner.locks.acquire(&address).await;
            let outcome = if inner.is_shut_down() {
                Err(PrinterError::Shutdown)
            } else {
                work(inner.clone()).await
            };
            if let Err(e) = &outcome {
                warn!("{} {} failed: {}", op, address, e);
            }
            if inner.is_shut_down() {
                // A keep-alive write may have registered a channel after shutdown drained the registry.
                inner.close_all().await;
            }
            inner.events.reply(reply, outcome);
        });

        result.await.map_err(|_| {
            PrinterError::Internal(format!("{} worker exited without a result", op))
        })?
    }
}

fn checked_address(address: &str) -> Result<String> {
    let address = address.trim();
    if address.is_empty() {
        return Err(PrinterError::InvalidArgument(
            "address must not be empty".to_string(),
        ));
    }
    Ok(address.to_string())
}

/// An attached listener.
///
/// Yields events in publish order. Dropping it (or calling
/// [`Subscription::cancel`]) detaches the listener; detaching the last one
/// stops discovery.
pub struct Subscription {
    id: ListenerId,
    events: mpsc::UnboundedReceiver<Event>,
    owner: Weak<ManagerInner>,
    detached: bool,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Next event; `None` once the manager has shut down
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Next already-delivered event, if any
    pub fn try_recv(&mut self) -> Option<Event> {
        self.events.try_recv().ok()
    }

    /// Detach now
    pub fn cancel(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        if let Some(inner) = self.owner.upgrade() {
            if inner.events.detach(self.id) {
                inner.directory.stop_discovery();
            }
        }
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}
