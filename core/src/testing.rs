//! In-memory platform fakes for tests
//!
//! `FakeConnector` hands out channels that record every chunk, flush and
//! close into a shared [`ChannelLog`], which also tracks how many channels
//! are open per address at any moment.

use crate::device::Device;
use crate::manager::Platform;
use crate::platform::{Adapter, PermissionGate, PermissionStatus};
use crate::transport::{Connector, DuplexChannel, SERIAL_PORT_PROFILE};
use crate::PrinterError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Default, Clone)]
struct AddressLog {
    opens: usize,
    live: usize,
    max_live: usize,
    closes: usize,
    flushes: usize,
    chunks: Vec<Vec<u8>>,
}

/// Shared record of channel activity, keyed by address
#[derive(Debug, Default)]
pub struct ChannelLog {
    addresses: Mutex<HashMap<String, AddressLog>>,
}

impl ChannelLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with<R>(&self, address: &str, f: impl FnOnce(&mut AddressLog) -> R) -> R {
        let mut addresses = self.addresses.lock();
        f(addresses.entry(address.to_string()).or_default())
    }

    fn snapshot(&self, address: &str) -> AddressLog {
        self.addresses
            .lock()
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    /// Channels ever opened to `address`
    pub fn opens(&self, address: &str) -> usize {
        self.snapshot(address).opens
    }

    /// Channels to `address` open right now
    pub fn live(&self, address: &str) -> usize {
        self.snapshot(address).live
    }

    /// Most channels to `address` ever open at once
    pub fn max_live(&self, address: &str) -> usize {
        self.snapshot(address).max_live
    }

    pub fn closes(&self, address: &str) -> usize {
        self.snapshot(address).closes
    }

    pub fn flushes(&self, address: &str) -> usize {
        self.snapshot(address).flushes
    }

    /// Every chunk written to `address`, in write order
    pub fn chunks(&self, address: &str) -> Vec<Vec<u8>> {
        self.snapshot(address).chunks
    }

    pub fn chunk_sizes(&self, address: &str) -> Vec<usize> {
        self.snapshot(address).chunks.iter().map(Vec::len).collect()
    }

    /// Concatenation of every chunk written to `address`
    pub fn written(&self, address: &str) -> Vec<u8> {
        self.snapshot(address).chunks.concat()
    }
}

/// Channel that records into a [`ChannelLog`]
pub struct FakeChannel {
    address: String,
    log: Arc<ChannelLog>,
    closed: bool,
    writes: usize,
    fail_write_at: Option<usize>,
    fail_flush: bool,
}

impl FakeChannel {
    /// Open a channel, counting it as live until closed
    pub fn open(address: &str, log: Arc<ChannelLog>) -> Self {
        log.with(address, |entry| {
            entry.opens += 1;
            entry.live += 1;
            entry.max_live = entry.max_live.max(entry.live);
        });
        Self {
            address: address.to_string(),
            log,
            closed: false,
            writes: 0,
            fail_write_at: None,
            fail_flush: false,
        }
    }

    /// Fail the `nth` write (0-based)
    pub fn failing_write_at(mut self, nth: usize) -> Self {
        self.fail_write_at = Some(nth);
        self
    }

    pub fn failing_flush(mut self) -> Self {
        self.fail_flush = true;
        self
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "channel closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl DuplexChannel for FakeChannel {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.ensure_open()?;
        if self.fail_write_at == Some(self.writes) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection reset by peer",
            ));
        }
        self.writes += 1;
        let chunk = chunk.to_vec();
        self.log.with(&self.address, |entry| entry.chunks.push(chunk));
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        if self.fail_flush {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "flush failed"));
        }
        self.log.with(&self.address, |entry| entry.flushes += 1);
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        if !self.closed {
            self.closed = true;
            self.log.with(&self.address, |entry| {
                entry.closes += 1;
                entry.live = entry.live.saturating_sub(1);
            });
        }
        Ok(())
    }
}

/// Connector producing [`FakeChannel`]s
#[derive(Default)]
pub struct FakeConnector {
    log: Arc<ChannelLog>,
    unreachable: Mutex<HashSet<String>>,
    write_failures: Mutex<HashMap<String, usize>>,
    flush_failures: Mutex<HashSet<String>>,
    open_delay: Mutex<Duration>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Arc<ChannelLog> {
        self.log.clone()
    }

    /// Make every open to `address` fail
    pub fn set_unreachable(&self, address: &str) {
        self.unreachable.lock().insert(address.to_string());
    }

    /// Channels opened to `address` from now on fail their `nth` write
    pub fn fail_write_at(&self, address: &str, nth: usize) {
        self.write_failures.lock().insert(address.to_string(), nth);
    }

    /// Channels opened to `address` from now on fail to flush
    pub fn fail_flush(&self, address: &str) {
        self.flush_failures.lock().insert(address.to_string());
    }

    /// Simulated paging time for every open
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock() = delay;
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, address: &str, service: Uuid) -> io::Result<Box<dyn DuplexChannel>> {
        let delay = *self.open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if service != SERIAL_PORT_PROFILE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "service discovery failed",
            ));
        }
        if self.unreachable.lock().contains(address) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("read failed, socket might closed or timeout ({})", address),
            ));
        }

        let mut channel = FakeChannel::open(address, self.log.clone());
        if let Some(nth) = self.write_failures.lock().get(address) {
            channel = channel.failing_write_at(*nth);
        }
        if self.flush_failures.lock().contains(address) {
            channel = channel.failing_flush();
        }
        Ok(Box::new(channel))
    }
}

/// Adapter with a fixed paired list and observable scan calls
pub struct FakeAdapter {
    enabled: AtomicBool,
    discovering: AtomicBool,
    paired: Mutex<Vec<Device>>,
    scans_started: AtomicUsize,
    scans_cancelled: AtomicUsize,
}

impl Default for FakeAdapter {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            discovering: AtomicBool::new(false),
            paired: Mutex::new(Vec::new()),
            scans_started: AtomicUsize::new(0),
            scans_cancelled: AtomicUsize::new(0),
        }
    }
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_paired(self, devices: Vec<Device>) -> Self {
        *self.paired.lock() = devices;
        self
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.discovering.store(false, Ordering::SeqCst);
        }
    }

    pub fn scans_started(&self) -> usize {
        self.scans_started.load(Ordering::SeqCst)
    }

    pub fn scans_cancelled(&self) -> usize {
        self.scans_cancelled.load(Ordering::SeqCst)
    }
}

impl Adapter for FakeAdapter {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn paired_devices(&self) -> Vec<Device> {
        self.paired.lock().clone()
    }

    fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    fn start_scan(&self) -> Result<(), PrinterError> {
        if !self.is_enabled() {
            return Err(PrinterError::RadioUnavailable);
        }
        self.discovering.store(true, Ordering::SeqCst);
        self.scans_started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cancel_scan(&self) {
        if self.discovering.swap(false, Ordering::SeqCst) {
            self.scans_cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Permission gate with a scripted answer to `request`
pub struct FakePermissions {
    status: Mutex<PermissionStatus>,
    request_outcome: Mutex<PermissionStatus>,
    requests: AtomicUsize,
}

impl FakePermissions {
    pub fn granted() -> Self {
        Self::with_status(PermissionStatus::Granted)
    }

    pub fn denied() -> Self {
        Self::with_status(PermissionStatus::Denied)
    }

    fn with_status(status: PermissionStatus) -> Self {
        Self {
            status: Mutex::new(status),
            request_outcome: Mutex::new(status),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn set_status(&self, status: PermissionStatus) {
        *self.status.lock() = status;
    }

    /// What the next `request` calls answer; a grant also updates `check`
    pub fn set_request_outcome(&self, outcome: PermissionStatus) {
        *self.request_outcome.lock() = outcome;
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl PermissionGate for FakePermissions {
    fn check(&self) -> PermissionStatus {
        *self.status.lock()
    }

    fn request(&self) -> PermissionStatus {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.check().is_granted() {
            return PermissionStatus::Granted;
        }
        let outcome = *self.request_outcome.lock();
        if outcome.is_granted() {
            self.set_status(outcome);
        }
        outcome
    }
}

/// The three fakes bundled together
#[derive(Clone)]
pub struct FakePlatform {
    pub adapter: Arc<FakeAdapter>,
    pub permissions: Arc<FakePermissions>,
    pub connector: Arc<FakeConnector>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self {
            adapter: Arc::new(FakeAdapter::new()),
            permissions: Arc::new(FakePermissions::granted()),
            connector: Arc::new(FakeConnector::new()),
        }
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_paired(devices: Vec<Device>) -> Self {
        Self {
            adapter: Arc::new(FakeAdapter::new().with_paired(devices)),
            ..Self::default()
        }
    }

    pub fn log(&self) -> Arc<ChannelLog> {
        self.connector.log()
    }

    /// Capabilities for [`crate::PrinterManager::start`]
    pub fn platform(&self) -> Platform {
        Platform {
            adapter: self.adapter.clone(),
            permissions: self.permissions.clone(),
            connector: self.connector.clone(),
        }
    }
}
