//! Connection registry: at most one open channel per device address
//!
//! The registry owns idle channels. A transfer takes its channel out with
//! [`ConnectionRegistry::remove`] and either puts it back (keep-alive) or
//! closes it, so a channel is never reachable from two places at once.
//!
//! [`ConnectionRegistry::invalidate`] marks every channel opened so far as
//! dead. An operation that was holding a channel outside the registry at that
//! moment learns of it through [`ConnectionRegistry::put_current`].

use super::channel::DuplexChannel;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// An open channel to one device address
pub struct ConnectionHandle {
    address: String,
    channel: Box<dyn DuplexChannel>,
    opened_at: Instant,
    transfers: u32,
}

impl ConnectionHandle {
    pub fn new(address: impl Into<String>, channel: Box<dyn DuplexChannel>) -> Self {
        Self {
            address: address.into(),
            channel,
            opened_at: Instant::now(),
            transfers: 0,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn channel_mut(&mut self) -> &mut dyn DuplexChannel {
        self.channel.as_mut()
    }

    /// Time since the channel was opened
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Transfers completed over this channel
    pub fn transfers(&self) -> u32 {
        self.transfers
    }

    pub(crate) fn record_transfer(&mut self) {
        self.transfers = self.transfers.saturating_add(1);
    }

    /// Close the underlying channel, consuming the handle
    pub async fn close(mut self) -> io::Result<()> {
        debug!(
            "Closing channel to {} after {} transfer(s)",
            self.address, self.transfers
        );
        self.channel.close().await
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("address", &self.address)
            .field("age", &self.age())
            .field("transfers", &self.transfers)
            .finish()
    }
}

/// Address-keyed store of idle channels
#[derive(Default)]
pub struct ConnectionRegistry {
    handles: Mutex<HashMap<String, ConnectionHandle>>,
    /// Bumped by `invalidate`, only while `handles` is locked
    generation: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a channel is registered for `address`
    pub fn contains(&self, address: &str) -> bool {
        self.handles.lock().contains_key(address)
    }

    /// Register a handle under its address.
    ///
    /// Returns a handle that was already registered for the same address; the
    /// caller owns it and must close it.
    pub fn put(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let address = handle.address().to_string();
        let displaced = self.handles.lock().insert(address.clone(), handle);
        if displaced.is_some() {
            warn!("Replaced an existing channel for {}", address);
        }
        displaced
    }

    /// Current channel generation; capture it before taking or opening a
    /// channel and hand it back to [`Self::put_current`]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Register a handle unless the registry was invalidated since
    /// `generation` was read.
    ///
    /// `Ok` carries a displaced handle as [`Self::put`] does. `Err` gives the
    /// stale handle back to the caller, who must close it.
    pub fn put_current(
        &self,
        handle: ConnectionHandle,
        generation: u64,
    ) -> Result<Option<ConnectionHandle>, ConnectionHandle> {
        let mut handles = self.handles.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Channel to {} outlived an invalidation", handle.address());
            return Err(handle);
        }
        let address = handle.address().to_string();
        let displaced = handles.insert(address.clone(), handle);
        if displaced.is_some() {
            warn!("Replaced an existing channel for {}", address);
        }
        Ok(displaced)
    }

    /// Take the handle for `address` out of the registry
    pub fn remove(&self, address: &str) -> Option<ConnectionHandle> {
        self.handles.lock().remove(address)
    }

    /// Remove and close the handle for `address`.
    ///
    /// A missing entry is not an error; returns whether a channel was closed.
    pub async fn close_and_remove(&self, address: &str) -> io::Result<bool> {
        // Take it out first so the lock is not held across the close.
        let handle = self.remove(address);
        match handle {
            Some(handle) => {
                handle.close().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Take every registered handle
    pub fn drain(&self) -> Vec<ConnectionHandle> {
        self.handles.lock().drain().map(|(_, handle)| handle).collect()
    }

    /// Take every registered handle and start a new generation, so channels
    /// currently held by in-flight operations can no longer be registered
    pub fn invalidate(&self) -> Vec<ConnectionHandle> {
        let mut handles = self.handles.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        handles.drain().map(|(_, handle)| handle).collect()
    }

    /// Addresses with a registered channel
    pub fn addresses(&self) -> Vec<String> {
        self.handles.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }
}
