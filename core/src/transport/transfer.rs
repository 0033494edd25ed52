//! Paced, chunked delivery of one payload to one device
//!
//! The peripheral never acknowledges anything, so the sender sleeps after
//! every chunk in proportion to its length and once more after the final
//! flush, approximating the rate at which the printer drains its buffer.

use super::channel::{Connector, SERIAL_PORT_PROFILE};
use super::registry::{ConnectionHandle, ConnectionRegistry};
use crate::broadcast::EventBroadcaster;
use crate::config::{PacingConfig, DEFAULT_MAX_CHUNK_BYTES};
use crate::events::{Event, ProgressSample, TransferState};
use crate::{PrinterError, Result};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Split `len` bytes into consecutive ranges of at most `max` bytes
pub fn chunk_ranges(len: usize, max: usize) -> impl Iterator<Item = Range<usize>> {
    let max = max.max(1);
    (0..len)
        .step_by(max)
        .map(move |start| start..(start + max).min(len))
}

/// One transmission request
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub address: String,
    pub payload: Vec<u8>,
    /// Register the channel for reuse instead of closing it
    pub keep_connected: bool,
    pub max_chunk_bytes: usize,
}

impl TransferRequest {
    pub fn new(address: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            address: address.into(),
            payload,
            keep_connected: false,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
        }
    }

    pub fn keep_connected(mut self, keep: bool) -> Self {
        self.keep_connected = keep;
        self
    }

    pub fn with_max_chunk_bytes(mut self, bytes: usize) -> Self {
        self.max_chunk_bytes = bytes;
        self
    }
}

/// Outcome of a successful transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub address: String,
    pub bytes_sent: usize,
    pub chunks: usize,
    /// Whether a registered channel was used instead of opening one
    pub reused_connection: bool,
    pub elapsed: Duration,
}

/// Publishes state changes for one transmission, forward only
struct StateTracker<'a> {
    events: &'a EventBroadcaster,
    address: &'a str,
    state: TransferState,
}

impl<'a> StateTracker<'a> {
    fn new(events: &'a EventBroadcaster, address: &'a str) -> Self {
        Self {
            events,
            address,
            state: TransferState::Idle,
        }
    }

    fn advance(&mut self, next: TransferState) {
        if !self.state.can_advance_to(next) {
            warn!(
                "Ignoring {} -> {} for {}",
                self.state, next, self.address
            );
            return;
        }
        self.state = next;
        self.events.publish(Event::StateChanged {
            address: self.address.to_string(),
            state: next,
        });
    }
}

/// Runs the connect, chunked write and complete sequence
pub struct TransferEngine {
    connector: Arc<dyn Connector>,
    registry: Arc<ConnectionRegistry>,
    events: Arc<EventBroadcaster>,
    pacing: PacingConfig,
    emit_failed_state: bool,
}

impl TransferEngine {
    pub fn new(
        connector: Arc<dyn Connector>,
        registry: Arc<ConnectionRegistry>,
        events: Arc<EventBroadcaster>,
        pacing: PacingConfig,
    ) -> Self {
        Self {
            connector,
            registry,
            events,
            pacing,
            emit_failed_state: false,
        }
    }

    /// Publish `TransferState::Failed` before returning an error
    pub fn with_failed_state(mut self, emit: bool) -> Self {
        self.emit_failed_state = emit;
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Open a fresh channel to `address` over the serial port profile
    pub async fn open(&self, address: &str) -> Result<ConnectionHandle> {
        debug!("Opening channel to {}", address);
        let channel = self
            .connector
            .open(address, SERIAL_PORT_PROFILE)
            .await
            .map_err(|e| PrinterError::connection(address, e))?;
        info!("Channel to {} open", address);
        Ok(ConnectionHandle::new(address, channel))
    }

    /// Deliver `request.payload` to its device.
    ///
    /// Callers hold the operation lock for the address for the whole call.
    pub async fn transmit(&self, request: &TransferRequest) -> Result<TransferReport> {
        if request.max_chunk_bytes == 0 {
            return Err(PrinterError::InvalidArgument(
                "max_chunk_bytes must be > 0".to_string(),
            ));
        }

        let address = request.address.as_str();
        let started = Instant::now();
        let mut tracker = StateTracker::new(&self.events, address);
        tracker.advance(TransferState::Connecting);
        let generation = self.registry.generation();

        let (mut handle, reused) = match self.registry.remove(address) {
            Some(handle) => {
                debug!("Reusing open channel to {}", address);
                (handle, true)
            }
            None => match self.open(address).await {
                Ok(handle) => (handle, false),
                Err(e) => return Err(self.fail(&mut tracker, e)),
            },
        };

        let chunks = match self.send(&mut handle, request, &mut tracker).await {
            Ok(chunks) => chunks,
            Err(e) => {
                if let Err(close_err) = handle.close().await {
                    debug!("Close after failure on {} also failed: {}", address, close_err);
                }
                return Err(self.fail(&mut tracker, e));
            }
        };
        handle.record_transfer();

        if request.keep_connected {
            match self.registry.put_current(handle, generation) {
                Ok(Some(displaced)) => {
                    if let Err(e) = displaced.close().await {
                        debug!("Closing displaced channel to {} failed: {}", address, e);
                    }
                }
                Ok(None) => {}
                Err(stale) => {
                    // The radio went off mid-transfer; the channel is dead.
                    info!("Not keeping channel to {}: radio was switched off", address);
                    if let Err(e) = stale.close().await {
                        debug!("Closing stale channel to {} failed: {}", address, e);
                    }
                }
            }
        } else if let Err(e) = handle.close().await {
            return Err(self.fail(&mut tracker, PrinterError::connection(address, e)));
        }

        tracker.advance(TransferState::Completed);
        let report = TransferReport {
            address: address.to_string(),
            bytes_sent: request.payload.len(),
            chunks,
            reused_connection: reused,
            elapsed: started.elapsed(),
        };
        info!(
            "Sent {} bytes to {} in {} chunk(s) ({:?})",
            report.bytes_sent, address, report.chunks, report.elapsed
        );
        Ok(report)
    }

    /// Write every chunk, flush and settle; returns the chunk count
    async fn send(
        &self,
        handle: &mut ConnectionHandle,
        request: &TransferRequest,
        tracker: &mut StateTracker<'_>,
    ) -> Result<usize> {
        let address = request.address.as_str();
        let payload = request.payload.as_slice();
        let total = payload.len();

        tracker.advance(TransferState::Transmitting);
        self.progress(address, total, 0);

        let mut sent = 0;
        let mut chunks = 0;
        for range in chunk_ranges(total, request.max_chunk_bytes) {
            let chunk = &payload[range];
            handle
                .channel_mut()
                .write(chunk)
                .await
                .map_err(|e| PrinterError::connection(address, e))?;
            sent += chunk.len();
            chunks += 1;
            self.progress(address, total, sent);
            self.pace(chunk.len()).await;
        }

        handle
            .channel_mut()
            .flush()
            .await
            .map_err(|e| PrinterError::connection(address, e))?;
        // Closing before the printer drains its buffer truncates output.
        self.pace(total).await;
        Ok(chunks)
    }

    fn progress(&self, address: &str, total: usize, sent: usize) {
        self.events.publish(Event::Progress {
            address: address.to_string(),
            sample: ProgressSample::new(total, sent),
        });
    }

    async fn pace(&self, bytes: usize) {
        let delay = self.pacing.delay_for(bytes);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn fail(&self, tracker: &mut StateTracker<'_>, err: PrinterError) -> PrinterError {
        warn!("Transfer to {} failed: {}", tracker.address, err);
        if self.emit_failed_state {
            tracker.advance(TransferState::Failed);
        }
        err
    }
}
