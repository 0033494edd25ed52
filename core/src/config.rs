//! Manager configuration
//!
//! All knobs have defaults matching the behaviour printers have been tuned
//! against: 512-byte writes paced at roughly 16 bytes per millisecond.

use crate::PrinterError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default largest single write handed to a channel
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 512;

/// Scope of the mutual exclusion shared by connect, disconnect and write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    /// One lock for the whole manager; operations on different devices queue
    /// behind each other
    Manager,
    /// One lock per device address
    PerAddress,
}

/// Sender-side pacing for peripherals without flow control
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Bytes the peripheral is assumed to drain per tick
    pub bytes_per_tick: usize,
    /// Tick length in milliseconds (0 disables pacing)
    pub tick_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            bytes_per_tick: 16,
            tick_ms: 1,
        }
    }
}

impl PacingConfig {
    /// Pacing that never sleeps
    pub fn disabled() -> Self {
        Self {
            bytes_per_tick: 16,
            tick_ms: 0,
        }
    }

    /// Delay owed after handing `bytes` to the channel.
    ///
    /// Integer division: writes shorter than one tick's worth are not delayed.
    pub fn delay_for(&self, bytes: usize) -> Duration {
        let ticks = (bytes / self.bytes_per_tick.max(1)) as u64;
        Duration::from_millis(ticks.saturating_mul(self.tick_ms))
    }
}

/// Printer manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Chunk size used when a write does not specify one
    pub max_chunk_bytes: usize,
    /// Delay heuristic between chunks and after the final flush
    pub pacing: PacingConfig,
    /// Granularity of the operation lock
    pub lock_scope: LockScope,
    /// Close registered channels when the radio reports it was switched off
    pub close_channels_on_radio_off: bool,
    /// Publish `TransferState::Failed` when a write fails
    pub emit_failed_state: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            pacing: PacingConfig::default(),
            lock_scope: LockScope::PerAddress,
            close_channels_on_radio_off: true,
            emit_failed_state: false,
        }
    }
}

impl ManagerConfig {
    /// Set the default chunk size
    pub fn with_max_chunk_bytes(mut self, bytes: usize) -> Self {
        self.max_chunk_bytes = bytes;
        self
    }

    /// Set the pacing heuristic
    pub fn with_pacing(mut self, pacing: PacingConfig) -> Self {
        self.pacing = pacing;
        self
    }

    /// Set the lock scope
    pub fn with_lock_scope(mut self, scope: LockScope) -> Self {
        self.lock_scope = scope;
        self
    }

    /// Toggle publishing of `Failed` transfer states
    pub fn with_failed_state(mut self, emit: bool) -> Self {
        self.emit_failed_state = emit;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), PrinterError> {
        if self.max_chunk_bytes == 0 {
            return Err(PrinterError::InvalidConfig(
                "max_chunk_bytes must be > 0".to_string(),
            ));
        }
        if self.pacing.bytes_per_tick == 0 {
            return Err(PrinterError::InvalidConfig(
                "pacing.bytes_per_tick must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
