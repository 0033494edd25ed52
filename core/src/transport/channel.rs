//! Duplex byte channel abstraction
//!
//! A channel is one open link to a peripheral. The peripheral never answers,
//! so only the outbound half is modelled: write, flush, close.

use async_trait::async_trait;
use std::io;
use uuid::Uuid;

/// Serial Port Profile service class (`00001101-0000-1000-8000-00805f9b34fb`)
pub const SERIAL_PORT_PROFILE: Uuid = Uuid::from_u128(0x0000_1101_0000_1000_8000_0080_5f9b_34fb);

/// One open link to a device
#[async_trait]
pub trait DuplexChannel: Send {
    /// Write all of `chunk`, in order, or fail
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()>;
    /// Push buffered bytes to the device
    async fn flush(&mut self) -> io::Result<()>;
    /// Tear the link down; further use is an error
    async fn close(&mut self) -> io::Result<()>;
}

/// Opens channels to device addresses
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a channel to `address` speaking the `service` profile.
    ///
    /// May block for as long as the platform takes to page the device.
    async fn open(&self, address: &str, service: Uuid) -> io::Result<Box<dyn DuplexChannel>>;
}
