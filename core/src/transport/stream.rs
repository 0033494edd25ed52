//! Channels over ordinary byte streams
//!
//! Desktop hosts reach serial-profile printers through a bound RFCOMM device
//! node, and many receipt printers also listen on a raw TCP port (9100).
//! Both are plain writers, so one adapter covers them.

use super::channel::{Connector, DuplexChannel};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};
use uuid::Uuid;

/// [`DuplexChannel`] over any tokio writer
pub struct StreamChannel<W> {
    writer: W,
    closed: bool,
}

impl<W> StreamChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            closed: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "channel closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl<W> DuplexChannel for StreamChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.ensure_open()?;
        self.writer.write_all(chunk).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        self.writer.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.shutdown().await
    }
}

/// Opens raw TCP connections; the address is `host:port`
#[derive(Debug, Default, Clone)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self, address: &str, service: Uuid) -> io::Result<Box<dyn DuplexChannel>> {
        debug!("TCP transport ignores service class {}", service);
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {} over TCP", address);
        Ok(Box::new(StreamChannel::new(stream)))
    }
}

/// Opens device nodes (or plain files) mapped from device addresses
#[derive(Debug, Default, Clone)]
pub struct DeviceFileConnector {
    paths: HashMap<String, PathBuf>,
}

impl DeviceFileConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `address` to the node at `path`
    pub fn with_path(mut self, address: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(address.into(), path.into());
        self
    }

    pub fn path_for(&self, address: &str) -> Option<&PathBuf> {
        self.paths.get(address)
    }
}

#[async_trait]
impl Connector for DeviceFileConnector {
    async fn open(&self, address: &str, _service: Uuid) -> io::Result<Box<dyn DuplexChannel>> {
        let path = self.paths.get(address).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no device node configured for {}", address),
            )
        })?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(true)
            .open(path)
            .await?;
        info!("Opened {} for {}", path.display(), address);
        Ok(Box::new(StreamChannel::new(file)))
    }
}
