// Transport module: byte channels, the connection registry and paced transfer

pub mod channel;
pub mod locks;
pub mod registry;
pub mod stream;
pub mod transfer;

pub use channel::{Connector, DuplexChannel, SERIAL_PORT_PROFILE};
pub use locks::OperationLocks;
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use stream::{DeviceFileConnector, StreamChannel, TcpConnector};
pub use transfer::{chunk_ranges, TransferEngine, TransferReport, TransferRequest};
