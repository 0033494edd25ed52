//! Method-call surface
//!
//! Hosts that bridge from another runtime send `(method, arguments)` pairs:
//!
//! | method       | arguments                                                    | result          |
//! |--------------|--------------------------------------------------------------|-----------------|
//! | `getState`   | none                                                         | `1`, `2` or `3` |
//! | `connect`    | `address`                                                    | `true`          |
//! | `disconnect` | `address`                                                    | `true`/`false`  |
//! | `write`      | `address`, `data`, `keep_connected`, `max_buffer_size`?      | `true`          |
//!
//! `data` is a byte array, or a string sent as its UTF-8 bytes.

use crate::manager::PrinterManager;
use crate::{PrinterError, Result};
use serde::Deserialize;
use serde_json::{json, Value};

/// A decoded method call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodCall {
    GetState,
    Connect {
        address: String,
    },
    Disconnect {
        address: String,
    },
    Write {
        address: String,
        data: Vec<u8>,
        keep_connected: bool,
        max_chunk_bytes: Option<usize>,
    },
}

#[derive(Deserialize)]
struct AddressArgs {
    address: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Bytes(Vec<u8>),
    Text(String),
}

impl From<Payload> for Vec<u8> {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Bytes(bytes) => bytes,
            Payload::Text(text) => text.into_bytes(),
        }
    }
}

#[derive(Deserialize)]
struct WriteArgs {
    address: String,
    data: Payload,
    #[serde(default)]
    keep_connected: bool,
    #[serde(default)]
    max_buffer_size: Option<usize>,
}

/// A full request: `{"method": "...", "args": {...}}`
#[derive(Debug, Deserialize)]
struct Request {
    method: String,
    #[serde(default)]
    args: Value,
}

fn decode<T: for<'de> Deserialize<'de>>(method: &str, args: Value) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|e| PrinterError::InvalidArgument(format!("{}: {}", method, e)))
}

impl MethodCall {
    /// Decode `method` with its JSON `args`
    pub fn parse(method: &str, args: Value) -> Result<Self> {
        match method {
            "getState" => Ok(MethodCall::GetState),
            "connect" => {
                let args: AddressArgs = decode(method, args)?;
                Ok(MethodCall::Connect {
                    address: args.address,
                })
            }
            "disconnect" => {
                let args: AddressArgs = decode(method, args)?;
                Ok(MethodCall::Disconnect {
                    address: args.address,
                })
            }
            "write" => {
                let args: WriteArgs = decode(method, args)?;
                Ok(MethodCall::Write {
                    address: args.address,
                    data: args.data.into(),
                    keep_connected: args.keep_connected,
                    max_chunk_bytes: args.max_buffer_size,
                })
            }
            other => Err(PrinterError::NotImplemented(other.to_string())),
        }
    }

    /// Decode a whole `{"method", "args"}` request object
    pub fn from_request(request: Value) -> Result<Self> {
        let request: Request = serde_json::from_value(request)
            .map_err(|e| PrinterError::InvalidArgument(format!("malformed request: {}", e)))?;
        Self::parse(&request.method, request.args)
    }

    pub fn name(&self) -> &'static str {
        match self {
            MethodCall::GetState => "getState",
            MethodCall::Connect { .. } => "connect",
            MethodCall::Disconnect { .. } => "disconnect",
            MethodCall::Write { .. } => "write",
        }
    }

    /// Run against `manager`, producing the JSON result
    pub async fn dispatch(self, manager: &PrinterManager) -> Result<Value> {
        match self {
            MethodCall::GetState => Ok(json!(manager.get_state().code())),
            MethodCall::Connect { address } => manager.connect(&address).await.map(Value::Bool),
            MethodCall::Disconnect { address } => {
                manager.disconnect(&address).await.map(Value::Bool)
            }
            MethodCall::Write {
                address,
                data,
                keep_connected,
                max_chunk_bytes,
            } => manager
                .write(&address, data, keep_connected, max_chunk_bytes)
                .await
                .map(Value::Bool),
        }
    }
}
