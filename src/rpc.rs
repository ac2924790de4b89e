use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::error::IpcError;

/// Upper bound on a single packet body.
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum RpcRequest {
    /// Claim a channel: requests on it are forwarded to this connection.
    Handle {
        channel: String,
    },
    /// Receive every one-way message sent on a channel.
    Listen {
        channel: String,
    },
    /// Give up a channel claimed with `Handle`.
    Unhandle {
        channel: String,
    },
    /// `caller` is filled in by the broker when it forwards the call.
    Invoke {
        call_id: CallId,
        channel: String,
        args: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caller: Option<ClientId>,
    },
    /// `target` restricts delivery to one listening session.
    Send {
        channel: String,
        args: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ClientId>,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The handler ran and failed.
    Remote,
    /// No connection serves the channel.
    Unrouted,
    /// Another handler already owns the channel.
    ChannelInUse,
}

impl ErrorCode {
    pub fn into_error(self, channel: String, message: String) -> IpcError {
        match self {
            ErrorCode::Remote => IpcError::RemoteInvocation { channel, message },
            ErrorCode::Unrouted => IpcError::UnroutedChannel(channel),
            ErrorCode::ChannelInUse => IpcError::ChannelInUse(channel),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum RpcResponse {
    Handling {
        channel: String,
    },
    Listening {
        channel: String,
    },
    Result {
        call_id: CallId,
        value: Value,
    },
    /// `call_id` is `None` when a `Handle` registration was refused.
    Error {
        call_id: Option<CallId>,
        code: ErrorCode,
        channel: String,
        message: String,
    },
    Event {
        channel: String,
        args: Vec<Value>,
    },
}

/// Anything that travels over a broker connection. Requests and responses
/// flow both ways: the broker forwards `Invoke` to handlers and handlers
/// answer with `Result` or `Error`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Packet {
    Request(RpcRequest),
    Response(RpcResponse),
}

/// Write one length-prefixed packet.
pub async fn write_packet<W>(writer: &mut W, data: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if data.len() > MAX_PACKET_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("packet of {} bytes exceeds {MAX_PACKET_SIZE}", data.len()),
        ));
    }
    writer.write_u32(data.len() as u32).await?;
    writer.write_all(data).await?;
    writer.flush().await
}

/// Read one length-prefixed packet.
pub async fn read_packet<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_PACKET_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("packet of {len} bytes exceeds {MAX_PACKET_SIZE}"),
        ));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}
