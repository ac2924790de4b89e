use std::time::Duration;

use thiserror::Error;

use crate::bridge::Capability;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IpcError>;

/// Errors surfaced by binding, proxies and transports.
#[derive(Debug, Error)]
pub enum IpcError {
    /// No handler instance was given, or it exposes no operations to bind.
    #[error("invalid contract: {0}")]
    InvalidContract(String),

    /// The remote handler failed while serving the request.
    #[error("remote invocation on '{channel}' failed: {message}")]
    RemoteInvocation { channel: String, message: String },

    /// Nothing is registered to answer requests on the channel.
    #[error("no handler registered for channel '{0}'")]
    UnroutedChannel(String),

    /// A request handler already owns the channel.
    #[error("channel '{0}' already has a handler")]
    ChannelInUse(String),

    #[error("call on '{channel}' timed out after {after:?}")]
    Timeout { channel: String, after: Duration },

    /// The bridge was not set up to expose this capability.
    #[error("capability '{0}' is not exposed by the bridge")]
    CapabilityDenied(Capability),

    #[error("transport disconnected")]
    Disconnected,

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure raised by a handler while serving an operation.
///
/// Only the message crosses the transport; the calling side receives it
/// verbatim inside [`IpcError::RemoteInvocation`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn unknown_operation(operation: &str) -> Self {
        Self::new(format!("unknown operation '{operation}'"))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("invalid arguments: {e}"))
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
