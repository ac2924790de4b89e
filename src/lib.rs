//! Typed request/response and event contracts over message channels.
//!
//! A contract is declared once with [`methods_contract!`] or
//! [`events_contract!`]. The receiving side binds an implementation to a
//! transport with [`bind_methods`] or [`bind_events`]; the other side calls
//! through a [`MethodsProxy`] or fires through an [`EventsProxy`]. Every
//! operation travels on its own channel, `prefix:operation`.
//!
//! Transports are split into the capabilities of [`transport`]. Use
//! [`MemoryTransport`] inside one process, or [`SocketTransport`] to reach
//! other processes through the broker in [`broker`]. A restricted process
//! should only ever see a [`Bridge`].

pub mod args;
pub mod binding;
pub mod bridge;
pub mod broker;
pub mod channel;
pub mod client;
pub mod config;
pub mod contract;
pub mod error;
pub mod logger;
pub mod memory;
pub mod proxy;
pub mod rpc;
pub mod transport;

pub use args::{Args, FromArgs, IntoArgs};
pub use binding::{bind_events, bind_methods};
pub use bridge::{Bridge, Capability};
pub use channel::{ChannelPrefix, DEFAULT_PREFIX, OperationDescriptor, channel_name};
pub use client::{SessionEmitter, SocketTransport, caller_session};
pub use config::{BrokerConfig, Endpoint, ProxyConfig};
pub use contract::{SharedObject, operation_names};
pub use error::{HandlerError, IpcError, Result};
pub use memory::MemoryTransport;
pub use proxy::{EventsProxy, MethodsProxy, RemoteEvent, RemoteMethod};
pub use rpc::ClientId;
pub use transport::{Emit, Invoke, Listen, Listener, RequestHandler, Serve, Transport};

#[doc(hidden)]
pub mod __private {
    pub use async_trait::async_trait;
    pub use serde_json::{Value, to_value};
}
