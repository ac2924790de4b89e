//! Call-through stand-ins for a remote contract.
//!
//! A proxy holds no state beyond the transport capability and the channel
//! prefix. Asking it for an operation by name synthesizes a forwarder on the
//! fly; nothing about the contract needs to exist locally.

use std::{sync::Arc, time::Duration};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    args::{Args, IntoArgs},
    channel::ChannelPrefix,
    config::ProxyConfig,
    error::{IpcError, Result},
    transport::{Emit, Invoke},
};

/// Client-side stand-in for a methods contract.
///
/// # Example
/// ```ignore
/// let proxy = MethodsProxy::new(bridge.clone(), &ProxyConfig::default());
/// let reply: String = proxy.invoke("ping", ("test",)).await?;
/// ```
#[derive(Clone)]
pub struct MethodsProxy {
    invoker: Arc<dyn Invoke>,
    prefix: ChannelPrefix,
    timeout: Option<Duration>,
}

impl MethodsProxy {
    pub fn new(invoker: Arc<dyn Invoke>, config: &ProxyConfig) -> Self {
        Self {
            invoker,
            prefix: config.prefix.clone(),
            timeout: config.call_timeout,
        }
    }

    pub fn prefix(&self) -> &ChannelPrefix {
        &self.prefix
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Forwarder for operation `name`.
    pub fn method(&self, name: &str) -> RemoteMethod {
        RemoteMethod::new(self.invoker.clone(), self.prefix.channel(name), self.timeout)
    }

    pub async fn call(&self, name: &str, args: Args) -> Result<Value> {
        self.method(name).call(args).await
    }

    pub async fn invoke<A, R>(&self, name: &str, args: A) -> Result<R>
    where
        A: IntoArgs,
        R: DeserializeOwned,
    {
        self.method(name).invoke(args).await
    }
}

/// A single remote operation bound to its channel.
#[derive(Clone)]
pub struct RemoteMethod {
    invoker: Arc<dyn Invoke>,
    channel: String,
    timeout: Option<Duration>,
}

impl RemoteMethod {
    /// Forwarder for a fully qualified channel, outside any contract.
    pub fn new(
        invoker: Arc<dyn Invoke>,
        channel: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            invoker,
            channel: channel.into(),
            timeout,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Send a request and wait for the remote result.
    ///
    /// Without a configured timeout this waits as long as the transport does.
    pub async fn call(&self, args: Args) -> Result<Value> {
        log::debug!("Invoking {} with {} argument(s)", self.channel, args.len());
        let request = self.invoker.invoke(&self.channel, args);
        match self.timeout {
            None => request.await,
            Some(after) => tokio::time::timeout(after, request)
                .await
                .map_err(|_| IpcError::Timeout {
                    channel: self.channel.clone(),
                    after,
                })?,
        }
    }

    pub async fn invoke<A, R>(&self, args: A) -> Result<R>
    where
        A: IntoArgs,
        R: DeserializeOwned,
    {
        let value = self.call(args.into_args()?).await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Host-side stand-in for an events contract.
///
/// Events reach every listener behind `emitter`. To address a single broker
/// session, build the proxy over [`crate::SocketTransport::session`].
#[derive(Clone)]
pub struct EventsProxy {
    emitter: Arc<dyn Emit>,
    prefix: ChannelPrefix,
}

impl EventsProxy {
    pub fn new(emitter: Arc<dyn Emit>, prefix: impl Into<ChannelPrefix>) -> Self {
        Self {
            emitter,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &ChannelPrefix {
        &self.prefix
    }

    pub fn event(&self, name: &str) -> RemoteEvent {
        RemoteEvent {
            emitter: self.emitter.clone(),
            channel: self.prefix.channel(name),
        }
    }

    pub fn fire(&self, name: &str, args: Args) {
        self.event(name).fire(args);
    }

    pub fn emit<A: IntoArgs>(&self, name: &str, args: A) {
        self.event(name).emit(args);
    }
}

#[derive(Clone)]
pub struct RemoteEvent {
    emitter: Arc<dyn Emit>,
    channel: String,
}

impl RemoteEvent {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Fire and return immediately.
    pub fn fire(&self, args: Args) {
        log::debug!("Emitting {} with {} argument(s)", self.channel, args.len());
        self.emitter.send(&self.channel, args);
    }

    /// Serialize `args` and fire. Arguments that fail to serialize are logged
    /// and the event is dropped.
    pub fn emit<A: IntoArgs>(&self, args: A) {
        match args.into_args() {
            Ok(args) => self.fire(args),
            Err(e) => log::error!("Dropping event {}: {e}", self.channel),
        }
    }
}
