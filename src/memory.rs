//! In-process transport.
//!
//! Both sides of a contract share one [`MemoryTransport`]; requests go to the
//! registered handler and one-way messages to every listener of the channel.
//! Each delivery runs as its own tokio task.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    args::Args,
    error::{IpcError, Result},
    transport::{Emit, Invoke, Listen, Listener, RequestHandler, Serve},
};

type SharedHandlers = Arc<Mutex<HashMap<String, RequestHandler>>>;
type SharedListeners = Arc<Mutex<HashMap<String, Vec<Listener>>>>;

#[derive(Clone, Default)]
pub struct MemoryTransport {
    handlers: SharedHandlers,
    listeners: SharedListeners,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn has_handler(&self, channel: &str) -> bool {
        self.handlers.lock().await.contains_key(channel)
    }

    pub async fn listener_count(&self, channel: &str) -> usize {
        self.listeners
            .lock()
            .await
            .get(channel)
            .map_or(0, |l| l.len())
    }
}

#[async_trait]
impl Serve for MemoryTransport {
    async fn handle(&self, channel: &str, handler: RequestHandler) -> Result<()> {
        let mut handlers = self.handlers.lock().await;
        if handlers.contains_key(channel) {
            return Err(IpcError::ChannelInUse(channel.to_string()));
        }
        handlers.insert(channel.to_string(), handler);
        log::debug!("Handling channel '{channel}'");
        Ok(())
    }

    async fn unhandle(&self, channel: &str) -> Result<()> {
        if self.handlers.lock().await.remove(channel).is_some() {
            log::debug!("Released channel '{channel}'");
        }
        Ok(())
    }
}

#[async_trait]
impl Invoke for MemoryTransport {
    async fn invoke(&self, channel: &str, args: Args) -> Result<Value> {
        let handler = { self.handlers.lock().await.get(channel).cloned() };
        let Some(handler) = handler else {
            return Err(IpcError::UnroutedChannel(channel.to_string()));
        };

        match tokio::spawn(handler(args)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(IpcError::RemoteInvocation {
                channel: channel.to_string(),
                message: e.message().to_string(),
            }),
            Err(e) => Err(IpcError::RemoteInvocation {
                channel: channel.to_string(),
                message: format!("handler task failed: {e}"),
            }),
        }
    }
}

impl Emit for MemoryTransport {
    fn send(&self, channel: &str, args: Args) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("Dropping message on '{channel}': no tokio runtime");
            return;
        };

        let listeners = self.listeners.clone();
        let channel = channel.to_string();
        runtime.spawn(async move {
            let targets = {
                listeners
                    .lock()
                    .await
                    .get(&channel)
                    .cloned()
                    .unwrap_or_default()
            };
            if targets.is_empty() {
                log::debug!("No listener for '{channel}', message dropped");
                return;
            }
            for listener in targets {
                tokio::spawn(listener(args.clone()));
            }
        });
    }
}

#[async_trait]
impl Listen for MemoryTransport {
    async fn listen(&self, channel: &str, listener: Listener) -> Result<()> {
        self.listeners
            .lock()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(listener);
        log::debug!("Listening on channel '{channel}'");
        Ok(())
    }
}
