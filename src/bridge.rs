//! Narrowed transport access for a restricted client context.
//!
//! The client process never receives the transport itself. At startup it is
//! handed a [`Bridge`] which implements only [`Invoke`] and [`Listen`], and
//! of those only the capabilities chosen when the bridge was built. It cannot
//! serve requests or emit events.

use std::{collections::HashSet, fmt, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    args::Args,
    config::ProxyConfig,
    error::{IpcError, Result},
    proxy::MethodsProxy,
    transport::{Invoke, Listen, Listener},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Request/response calls into the host.
    Invoke,
    /// Receiving events fired by the host.
    Listen,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Invoke => f.write_str("invoke"),
            Capability::Listen => f.write_str("listen"),
        }
    }
}

#[derive(Clone)]
pub struct Bridge {
    invoker: Arc<dyn Invoke>,
    listener: Arc<dyn Listen>,
    exposed: Arc<HashSet<Capability>>,
}

impl Bridge {
    /// Expose `capabilities` of `transport`. Everything else stays out of reach.
    pub fn expose<T>(transport: Arc<T>, capabilities: &[Capability]) -> Self
    where
        T: Invoke + Listen + 'static,
    {
        let exposed: HashSet<Capability> = capabilities.iter().copied().collect();
        log::info!("Bridge exposes {capabilities:?}");
        Self {
            invoker: transport.clone(),
            listener: transport,
            exposed: Arc::new(exposed),
        }
    }

    /// Expose request/response invocation only.
    pub fn invoke_only<T>(transport: Arc<T>) -> Self
    where
        T: Invoke + Listen + 'static,
    {
        Self::expose(transport, &[Capability::Invoke])
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.exposed.contains(&capability)
    }

    fn check(&self, capability: Capability) -> Result<()> {
        if self.allows(capability) {
            Ok(())
        } else {
            log::warn!("Bridge refused '{capability}'");
            Err(IpcError::CapabilityDenied(capability))
        }
    }

    /// Build a methods proxy that calls through this bridge.
    pub fn methods_proxy(&self, config: &ProxyConfig) -> MethodsProxy {
        MethodsProxy::new(Arc::new(self.clone()), config)
    }
}

#[async_trait]
impl Invoke for Bridge {
    async fn invoke(&self, channel: &str, args: Args) -> Result<Value> {
        self.check(Capability::Invoke)?;
        self.invoker.invoke(channel, args).await
    }
}

#[async_trait]
impl Listen for Bridge {
    async fn listen(&self, channel: &str, listener: Listener) -> Result<()> {
        self.check(Capability::Listen)?;
        self.listener.listen(channel, listener).await
    }
}
