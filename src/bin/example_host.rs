#[allow(dead_code)]
mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{ClientEventsEmitter, HostMethods, HostMethodsDispatch, Param, Sum};
use ipc_proxy::{
    ChannelPrefix, EventsProxy, HandlerError, ProxyConfig, SocketTransport, bind_methods,
    caller_session, logger,
};

struct Host {
    transport: SocketTransport,
    prefix: ChannelPrefix,
}

impl Host {
    /// Events for whoever sent the current request, or every listener when
    /// the caller is unknown.
    fn reply_events(&self) -> ClientEventsEmitter {
        let proxy = match caller_session() {
            Some(session) => EventsProxy::new(
                Arc::new(self.transport.session(session)),
                self.prefix.clone(),
            ),
            None => EventsProxy::new(Arc::new(self.transport.clone()), self.prefix.clone()),
        };
        ClientEventsEmitter::new(proxy)
    }
}

#[async_trait]
impl HostMethods for Host {
    async fn ping(&self, text: String) -> Result<String, HandlerError> {
        log::info!("ping({text})");
        self.reply_events().on_something("Hello from Main".to_string());
        Ok(format!("pong: {text}"))
    }

    async fn add(&self, param: Param) -> Result<Sum, HandlerError> {
        param
            .a
            .checked_add(param.b)
            .map(|sum| Sum { sum })
            .ok_or_else(|| HandlerError::new("overflow"))
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    logger::setup_logger();
    let config = ProxyConfig::from_env();

    let transport = SocketTransport::connect().await?;
    let host = Host {
        transport: transport.clone(),
        prefix: config.prefix.clone(),
    };

    let host = HostMethodsDispatch::new(Arc::new(host)).into_shared();
    let channels = bind_methods(&transport, Some(host), &config.prefix)
        .await
        .map_err(std::io::Error::other)?;
    log::info!("Serving {channels:?}. Press ctrl+c to exit.");

    tokio::signal::ctrl_c().await?;
    transport.close().await;
    Ok(())
}
