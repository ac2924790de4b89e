#[allow(dead_code)]
mod common;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use common::{ClientEvents, ClientEventsDispatch, HostMethodsClient, Param};
use ipc_proxy::{
    Bridge, Capability, HandlerError, ProxyConfig, SocketTransport, bind_events, logger,
};
use tokio::sync::mpsc;

struct Renderer {
    seen: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl ClientEvents for Renderer {
    async fn on_something(&self, message: String) -> Result<(), HandlerError> {
        log::info!("on_something({message})");
        let _ = self.seen.send(message);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    logger::setup_logger();
    let config = ProxyConfig::from_env();

    // The client logic only ever sees the bridge
    let transport = Arc::new(SocketTransport::connect().await?);
    let bridge = Bridge::expose(transport.clone(), &[Capability::Invoke, Capability::Listen]);

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let renderer = ClientEventsDispatch::new(Arc::new(Renderer { seen: seen_tx })).into_shared();
    bind_events(&bridge, Some(renderer), &config.prefix)
        .await
        .map_err(std::io::Error::other)?;

    let host = HostMethodsClient::new(bridge.methods_proxy(&config));
    let reply = host.ping("test".to_string()).await.map_err(std::io::Error::other)?;
    println!("Client got response: {reply}");

    let sum = host
        .add(Param { a: 10, b: 32 })
        .await
        .map_err(std::io::Error::other)?;
    println!("Client got response: {}", sum.sum);

    match tokio::time::timeout(Duration::from_secs(2), seen_rx.recv()).await {
        Ok(Some(message)) => println!("Client got event: {message}"),
        _ => println!("No event received"),
    }

    transport.close().await;
    Ok(())
}
