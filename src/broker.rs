use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::{Mutex, mpsc};

use crate::config::BrokerConfig;
use crate::rpc::{
    CallId, ClientId, ErrorCode, Packet, RpcRequest, RpcResponse, read_packet, write_packet,
};

/// Shared broker state
type ClientSender = mpsc::UnboundedSender<ClientMsg>;
type SharedClients = Arc<Mutex<HashMap<ClientId, ClientSender>>>;
type SharedHandlers = Arc<Mutex<HashMap<String, ClientId>>>;
type SharedListeners = Arc<Mutex<HashMap<String, HashSet<ClientId>>>>;
type SharedCalls = Arc<Mutex<HashMap<CallId, PendingCall>>>;

/// Message to a client actor
#[derive(Debug)]
enum ClientMsg {
    Outgoing(Vec<u8>),
}

/// A forwarded call waiting for its handler's answer.
#[derive(Debug, Clone)]
struct PendingCall {
    caller: ClientId,
    worker: ClientId,
    channel: String,
}

/// Trait alias for supported stream types
trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// Actor that owns a client connection
struct ClientActor<S> {
    client_id: ClientId,
    stream: S,
    rx: mpsc::UnboundedReceiver<ClientMsg>,
    state: ServerState,
}

impl<S> ClientActor<S>
where
    S: Stream + 'static,
{
    async fn run(self) {
        let (reader, mut writer) = tokio::io::split(self.stream);
        let client_id = self.client_id;
        let state = self.state;
        let mut rx = self.rx;
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        // Spawn reader
        let reader_task = tokio::spawn({
            let client_id = client_id.clone();
            let state = state.clone();
            async move {
                Self::reader_loop(reader, client_id, state).await;
                let _ = shutdown_tx.send(()); // notify writer
            }
        });

        // Writer loop (with shutdown reaction)
        Self::writer_loop(&mut writer, client_id.clone(), &mut rx, shutdown_rx).await;

        let _ = reader_task.await;

        state.cleanup_client(&client_id).await;

        log::debug!("Actor ended for {client_id:?}");
    }

    async fn reader_loop<R>(mut reader: R, client_id: ClientId, state: ServerState)
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let buf = match read_packet(&mut reader).await {
                Ok(buf) => buf,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::info!("Client {client_id:?} disconnected");
                    break;
                }
                Err(e) => {
                    log::error!("Read error {client_id:?}: {e:?}");
                    break;
                }
            };

            match serde_json::from_slice::<Packet>(&buf) {
                Ok(Packet::Request(req)) => {
                    log::trace!("Request from {client_id:?}: {req:?}");
                    state.handle_request(req, &client_id).await;
                }
                Ok(Packet::Response(resp)) => {
                    log::trace!("Response from {client_id:?}: {resp:?}");
                    state.handle_response(resp, &client_id).await;
                }
                Err(e) => log::error!("Invalid packet from {client_id:?}: {e}"),
            }
        }
    }

    async fn writer_loop<W>(
        writer: &mut W,
        client_id: ClientId,
        rx: &mut mpsc::UnboundedReceiver<ClientMsg>,
        mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    ) where
        W: AsyncWrite + Unpin,
    {
        tokio::select! {
            _ = &mut shutdown_rx => {
                log::debug!("Shutdown signal received by writer for {client_id:?}");
            }
            _ = async {
                while let Some(msg) = rx.recv().await {
                    match msg {
                        ClientMsg::Outgoing(bytes) => {
                            if let Err(e) = write_packet(writer, &bytes).await {
                                log::error!("Write error {client_id:?}: {e:?}");
                                break;
                            }
                        }
                    }
                }
            } => {}
        }
    }
}

#[derive(Clone, Default)]
struct ServerState {
    handlers: SharedHandlers,
    clients: SharedClients,
    listeners: SharedListeners,
    calls: SharedCalls,
}

impl ServerState {
    /// Dispatch logic for RpcRequest
    async fn handle_request(&self, req: RpcRequest, client_id: &ClientId) {
        match req {
            RpcRequest::Handle { channel } => {
                self.handle_register(channel, client_id).await;
            }

            RpcRequest::Listen { channel } => {
                self.handle_listen(channel, client_id).await;
            }

            RpcRequest::Unhandle { channel } => {
                self.handle_unregister(channel, client_id).await;
            }

            RpcRequest::Invoke {
                call_id,
                channel,
                args,
                ..
            } => {
                self.handle_invoke(call_id, channel, args, client_id).await;
            }

            RpcRequest::Send {
                channel,
                args,
                target,
            } => {
                self.handle_send(channel, args, target).await;
            }
        }
    }

    /// Dispatch logic for RpcResponse
    async fn handle_response(&self, resp: RpcResponse, from: &ClientId) {
        match &resp {
            RpcResponse::Result { call_id, .. }
            | RpcResponse::Error {
                call_id: Some(call_id),
                ..
            } => {
                let pending = {
                    let mut calls = self.calls.lock().await;
                    let worker = calls.get(call_id).map(|p| p.worker.clone());
                    match worker {
                        Some(worker) if worker == *from => calls.remove(call_id),
                        Some(_) => {
                            log::warn!("{from:?} answered call {call_id:?} it was not given");
                            None
                        }
                        None => {
                            log::warn!("No caller found for call_id {call_id:?}");
                            None
                        }
                    }
                };
                if let Some(pending) = pending {
                    log::debug!(
                        "Forwarding response for {} ({call_id:?}) to {:?}",
                        pending.channel,
                        pending.caller
                    );
                    Self::send_to_client(&self.clients, &pending.caller, &resp).await;
                }
            }
            _ => {
                log::warn!("Unhandled response from {from:?}: {resp:?}");
            }
        }
    }

    async fn handle_register(&self, channel: String, client_id: &ClientId) {
        let owner = {
            let mut handlers = self.handlers.lock().await;
            match handlers.get(&channel) {
                Some(owner) => Some(owner.clone()),
                None => {
                    handlers.insert(channel.clone(), client_id.clone());
                    None
                }
            }
        };

        let resp = match owner {
            None => {
                log::info!("{client_id:?} handles '{channel}'");
                RpcResponse::Handling { channel }
            }
            Some(owner) => {
                log::warn!("{client_id:?} refused '{channel}', owned by {owner:?}");
                RpcResponse::Error {
                    call_id: None,
                    code: ErrorCode::ChannelInUse,
                    message: format!("channel '{channel}' already has a handler"),
                    channel,
                }
            }
        };
        Self::send_to_client(&self.clients, client_id, &resp).await;
    }

    async fn handle_unregister(&self, channel: String, client_id: &ClientId) {
        let mut handlers = self.handlers.lock().await;
        if handlers.get(&channel) == Some(client_id) {
            handlers.remove(&channel);
            log::info!("{client_id:?} released '{channel}'");
        } else {
            log::warn!("{client_id:?} released '{channel}' it does not own");
        }
    }

    async fn handle_listen(&self, channel: String, client_id: &ClientId) {
        log::info!("{client_id:?} listens on '{channel}'");
        self.listeners
            .lock()
            .await
            .entry(channel.clone())
            .or_default()
            .insert(client_id.clone());

        let resp = RpcResponse::Listening { channel };
        Self::send_to_client(&self.clients, client_id, &resp).await;
    }

    async fn handle_invoke(
        &self,
        call_id: CallId,
        channel: String,
        args: Vec<serde_json::Value>,
        client_id: &ClientId,
    ) {
        let worker_opt = { self.handlers.lock().await.get(&channel).cloned() };

        let Some(worker_id) = worker_opt else {
            let err = RpcResponse::Error {
                call_id: Some(call_id),
                code: ErrorCode::Unrouted,
                message: format!("no handler registered for '{channel}'"),
                channel,
            };
            Self::send_to_client(&self.clients, client_id, &err).await;
            return;
        };

        // Track caller for response routing
        self.calls.lock().await.insert(
            call_id.clone(),
            PendingCall {
                caller: client_id.clone(),
                worker: worker_id.clone(),
                channel: channel.clone(),
            },
        );

        log::debug!("Forwarding {channel} ({call_id:?}) to worker {worker_id:?}");
        let forwarded = RpcRequest::Invoke {
            call_id,
            channel,
            args,
            caller: Some(client_id.clone()),
        };
        Self::send_to_client(&self.clients, &worker_id, &forwarded).await;
    }

    async fn handle_send(
        &self,
        channel: String,
        args: Vec<serde_json::Value>,
        target: Option<ClientId>,
    ) {
        let targets = {
            let listeners = self.listeners.lock().await;
            let subscribers = listeners.get(&channel);
            match target {
                // Only a session that listens on the channel gets it
                Some(target) => subscribers
                    .filter(|s| s.contains(&target))
                    .map(|_| vec![target])
                    .unwrap_or_default(),
                None => subscribers
                    .map(|s| s.iter().cloned().collect::<Vec<_>>())
                    .unwrap_or_default(),
            }
        };

        if targets.is_empty() {
            log::debug!("No listener for '{channel}', event dropped");
            return;
        }

        let event = RpcResponse::Event {
            channel: channel.clone(),
            args,
        };
        let bytes = match serde_json::to_vec(&event) {
            Ok(b) => b,
            Err(e) => {
                log::error!("Failed to serialize event for {channel}: {e}");
                return;
            }
        };

        let clients = self.clients.lock().await;
        for target in targets {
            if let Some(tx) = clients.get(&target) {
                let _ = tx.send(ClientMsg::Outgoing(bytes.clone()));
            }
        }
    }

    async fn cleanup_client(&self, client_id: &ClientId) {
        log::debug!("Cleaning up client {client_id:?}");

        // Remove from clients map
        self.clients.lock().await.remove(client_id);

        // Release owned channels
        self.handlers
            .lock()
            .await
            .retain(|_, owner| owner != client_id);

        // Remove subscriptions
        for subscribers in self.listeners.lock().await.values_mut() {
            subscribers.remove(client_id);
        }

        // Drop calls it made, fail calls it was serving
        let orphaned = {
            let mut calls = self.calls.lock().await;
            let orphaned: Vec<(CallId, PendingCall)> = calls
                .iter()
                .filter(|(_, p)| p.worker == *client_id && p.caller != *client_id)
                .map(|(id, p)| (id.clone(), p.clone()))
                .collect();
            calls.retain(|_, p| p.caller != *client_id && p.worker != *client_id);
            orphaned
        };

        for (call_id, pending) in orphaned {
            let err = RpcResponse::Error {
                call_id: Some(call_id),
                code: ErrorCode::Unrouted,
                message: format!("handler for '{}' disconnected", pending.channel),
                channel: pending.channel,
            };
            Self::send_to_client(&self.clients, &pending.caller, &err).await;
        }
    }

    async fn send_to_client<T: serde::Serialize>(
        clients: &SharedClients,
        client_id: &ClientId,
        msg: &T,
    ) {
        let bytes = match serde_json::to_vec(msg) {
            Ok(b) => b,
            Err(e) => {
                log::error!("Failed to serialize message for {client_id:?}: {e}");
                return; // skip this send but keep the broker running
            }
        };
        let clients_guard = clients.lock().await;
        if let Some(tx) = clients_guard.get(client_id) {
            let _ = tx.send(ClientMsg::Outgoing(bytes));
        }
    }
}

/// Addresses the broker actually bound.
#[derive(Debug, Clone, Default)]
pub struct BrokerAddrs {
    pub tcp: Option<SocketAddr>,
    #[cfg(unix)]
    pub unix: Option<PathBuf>,
}

fn start_tcp_listener(tcp_listener: TcpListener, state: ServerState) {
    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, _)) => spawn_client(stream, state.clone()),
                Err(e) => log::error!("TCP accept error: {e:?}"),
            }
        }
    });
}

#[cfg(unix)]
fn start_unix_listener(unix_listener: UnixListener, state: ServerState) {
    tokio::spawn(async move {
        loop {
            match unix_listener.accept().await {
                Ok((stream, _)) => spawn_client(stream, state.clone()),
                Err(e) => log::error!("Unix accept error: {e:?}"),
            }
        }
    });
}

fn spawn_client<S>(stream: S, state: ServerState)
where
    S: Stream + 'static,
{
    let client_id = ClientId::new();
    log::info!("New connection: {client_id:?}");

    let (tx, rx) = mpsc::unbounded_channel::<ClientMsg>();
    tokio::spawn(async move {
        state.clients.lock().await.insert(client_id.clone(), tx);
        let actor = ClientActor {
            client_id,
            stream,
            rx,
            state,
        };
        actor.run().await;
    });
}

/// Bind the listeners named in `config` and start accepting connections in
/// the background.
pub async fn start_broker(config: &BrokerConfig) -> std::io::Result<BrokerAddrs> {
    let state = ServerState::default();
    let mut addrs = BrokerAddrs::default();

    if let Some(addr) = &config.tcp_addr {
        let tcp_listener = TcpListener::bind(addr.as_str()).await?;
        let local = tcp_listener.local_addr()?;
        log::info!("Broker listening on TCP {local}");
        start_tcp_listener(tcp_listener, state.clone());
        addrs.tcp = Some(local);
    }

    #[cfg(unix)]
    if let Some(path) = &config.unix_path {
        let _ = std::fs::remove_file(path); // cleanup old
        let unix_listener = UnixListener::bind(path)?;
        log::info!("Broker listening on {}", path.display());
        start_unix_listener(unix_listener, state.clone());
        addrs.unix = Some(path.clone());
    }

    Ok(addrs)
}

pub async fn run_broker() -> std::io::Result<()> {
    let config = BrokerConfig::from_env();
    start_broker(&config).await?;

    // Wait for shutdown
    tokio::signal::ctrl_c().await?;
    log::info!("Broker shutting down...");
    Ok(())
}
