use std::{
    collections::HashMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use serde_json::Value;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::{Mutex, mpsc, oneshot},
};

use crate::{
    args::Args,
    config::Endpoint,
    error::{IpcError, Result},
    rpc::{
        CallId, ClientId, ErrorCode, Packet, RpcRequest, RpcResponse, read_packet, write_packet,
    },
    transport::{Emit, Invoke, Listen, Listener, RequestHandler, Serve},
};

tokio::task_local! {
    static CALLER: ClientId;
}

/// Broker session of the peer whose request is being served.
///
/// Only set inside a request handler run by a [`SocketTransport`]; pass it to
/// [`SocketTransport::session`] to fire events back at that peer alone.
pub fn caller_session() -> Option<ClientId> {
    CALLER.try_with(ClientId::clone).ok()
}

/// Message to the connection writer
#[derive(Debug)]
enum WriterMsg {
    Packet(Vec<u8>),
    Close(oneshot::Sender<()>),
}

type Ack = oneshot::Sender<Result<()>>;

struct Shared {
    tx: mpsc::UnboundedSender<WriterMsg>,
    closed: AtomicBool,
    calls: Mutex<HashMap<CallId, oneshot::Sender<Result<Value>>>>,
    handle_acks: Mutex<HashMap<String, Ack>>,
    listen_acks: Mutex<HashMap<String, Vec<Ack>>>,
    handlers: Mutex<HashMap<String, RequestHandler>>,
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
}

impl Shared {
    fn post<T: serde::Serialize>(&self, msg: &T) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(IpcError::Disconnected);
        }
        let bytes = serde_json::to_vec(msg)?;
        self.tx
            .send(WriterMsg::Packet(bytes))
            .map_err(|_| IpcError::Disconnected)
    }

    fn send_event(&self, channel: &str, args: Args, target: Option<ClientId>) {
        let req = RpcRequest::Send {
            channel: channel.to_string(),
            args,
            target,
        };
        if let Err(e) = self.post(&req) {
            log::warn!("Dropping message on '{channel}': {e}");
        }
    }

    /// Fail everything still waiting on the broker.
    async fn fail_pending(&self) {
        self.closed.store(true, Ordering::SeqCst);

        for (_, tx) in self.calls.lock().await.drain() {
            let _ = tx.send(Err(IpcError::Disconnected));
        }
        for (_, tx) in self.handle_acks.lock().await.drain() {
            let _ = tx.send(Err(IpcError::Disconnected));
        }
        for (_, acks) in self.listen_acks.lock().await.drain() {
            for tx in acks {
                let _ = tx.send(Err(IpcError::Disconnected));
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, packet: Packet) {
        match packet {
            Packet::Request(RpcRequest::Invoke {
                call_id,
                channel,
                args,
                caller,
            }) => {
                let handler = self.handlers.lock().await.get(&channel).cloned();
                let shared = Arc::downgrade(self);
                tokio::spawn(async move {
                    let resp = match handler {
                        Some(handler) => {
                            let served = match caller {
                                Some(caller) => CALLER.scope(caller, handler(args)).await,
                                None => handler(args).await,
                            };
                            match served {
                                Ok(value) => RpcResponse::Result { call_id, value },
                                Err(e) => RpcResponse::Error {
                                    call_id: Some(call_id),
                                    code: ErrorCode::Remote,
                                    channel,
                                    message: e.message().to_string(),
                                },
                            }
                        }
                        None => RpcResponse::Error {
                            call_id: Some(call_id),
                            code: ErrorCode::Unrouted,
                            message: format!("no local handler for '{channel}'"),
                            channel,
                        },
                    };
                    let Some(shared) = shared.upgrade() else {
                        return;
                    };
                    if let Err(e) = shared.post(&resp) {
                        log::warn!("Could not answer call: {e}");
                    }
                });
            }

            Packet::Request(other) => {
                log::warn!("Ignoring unexpected request from broker: {other:?}");
            }

            Packet::Response(RpcResponse::Result { call_id, value }) => {
                match self.calls.lock().await.remove(&call_id) {
                    Some(tx) => {
                        let _ = tx.send(Ok(value));
                    }
                    None => log::warn!("Result for unknown call {call_id:?}"),
                }
            }

            Packet::Response(RpcResponse::Error {
                call_id: Some(call_id),
                code,
                channel,
                message,
            }) => match self.calls.lock().await.remove(&call_id) {
                Some(tx) => {
                    let _ = tx.send(Err(code.into_error(channel, message)));
                }
                None => log::warn!("Error for unknown call {call_id:?}: {message}"),
            },

            Packet::Response(RpcResponse::Error {
                call_id: None,
                code,
                channel,
                message,
            }) => {
                let ack = self.handle_acks.lock().await.remove(&channel);
                match ack {
                    Some(tx) => {
                        let _ = tx.send(Err(code.into_error(channel, message)));
                    }
                    None => log::error!("Broker error on '{channel}': {message}"),
                }
            }

            Packet::Response(RpcResponse::Handling { channel }) => {
                if let Some(tx) = self.handle_acks.lock().await.remove(&channel) {
                    let _ = tx.send(Ok(()));
                }
            }

            Packet::Response(RpcResponse::Listening { channel }) => {
                if let Some(acks) = self.listen_acks.lock().await.remove(&channel) {
                    for tx in acks {
                        let _ = tx.send(Ok(()));
                    }
                }
            }

            Packet::Response(RpcResponse::Event { channel, args }) => {
                let listeners = self
                    .listeners
                    .lock()
                    .await
                    .get(&channel)
                    .cloned()
                    .unwrap_or_default();
                if listeners.is_empty() {
                    log::debug!("Event on '{channel}' with no local listener");
                }
                for listener in listeners {
                    tokio::spawn(listener(args.clone()));
                }
            }
        }
    }
}

/// A transport backed by a broker connection.
///
/// Cloning is cheap; all clones share one connection. The connection is
/// closed once every clone is dropped or [`SocketTransport::close`] is called.
#[derive(Clone)]
pub struct SocketTransport {
    shared: Arc<Shared>,
}

impl SocketTransport {
    /// Connect to the broker named by the environment.
    pub async fn connect() -> std::io::Result<Self> {
        Self::connect_to(&Endpoint::from_env()).await
    }

    pub async fn connect_to(endpoint: &Endpoint) -> std::io::Result<Self> {
        let transport = match endpoint {
            Endpoint::Tcp(addr) => {
                let tcp = TcpStream::connect(addr.as_str()).await?;
                Self::from_stream(tcp)
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let unix = UnixStream::connect(path).await?;
                Self::from_stream(unix)
            }
        };
        log::info!("Connected to broker at {endpoint}");
        Ok(transport)
    }

    /// Run the protocol over an already connected stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel::<WriterMsg>();

        let shared = Arc::new(Shared {
            tx,
            closed: AtomicBool::new(false),
            calls: Mutex::default(),
            handle_acks: Mutex::default(),
            listen_acks: Mutex::default(),
            handlers: Mutex::default(),
            listeners: Mutex::default(),
        });

        tokio::spawn(Self::writer_loop(writer, rx));
        tokio::spawn(Self::reader_loop(reader, Arc::downgrade(&shared)));

        Self { shared }
    }

    /// Flush queued messages and shut the connection down. Pending calls
    /// fail with [`IpcError::Disconnected`] once the broker has let go.
    pub async fn close(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.shared.tx.send(WriterMsg::Close(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Emitter whose messages reach only the session `target`, provided it
    /// listens on the channel.
    pub fn session(&self, target: ClientId) -> SessionEmitter {
        SessionEmitter {
            shared: self.shared.clone(),
            target,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    async fn writer_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<WriterMsg>)
    where
        W: AsyncWrite + Unpin,
    {
        let mut done = None;
        while let Some(msg) = rx.recv().await {
            match msg {
                WriterMsg::Packet(bytes) => {
                    if let Err(e) = write_packet(&mut writer, &bytes).await {
                        log::error!("Write to broker failed: {e:?}");
                        break;
                    }
                }
                WriterMsg::Close(tx) => {
                    done = Some(tx);
                    break;
                }
            }
        }
        let _ = writer.shutdown().await;
        log::debug!("Broker writer ended");
        if let Some(tx) = done {
            let _ = tx.send(());
        }
    }

    async fn reader_loop<R>(mut reader: R, shared: Weak<Shared>)
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let buf = match read_packet(&mut reader).await {
                Ok(buf) => buf,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::info!("Broker closed the connection");
                    break;
                }
                Err(e) => {
                    log::error!("Read from broker failed: {e:?}");
                    break;
                }
            };

            let Some(state) = shared.upgrade() else {
                break;
            };
            match serde_json::from_slice::<Packet>(&buf) {
                Ok(packet) => state.dispatch(packet).await,
                Err(e) => log::error!("Invalid packet from broker: {e}"),
            }
        }

        if let Some(shared) = shared.upgrade() {
            shared.fail_pending().await;
        }
    }
}

#[async_trait]
impl Serve for SocketTransport {
    async fn handle(&self, channel: &str, handler: RequestHandler) -> Result<()> {
        {
            let mut handlers = self.shared.handlers.lock().await;
            if handlers.contains_key(channel) {
                return Err(IpcError::ChannelInUse(channel.to_string()));
            }
            handlers.insert(channel.to_string(), handler);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.shared
            .handle_acks
            .lock()
            .await
            .insert(channel.to_string(), ack_tx);

        let registered = match self.shared.post(&RpcRequest::Handle {
            channel: channel.to_string(),
        }) {
            Ok(()) => ack_rx.await.unwrap_or(Err(IpcError::Disconnected)),
            Err(e) => {
                self.shared.handle_acks.lock().await.remove(channel);
                Err(e)
            }
        };

        if registered.is_err() {
            self.shared.handlers.lock().await.remove(channel);
        }
        registered
    }

    async fn unhandle(&self, channel: &str) -> Result<()> {
        if self.shared.handlers.lock().await.remove(channel).is_none() {
            return Ok(());
        }
        self.shared.post(&RpcRequest::Unhandle {
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl Invoke for SocketTransport {
    async fn invoke(&self, channel: &str, args: Args) -> Result<Value> {
        let call_id = CallId::new();
        let (resp_tx, resp_rx) = oneshot::channel();
        {
            let mut calls = self.shared.calls.lock().await;
            if self.is_closed() {
                return Err(IpcError::Disconnected);
            }
            calls.insert(call_id.clone(), resp_tx);
        }

        let req = RpcRequest::Invoke {
            call_id: call_id.clone(),
            channel: channel.to_string(),
            args,
            caller: None,
        };
        if let Err(e) = self.shared.post(&req) {
            self.shared.calls.lock().await.remove(&call_id);
            return Err(e);
        }

        resp_rx.await.unwrap_or(Err(IpcError::Disconnected))
    }
}

impl Emit for SocketTransport {
    fn send(&self, channel: &str, args: Args) {
        self.shared.send_event(channel, args, None);
    }
}

/// One-way sender bound to a single broker session, see
/// [`SocketTransport::session`].
#[derive(Clone)]
pub struct SessionEmitter {
    shared: Arc<Shared>,
    target: ClientId,
}

impl SessionEmitter {
    pub fn target(&self) -> &ClientId {
        &self.target
    }
}

impl Emit for SessionEmitter {
    fn send(&self, channel: &str, args: Args) {
        self.shared.send_event(channel, args, Some(self.target.clone()));
    }
}

#[async_trait]
impl Listen for SocketTransport {
    async fn listen(&self, channel: &str, listener: Listener) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let first = {
            let mut listeners = self.shared.listeners.lock().await;
            let entry = listeners.entry(channel.to_string()).or_default();
            entry.push(listener);
            let first = entry.len() == 1;

            // Later listeners wait on the registration still in flight
            let mut acks = self.shared.listen_acks.lock().await;
            if !first && !acks.contains_key(channel) {
                return Ok(());
            }
            acks.entry(channel.to_string()).or_default().push(ack_tx);
            first
        };
        if !first {
            return ack_rx.await.unwrap_or(Err(IpcError::Disconnected));
        }

        if let Err(e) = self.shared.post(&RpcRequest::Listen {
            channel: channel.to_string(),
        }) {
            self.shared.listen_acks.lock().await.remove(channel);
            self.shared.listeners.lock().await.remove(channel);
            return Err(e);
        }
        ack_rx.await.unwrap_or(Err(IpcError::Disconnected))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::io::DuplexStream;

    use super::*;
    use crate::{
        error::HandlerError,
        transport::{listener, request_handler},
    };

    async fn next_packet(broker: &mut DuplexStream) -> Packet {
        let buf = read_packet(broker).await.unwrap();
        serde_json::from_slice(&buf).unwrap()
    }

    async fn reply(broker: &mut DuplexStream, resp: RpcResponse) {
        let bytes = serde_json::to_vec(&resp).unwrap();
        write_packet(broker, &bytes).await.unwrap();
    }

    #[tokio::test]
    async fn invoke_waits_for_matching_result() {
        let (local, mut broker) = tokio::io::duplex(4096);
        let transport = SocketTransport::from_stream(local);

        let call = tokio::spawn({
            let transport = transport.clone();
            async move { transport.invoke("ipc:ping", vec![json!("test")]).await }
        });

        let Packet::Request(RpcRequest::Invoke { call_id, channel, args, .. }) =
            next_packet(&mut broker).await
        else {
            panic!("expected an invoke");
        };
        assert_eq!(channel, "ipc:ping");
        assert_eq!(args, vec![json!("test")]);

        reply(
            &mut broker,
            RpcResponse::Result {
                call_id,
                value: json!("pong: test"),
            },
        )
        .await;
        assert_eq!(call.await.unwrap().unwrap(), json!("pong: test"));
    }

    #[tokio::test]
    async fn forwarded_invoke_runs_local_handler() {
        let (local, mut broker) = tokio::io::duplex(4096);
        let transport = SocketTransport::from_stream(local);

        let handle = tokio::spawn({
            let transport = transport.clone();
            async move {
                transport
                    .handle(
                        "ipc:fail",
                        request_handler(|_| async { Err::<Value, _>(HandlerError::new("nope")) }),
                    )
                    .await
            }
        });
        assert!(matches!(
            next_packet(&mut broker).await,
            Packet::Request(RpcRequest::Handle { .. })
        ));
        reply(
            &mut broker,
            RpcResponse::Handling {
                channel: "ipc:fail".into(),
            },
        )
        .await;
        handle.await.unwrap().unwrap();

        let invoke = RpcRequest::Invoke {
            call_id: CallId("7".into()),
            channel: "ipc:fail".into(),
            args: vec![],
            caller: None,
        };
        write_packet(&mut broker, &serde_json::to_vec(&invoke).unwrap())
            .await
            .unwrap();

        match next_packet(&mut broker).await {
            Packet::Response(RpcResponse::Error {
                call_id,
                code,
                message,
                ..
            }) => {
                assert_eq!(call_id, Some(CallId("7".into())));
                assert_eq!(code, ErrorCode::Remote);
                assert_eq!(message, "nope");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn refused_registration_is_rolled_back() {
        let (local, mut broker) = tokio::io::duplex(4096);
        let transport = SocketTransport::from_stream(local);

        let handle = tokio::spawn({
            let transport = transport.clone();
            async move {
                transport
                    .handle(
                        "ipc:ping",
                        request_handler(|_| async { Ok::<_, HandlerError>(Value::Null) }),
                    )
                    .await
            }
        });
        next_packet(&mut broker).await;
        reply(
            &mut broker,
            RpcResponse::Error {
                call_id: None,
                code: ErrorCode::ChannelInUse,
                channel: "ipc:ping".into(),
                message: "taken".into(),
            },
        )
        .await;

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, IpcError::ChannelInUse(ref c) if c == "ipc:ping"));
        assert!(!transport.shared.handlers.lock().await.contains_key("ipc:ping"));
    }

    #[tokio::test]
    async fn pending_calls_fail_when_broker_goes_away() {
        let (local, mut broker) = tokio::io::duplex(4096);
        let transport = SocketTransport::from_stream(local);

        let call = tokio::spawn({
            let transport = transport.clone();
            async move { transport.invoke("ipc:ping", vec![]).await }
        });
        next_packet(&mut broker).await;
        drop(broker);

        assert!(matches!(
            call.await.unwrap().unwrap_err(),
            IpcError::Disconnected
        ));
        assert!(transport.is_closed());
        assert!(matches!(
            transport.invoke("ipc:ping", vec![]).await.unwrap_err(),
            IpcError::Disconnected
        ));
    }

    #[tokio::test]
    async fn later_listeners_wait_for_the_pending_ack() {
        let (local, mut broker) = tokio::io::duplex(4096);
        let transport = SocketTransport::from_stream(local);
        let quiet = || listener(|_| async {});

        let first = tokio::spawn({
            let (transport, listener) = (transport.clone(), quiet());
            async move { transport.listen("ipc:on_something", listener).await }
        });
        assert!(matches!(
            next_packet(&mut broker).await,
            Packet::Request(RpcRequest::Listen { .. })
        ));

        let second = tokio::spawn({
            let (transport, listener) = (transport.clone(), quiet());
            async move { transport.listen("ipc:on_something", listener).await }
        });
        loop {
            let waiting = transport
                .shared
                .listen_acks
                .lock()
                .await
                .get("ipc:on_something")
                .map_or(0, Vec::len);
            if waiting == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!second.is_finished());

        reply(
            &mut broker,
            RpcResponse::Listening {
                channel: "ipc:on_something".into(),
            },
        )
        .await;
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        // Only one registration reached the broker
        assert!(
            tokio::time::timeout(Duration::from_millis(100), next_packet(&mut broker))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn handlers_see_the_calling_session() {
        let (local, mut broker) = tokio::io::duplex(4096);
        let transport = SocketTransport::from_stream(local);
        assert_eq!(caller_session(), None);

        let handle = tokio::spawn({
            let transport = transport.clone();
            async move {
                transport
                    .handle(
                        "ipc:whoami",
                        request_handler(|_| async {
                            let caller = caller_session().map(|id| id.0);
                            Ok::<_, HandlerError>(json!(caller))
                        }),
                    )
                    .await
            }
        });
        next_packet(&mut broker).await;
        reply(
            &mut broker,
            RpcResponse::Handling {
                channel: "ipc:whoami".into(),
            },
        )
        .await;
        handle.await.unwrap().unwrap();

        let invoke = RpcRequest::Invoke {
            call_id: CallId("1".into()),
            channel: "ipc:whoami".into(),
            args: vec![],
            caller: Some(ClientId("renderer-1".into())),
        };
        write_packet(&mut broker, &serde_json::to_vec(&invoke).unwrap())
            .await
            .unwrap();
        match next_packet(&mut broker).await {
            Packet::Response(RpcResponse::Result { value, .. }) => {
                assert_eq!(value, json!("renderer-1"));
            }
            other => panic!("unexpected {other:?}"),
        }

        transport
            .session(ClientId("renderer-1".into()))
            .send("ipc:on_something", vec![json!("hi")]);
        match next_packet(&mut broker).await {
            Packet::Request(RpcRequest::Send { channel, target, .. }) => {
                assert_eq!(channel, "ipc:on_something");
                assert_eq!(target, Some(ClientId("renderer-1".into())));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unhandle_releases_the_channel() {
        let (local, mut broker) = tokio::io::duplex(4096);
        let transport = SocketTransport::from_stream(local);

        // Nothing to release, nothing sent
        transport.unhandle("ipc:ping").await.unwrap();

        let handle = tokio::spawn({
            let transport = transport.clone();
            async move {
                transport
                    .handle(
                        "ipc:ping",
                        request_handler(|_| async { Ok::<_, HandlerError>(Value::Null) }),
                    )
                    .await
            }
        });
        next_packet(&mut broker).await;
        reply(
            &mut broker,
            RpcResponse::Handling {
                channel: "ipc:ping".into(),
            },
        )
        .await;
        handle.await.unwrap().unwrap();

        transport.unhandle("ipc:ping").await.unwrap();
        assert!(matches!(
            next_packet(&mut broker).await,
            Packet::Request(RpcRequest::Unhandle { ref channel }) if channel == "ipc:ping"
        ));
        assert!(!transport.shared.handlers.lock().await.contains_key("ipc:ping"));
    }
}
