//! Wiring handler instances to inbound channel traffic.

use std::sync::Arc;

use crate::{
    channel::ChannelPrefix,
    contract::{SharedObject, operation_names},
    error::{IpcError, Result},
    transport::{Listen, Serve, listener, request_handler},
};

fn require(
    object: Option<Arc<dyn SharedObject>>,
) -> Result<(Arc<dyn SharedObject>, Vec<String>)> {
    let object = object.ok_or_else(|| IpcError::InvalidContract("no instance given".into()))?;
    let names = operation_names(Some(object.as_ref()))?;
    Ok((object, names))
}

/// Serve every operation of a methods contract on `server`.
///
/// Each operation answers requests on `prefix:operation`; the handler's
/// result, or its failure, travels back through the transport's response
/// path. Requests are served concurrently and in no particular order.
///
/// The contract is checked before anything is registered, so an invalid
/// instance leaves the transport untouched. A registration refused part way
/// through releases the channels bound so far. Returns the bound channels.
///
/// # Errors
///
/// [`IpcError::InvalidContract`] for a missing or empty instance, and
/// [`IpcError::ChannelInUse`] when an operation's channel is already served.
pub async fn bind_methods<S>(
    server: &S,
    object: Option<Arc<dyn SharedObject>>,
    prefix: &ChannelPrefix,
) -> Result<Vec<String>>
where
    S: Serve + ?Sized,
{
    let (object, names) = require(object)?;

    let mut bound = Vec::with_capacity(names.len());
    for operation in names {
        let channel = prefix.channel(&operation);
        let handler = {
            let object = object.clone();
            let channel = channel.clone();
            request_handler(move |args| {
                let object = object.clone();
                let operation = operation.clone();
                let channel = channel.clone();
                async move {
                    log::debug!("Handling {channel} with {} argument(s)", args.len());
                    let result = object.call(&operation, args).await;
                    if let Err(e) = &result {
                        log::warn!("Handler for '{channel}' failed: {e}");
                    }
                    result
                }
            })
        };
        if let Err(e) = server.handle(&channel, handler).await {
            release(server, &bound).await;
            return Err(e);
        }
        bound.push(channel);
    }

    log::info!("Bound {} method(s) under prefix '{prefix}'", bound.len());
    Ok(bound)
}

async fn release<S>(server: &S, channels: &[String])
where
    S: Serve + ?Sized,
{
    for channel in channels {
        if let Err(e) = server.unhandle(channel).await {
            log::warn!("Could not release '{channel}': {e}");
        }
    }
}

/// Run the operations of an events contract whenever the matching channel
/// fires on `listen`.
///
/// Nothing is returned to the sender; a failing handler is only logged here.
pub async fn bind_events<L>(
    listen: &L,
    object: Option<Arc<dyn SharedObject>>,
    prefix: &ChannelPrefix,
) -> Result<Vec<String>>
where
    L: Listen + ?Sized,
{
    let (object, names) = require(object)?;

    let mut bound = Vec::with_capacity(names.len());
    for operation in names {
        let channel = prefix.channel(&operation);
        let on_event = {
            let object = object.clone();
            let channel = channel.clone();
            listener(move |args| {
                let object = object.clone();
                let operation = operation.clone();
                let channel = channel.clone();
                async move {
                    log::debug!("Event {channel} with {} argument(s)", args.len());
                    if let Err(e) = object.call(&operation, args).await {
                        log::error!("Event handler for '{channel}' failed: {e}");
                    }
                }
            })
        };
        listen.listen(&channel, on_event).await?;
        bound.push(channel);
    }

    log::info!("Bound {} event(s) under prefix '{prefix}'", bound.len());
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        config::ProxyConfig,
        error::HandlerError,
        memory::MemoryTransport,
        proxy::{EventsProxy, MethodsProxy},
    };

    crate::methods_contract! {
        trait MethodsContract {
            fn ping(&self, text: String) -> String;
            fn fail(&self) -> ();
        }
        dispatch = MethodsDispatch;
        client = MethodsClient;
    }

    crate::events_contract! {
        trait EventsContract {
            fn on_something(&self, text: String);
        }
        dispatch = EventsDispatch;
        emitter = EventsEmitter;
    }

    crate::methods_contract! {
        trait FooContract {
            fn foo(&self) -> String;
        }
        dispatch = FooDispatch;
        client = FooClient;
    }

    struct Methods;

    #[async_trait]
    impl MethodsContract for Methods {
        async fn ping(&self, text: String) -> std::result::Result<String, HandlerError> {
            Ok(format!("pong: {text}"))
        }

        async fn fail(&self) -> std::result::Result<(), HandlerError> {
            Err(HandlerError::new("disk on fire"))
        }
    }

    struct EventHandler {
        received: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl EventsContract for EventHandler {
        async fn on_something(&self, text: String) -> std::result::Result<(), HandlerError> {
            let _ = self.received.send(text);
            Ok(())
        }
    }

    crate::methods_contract! {
        trait LeftContract {
            fn a(&self) -> String;
            fn b(&self) -> String;
        }
        dispatch = LeftDispatch;
        client = LeftClient;
    }

    crate::methods_contract! {
        trait RightContract {
            fn c(&self) -> String;
            fn b(&self) -> String;
        }
        dispatch = RightDispatch;
        client = RightClient;
    }

    struct Left;

    #[async_trait]
    impl LeftContract for Left {
        async fn a(&self) -> std::result::Result<String, HandlerError> {
            Ok("left a".into())
        }

        async fn b(&self) -> std::result::Result<String, HandlerError> {
            Ok("left b".into())
        }
    }

    struct Right;

    #[async_trait]
    impl RightContract for Right {
        async fn c(&self) -> std::result::Result<String, HandlerError> {
            Ok("right c".into())
        }

        async fn b(&self) -> std::result::Result<String, HandlerError> {
            Ok("right b".into())
        }
    }

    struct Foo(&'static str);

    #[async_trait]
    impl FooContract for Foo {
        async fn foo(&self) -> std::result::Result<String, HandlerError> {
            Ok(self.0.to_string())
        }
    }

    fn methods() -> Option<Arc<dyn SharedObject>> {
        Some(MethodsDispatch::new(Arc::new(Methods)).into_shared())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ping_round_trip() {
        let transport = Arc::new(MemoryTransport::new());
        let channels = bind_methods(&transport, methods(), &ChannelPrefix::default())
            .await
            .unwrap();
        assert_eq!(channels, vec!["ipc:ping", "ipc:fail"]);

        let client = MethodsClient::new(MethodsProxy::new(transport, &ProxyConfig::default()));
        assert_eq!(client.ping("test".into()).await.unwrap(), "pong: test");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn handler_failure_reaches_the_caller() {
        let transport = Arc::new(MemoryTransport::new());
        bind_methods(&transport, methods(), &ChannelPrefix::default())
            .await
            .unwrap();

        let client = MethodsClient::new(MethodsProxy::new(transport, &ProxyConfig::default()));
        match client.fail().await {
            Err(IpcError::RemoteInvocation { channel, message }) => {
                assert_eq!(channel, "ipc:fail");
                assert_eq!(message, "disk on fire");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn events_reach_the_client_handler_once() {
        let transport = Arc::new(MemoryTransport::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = EventsDispatch::new(Arc::new(EventHandler { received: tx }));
        bind_events(&transport, Some(handler.into_shared()), &ChannelPrefix::default())
            .await
            .unwrap();

        let emitter = EventsEmitter::new(EventsProxy::new(transport, ChannelPrefix::default()));
        emitter.on_something("Hello from Main".into());

        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(received.as_deref(), Some("Hello from Main"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_instance_registers_nothing() {
        let transport = MemoryTransport::new();
        let err = bind_methods(&transport, None, &ChannelPrefix::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::InvalidContract(_)));
        assert!(!transport.has_handler("ipc:ping").await);

        let err = bind_events(&transport, None, &ChannelPrefix::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::InvalidContract(_)));
    }

    #[tokio::test]
    async fn binding_twice_keeps_the_first_handler() {
        let transport = Arc::new(MemoryTransport::new());
        let prefix = ChannelPrefix::new("ipc");
        let first = FooDispatch::new(Arc::new(Foo("first"))).into_shared();
        let second = FooDispatch::new(Arc::new(Foo("second"))).into_shared();

        bind_methods(&transport, Some(first), &prefix).await.unwrap();
        let err = bind_methods(&transport, Some(second), &prefix)
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::ChannelInUse(ref c) if c == "ipc:foo"));

        let client = FooClient::new(MethodsProxy::new(transport, &ProxyConfig::default()));
        assert_eq!(client.foo().await.unwrap(), "first");
    }

    #[tokio::test]
    async fn refused_bind_releases_channels_it_already_took() {
        let transport = Arc::new(MemoryTransport::new());
        let prefix = ChannelPrefix::default();

        bind_methods(
            &transport,
            Some(LeftDispatch::new(Arc::new(Left)).into_shared()),
            &prefix,
        )
        .await
        .unwrap();
        let err = bind_methods(
            &transport,
            Some(RightDispatch::new(Arc::new(Right)).into_shared()),
            &prefix,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IpcError::ChannelInUse(ref c) if c == "ipc:b"));

        assert!(!transport.has_handler("ipc:c").await);
        let right = RightClient::new(MethodsProxy::new(
            transport.clone(),
            &ProxyConfig::default(),
        ));
        assert!(matches!(
            right.c().await.unwrap_err(),
            IpcError::UnroutedChannel(ref c) if c == "ipc:c"
        ));

        let left = LeftClient::new(MethodsProxy::new(transport, &ProxyConfig::default()));
        assert_eq!(left.a().await.unwrap(), "left a");
        assert_eq!(left.b().await.unwrap(), "left b");
    }

    #[tokio::test]
    async fn prefixes_keep_contracts_apart() {
        let transport = Arc::new(MemoryTransport::new());
        let a = ChannelPrefix::new("ipcA");
        let b = ChannelPrefix::new("ipcB");
        bind_methods(
            &transport,
            Some(FooDispatch::new(Arc::new(Foo("from A"))).into_shared()),
            &a,
        )
        .await
        .unwrap();
        bind_methods(
            &transport,
            Some(FooDispatch::new(Arc::new(Foo("from B"))).into_shared()),
            &b,
        )
        .await
        .unwrap();

        let client_a = FooClient::new(MethodsProxy::new(
            transport.clone(),
            &ProxyConfig::default().with_prefix(a),
        ));
        let client_b = FooClient::new(MethodsProxy::new(
            transport,
            &ProxyConfig::default().with_prefix(b),
        ));
        assert_eq!(client_a.foo().await.unwrap(), "from A");
        assert_eq!(client_b.foo().await.unwrap(), "from B");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_keep_their_own_results() {
        let transport = Arc::new(MemoryTransport::new());
        bind_methods(&transport, methods(), &ChannelPrefix::default())
            .await
            .unwrap();
        let client = MethodsClient::new(MethodsProxy::new(transport, &ProxyConfig::default()));

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..64 {
            let client = client.clone();
            tasks.spawn(async move { (i, client.ping(format!("#{i}")).await.unwrap()) });
        }
        while let Some(joined) = tasks.join_next().await {
            let (i, reply) = joined.unwrap();
            assert_eq!(reply, format!("pong: #{i}"));
        }
    }
}
