//! The transport shape consumed by bindings and proxies.
//!
//! A transport is split into four capabilities so that a restricted process
//! can be handed only the ones it needs (see [`crate::bridge`]):
//!
//! - [`Serve`]: answer requests on a channel (host side of methods).
//! - [`Invoke`]: send a request and await its response (client side of methods).
//! - [`Emit`]: fire a one-way message (host side of events).
//! - [`Listen`]: run a callback for each one-way message (client side of events).

use std::{future::Future, pin::Pin, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    args::Args,
    error::{HandlerError, Result},
};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Answers one request with a value or a handler failure.
pub type RequestHandler =
    Arc<dyn Fn(Args) -> BoxFuture<std::result::Result<Value, HandlerError>> + Send + Sync>;

/// Runs for every one-way message delivered on a channel.
pub type Listener = Arc<dyn Fn(Args) -> BoxFuture<()> + Send + Sync>;

/// Box an async closure into a [`RequestHandler`].
pub fn request_handler<F, Fut>(f: F) -> RequestHandler
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(
        move |args: Args| -> BoxFuture<std::result::Result<Value, HandlerError>> {
            Box::pin(f(args))
        },
    )
}

/// Box an async closure into a [`Listener`].
pub fn listener<F, Fut>(f: F) -> Listener
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |args: Args| -> BoxFuture<()> { Box::pin(f(args)) })
}

#[async_trait]
pub trait Serve: Send + Sync {
    /// Register `handler` to answer requests on `channel`.
    ///
    /// A channel has at most one handler; registering a second one fails with
    /// [`crate::IpcError::ChannelInUse`] and leaves the first in place.
    async fn handle(&self, channel: &str, handler: RequestHandler) -> Result<()>;

    /// Stop answering requests on `channel`. Channels this side does not
    /// serve are left alone.
    async fn unhandle(&self, channel: &str) -> Result<()>;
}

#[async_trait]
pub trait Invoke: Send + Sync {
    /// Send a request on `channel` and wait for the matching response.
    async fn invoke(&self, channel: &str, args: Args) -> Result<Value>;
}

pub trait Emit: Send + Sync {
    /// Fire a message on `channel`. Delivery failures are not reported.
    fn send(&self, channel: &str, args: Args);
}

#[async_trait]
pub trait Listen: Send + Sync {
    /// Register `listener` for every message on `channel`. Several listeners
    /// on one channel each receive every message.
    async fn listen(&self, channel: &str, listener: Listener) -> Result<()>;
}

/// A transport offering every capability.
pub trait Transport: Serve + Invoke + Emit + Listen {}

impl<T: Serve + Invoke + Emit + Listen + ?Sized> Transport for T {}

#[async_trait]
impl<T: Serve + ?Sized> Serve for Arc<T> {
    async fn handle(&self, channel: &str, handler: RequestHandler) -> Result<()> {
        (**self).handle(channel, handler).await
    }

    async fn unhandle(&self, channel: &str) -> Result<()> {
        (**self).unhandle(channel).await
    }
}

#[async_trait]
impl<T: Invoke + ?Sized> Invoke for Arc<T> {
    async fn invoke(&self, channel: &str, args: Args) -> Result<Value> {
        (**self).invoke(channel, args).await
    }
}

impl<T: Emit + ?Sized> Emit for Arc<T> {
    fn send(&self, channel: &str, args: Args) {
        (**self).send(channel, args)
    }
}

#[async_trait]
impl<T: Listen + ?Sized> Listen for Arc<T> {
    async fn listen(&self, channel: &str, listener: Listener) -> Result<()> {
        (**self).listen(channel, listener).await
    }
}
