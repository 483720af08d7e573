//! Pub/sub bus abstraction
//!
//! Subject-addressed publish/subscribe with request/reply, in the style of
//! NATS. The store service and sync links only talk to [`Bus`] and
//! [`Connector`]; [`memory`] provides an in-process implementation.

pub mod memory;

pub use memory::{MemoryConnection, MemoryNetwork, MemoryServer};

use crate::error::BusError;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    /// Reply subject for requests.
    pub reply: Option<String>,
    pub payload: Vec<u8>,
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    subject: String,
    rx: mpsc::UnboundedReceiver<Message>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        subject: impl Into<String>,
        rx: mpsc::UnboundedReceiver<Message>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            subject: subject.into(),
            rx,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next message, or `None` once the connection is closed.
    pub async fn next(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("subject", &self.subject)
            .finish()
    }
}

/// One connection to a bus.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Publish and wait for a single reply.
    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Message, BusError>;

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError>;

    /// `true` while connected; flips to `false` when the connection drops.
    fn status(&self) -> watch::Receiver<bool>;

    async fn close(&self);
}

/// Answer a request message. Messages without a reply subject are ignored.
pub async fn respond(bus: &dyn Bus, msg: &Message, payload: Vec<u8>) -> Result<(), BusError> {
    match &msg.reply {
        Some(reply) => bus.publish(reply, payload).await,
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub uri: String,
    pub auth_token: String,
    /// Do not deliver this connection's own publications back to it.
    pub no_echo: bool,
    /// Connection name for logs.
    pub name: String,
}

impl ConnectOptions {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = token.into();
        self
    }

    pub fn no_echo(mut self) -> Self {
        self.no_echo = true;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Opens bus connections by URI.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, opts: &ConnectOptions) -> Result<Arc<dyn Bus>, BusError>;
}
