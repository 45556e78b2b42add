use std::sync::Arc;

use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    oneshot,
};

use crate::{
    core::{
        checkin::{CheckInActor, Display},
        session::Session,
    },
    integrations::api::ConsoleApi,
    render::export::RasterExporter,
};

pub mod core;
pub mod error;
pub mod integrations;
pub mod render;
pub mod util;
pub mod web;

/// The kiosk display and, once scanning started, its check-in actor.
#[derive(Clone)]
pub struct Scanner {
    pub display: Arc<Display>,
    pub checkin_actor: Option<CheckInActor>,
}

/// Everything request handlers need to reach.
#[derive(Clone)]
pub struct Directory {
    pub api: Arc<dyn ConsoleApi>,
    pub exporter: RasterExporter,
    pub session: Arc<Session>,
    pub scanner: Option<Scanner>,
}

/// Reply-to handle for a request sent to an actor.
pub struct Rto<T> {
    tx: oneshot::Sender<anyhow::Result<T>>,
}

impl<T> Rto<T> {
    pub fn new(tx: oneshot::Sender<anyhow::Result<T>>) -> Self {
        Self { tx }
    }

    /// Send the result back to the requester. A requester that went away is ignored.
    pub fn reply(self, value: anyhow::Result<T>) {
        let _ = self.tx.send(value);
    }
}

/// Cloneable handle to an actor's request queue.
pub struct ActorRef<T> {
    tx: UnboundedSender<T>,
}

impl<T> Clone for ActorRef<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> ActorRef<T> {
    pub fn new() -> (Self, UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire-and-forget send. Returns false if the actor has shut down.
    pub fn send(&self, msg: T) -> bool {
        self.tx.send(msg).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Send a request to an actor and wait for its reply.
///
/// `send_message!(actor, RequestEnum, Variant, args...)` builds
/// `RequestEnum::Variant(args..., rto)` and evaluates to `anyhow::Result<T>`.
#[macro_export]
macro_rules! send_message {
    ($actor:expr, $request:ident, $variant:ident $(, $arg:expr)* $(,)?) => {{
        let (tx, rx) = tokio::sync::oneshot::channel();
        if $actor.send($request::$variant($($arg,)* $crate::Rto::new(tx))) {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("Actor dropped the request without replying")),
            }
        } else {
            Err(anyhow::anyhow!("Actor is not running"))
        }
    }};
}
