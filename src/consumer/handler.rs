//! # Message handlers.
//!
//! [`Handler`] is the application code a consumer runs for each delivery.
//! Returning `Err(HandlerError::Backoff(..))` asks for a deferred redelivery;
//! any other error fails the message.
//!
//! [`HandlerFn`] wraps a closure `F: Fn(Message, WorkerContext) -> Fut`, producing
//! a fresh future per delivery.
//!
//! ## Example
//! ```rust
//! use backoffq::{Backoff, HandlerError, HandlerFn, HandlerRef, Message, WorkerContext};
//!
//! let h: HandlerRef = HandlerFn::arc("charge", |msg: Message, _ctx: WorkerContext| async move {
//!     if msg.body.is_empty() {
//!         return Err(Backoff::new("payment gateway busy").into());
//!     }
//!     Ok::<_, HandlerError>(())
//! });
//!
//! assert_eq!(h.name(), "charge");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::consumer::context::WorkerContext;
use crate::error::HandlerError;
use crate::message::Message;

/// Shared handler handle.
pub type HandlerRef = Arc<dyn Handler>;

/// # Asynchronous message handler.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Stable, human-readable handler name (used in call ids and events).
    fn name(&self) -> &str;

    /// Handles one message.
    async fn handle(&self, message: &Message, ctx: &WorkerContext) -> Result<(), HandlerError>;
}

/// Function-backed handler.
#[derive(Debug)]
pub struct HandlerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> HandlerFn<F> {
    /// Creates a new function-backed handler.
    ///
    /// Prefer [`HandlerFn::arc`] when you immediately need a [`HandlerRef`].
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the handler and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Message, WorkerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, message: &Message, ctx: &WorkerContext) -> Result<(), HandlerError> {
        (self.f)(message.clone(), ctx.clone()).await
    }
}
