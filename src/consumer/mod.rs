//! Consumer side of the retry protocol.
//!
//! ## Contents
//! - [`Handler`], [`HandlerFn`], [`HandlerRef`] application code run per delivery
//! - [`WorkerContext`] call id and call-id stack of one invocation
//! - [`RetryConsumer`], [`RetryConsumerBuilder`], [`Processed`] the delivery loop and
//!   its outcome hook

mod builder;
mod context;
mod handler;
mod runtime;

pub use builder::RetryConsumerBuilder;
pub use context::WorkerContext;
pub use handler::{Handler, HandlerFn, HandlerRef};
pub use runtime::{Processed, RetryConsumer};
