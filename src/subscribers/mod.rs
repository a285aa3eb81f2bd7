//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait and the [`SubscriberSet`] fan-out
//! used by consumers to deliver runtime [`Event`](crate::Event)s.
//!
//! ## Architecture
//! ```text
//!   RetryConsumer ── publish(Event) ──► Bus ──► listener ──► SubscriberSet
//!                                                              │
//!                                                   ┌──────────┼──────────┐
//!                                                   ▼          ▼          ▼
//!                                              LogWriter    Metrics    Custom
//! ```

mod set;
mod subscriber;

#[cfg(feature = "logging")]
mod log;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
