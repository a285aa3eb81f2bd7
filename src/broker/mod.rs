//! Broker client seam and delay topology.
//!
//! ## Contents
//! - [`ChannelPool`], [`Channel`], [`Acker`], [`Delivery`], [`Publication`] the traits and
//!   types the retry core needs from a broker client
//! - [`DelayTopology`], [`ExchangeSpec`], [`QueueSpec`] declarations for the delay mechanism
//! - [`MemoryBroker`] in-process implementation used by tests and demos

mod channel;
mod memory;
mod topology;

pub use channel::{Acker, Channel, ChannelPool, Delivery, Publication};
pub use memory::MemoryBroker;
pub use topology::{DEFAULT_DELAY_EXCHANGE, DelayTopology, ExchangeKind, ExchangeSpec, QueueSpec};
