//! # Exchange/queue declarations and the delay topology.
//!
//! The delay mechanism is two broker objects:
//! ```text
//!  publish(exchange="backoff", routing_key=<target queue>, x-delay=<ms>)
//!        │
//!        ▼
//!  [x-delayed-message exchange "backoff" (x-delayed-type=topic)]
//!        │  holds the message for x-delay ms, then routes it with "#"
//!        ▼
//!  [queue "backoff" (x-max-length=0, x-dead-letter-exchange="")]
//!        │  zero capacity: the message is dead-lettered immediately
//!        ▼
//!  [default exchange] ──routing_key──► <target queue>   (x-death count + 1)
//! ```
//! Requires the broker's delayed-message exchange capability.

use crate::message::{HeaderValue, Headers};

/// Exchange type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
    Topic,
    Fanout,
    /// Delayed-message plugin exchange; routing follows `x-delayed-type`.
    DelayedMessage,
}

impl ExchangeKind {
    /// Wire name of the exchange type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::DelayedMessage => "x-delayed-message",
        }
    }

    /// Parses a wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(ExchangeKind::Direct),
            "topic" => Some(ExchangeKind::Topic),
            "fanout" => Some(ExchangeKind::Fanout),
            "x-delayed-message" => Some(ExchangeKind::DelayedMessage),
            _ => None,
        }
    }
}

/// Exchange declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub arguments: Headers,
}

impl ExchangeSpec {
    /// Durable exchange with no arguments.
    pub fn new(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: true,
            arguments: Headers::new(),
        }
    }

    /// Builder-style argument setter.
    pub fn with_argument(mut self, key: &str, value: impl Into<HeaderValue>) -> Self {
        self.arguments.insert(key.to_owned(), value.into());
        self
    }

    /// Routing semantics once the exchange releases a message.
    ///
    /// Delayed exchanges route according to `x-delayed-type` (direct if absent).
    pub fn routing_kind(&self) -> ExchangeKind {
        match self.kind {
            ExchangeKind::DelayedMessage => self
                .arguments
                .get("x-delayed-type")
                .and_then(HeaderValue::as_str)
                .and_then(ExchangeKind::parse)
                .filter(|k| *k != ExchangeKind::DelayedMessage)
                .unwrap_or(ExchangeKind::Direct),
            other => other,
        }
    }
}

/// Queue declaration, including its binding.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSpec {
    pub name: String,
    /// Exchange to bind to (`None` = only reachable through the default exchange).
    pub exchange: Option<String>,
    pub routing_key: String,
    pub durable: bool,
    pub arguments: Headers,
}

impl QueueSpec {
    /// Durable, unbound queue.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exchange: None,
            routing_key: String::new(),
            durable: true,
            arguments: Headers::new(),
        }
    }

    /// Binds the queue to `exchange` with `routing_key`.
    pub fn bind(mut self, exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self.routing_key = routing_key.into();
        self
    }

    /// Builder-style argument setter.
    pub fn with_argument(mut self, key: &str, value: impl Into<HeaderValue>) -> Self {
        self.arguments.insert(key.to_owned(), value.into());
        self
    }

    /// `x-max-length`, if set.
    pub fn max_length(&self) -> Option<u64> {
        self.arguments
            .get("x-max-length")
            .and_then(HeaderValue::as_int)
            .and_then(|n| u64::try_from(n).ok())
    }

    /// `x-dead-letter-exchange`, if set (`""` is the default exchange).
    pub fn dead_letter_exchange(&self) -> Option<&str> {
        self.arguments
            .get("x-dead-letter-exchange")
            .and_then(HeaderValue::as_str)
    }
}

/// Default name for the delay exchange and its backing queue.
pub const DEFAULT_DELAY_EXCHANGE: &str = "backoff";

/// The delay exchange and its zero-capacity backing queue.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayTopology {
    exchange: ExchangeSpec,
    queue: QueueSpec,
}

impl Default for DelayTopology {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY_EXCHANGE)
    }
}

impl DelayTopology {
    /// Builds the topology; exchange and queue share `name`.
    pub fn new(name: &str) -> Self {
        let exchange = ExchangeSpec::new(name, ExchangeKind::DelayedMessage)
            .with_argument("x-delayed-type", "topic");
        let queue = QueueSpec::new(name)
            .bind(name, "#")
            .with_argument("x-max-length", HeaderValue::Int(0))
            .with_argument("x-dead-letter-exchange", "");
        Self { exchange, queue }
    }

    /// Name used for `x-death` matching and publishing.
    pub fn exchange_name(&self) -> &str {
        &self.exchange.name
    }

    pub fn exchange(&self) -> &ExchangeSpec {
        &self.exchange
    }

    pub fn queue(&self) -> &QueueSpec {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_topology_shape() {
        let topology = DelayTopology::default();
        assert_eq!(topology.exchange_name(), "backoff");
        assert_eq!(topology.exchange().kind, ExchangeKind::DelayedMessage);
        assert_eq!(topology.exchange().routing_kind(), ExchangeKind::Topic);

        let queue = topology.queue();
        assert_eq!(queue.exchange.as_deref(), Some("backoff"));
        assert_eq!(queue.routing_key, "#");
        assert_eq!(queue.max_length(), Some(0));
        assert_eq!(queue.dead_letter_exchange(), Some(""));
    }

    #[test]
    fn delayed_exchange_without_type_routes_direct() {
        let spec = ExchangeSpec::new("later", ExchangeKind::DelayedMessage);
        assert_eq!(spec.routing_kind(), ExchangeKind::Direct);
    }
}
