//! # Messages as seen by consumers and publishers.
//!
//! [`Message`] is owned by the broker client; the retry core only reads it and
//! copies fields out of it. [`Properties`] mirrors the AMQP basic properties,
//! with the application headers kept alongside them.

use crate::message::headers::{HeaderValue, Headers};
use crate::message::history::{DeathRecord, death_history};

/// AMQP basic properties plus application headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    /// 1 = transient, 2 = persistent.
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<u64>,
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
    /// Application headers.
    pub headers: Headers,
}

impl Properties {
    /// Returns a copy of these properties with `key` set in a copied header table.
    pub fn with_header(&self, key: &str, value: impl Into<HeaderValue>) -> Self {
        let mut copy = self.clone();
        copy.headers.insert(key.to_owned(), value.into());
        copy
    }
}

/// A delivered message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// Opaque payload.
    pub body: Vec<u8>,
    /// Properties and headers.
    pub properties: Properties,
    /// Exchange the message was published to (`""` for the default exchange).
    pub exchange: String,
    /// Routing key the message was published with.
    pub routing_key: String,
    /// Set by the broker when the message was requeued after a nack.
    pub redelivered: bool,
}

impl Message {
    /// Creates a message with the given body and empty properties.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Builder-style header setter.
    pub fn with_header(mut self, key: &str, value: impl Into<HeaderValue>) -> Self {
        self.properties.headers.insert(key.to_owned(), value.into());
        self
    }

    /// Application headers.
    pub fn headers(&self) -> &Headers {
        &self.properties.headers
    }

    /// Mutable application headers.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.properties.headers
    }

    /// Parsed `x-death` history; recomputed on every call.
    pub fn death_history(&self) -> Vec<DeathRecord> {
        death_history(&self.properties.headers)
    }
}
