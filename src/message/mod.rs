//! Message model: properties, header tables and dead-letter history.
//!
//! ## Contents
//! - [`Message`], [`Properties`] what a consumer receives and a publisher copies
//! - [`HeaderValue`], [`Headers`] typed AMQP field tables plus well-known keys
//! - [`DeathRecord`], [`attempt_count`] the `x-death` history the retry budget is derived from

mod envelope;
mod headers;
mod history;

pub use envelope::{Message, Properties};
pub use headers::{
    BACKOFF_CALL_SUFFIX, CALL_ID_STACK, HeaderValue, Headers, X_DEATH, X_DELAY, string_list,
};
pub use history::{DeathRecord, attempt_count, death_history, record_death};
