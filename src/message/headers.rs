//! # Message header tables.
//!
//! AMQP headers are a field table: string keys mapped to typed values that may
//! nest (lists of tables in `x-death`, for example). [`HeaderValue`] covers the
//! subset this crate reads and writes; [`Headers`] is the ordered table.
//!
//! Well-known keys used across the crate are exported as constants.

use std::collections::BTreeMap;

/// Broker-maintained dead-letter history (list of tables).
pub const X_DEATH: &str = "x-death";

/// Delay in milliseconds read by the delayed-message exchange.
pub const X_DELAY: &str = "x-delay";

/// Call-id stack propagated between workers for tracing.
pub const CALL_ID_STACK: &str = "call_id_stack";

/// Suffix appended to the current call id when a message is sent to backoff.
pub const BACKOFF_CALL_SUFFIX: &str = ".backoff";

/// Header table keyed by field name.
pub type Headers = BTreeMap<String, HeaderValue>;

/// A single header field value.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<HeaderValue>),
    Table(Headers),
}

impl HeaderValue {
    /// Returns the integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the list payload, if any.
    pub fn as_list(&self) -> Option<&[HeaderValue]> {
        match self {
            HeaderValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the nested table, if any.
    pub fn as_table(&self) -> Option<&Headers> {
        match self {
            HeaderValue::Table(t) => Some(t),
            _ => None,
        }
    }
}

impl From<bool> for HeaderValue {
    fn from(v: bool) -> Self {
        HeaderValue::Bool(v)
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        HeaderValue::Int(v)
    }
}

impl From<u32> for HeaderValue {
    fn from(v: u32) -> Self {
        HeaderValue::Int(i64::from(v))
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        HeaderValue::Str(v.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        HeaderValue::Str(v)
    }
}

impl From<Vec<HeaderValue>> for HeaderValue {
    fn from(v: Vec<HeaderValue>) -> Self {
        HeaderValue::List(v)
    }
}

impl From<Headers> for HeaderValue {
    fn from(v: Headers) -> Self {
        HeaderValue::Table(v)
    }
}

/// Reads a list of strings (e.g. the call-id stack); non-string items are skipped.
pub fn string_list(headers: &Headers, key: &str) -> Vec<String> {
    headers
        .get(key)
        .and_then(HeaderValue::as_list)
        .map(|items| {
            items
                .iter()
                .filter_map(HeaderValue::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_list_skips_foreign_values() {
        let mut headers = Headers::new();
        headers.insert(
            CALL_ID_STACK.into(),
            HeaderValue::List(vec!["a.b.1".into(), HeaderValue::Int(3), "c.d.2".into()]),
        );
        assert_eq!(string_list(&headers, CALL_ID_STACK), vec!["a.b.1", "c.d.2"]);
        assert!(string_list(&headers, "missing").is_empty());
    }
}
