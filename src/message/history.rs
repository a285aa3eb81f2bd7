//! # Dead-letter history (`x-death`).
//!
//! Every time a broker dead-letters a message it records the event in the
//! `x-death` header: a list of tables, most recent first, each naming the
//! exchange the message had been published to, the queue it died in, the
//! reason, and a cumulative `count`.
//!
//! The retry budget is derived from this list only. [`attempt_count`] picks the
//! entry written by the delay exchange and ignores everything else, so a message
//! dead-lettered by unrelated mechanisms does not lose retries.

use crate::message::headers::{HeaderValue, Headers, X_DEATH};

/// One parsed `x-death` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeathRecord {
    /// Exchange the message was published to before it died.
    pub exchange: String,
    /// Queue that dead-lettered the message.
    pub queue: Option<String>,
    /// Broker reason (`rejected`, `expired`, `maxlen`, ...).
    pub reason: Option<String>,
    /// Cumulative number of times this (queue, reason) pair fired.
    pub count: u64,
    /// Routing keys the message carried.
    pub routing_keys: Vec<String>,
}

impl DeathRecord {
    /// Creates a record with only the fields the retry policy needs.
    pub fn new(exchange: impl Into<String>, count: u64) -> Self {
        Self {
            exchange: exchange.into(),
            queue: None,
            reason: None,
            count,
            routing_keys: Vec::new(),
        }
    }

    /// Parses one `x-death` table. Returns `None` when `exchange` or a
    /// non-negative `count` is missing.
    pub fn from_table(table: &Headers) -> Option<Self> {
        let exchange = table.get("exchange")?.as_str()?.to_owned();
        let count = u64::try_from(table.get("count")?.as_int()?).ok()?;
        let text = |key: &str| table.get(key).and_then(HeaderValue::as_str).map(str::to_owned);
        let routing_keys = table
            .get("routing-keys")
            .and_then(HeaderValue::as_list)
            .map(|keys| {
                keys.iter()
                    .filter_map(HeaderValue::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            exchange,
            queue: text("queue"),
            reason: text("reason"),
            count,
            routing_keys,
        })
    }

    /// Encodes the record back into an `x-death` table.
    pub fn to_table(&self) -> HeaderValue {
        let mut table = Headers::new();
        table.insert("exchange".into(), self.exchange.clone().into());
        table.insert(
            "count".into(),
            HeaderValue::Int(i64::try_from(self.count).unwrap_or(i64::MAX)),
        );
        if let Some(queue) = &self.queue {
            table.insert("queue".into(), queue.clone().into());
        }
        if let Some(reason) = &self.reason {
            table.insert("reason".into(), reason.clone().into());
        }
        if !self.routing_keys.is_empty() {
            table.insert(
                "routing-keys".into(),
                HeaderValue::List(self.routing_keys.iter().map(|k| k.as_str().into()).collect()),
            );
        }
        HeaderValue::Table(table)
    }
}

/// Reads the dead-letter history from a header table, skipping malformed entries.
pub fn death_history(headers: &Headers) -> Vec<DeathRecord> {
    headers
        .get(X_DEATH)
        .and_then(HeaderValue::as_list)
        .map(|entries| {
            entries
                .iter()
                .filter_map(HeaderValue::as_table)
                .filter_map(DeathRecord::from_table)
                .collect()
        })
        .unwrap_or_default()
}

/// Number of previous redeliveries through `exchange`.
///
/// Takes the `count` of the first entry whose exchange matches; 0 if none does.
pub fn attempt_count(history: &[DeathRecord], exchange: &str) -> u64 {
    history
        .iter()
        .find(|record| record.exchange == exchange)
        .map_or(0, |record| record.count)
}

/// Records a dead-letter event the way the broker does.
///
/// The entry for the same `(queue, reason)` pair has its count incremented and
/// moves to the front; otherwise a new entry with `count = 1` is prepended.
/// Malformed entries already present are dropped.
pub fn record_death(headers: &mut Headers, exchange: &str, queue: &str, reason: &str, routing_key: &str) {
    let mut history = death_history(headers);
    let existing = history
        .iter()
        .position(|r| r.queue.as_deref() == Some(queue) && r.reason.as_deref() == Some(reason));

    let record = match existing {
        Some(index) => {
            let mut record = history.remove(index);
            record.count = record.count.saturating_add(1);
            record.exchange = exchange.to_owned();
            record
        }
        None => DeathRecord {
            exchange: exchange.to_owned(),
            queue: Some(queue.to_owned()),
            reason: Some(reason.to_owned()),
            count: 1,
            routing_keys: vec![routing_key.to_owned()],
        },
    };
    history.insert(0, record);

    headers.insert(
        X_DEATH.into(),
        HeaderValue::List(history.iter().map(DeathRecord::to_table).collect()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(records: &[DeathRecord]) -> Headers {
        let mut headers = Headers::new();
        headers.insert(
            X_DEATH.into(),
            HeaderValue::List(records.iter().map(DeathRecord::to_table).collect()),
        );
        headers
    }

    #[test]
    fn attempt_count_defaults_to_zero() {
        assert_eq!(attempt_count(&[], "backoff"), 0);
        assert_eq!(attempt_count(&death_history(&Headers::new()), "backoff"), 0);
    }

    #[test]
    fn attempt_count_ignores_foreign_exchanges() {
        let history = vec![
            DeathRecord::new("not-backoff", 99),
            DeathRecord::new("backoff", 2),
        ];
        assert_eq!(attempt_count(&history, "backoff"), 2);
        assert_eq!(attempt_count(&history[..1], "backoff"), 0);
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let mut bad = Headers::new();
        bad.insert("exchange".into(), "backoff".into());
        bad.insert("count".into(), HeaderValue::Int(-1));

        let mut headers = headers_with(&[DeathRecord::new("backoff", 4)]);
        if let Some(HeaderValue::List(items)) = headers.get_mut(X_DEATH) {
            items.insert(0, HeaderValue::Table(bad));
            items.insert(0, HeaderValue::Str("garbage".into()));
        }

        let history = death_history(&headers);
        assert_eq!(history.len(), 1);
        assert_eq!(attempt_count(&history, "backoff"), 4);
    }

    #[test]
    fn record_death_increments_matching_entry_and_moves_it_first() {
        let mut headers = Headers::new();
        record_death(&mut headers, "backoff", "backoff", "maxlen", "orders");
        record_death(&mut headers, "events", "audit", "rejected", "orders");
        record_death(&mut headers, "backoff", "backoff", "maxlen", "orders");

        let history = death_history(&headers);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].exchange, "backoff");
        assert_eq!(history[0].count, 2);
        assert_eq!(history[0].routing_keys, vec!["orders"]);
        assert_eq!(history[1].exchange, "events");
        assert_eq!(history[1].count, 1);
    }
}
