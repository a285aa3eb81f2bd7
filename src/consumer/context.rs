//! # Per-delivery worker context.
//!
//! A [`WorkerContext`] is created for every delivery. It carries the call id of
//! this worker and the call-id stack inherited from the incoming message, so a
//! chain of services can be traced hop by hop.
//!
//! When a handler asks for a retry, the consumer stores the stack in the
//! message's `call_id_stack` header with `.backoff` appended to the current
//! entry, so the redelivered message shows it went through backoff.

use uuid::Uuid;

use crate::message::{BACKOFF_CALL_SUFFIX, CALL_ID_STACK, HeaderValue, Message, string_list};

/// Call-tracing state for one handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerContext {
    call_id: String,
    parent_calls: Vec<String>,
}

impl WorkerContext {
    /// Creates a context for `handler` on `queue`, inheriting the parent stack
    /// from the message's `call_id_stack` header.
    ///
    /// The call id has the form `<queue>.<handler>.<uuid v4>`.
    pub fn new(queue: &str, handler: &str, message: &Message) -> Self {
        Self {
            call_id: format!("{queue}.{handler}.{}", Uuid::new_v4()),
            parent_calls: string_list(message.headers(), CALL_ID_STACK),
        }
    }

    /// Creates a context with an explicit call id and parent stack.
    pub fn with_call_id(call_id: impl Into<String>, parent_calls: Vec<String>) -> Self {
        Self {
            call_id: call_id.into(),
            parent_calls,
        }
    }

    /// This worker's call id.
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Parent calls followed by this worker's call id.
    pub fn call_id_stack(&self) -> Vec<String> {
        let mut stack = self.parent_calls.clone();
        stack.push(self.call_id.clone());
        stack
    }

    /// Writes the call-id stack into `message`, marking the current hop as a backoff.
    pub fn mark_backoff(&self, message: &mut Message) {
        let mut stack = self.call_id_stack();
        if let Some(current) = stack.last_mut() {
            current.push_str(BACKOFF_CALL_SUFFIX);
        }
        message.headers_mut().insert(
            CALL_ID_STACK.to_owned(),
            HeaderValue::List(stack.into_iter().map(HeaderValue::Str).collect()),
        );
    }
}
