//! Event — the universal message type for Palaver's realtime channel.
//!
//! ARCHITECTURE
//! ============
//! Every websocket communication is an Event. Clients send request events,
//! the server dispatches by op prefix ("chat:", "typing:", "message:"), and
//! replies flow back as done/error events correlated via `parent_id`.
//! Server-initiated pushes (presence, unread bumps, chat previews) are
//! request events with no reply expected.
//!
//! DESIGN
//! ======
//! - Flat data: payload is always `Map<String, Value>`, never nested.
//! - Responses correlate to requests via `parent_id`.
//! - The WS handler routes on the `op` prefix and never inspects `data`.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Event data key for error messages.
pub const EVENT_MESSAGE: &str = "message";

/// Event data key for grepable error codes.
pub const EVENT_CODE: &str = "code";

/// Event data key for the retryable flag on error events.
pub const EVENT_RETRYABLE: &str = "retryable";

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, serde_json::Value>;

/// Lifecycle position of an event in a request/response exchange.
///
/// Every exchange is `request → done` or `request → error`; server pushes
/// stay at `request` and expect nothing back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Request,
    Done,
    Error,
}

impl Status {
    /// Terminal statuses end an exchange.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Error)
    }
}

/// The universal message type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<Uuid>,
    pub from: Option<String>,
    pub op: String,
    pub status: Status,
    pub data: Data,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured error events.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Event {
    /// Create a request event. Entry point for every client op and server push.
    pub fn request(op: impl Into<String>, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: now_ms(),
            chat_id: None,
            from: None,
            op: op.into(),
            status: Status::Request,
            data,
        }
    }

    /// Create a done response. Terminal, carries no data.
    #[must_use]
    pub fn done(&self) -> Self {
        self.reply(Status::Done, Data::new())
    }

    /// Create a done response carrying result data. Terminal.
    #[must_use]
    pub fn done_with(&self, data: Data) -> Self {
        self.reply(Status::Done, data)
    }

    /// Create an error response from a plain string. Terminal.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        let mut data = Data::new();
        data.insert(EVENT_MESSAGE.into(), serde_json::Value::String(message.into()));
        self.reply(Status::Error, data)
    }

    /// Create a structured error response from a typed error. Terminal.
    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        let mut data = Data::new();
        data.insert(EVENT_CODE.into(), serde_json::Value::String(err.error_code().to_string()));
        data.insert(EVENT_MESSAGE.into(), serde_json::Value::String(err.to_string()));
        data.insert(EVENT_RETRYABLE.into(), serde_json::Value::Bool(err.retryable()));
        self.reply(Status::Error, data)
    }

    /// Build a reply event. Inherits `parent_id`, `chat_id`, and `op`.
    fn reply(&self, status: Status, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(self.id),
            ts: now_ms(),
            chat_id: self.chat_id,
            from: None,
            op: self.op.clone(),
            status,
            data,
        }
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Event {
    #[must_use]
    pub fn with_chat_id(mut self, chat_id: Uuid) -> Self {
        self.chat_id = Some(chat_id);
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// ROUTING
// =============================================================================

impl Event {
    /// Extract the op prefix (everything before the first ':').
    #[must_use]
    pub fn prefix(&self) -> &str {
        let Some((prefix, _)) = self.op.split_once(':') else {
            return &self.op;
        };
        prefix
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_sets_fields() {
        let event = Event::request("chat:join", Data::new());
        assert_eq!(event.op, "chat:join");
        assert_eq!(event.status, Status::Request);
        assert!(event.parent_id.is_none());
        assert!(event.chat_id.is_none());
        assert!(event.ts > 0);
    }

    #[test]
    fn reply_inherits_context() {
        let chat_id = Uuid::new_v4();
        let req = Event::request("message:new", Data::new()).with_chat_id(chat_id);
        let done = req.done();

        assert_eq!(done.parent_id, Some(req.id));
        assert_eq!(done.chat_id, Some(chat_id));
        assert_eq!(done.op, "message:new");
        assert_eq!(done.status, Status::Done);
    }

    #[test]
    fn done_is_terminal() {
        assert!(Status::Done.is_terminal());
        assert!(Status::Error.is_terminal());
        assert!(!Status::Request.is_terminal());
    }

    #[test]
    fn prefix_extraction() {
        let event = Event::request("typing:start", Data::new());
        assert_eq!(event.prefix(), "typing");

        let event = Event::request("noseparator", Data::new());
        assert_eq!(event.prefix(), "noseparator");
    }

    #[test]
    fn json_round_trip() {
        let chat_id = Uuid::new_v4();
        let original = Event::request("chat:join", Data::new())
            .with_chat_id(chat_id)
            .with_from("test-user")
            .with_data("key", "value");

        let json = serde_json::to_string(&original).expect("serialize");
        let restored: Event = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(restored.id, original.id);
        assert_eq!(restored.chat_id, Some(chat_id));
        assert_eq!(restored.op, "chat:join");
        assert_eq!(restored.from.as_deref(), Some("test-user"));
        assert_eq!(restored.data.get("key").and_then(|v| v.as_str()), Some("value"));
    }

    #[test]
    fn error_from_typed() {
        #[derive(Debug, thiserror::Error)]
        #[error("not a member")]
        struct NotMember;

        impl ErrorCode for NotMember {
            fn error_code(&self) -> &'static str {
                "E_NOT_MEMBER"
            }
        }

        let req = Event::request("message:new", Data::new());
        let err = req.error_from(&NotMember);

        assert_eq!(err.status, Status::Error);
        assert_eq!(err.data.get("code").and_then(|v| v.as_str()), Some("E_NOT_MEMBER"));
        assert_eq!(err.data.get("message").and_then(|v| v.as_str()), Some("not a member"));
        assert_eq!(
            err.data
                .get("retryable")
                .and_then(serde_json::Value::as_bool),
            Some(false)
        );
    }
}
