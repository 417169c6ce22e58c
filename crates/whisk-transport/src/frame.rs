//! JSON text frames used by the WebSocket adapter.
//!
//! ```text
//! event:      {"event": "whisk.auth.request", "data": {...}, "ack": 3}
//! ack reply:  {"ack": 3, "data": {"ws_token": "..."}}
//! ```
//!
//! `ack` on an event asks the receiver to reply; the reply echoes the id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One text frame on the socket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    /// A named event.
    Event {
        /// Event name.
        event: String,
        /// Payload (`null` when absent).
        #[serde(default)]
        data: Value,
        /// Reply id, when the sender wants an acknowledgment.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<u64>,
    },
    /// Reply to an event that carried an ack id.
    AckReply {
        /// The id from the original event.
        ack: u64,
        /// Reply payload.
        #[serde(default)]
        data: Value,
    },
}

impl Frame {
    /// Build an event frame.
    pub fn event(event: impl Into<String>, data: Value, ack: Option<u64>) -> Self {
        Self::Event {
            event: event.into(),
            data,
            ack,
        }
    }

    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize to a text frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn event_without_ack_omits_field() {
        let text = Frame::event("chat", json!({"m": "hi"}), None).to_text().unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["event"], "chat");
        assert_eq!(v["data"]["m"], "hi");
        assert!(v.get("ack").is_none());
    }

    #[test]
    fn parse_event_with_ack() {
        let frame = Frame::parse(r#"{"event":"whisk.auth.request","data":{},"ack":3}"#).unwrap();
        assert_matches!(
            frame,
            Frame::Event { ref event, ack: Some(3), .. } if event == "whisk.auth.request"
        );
    }

    #[test]
    fn parse_event_without_data() {
        let frame = Frame::parse(r#"{"event":"whisk.auth.accept"}"#).unwrap();
        assert_eq!(frame, Frame::event("whisk.auth.accept", Value::Null, None));
    }

    #[test]
    fn parse_ack_reply() {
        let frame = Frame::parse(r#"{"ack":3,"data":{"ws_token":null}}"#).unwrap();
        assert_matches!(frame, Frame::AckReply { ack: 3, ref data } if data["ws_token"].is_null());
    }

    #[test]
    fn parse_garbage_fails() {
        assert!(Frame::parse("not json").is_err());
        assert!(Frame::parse(r#"{"data":1}"#).is_err());
    }
}
