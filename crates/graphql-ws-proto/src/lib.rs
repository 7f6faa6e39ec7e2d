//! Wire types for the `graphql-ws` sub-protocol.
//!
//! The gateway negotiates this sub-protocol during the WebSocket handshake
//! and then ferries frames in both directions without interpreting their
//! semantics; what each frame type *means* is the subscription engine's
//! business. This crate only pins down the protocol token, the negotiation
//! rule and the JSON envelope shared by both sides.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The sub-protocol token a client must offer during the handshake.
pub const GRAPHQL_WS: &str = "graphql-ws";

/// Select the sub-protocol for a handshake.
///
/// Returns [`GRAPHQL_WS`] when the client offered it, `None` when no offer
/// is acceptable and the handshake must be rejected.
pub fn select_subprotocol<'a, I>(offered: I) -> Option<&'static str>
where
    I: IntoIterator<Item = &'a str>,
{
    offered
        .into_iter()
        .any(|candidate| candidate.trim() == GRAPHQL_WS)
        .then_some(GRAPHQL_WS)
}

/// Frame types of the `graphql-ws` protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    // client -> server
    ConnectionInit,
    Start,
    Stop,
    ConnectionTerminate,
    // server -> client
    ConnectionAck,
    ConnectionError,
    #[serde(rename = "ka")]
    KeepAlive,
    Data,
    Error,
    Complete,
}

/// JSON envelope carried in every Text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl WireFrame {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn connection_ack() -> Self {
        Self {
            frame_type: FrameType::ConnectionAck,
            id: None,
            payload: None,
        }
    }

    pub fn connection_error(payload: serde_json::Value) -> Self {
        Self {
            frame_type: FrameType::ConnectionError,
            id: None,
            payload: Some(payload),
        }
    }

    pub fn keep_alive() -> Self {
        Self {
            frame_type: FrameType::KeepAlive,
            id: None,
            payload: None,
        }
    }

    pub fn data(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            frame_type: FrameType::Data,
            id: Some(id.into()),
            payload: Some(payload),
        }
    }

    pub fn error(id: impl Into<String>, errors: serde_json::Value) -> Self {
        Self {
            frame_type: FrameType::Error,
            id: Some(id.into()),
            payload: Some(errors),
        }
    }

    pub fn complete(id: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::Complete,
            id: Some(id.into()),
            payload: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn negotiation_picks_graphql_ws_among_offers() {
        assert_eq!(
            select_subprotocol(["graphql-ws", "foo"]),
            Some(GRAPHQL_WS)
        );
        assert_eq!(select_subprotocol([" graphql-ws "]), Some(GRAPHQL_WS));
    }

    #[test]
    fn negotiation_fails_without_the_token() {
        assert_eq!(select_subprotocol(["foo", "graphql-transport-ws"]), None);
        assert_eq!(select_subprotocol(std::iter::empty::<&str>()), None);
    }

    #[test]
    fn start_frame_parses_with_id_and_payload() {
        let frame = WireFrame::parse(
            r#"{"type":"start","id":"1","payload":{"query":"subscription { tick }"}}"#,
        )
        .expect("valid frame");
        assert_eq!(frame.frame_type, FrameType::Start);
        assert_eq!(frame.id.as_deref(), Some("1"));
        assert_eq!(
            frame.payload,
            Some(json!({"query": "subscription { tick }"}))
        );
    }

    #[test]
    fn keep_alive_serialises_as_ka() {
        let json = WireFrame::keep_alive().to_json().expect("serialises");
        assert_eq!(json, r#"{"type":"ka"}"#);
    }

    #[test]
    fn data_frame_carries_id_and_payload() {
        let json = WireFrame::data("1", json!({"data": {"tick": 1}}))
            .to_json()
            .expect("serialises");
        assert_eq!(
            json,
            r#"{"type":"data","id":"1","payload":{"data":{"tick":1}}}"#
        );
    }

    #[test]
    fn data_frame_omits_absent_fields() {
        let json = WireFrame::complete("7").to_json().expect("serialises");
        assert_eq!(json, r#"{"type":"complete","id":"7"}"#);
    }

    #[test]
    fn malformed_text_is_rejected() {
        assert!(WireFrame::parse("not json").is_err());
        assert!(WireFrame::parse(r#"{"type":"no_such_frame"}"#).is_err());
    }
}
