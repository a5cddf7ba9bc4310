//! Typed hub frames and record-separator framing.
//!
//! Outbound frames are serialized from the structs below with their numeric
//! `type` field. Inbound frames are decoded by reading `type` first and then
//! deserializing the matching struct; unknown types decode to
//! [`HubMessage::Other`] so newer servers do not break older clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::constants::{MessageType, PROTOCOL_NAME, PROTOCOL_VERSION, RECORD_SEPARATOR};
use crate::error::{HubError, HubResult};

/// First frame sent by the client after the socket opens.
#[derive(Debug, Clone, Serialize)]
pub struct HandshakeRequest {
    pub protocol: &'static str,
    pub version: u32,
}

impl Default for HandshakeRequest {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL_NAME,
            version: PROTOCOL_VERSION,
        }
    }
}

/// Server reply to the handshake. An empty object means success.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default)]
    pub error: Option<String>,
}

/// Method call in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationMessage {
    /// Present when the caller expects a completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

/// Result of an invocation that carried an `invocationId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMessage {
    pub invocation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompletionMessage {
    /// The invocation outcome: the error string, or the result (`Null` for
    /// void methods).
    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Server-initiated close.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_reconnect: Option<bool>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation(InvocationMessage),
    Completion(CompletionMessage),
    Ping,
    Close(CloseMessage),
    /// Stream items, stream invocations, cancellations, and unknown types.
    Other(u64),
}

#[derive(Serialize)]
struct Typed<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(flatten)]
    body: &'a T,
}

impl HubMessage {
    /// Decode one frame (without its record separator).
    ///
    /// # Errors
    /// [`HubError::Protocol`] when the frame is not a JSON object with a
    /// numeric `type`, or its body does not match that type.
    pub fn decode(frame: &str) -> HubResult<Self> {
        let value: Value = serde_json::from_str(frame)?;
        let code = value
            .get("type")
            .and_then(Value::as_u64)
            .ok_or_else(|| HubError::Protocol {
                reason: format!("frame without numeric type: {frame}"),
            })?;

        let message = match MessageType::from_code(code) {
            Some(MessageType::Invocation) => Self::Invocation(serde_json::from_value(value)?),
            Some(MessageType::Completion) => Self::Completion(serde_json::from_value(value)?),
            Some(MessageType::Ping) => Self::Ping,
            Some(MessageType::Close) => Self::Close(serde_json::from_value(value)?),
            _ => Self::Other(code),
        };
        Ok(message)
    }

    /// Encode this frame as JSON, terminated by the record separator.
    ///
    /// # Errors
    /// [`HubError::Serialization`] if an argument cannot be serialized.
    pub fn encode(&self) -> HubResult<String> {
        let json = match self {
            Self::Invocation(body) => typed(MessageType::Invocation, body)?,
            Self::Completion(body) => typed(MessageType::Completion, body)?,
            Self::Close(body) => typed(MessageType::Close, body)?,
            Self::Ping => typed(MessageType::Ping, &serde_json::Map::new())?,
            Self::Other(code) => {
                return Err(HubError::Protocol {
                    reason: format!("cannot encode frame of type {code}"),
                });
            }
        };
        Ok(encode_frame(&json))
    }
}

fn typed<T: Serialize>(kind: MessageType, body: &T) -> HubResult<String> {
    Ok(serde_json::to_string(&Typed {
        kind: kind.code(),
        body,
    })?)
}

/// Append the record separator to a JSON frame.
pub fn encode_frame(json: &str) -> String {
    let mut frame = String::with_capacity(json.len() + 1);
    frame.push_str(json);
    frame.push(RECORD_SEPARATOR);
    frame
}

/// Split a WebSocket text payload into its frames.
///
/// A payload may carry several frames; trailing data without a separator
/// is ignored.
pub fn split_frames(payload: &str) -> impl Iterator<Item = &str> {
    let complete = payload
        .rfind(RECORD_SEPARATOR)
        .map_or("", |end| &payload[..end]);
    complete
        .split(RECORD_SEPARATOR)
        .filter(|frame| !frame.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handshake_request_shape() {
        let json = serde_json::to_string(&HandshakeRequest::default()).unwrap();
        assert_eq!(json, r#"{"protocol":"json","version":1}"#);
    }

    #[test]
    fn test_encode_invocation() {
        let frame = HubMessage::Invocation(InvocationMessage {
            invocation_id: Some("3".into()),
            target: "AcknowledgeCall".into(),
            arguments: vec![json!({"callId": 12})],
        })
        .encode()
        .unwrap();

        assert!(frame.ends_with(RECORD_SEPARATOR));
        let value: Value = serde_json::from_str(frame.trim_end_matches(RECORD_SEPARATOR)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": 1,
                "invocationId": "3",
                "target": "AcknowledgeCall",
                "arguments": [{"callId": 12}]
            })
        );
    }

    #[test]
    fn test_encode_ping() {
        assert_eq!(
            HubMessage::Ping.encode().unwrap(),
            format!("{{\"type\":6}}{RECORD_SEPARATOR}")
        );
    }

    #[test]
    fn test_decode_inbound_frames() {
        let msg = HubMessage::decode(r#"{"type":1,"target":"newCall","arguments":[{"id":5}]}"#)
            .unwrap();
        let HubMessage::Invocation(invocation) = msg else {
            panic!("expected invocation, got {msg:?}");
        };
        assert_eq!(invocation.target, "newCall");
        assert_eq!(invocation.invocation_id, None);
        assert_eq!(invocation.arguments, vec![json!({"id": 5})]);

        let msg = HubMessage::decode(r#"{"type":3,"invocationId":"1","result":[1,2]}"#).unwrap();
        let HubMessage::Completion(completion) = msg else {
            panic!("expected completion, got {msg:?}");
        };
        assert_eq!(completion.into_result(), Ok(json!([1, 2])));

        let msg = HubMessage::decode(r#"{"type":3,"invocationId":"2","error":"boom"}"#).unwrap();
        let HubMessage::Completion(completion) = msg else {
            panic!("expected completion, got {msg:?}");
        };
        assert_eq!(completion.into_result(), Err("boom".into()));

        assert_eq!(HubMessage::decode(r#"{"type":6}"#).unwrap(), HubMessage::Ping);
        assert_eq!(
            HubMessage::decode(r#"{"type":7,"error":"bye","allowReconnect":true}"#).unwrap(),
            HubMessage::Close(CloseMessage {
                error: Some("bye".into()),
                allow_reconnect: Some(true),
            })
        );
        assert_eq!(
            HubMessage::decode(r#"{"type":2,"invocationId":"1","item":1}"#).unwrap(),
            HubMessage::Other(2)
        );
    }

    #[test]
    fn test_decode_rejects_malformed_frames() {
        assert!(matches!(
            HubMessage::decode(r#"{"target":"x"}"#),
            Err(HubError::Protocol { .. })
        ));
        assert!(matches!(
            HubMessage::decode("not json"),
            Err(HubError::Serialization(_))
        ));
    }

    #[test]
    fn test_void_completion_is_null() {
        let completion = CompletionMessage {
            invocation_id: "9".into(),
            result: None,
            error: None,
        };
        assert_eq!(completion.into_result(), Ok(Value::Null));
    }

    #[test]
    fn test_split_frames() {
        let payload = format!("{{}}{RECORD_SEPARATOR}{{\"type\":6}}{RECORD_SEPARATOR}partial");
        let frames: Vec<&str> = split_frames(&payload).collect();
        assert_eq!(frames, vec!["{}", "{\"type\":6}"]);
        assert_eq!(split_frames("no separator").count(), 0);
    }
}
