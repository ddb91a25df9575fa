use bytes::Bytes;
use guibridge_frame::{Frame, TypeTag};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Control event: device greeting sent as soon as a client connects.
pub const EVENT_CONNECTION: &str = "connection";
/// Control event: client acknowledgement of the greeting.
pub const EVENT_CONNECTION_REPLY: &str = "connection-reply";
/// Control event: liveness check.
pub const EVENT_PING: &str = "ping";
/// Control event: liveness check answer, echoes the ping `id`.
pub const EVENT_PONG: &str = "pong";

/// Session control message carried as a JSON frame on the control channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlMessage {
    pub event: String,
    #[serde(
        rename = "projectName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub project_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ControlMessage {
    fn event(event: &str) -> Self {
        Self {
            event: event.to_string(),
            project_name: None,
            protocol: None,
            version: None,
            id: None,
            payload: None,
        }
    }

    /// Device greeting.
    pub fn connection(project_name: Option<&str>, protocol: &str, version: &str) -> Self {
        Self {
            project_name: project_name.map(str::to_string),
            protocol: Some(protocol.to_string()),
            version: Some(version.to_string()),
            ..Self::event(EVENT_CONNECTION)
        }
    }

    /// Client acknowledgement of the greeting.
    pub fn connection_reply(protocol: &str, version: &str) -> Self {
        Self {
            protocol: Some(protocol.to_string()),
            version: Some(version.to_string()),
            ..Self::event(EVENT_CONNECTION_REPLY)
        }
    }

    pub fn ping(id: u64) -> Self {
        Self {
            id: Some(id),
            ..Self::event(EVENT_PING)
        }
    }

    pub fn pong(id: Option<u64>) -> Self {
        Self {
            id,
            ..Self::event(EVENT_PONG)
        }
    }

    pub fn is(&self, event: &str) -> bool {
        self.event == event
    }

    /// Wrap the message in a JSON frame on `channel`.
    pub fn to_frame(&self, channel: &str) -> Result<Frame> {
        let payload = serde_json::to_vec(self)?;
        Ok(Frame::new(channel, 0, TypeTag::Json, Bytes::from(payload)))
    }

    /// Parse a JSON frame. Returns `None` for numeric frames.
    pub fn from_frame(frame: &Frame) -> Option<Result<Self>> {
        if frame.tag != TypeTag::Json {
            return None;
        }
        Some(serde_json::from_slice(&frame.payload).map_err(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_uses_camel_case_project_name() {
        let msg = ControlMessage::connection(Some("scope"), "guibridge", "1.0");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["event"], "connection");
        assert_eq!(json["projectName"], "scope");
        assert!(json.get("id").is_none());
    }

    #[test]
    fn parses_minimal_device_greeting() {
        let frame = Frame::new("gui_control", 0, TypeTag::Json, &br#"{"event":"connection"}"#[..]);
        let msg = ControlMessage::from_frame(&frame).unwrap().unwrap();
        assert!(msg.is(EVENT_CONNECTION));
        assert_eq!(msg.project_name, None);
        assert_eq!(msg.protocol, None);
    }

    #[test]
    fn numeric_frames_are_not_control_messages() {
        let frame = Frame::new("gui_control", 0, TypeTag::Int32, &[0u8; 4][..]);
        assert!(ControlMessage::from_frame(&frame).is_none());
    }

    #[test]
    fn ping_pong_frames() {
        let frame = ControlMessage::ping(7).to_frame("gui_control").unwrap();
        assert_eq!(frame.tag, TypeTag::Json);
        assert_eq!(frame.index, 0);
        let msg = ControlMessage::from_frame(&frame).unwrap().unwrap();
        assert_eq!(msg, ControlMessage::ping(7));
        assert_eq!(ControlMessage::pong(msg.id).id, Some(7));
    }
}
