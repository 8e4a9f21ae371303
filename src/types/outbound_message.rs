use serde::{Deserialize, Serialize};

/// One event written to the live stream.
///
/// The gateway requires every outbound event to carry an `id` unique within
/// the session; acknowledgements echo it back as `reply_to`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundMessage {
    pub id: u64,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl OutboundMessage {
    /// A `message` event, optionally addressed to a channel.
    pub fn message(id: u64, channel: Option<String>, text: impl Into<String>) -> Self {
        Self {
            id,
            kind: "message".to_string(),
            channel,
            text: Some(text.into()),
        }
    }

    /// A `ping` keep-alive.
    pub fn ping(id: u64) -> Self {
        Self {
            id,
            kind: "ping".to_string(),
            channel: None,
            text: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_value};

    #[test]
    fn message_wire_shape() {
        let message = OutboundMessage::message(1, Some("C024BE91L".to_string()), "Hello world");
        assert_eq!(
            to_value(&message).unwrap(),
            json!({"id": 1, "type": "message", "channel": "C024BE91L", "text": "Hello world"})
        );
    }

    #[test]
    fn ping_omits_channel_and_text() {
        assert_eq!(
            to_value(OutboundMessage::ping(7)).unwrap(),
            json!({"id": 7, "type": "ping"})
        );
    }
}
