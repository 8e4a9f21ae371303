use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One event received over the live stream.
///
/// Every field defaults when absent so that acknowledgements (`reply_to`) and
/// control events such as `hello` decode alongside ordinary messages.  A frame
/// that is not a JSON object of this shape fails to decode.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundMessage {
    /// The event type, e.g. `message`, `hello` or `pong`.
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub channel: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub text: String,

    /// Gateway timestamp, an opaque string.
    #[serde(rename = "ts", default)]
    pub timestamp: String,

    /// Identifier of the outbound message this event acknowledges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<u64>,

    /// Whether the acknowledged outbound message was accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
}

impl InboundMessage {
    /// Create a `message` event.
    pub fn new(
        channel: impl Into<String>,
        user: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            kind: "message".to_string(),
            channel: channel.into(),
            user: user.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    /// Set the gateway timestamp.
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Decode one text frame.
    pub fn decode(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(|e| {
            Error::protocol(
                format!("malformed inbound frame: {e}"),
                Some(Box::new(e)),
            )
        })
    }

    /// Returns true if this is an acknowledgement of an outbound message.
    pub fn is_reply(&self) -> bool {
        self.reply_to.is_some()
    }
}
