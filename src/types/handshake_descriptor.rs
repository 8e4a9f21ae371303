use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How long the gateway honors a stream endpoint after the handshake.
pub const DEFAULT_ENDPOINT_VALIDITY: Duration = Duration::from_secs(30);

/// The session descriptor produced by a successful handshake.
///
/// A descriptor is single-use: [`Upgrader::upgrade`](crate::Upgrader::upgrade)
/// dials it once and the resulting session takes ownership of its identity.
/// Its stream endpoint is only honored for a short window after `issued_at`;
/// see [`is_expired`](Self::is_expired).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeDescriptor {
    /// Always true for a descriptor that reached the caller.
    pub ok: bool,

    /// Identifier of the authenticated user.
    pub self_id: String,

    /// Display name of the authenticated user.
    pub self_name: String,

    /// Identifier of the team (workspace).
    pub team_id: String,

    /// Domain of the team.
    pub team_domain: String,

    /// Display name of the team.
    pub team_name: String,

    /// One-time WebSocket endpoint.
    pub stream_endpoint: String,

    /// When the handshake response was decoded.
    pub issued_at: Instant,
}

impl HandshakeDescriptor {
    /// Time elapsed since the handshake completed.
    pub fn age(&self) -> Duration {
        self.issued_at.elapsed()
    }

    /// Returns true once the endpoint can no longer be dialed.
    pub fn is_expired(&self, validity: Duration) -> bool {
        self.age() >= validity
    }

    /// Time left before the endpoint expires, or zero.
    pub fn remaining(&self, validity: Duration) -> Duration {
        validity.saturating_sub(self.age())
    }
}

/// Identity of the authenticated user as returned by the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelfInfo {
    pub id: Option<String>,
    pub name: Option<String>,
}

/// Team metadata as returned by the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamInfo {
    pub id: Option<String>,
    pub domain: Option<String>,
    pub name: Option<String>,
}

/// The raw handshake response body.
///
/// Every field but `ok` is optional on the wire because a rejected handshake
/// only carries `ok` and `error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, rename = "self", skip_serializing_if = "Option::is_none")]
    pub self_info: Option<SelfInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<TeamInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl HandshakeResponse {
    /// Validate the response and turn it into a descriptor.
    ///
    /// `ok == false` yields [`Error::Auth`] carrying the gateway's `error`
    /// field; an accepted response missing any identity field or the stream
    /// endpoint yields [`Error::Protocol`].
    pub fn into_descriptor(self, issued_at: Instant) -> Result<HandshakeDescriptor> {
        if !self.ok {
            let reason = self.error.unwrap_or_else(|| "rejected".to_string());
            return Err(Error::auth("handshake rejected", Some(reason)));
        }
        let self_info = self.self_info.unwrap_or_default();
        let team = self.team.unwrap_or_default();
        Ok(HandshakeDescriptor {
            ok: true,
            self_id: required(self_info.id, "self.id")?,
            self_name: required(self_info.name, "self.name")?,
            team_id: required(team.id, "team.id")?,
            team_domain: required(team.domain, "team.domain")?,
            team_name: required(team.name, "team.name")?,
            stream_endpoint: required(self.url, "url")?,
            issued_at,
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    value.ok_or_else(|| {
        Error::protocol(
            format!("handshake response is missing `{field}`"),
            None,
        )
    })
}
