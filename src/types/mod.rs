// Public modules
pub mod handshake_descriptor;
pub mod inbound_message;
pub mod outbound_message;

// Re-exports
pub use handshake_descriptor::{
    DEFAULT_ENDPOINT_VALIDITY, HandshakeDescriptor, HandshakeResponse, SelfInfo, TeamInfo,
};
pub use inbound_message::InboundMessage;
pub use outbound_message::OutboundMessage;
