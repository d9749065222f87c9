//! duocall: two-party WebRTC calls signaled through a shared session
//! mailbox.
//!
//! The initiator creates a session in the mailbox and publishes an offer;
//! the joiner attaches with the session id and publishes the answer. ICE
//! candidates trickle through two per-role append-only collections. The
//! [`Connection`] state machine owns the transport and sequences the whole
//! exchange; [`StaticServer`](server::StaticServer) delivers the client
//! bundle.

pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod peer;
pub mod server;
pub mod signaling;
pub mod utils;

pub use config::{CallConfig, HttpConfig, DEFAULT_HTTP_PORT};
pub use error::CallError;
pub use events::{CallEvent, EventSink};
pub use media::{MediaSource, RemoteMedia, RenderSurface};
pub use peer::{CallState, Connection, IceCandidate, ServerConfig};
pub use signaling::{
    InMemoryMailbox, Role, SessionDescription, SessionDoc, SignalingMailbox,
};
