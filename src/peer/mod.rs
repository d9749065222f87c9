pub mod connection;
pub mod exchange;
pub mod ice;
pub mod state;
pub mod types;

pub use connection::Connection;
pub use state::{CallState, GRACE_PERIOD};
pub use types::{IceCandidate, ServerConfig};
