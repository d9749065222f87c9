use thiserror::Error;

/// Errors surfaced by call setup and signaling.
///
/// Disconnected-but-not-failed transport states are not errors; they are
/// reported through the event sink as advisory status.
#[derive(Debug, Error)]
pub enum CallError {
    /// The platform refused camera/microphone access. Not retryable without
    /// a new user gesture.
    #[error("camera/microphone access denied: {0}")]
    MediaAccessDenied(String),

    /// The joiner supplied an identifier the mailbox does not know.
    #[error("session \"{0}\" not found")]
    SessionNotFound(String),

    /// The session exists but carries no offer yet.
    #[error("session \"{0}\" has no offer")]
    OfferMissing(String),

    /// The underlying transport failed in a way that requires a full
    /// teardown and a fresh start.
    #[error("transport failure: {0}")]
    TransportFatal(#[from] webrtc::Error),

    /// The signaling store is unreachable. No automatic retry; signaling is
    /// short-lived per call attempt.
    #[error("signaling mailbox unavailable: {0}")]
    MailboxUnavailable(String),

    /// A session description could not be parsed or converted.
    #[error("malformed session description: {0}")]
    InvalidDescription(String),

    /// An ICE server entry failed validation.
    #[error("invalid ice server config: {0}")]
    InvalidIceServer(String),

    /// The operation is not valid in the connection's current state.
    #[error("invalid connection state: {0}")]
    InvalidState(String),
}
