use std::sync::Mutex;
use std::time::Duration;

/// How long a Disconnected/Failed transport may linger before the connection
/// gives up on recovery.
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Lifecycle states of a call attempt. `Closed` is terminal and reachable
/// from any state via hang-up or a fatal transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    MediaAcquired,
    TransportCreated,
    OfferSent,
    AnswerSent,
    Connected,
    Closed,
}

/// Shared state cell. Once `Closed`, no further transition is accepted.
#[derive(Debug)]
pub struct StateCell(Mutex<CallState>);

impl StateCell {
    pub fn new() -> Self {
        Self(Mutex::new(CallState::Idle))
    }

    pub fn get(&self) -> CallState {
        *self.0.lock().unwrap()
    }

    /// Moves to `next` unless already closed. Returns whether the transition
    /// was taken.
    pub fn advance(&self, next: CallState) -> bool {
        let mut current = self.0.lock().unwrap();
        if *current == CallState::Closed {
            return false;
        }
        *current = next;
        true
    }

    /// Moves to `to` only when currently in `from`. Used where a transport
    /// callback may have raced ahead of the caller.
    pub fn advance_from(&self, from: CallState, to: CallState) -> bool {
        let mut current = self.0.lock().unwrap();
        if *current != from {
            return false;
        }
        *current = to;
        true
    }

    pub fn close(&self) {
        *self.0.lock().unwrap() = CallState::Closed;
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_terminal() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), CallState::Idle);
        assert!(cell.advance(CallState::MediaAcquired));
        assert!(cell.advance(CallState::TransportCreated));
        cell.close();
        assert!(!cell.advance(CallState::Connected));
        assert_eq!(cell.get(), CallState::Closed);
    }
}
