//! Usage: Session invalidation broadcast (decouples the gateway from UI state).

use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session is no longer valid; consumers should drop in-memory user
    /// state and fall back to an unauthenticated view.
    LoggedOut,
}

/// Application-wide session event bus. The gateway and refresh coordinator
/// publish; the auth context (and any route-guard layer above it) subscribes.
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Emits the logged-out signal. Never fails: with no subscribers yet
    /// (e.g. during initial load) the event is simply dropped.
    pub fn notify_logged_out(&self) {
        let _ = self.sender.send(SessionEvent::LoggedOut);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}
