use tokio::sync::broadcast::{self, Receiver};

use crate::models::User;

/// Events are buffered per subscriber up to this many before it lags.
const EVENT_BUFFER_SIZE: usize = 32;

/// Session lifecycle notifications for the hosting application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Login or startup restoration produced a session
    LoggedIn(User),
    /// A renewal rotated in a new credential pair
    Refreshed,
    /// The user asked to end the session
    LoggedOut,
    /// Renewal failed and the session was torn down; the host should send the
    /// user back to login
    Terminated { reason: String },
}

/// Broadcast channel shared by the coordinator and the session controller.
#[derive(Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { sender }
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_future_events_only() {
        let events = SessionEvents::new();
        events.emit(SessionEvent::Refreshed);

        let mut rx = events.subscribe();
        events.emit(SessionEvent::Terminated {
            reason: "revoked".into(),
        });

        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Terminated {
                reason: "revoked".into()
            }
        );
    }
}
