use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 16;

/// Authentication state changes, published by whichever shell drives the
/// OAuth flow and consumed by the timer service's scope listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn { user_id: String },
    SignedOut,
}

/// Typed publish/subscribe channel for [`AuthEvent`]s.
#[derive(Debug)]
pub struct AuthEventBus {
    sender: broadcast::Sender<AuthEvent>,
}

impl AuthEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publishing without subscribers is not an error; the event is simply
    /// dropped.
    pub fn publish(&self, event: AuthEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.sender.subscribe()
    }
}

impl Default for AuthEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = AuthEventBus::new();
        let mut receiver = bus.subscribe();

        bus.publish(AuthEvent::SignedIn {
            user_id: "user-1".to_string(),
        });
        bus.publish(AuthEvent::SignedOut);

        assert_eq!(
            receiver.recv().await.expect("first event"),
            AuthEvent::SignedIn {
                user_id: "user-1".to_string()
            }
        );
        assert_eq!(
            receiver.recv().await.expect("second event"),
            AuthEvent::SignedOut
        );
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let bus = AuthEventBus::new();
        bus.publish(AuthEvent::SignedOut);
    }
}
