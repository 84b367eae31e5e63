//! Fire-and-forget event broadcast.
//!
//! After every handled hook, the `(event, response)` pair goes out on a
//! broadcast channel for WebSocket subscribers and in-process
//! observers. Delivery is best-effort and unordered with respect to
//! other events; a send failure (no receivers, lagging receivers) is
//! logged at trace level and can never alter the hook response.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

use gobby_core::{HookEvent, HookResponse};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A broadcast `(event, response)` pair.
pub type HookNotice = Arc<(HookEvent, HookResponse)>;

/// Broadcast fan-out for handled hooks.
#[derive(Debug, Clone)]
pub struct HookBroadcaster {
    sender: broadcast::Sender<HookNotice>,
}

impl HookBroadcaster {
    /// New broadcaster with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// New broadcaster with explicit capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a pair. Returns how many receivers got it; zero (or a
    /// closed channel) is fine.
    pub fn publish(&self, event: HookEvent, response: HookResponse) -> usize {
        let event_type = event.event_type;
        match self.sender.send(Arc::new((event, response))) {
            Ok(count) => count,
            Err(_) => {
                trace!(event_type = %event_type, "no receivers for hook broadcast");
                0
            }
        }
    }

    /// Subscribe to future pairs.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HookNotice> {
        self.sender.subscribe()
    }

    /// Current receiver count.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for HookBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gobby_core::{HookEventType, SessionSource};

    fn pair() -> (HookEvent, HookResponse) {
        (
            HookEvent::new(HookEventType::AfterTool, "ext", SessionSource::Claude),
            HookResponse::allow(),
        )
    }

    #[tokio::test]
    async fn test_publish_without_receivers_is_fine() {
        let broadcaster = HookBroadcaster::new();
        let (event, response) = pair();
        assert_eq!(broadcaster.publish(event, response), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_pair() {
        let broadcaster = HookBroadcaster::new();
        let mut receiver = broadcaster.subscribe();
        let (event, response) = pair();
        assert_eq!(broadcaster.publish(event, response), 1);

        let notice = receiver.recv().await.unwrap();
        assert_eq!(notice.0.event_type, HookEventType::AfterTool);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let broadcaster = HookBroadcaster::new();
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();
        let (event, response) = pair();
        assert_eq!(broadcaster.publish(event, response), 2);
        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
    }
}
