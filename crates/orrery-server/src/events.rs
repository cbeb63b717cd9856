use orrery_protocol::EventEnvelope;
use tokio::sync::broadcast;

/// Fan-out of galaxy events to in-process subscribers such as the news
/// writer. Events are persisted through the store before they are published.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Publish in order. Returns how many subscribers were listening.
    pub fn publish(&self, events: &[EventEnvelope]) -> usize {
        let mut listeners = 0;
        for event in events {
            // No subscribers is not an error.
            listeners = self.sender.send(event.clone()).unwrap_or(0);
        }
        listeners
    }
}
