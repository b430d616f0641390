use std::sync::Arc;

use tokio::sync::broadcast;

use parley_types::events::ChatEvent;

/// Fan-out point between mutation handlers and connected clients.
///
/// Handlers broadcast a [`ChatEvent`] after every write; each WebSocket
/// connection holds a receiver and forwards the events its client is
/// subscribed to. This is the whole reactivity story: events are
/// invalidation signals and clients re-run the affected reads.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<ChatEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to chat events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients. Dropped silently when
    /// nobody is listening.
    pub fn broadcast(&self, event: ChatEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
