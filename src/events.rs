//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! Services publish an [`AppEvent`] after every state change they commit;
//! anything holding a receiver (the statistics refresher, the invoice
//! book) reacts by re-fetching or resetting what it caches.

use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    UserAuthenticated { user_id: String },
    UserLoggedOut,
    InvoiceCreated { invoice_id: String },
    InvoiceDeleted { invoice_id: String },
    InvoicesRefreshed,
    ProjectUpdated { project_id: Uuid },
    ProjectsRefreshed,
    DashboardRefresh,
}

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out bus. Every subscriber receives every event published after it
/// subscribed.
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl EventBus {
    /// When the buffer is full the oldest unread events are dropped and
    /// slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: AppEvent) {
        tracing::debug!(?event, "Publishing event");
        // A send error only means nobody is listening.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Drains everything currently buffered for `rx`. Handy for callers (and
/// tests) that want to look at what a synchronous operation published.
pub fn drain(rx: &mut broadcast::Receiver<AppEvent>) -> Vec<AppEvent> {
    let mut events = vec![];
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event receiver lagged");
            }
            Err(_) => break,
        }
    }
    events
}
