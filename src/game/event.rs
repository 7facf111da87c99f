//! Game event bus
//!
//! Fire-and-forget notifications raised by the game loop. Events go to
//! two kinds of consumer:
//! - In-process listeners, called synchronously from the tick. The
//!   listener set can be replaced wholesale at runtime; dispatch always
//!   sees either the old set or the new one.
//! - Async subscribers on a tokio broadcast channel. Slow subscribers lag
//!   and lose events rather than stalling the tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

/// Something that happened in the world
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    /// A player finished logging in
    Login { player_index: u16, username: String },
    /// A player finished logging out
    Logout { player_index: u16, username: String },
}

impl GameEvent {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::Login { .. } => "login",
            GameEvent::Logout { .. } => "logout",
        }
    }
}

/// Synchronous event consumer
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &GameEvent);
}

impl<F> EventListener for F
where
    F: Fn(&GameEvent) + Send + Sync,
{
    fn on_event(&self, event: &GameEvent) {
        self(event)
    }
}

type ListenerSet = Vec<Arc<dyn EventListener>>;

/// Event bus shared by the world and its collaborators
pub struct EventBus {
    sender: broadcast::Sender<GameEvent>,
    listeners: RwLock<Arc<ListenerSet>>,
    dispatched: AtomicU64,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listeners: RwLock::new(Arc::new(Vec::new())),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Subscribe to every future event
    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.sender.subscribe()
    }

    /// Add a listener to the current set
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        let mut listeners = self.listeners.write();
        let mut next: ListenerSet = listeners.as_ref().clone();
        next.push(listener);
        *listeners = Arc::new(next);
    }

    /// Replace the whole listener set at once
    pub fn replace_listeners(&self, listeners: Vec<Arc<dyn EventListener>>) {
        *self.listeners.write() = Arc::new(listeners);
    }

    /// Number of installed listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Number of events dispatched so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Deliver an event to listeners and subscribers
    pub fn dispatch(&self, event: GameEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners.iter() {
            listener.on_event(&event);
        }

        trace!(event = event.name(), listeners = listeners.len(), "Dispatching event");
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .field("subscribers", &self.sender.receiver_count())
            .field("dispatched", &self.dispatched())
            .finish()
    }
}
