//! Event dispatch
//!
//! Components publish a closed enum of events through an [`EventBus`].
//! Listeners registered with [`EventBus::on`] run synchronously, in
//! registration order, on the emitting task; they see every event exactly
//! once and must not block. Async observers use [`EventBus::subscribe`] and
//! receive clones through a tokio broadcast channel.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Identifier returned by [`EventBus::on`], used to remove a listener
pub type ListenerId = u64;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Events that carry a stable wire name such as `agent:connected`
pub trait NamedEvent {
    fn event_name(&self) -> &'static str;
}

/// Publish/subscribe hub for one component's events
pub struct EventBus<E> {
    component: &'static str,
    listeners: RwLock<Vec<(ListenerId, Listener<E>)>>,
    next_listener_id: AtomicU64,
    sender: broadcast::Sender<E>,
}

impl<E> EventBus<E>
where
    E: NamedEvent + Clone + Send + 'static,
{
    /// Create a bus whose broadcast channel buffers `capacity` events
    pub fn new(component: &'static str, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            component,
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            sender,
        }
    }

    /// Register a synchronous listener
    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Receive events asynchronously
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Dispatch an event to every listener, then to broadcast receivers.
    ///
    /// The listener table is snapshotted first, so a listener may register
    /// or remove listeners without deadlocking.
    pub fn emit(&self, event: E) {
        trace!(component = self.component, event = event.event_name(), "emit");
        let listeners: Vec<Listener<E>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }
        // No receivers is not an error
        let _ = self.sender.send(event);
    }

    /// Number of synchronous listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Drop every synchronous listener
    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Ping {
        One,
        Two,
    }

    impl NamedEvent for Ping {
        fn event_name(&self) -> &'static str {
            match self {
                Ping::One => "ping:one",
                Ping::Two => "ping:two",
            }
        }
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let bus = EventBus::new("test", 8);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        bus.on(move |e: &Ping| first.lock().push(("first", e.clone())));
        let second = seen.clone();
        bus.on(move |e: &Ping| second.lock().push(("second", e.clone())));

        bus.emit(Ping::One);
        assert_eq!(
            *seen.lock(),
            vec![("first", Ping::One), ("second", Ping::One)]
        );
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let bus = EventBus::new("test", 8);
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        let id = bus.on(move |_: &Ping| *counter.lock() += 1);

        bus.emit(Ping::One);
        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit(Ping::Two);

        assert_eq!(*count.lock(), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_receivers_get_clones() {
        let bus = EventBus::new("test", 8);
        let mut rx = bus.subscribe();
        bus.emit(Ping::Two);
        assert_eq!(rx.recv().await.unwrap(), Ping::Two);
    }
}
