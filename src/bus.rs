//! Typed in-process message bus.
//!
//! Listeners register a predicate and a handler; `publish` delivers a message
//! to every listener whose predicate accepts it. Both the sign-in handshake and
//! the push connection route their inbound traffic through a bus, so listener
//! lifetime is explicit and observable.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by [`MessageBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener<T> {
    id: ListenerId,
    predicate: Predicate<T>,
    handler: Handler<T>,
}

struct BusInner<T> {
    next_id: u64,
    listeners: Vec<Listener<T>>,
}

pub struct MessageBus<T> {
    inner: Arc<Mutex<BusInner<T>>>,
}

impl<T> Clone for MessageBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for MessageBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MessageBus<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe<P, H>(&self, predicate: P, handler: H) -> ListenerId
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
        H: Fn(&T) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        inner.listeners.push(Listener {
            id,
            predicate: Arc::new(predicate),
            handler: Arc::new(handler),
        });
        id
    }

    /// Returns `false` when the listener was already gone.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut inner = self.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|l| l.id != id);
        inner.listeners.len() != before
    }

    /// Deliver `message` to every matching listener and return how many ran.
    ///
    /// Handlers run after the bus lock is released, so a handler may
    /// subscribe or unsubscribe listeners (including itself).
    pub fn publish(&self, message: &T) -> usize {
        let matched: Vec<Handler<T>> = {
            let inner = self.lock();
            inner
                .listeners
                .iter()
                .filter(|l| (l.predicate)(message))
                .map(|l| Arc::clone(&l.handler))
                .collect()
        };

        for handler in &matched {
            handler(message);
        }
        matched.len()
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn is_subscribed(&self, id: ListenerId) -> bool {
        self.lock().listeners.iter().any(|l| l.id == id)
    }
}
