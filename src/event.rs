//! Listener registration and event fan-out
//!
//! Every entity owns an [`Emitter`] for its event enum. Listeners run
//! synchronously, in registration order, on the thread that emits. Callers who
//! prefer a channel can [`Emitter::subscribe`] instead.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

/// Handle returned when registering a listener, used to remove it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listener<E> {
    id: ListenerId,
    once: bool,
    callback: Callback<E>,
}

struct EmitterState<E> {
    next_id: u64,
    listeners: Vec<Listener<E>>,
    subscribers: Vec<mpsc::UnboundedSender<E>>,
    closed: bool,
}

/// Synchronous event emitter
pub struct Emitter<E> {
    state: Mutex<EmitterState<E>>,
}

impl<E: Clone + Send + 'static> Emitter<E> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EmitterState {
                next_id: 1,
                listeners: Vec::new(),
                subscribers: Vec::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EmitterState<E>> {
        // Listeners never run under this lock.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, once: bool, callback: Callback<E>) -> ListenerId {
        let mut state = self.lock();
        let id = ListenerId(state.next_id);
        state.next_id += 1;
        if !state.closed {
            state.listeners.push(Listener { id, once, callback });
        }
        id
    }

    /// Register a listener invoked for every event
    pub fn on<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(false, Arc::new(f))
    }

    /// Register a listener invoked for the next event only
    pub fn once<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(true, Arc::new(f))
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut state = self.lock();
        let before = state.listeners.len();
        state.listeners.retain(|l| l.id != id);
        state.listeners.len() != before
    }

    /// Receive every future event on a channel
    ///
    /// The channel closes when the emitter is closed.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        if !state.closed {
            state.subscribers.push(tx);
        }
        rx
    }

    /// Deliver an event to all current listeners, then to subscribers
    pub fn emit(&self, event: E) {
        let callbacks: Vec<Callback<E>> = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            let callbacks = state
                .listeners
                .iter()
                .map(|l| Arc::clone(&l.callback))
                .collect();
            state.listeners.retain(|l| !l.once);
            state.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
            callbacks
        };

        for callback in callbacks {
            callback(&event);
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Drop every listener and subscriber; later emits are ignored
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.listeners.clear();
        state.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl<E: Clone + Send + 'static> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_in_registration_order() {
        let emitter = Emitter::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            emitter.on(move |v| seen.lock().unwrap().push(format!("{tag}{v}")));
        }

        emitter.emit(1);
        assert_eq!(*seen.lock().unwrap(), vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn test_once_fires_once() {
        let emitter = Emitter::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        emitter.once(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(());
        emitter.emit(());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_off_removes_listener() {
        let emitter = Emitter::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = emitter.on(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(emitter.off(id));
        assert!(!emitter.off(id));
        emitter.emit(());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_may_register_during_emit() {
        let emitter = Arc::new(Emitter::<u32>::new());
        let inner = Arc::clone(&emitter);
        emitter.once(move |_| {
            inner.on(|_| {});
        });

        emitter.emit(0);
        assert_eq!(emitter.listener_count(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_and_close() {
        let emitter = Emitter::<u32>::new();
        let mut rx = emitter.subscribe();

        emitter.emit(7);
        emitter.close();
        emitter.emit(8);

        assert_eq!(rx.recv().await, Some(7));
        assert_eq!(rx.recv().await, None);
        assert!(emitter.is_closed());
    }
}
