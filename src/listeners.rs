use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Returned by [`Listeners::add`]; pass to [`Listeners::remove`] to unregister.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerHandle {
    event: String,
    id: u64,
}

impl ListenerHandle {
    pub fn event(&self) -> &str {
        &self.event
    }
}

/// Listeners keyed by event name.
pub struct Listeners<T> {
    inner: Mutex<Registry<T>>,
}

struct Registry<T> {
    next_id: u64,
    by_event: HashMap<String, Vec<(u64, Listener<T>)>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Listeners {
            inner: Mutex::new(Registry {
                next_id: 0,
                by_event: HashMap::new(),
            }),
        }
    }
}

impl<T> Listeners<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, event: &str, listener: impl Fn(&T) + Send + Sync + 'static) -> ListenerHandle {
        let listener: Listener<T> = Arc::new(listener);
        let mut registry = self.registry();
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .by_event
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        ListenerHandle {
            event: event.to_string(),
            id,
        }
    }

    /// Returns `false` if the listener was already removed.
    pub fn remove(&self, handle: &ListenerHandle) -> bool {
        let mut registry = self.registry();
        let Some(listeners) = registry.by_event.get_mut(&handle.event) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != handle.id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            registry.by_event.remove(&handle.event);
        }
        removed
    }

    pub fn remove_all(&self, event: &str) {
        self.registry().by_event.remove(event);
    }

    pub fn count(&self, event: &str) -> usize {
        self.registry().by_event.get(event).map_or(0, Vec::len)
    }

    /// Delivers `payload` to every listener registered for `event` and returns
    /// how many were called. Listeners run on the calling thread, outside the lock.
    pub fn notify(&self, event: &str, payload: &T) -> usize {
        let listeners: Vec<Listener<T>> = self
            .registry()
            .by_event
            .get(event)
            .map(|l| l.iter().map(|(_, f)| Arc::clone(f)).collect())
            .unwrap_or_default();
        for listener in &listeners {
            listener(payload);
        }
        listeners.len()
    }
}
