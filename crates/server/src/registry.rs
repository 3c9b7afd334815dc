//! Listener registry.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use storage::EventRecord;

/// Identity a listener registers under.
///
/// Anything comparable and cheap to clone works: a name, a numeric handle,
/// a connection id.
pub trait ListenerKey: PartialEq + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> ListenerKey for T where T: PartialEq + Clone + fmt::Debug + Send + Sync + 'static {}

/// Callback invoked once per dispatched event.
pub type Listener<K> = Arc<dyn Fn(&K, &EventRecord) + Send + Sync>;

/// Ordered `key -> callback` map behind a single lock.
///
/// Entries are kept in registration order. Re-registering a key replaces
/// its callback in place.
pub struct ListenerRegistry<K> {
    entries: Mutex<Vec<(K, Listener<K>)>>,
}

impl<K: ListenerKey> ListenerRegistry<K> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Insert or overwrite the callback for `key`. Always succeeds.
    pub fn register(&self, key: K, listener: Listener<K>) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = listener,
            None => entries.push((key, listener)),
        }
        true
    }

    /// Remove `key` if present. A missing key is not an error.
    pub fn unregister(&self, key: &K) -> bool {
        self.entries.lock().retain(|(k, _)| k != key);
        true
    }

    /// Copy of the current entries, in registration order.
    pub fn snapshot(&self) -> Vec<(K, Listener<K>)> {
        self.entries.lock().clone()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<K: ListenerKey> Default for ListenerRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}
