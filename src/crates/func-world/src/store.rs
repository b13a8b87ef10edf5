//! A keyed value store paired with a change-notification channel per key.
//! Every `World` capability backed by "watch this key, read its value" (res
//! kind, str-map namespace, local value, fs path) is the same shape, so it's
//! factored out once here rather than repeated per capability — grounded in
//! the teacher's `Arc<RwLock<HashMap<..>>>` pattern
//! (`langgraph-checkpoint::InMemoryCheckpointSaver`), extended with a
//! `watch::Sender` per entry since this store additionally needs to notify
//! waiters instead of only being read back later.

use std::collections::HashMap;

use tokio::sync::{watch, RwLock};

struct Entry<V> {
    value: V,
    generation: u64,
    tx: watch::Sender<u64>,
}

pub struct Store<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
}

impl<V: Clone + Default> Store<V> {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.entries.read().await.get(key).map(|e| e.value.clone())
    }

    /// Overwrite `key`'s value and notify any open watchers.
    pub async fn set(&self, key: &str, value: V) {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: V::default(),
            generation: 0,
            tx: watch::channel(0).0,
        });
        entry.value = value;
        entry.generation += 1;
        let _ = entry.tx.send(entry.generation);
    }

    /// Mutate `key`'s value in place via `f`, notifying watchers afterward.
    pub async fn update(&self, key: &str, f: impl FnOnce(&mut V)) {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: V::default(),
            generation: 0,
            tx: watch::channel(0).0,
        });
        f(&mut entry.value);
        entry.generation += 1;
        let _ = entry.tx.send(entry.generation);
    }

    /// A receiver that resolves on the next write to `key` after this call.
    /// Lazily creates the key's slot (at its default value) if absent, so a
    /// watch established before any write still observes the first one.
    pub async fn watch(&self, key: &str) -> watch::Receiver<u64> {
        let mut entries = self.entries.write().await;
        entries
            .entry(key.to_string())
            .or_insert_with(|| Entry { value: V::default(), generation: 0, tx: watch::channel(0).0 })
            .tx
            .subscribe()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}

impl<V: Clone + Default> Default for Store<V> {
    fn default() -> Self {
        Self::new()
    }
}
