//! Storage bridge: make an external key-value store observable.
//!
//! The backing store (browser storage, a file, a test map) is opaque to
//! the engine. The bridge keeps one reactive version field per key in a
//! wrapped map: [`get`] reads the field so the calling effect subscribes
//! to the key, and [`set`]/[`external_change`] bump it inside a batch so
//! subscribers rerun. An ordinary consumer of `wrap`/`effect`/`batch`,
//! not a core primitive.
//!
//! [`get`]: StorageBridge::get
//! [`set`]: StorageBridge::set
//! [`external_change`]: StorageBridge::external_change

use parking_lot::Mutex;

use crate::container::Container;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::value::Value;

/// The external store the bridge sits in front of.
pub trait StorageBackend: Send {
    /// Read the current value for `key`, if present.
    fn load(&self, key: &str) -> Option<Value>;

    /// Write `value` under `key`.
    fn store(&mut self, key: &str, value: &Value);

    /// Delete `key`.
    fn erase(&mut self, key: &str);
}

/// Reactive facade over a [`StorageBackend`].
pub struct StorageBridge<B> {
    engine: Engine,
    backend: Mutex<B>,
    /// key -> change counter; the dependency surface of the bridge.
    versions: Container,
}

impl<B: StorageBackend> StorageBridge<B> {
    /// Put a reactive facade in front of `backend`.
    pub fn new(engine: &Engine, backend: B) -> Result<Self, EngineError> {
        Ok(Self {
            engine: engine.clone(),
            backend: Mutex::new(backend),
            versions: engine.wrap(Value::map())?,
        })
    }

    /// Read `key` from the backend. Inside an effect this subscribes the
    /// effect to the key's version field, so it reruns whenever the key
    /// changes, locally or externally. Absent keys are observable too.
    pub fn get(&self, key: &str) -> Option<Value> {
        let _ = self.versions.get(key);
        self.backend.lock().load(key)
    }

    /// Write `key` to the backend and notify its subscribers.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        self.backend.lock().store(key, &value);
        self.bump(key);
    }

    /// Delete `key` from the backend and notify its subscribers.
    pub fn remove(&self, key: &str) {
        self.backend.lock().erase(key);
        self.bump(key);
    }

    /// Feed an out-of-band change event (another tab, another process
    /// writing the store) into the dependency graph. The backend already
    /// holds the new value; only the notification is needed.
    pub fn external_change(&self, key: &str) {
        tracing::debug!(key, "external storage change");
        self.bump(key);
    }

    /// Bump the key's version field. The read is untracked so that a bump
    /// issued from inside an effect body does not subscribe that effect
    /// to its own write.
    fn bump(&self, key: &str) {
        self.engine.batch(|| {
            let current = self
                .engine
                .untracked(|| self.versions.get(key))
                .and_then(|entry| entry.as_i64())
                .unwrap_or(0);
            self.versions.set(key, current + 1);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct MapBackend {
        entries: HashMap<String, Value>,
    }

    impl StorageBackend for MapBackend {
        fn load(&self, key: &str) -> Option<Value> {
            self.entries.get(key).cloned()
        }

        fn store(&mut self, key: &str, value: &Value) {
            self.entries.insert(key.to_owned(), value.clone());
        }

        fn erase(&mut self, key: &str) {
            self.entries.remove(key);
        }
    }

    #[test]
    fn set_reruns_subscribers_of_that_key_only() {
        let engine = Engine::new();
        let bridge = Arc::new(StorageBridge::new(&engine, MapBackend::default()).unwrap());

        let theme_runs = Arc::new(AtomicUsize::new(0));
        let locale_runs = Arc::new(AtomicUsize::new(0));

        let b = bridge.clone();
        let runs = theme_runs.clone();
        let _theme = engine.effect(move || {
            let _ = b.get("theme");
            runs.fetch_add(1, Ordering::Relaxed);
        });
        let b = bridge.clone();
        let runs = locale_runs.clone();
        let _locale = engine.effect(move || {
            let _ = b.get("locale");
            runs.fetch_add(1, Ordering::Relaxed);
        });

        bridge.set("theme", "dark");
        assert_eq!(theme_runs.load(Ordering::Relaxed), 2);
        assert_eq!(locale_runs.load(Ordering::Relaxed), 1);
        assert_eq!(bridge.get("theme"), Some(Value::from("dark")));
    }

    #[test]
    fn external_change_is_observable() {
        let engine = Engine::new();
        let bridge = Arc::new(StorageBridge::new(&engine, MapBackend::default()).unwrap());
        bridge.set("shared", 1);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let b = bridge.clone();
        let seen_clone = seen.clone();
        let _watcher = engine.effect(move || {
            seen_clone.lock().push(b.get("shared"));
        });

        // Another writer updates the store behind the bridge's back, then
        // the change event arrives.
        bridge.backend.lock().entries.insert("shared".into(), Value::Int(2));
        bridge.external_change("shared");

        assert_eq!(
            *seen.lock(),
            vec![Some(Value::Int(1)), Some(Value::Int(2))]
        );
    }

    #[test]
    fn removal_notifies_and_absence_is_observable() {
        let engine = Engine::new();
        let bridge = Arc::new(StorageBridge::new(&engine, MapBackend::default()).unwrap());
        bridge.set("token", "abc");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let b = bridge.clone();
        let seen_clone = seen.clone();
        let _watcher = engine.effect(move || {
            seen_clone.lock().push(b.get("token").is_some());
        });

        bridge.remove("token");
        assert_eq!(*seen.lock(), vec![true, false]);

        // A key that never existed still subscribes and reacts.
        bridge.set("token", "def");
        assert_eq!(*seen.lock(), vec![true, false, true]);
    }
}
