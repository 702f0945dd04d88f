//! In-memory configuration table with per-key watchers

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::{keys, ConfigError, ConfigEvent, ConfigSource, EventHandler, EventType};

/// Configuration table
///
/// Every write is delivered to the handlers watching that key, on the writer's
/// thread, after the value has been stored. Writes to the same key are
/// delivered in order, one at a time; different keys do not block each other.
///
/// # Example
///
/// ```
/// use querynode_pools::config::{ConfigSource, EventHandler, ParamTable};
///
/// let table = ParamTable::new();
/// table.watch("a.b", EventHandler::new("example", |event| {
///     println!("{} changed: {}", event.key, event.has_updated);
/// }));
///
/// table.set("a.b", "1");
/// assert_eq!(table.get("a.b").as_deref(), Some("1"));
/// ```
#[derive(Default)]
pub struct ParamTable {
    values: RwLock<HashMap<String, String>>,
    handlers: DashMap<String, Vec<EventHandler>>,
    dispatch_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ParamTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table holding the pool keys found in the environment
    ///
    /// See [`ParamTable::load_env`] for the variable naming.
    pub fn from_env() -> Self {
        let table = Self::new();
        table.load_env(keys::ALL);
        table
    }

    /// Environment variable that overrides `key`
    ///
    /// `queryNode.segcore.cgoPoolSizeRatio` maps to
    /// `QUERYNODE_SEGCORE_CGOPOOLSIZERATIO`.
    pub fn env_var_name(key: &str) -> String {
        key.replace('.', "_").to_uppercase()
    }

    /// Overlay values for `keys` from the environment
    ///
    /// Returns the number of keys found.
    pub fn load_env(&self, keys: &[&str]) -> usize {
        let mut loaded = 0;
        for key in keys {
            if let Ok(value) = env::var(Self::env_var_name(key)) {
                debug!(key, value = %value, "Loaded configuration from environment");
                self.set(key, value);
                loaded += 1;
            }
        }
        loaded
    }

    /// Write a value and notify the key's watchers
    pub fn set(&self, key: &str, value: impl Into<String>) -> ConfigEvent {
        let value = value.into();
        let lock = self.dispatch_lock(key);
        let _ordered = lock.lock();

        let previous = self.values.write().insert(key.to_string(), value.clone());
        let event = ConfigEvent {
            key: key.to_string(),
            has_updated: previous.as_deref() != Some(value.as_str()),
            event_type: if previous.is_some() {
                EventType::Update
            } else {
                EventType::Add
            },
            value: Some(value),
        };

        self.dispatch(&event);
        event
    }

    /// Remove a value and notify the key's watchers
    ///
    /// Returns `None` when the key was not set.
    pub fn remove(&self, key: &str) -> Option<ConfigEvent> {
        let lock = self.dispatch_lock(key);
        let _ordered = lock.lock();

        self.values.write().remove(key)?;
        let event = ConfigEvent {
            key: key.to_string(),
            value: None,
            event_type: EventType::Delete,
            has_updated: true,
        };

        self.dispatch(&event);
        Some(event)
    }

    /// Parse a value
    pub fn get_as<T: FromStr>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))?;
        value.trim().parse().map_err(|_| ConfigError::Parse {
            key: key.to_string(),
            value,
        })
    }

    /// Number of handlers watching a key
    pub fn handler_count(&self, key: &str) -> usize {
        self.handlers.get(key).map(|h| h.len()).unwrap_or(0)
    }

    fn dispatch_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.dispatch_locks
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    fn dispatch(&self, event: &ConfigEvent) {
        // Clone out so handlers may register watchers without deadlocking.
        let handlers = match self.handlers.get(&event.key) {
            Some(handlers) => handlers.clone(),
            None => return,
        };

        for handler in &handlers {
            trace!(
                key = %event.key,
                handler = handler.id(),
                has_updated = event.has_updated,
                "Dispatching configuration event"
            );
            handler.on_event(event);
        }
    }
}

impl ConfigSource for ParamTable {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn watch(&self, key: &str, handler: EventHandler) {
        debug!(key, handler = handler.id(), "Watching configuration key");
        self.handlers
            .entry(key.to_string())
            .or_default()
            .push(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    fn recording_handler(id: &str, events: &Arc<PlMutex<Vec<ConfigEvent>>>) -> EventHandler {
        let events = Arc::clone(events);
        EventHandler::new(id, move |event| events.lock().push(event.clone()))
    }

    #[test]
    fn test_set_and_get() {
        let table = ParamTable::new();
        assert!(table.get("a").is_none());

        table.set("a", "1");
        assert_eq!(table.get("a").as_deref(), Some("1"));
        assert_eq!(table.get_as::<i64>("a"), Ok(1));
    }

    #[test]
    fn test_get_as_errors() {
        let table = ParamTable::new();
        assert_eq!(
            table.get_as::<f64>("missing"),
            Err(ConfigError::MissingKey("missing".to_string()))
        );

        table.set("bad", "abc");
        assert_eq!(
            table.get_as::<f64>("bad"),
            Err(ConfigError::Parse {
                key: "bad".to_string(),
                value: "abc".to_string()
            })
        );
    }

    #[test]
    fn test_event_flags() {
        let table = ParamTable::new();

        let added = table.set("a", "1");
        assert_eq!(added.event_type, EventType::Add);
        assert!(added.has_updated);

        let same = table.set("a", "1");
        assert_eq!(same.event_type, EventType::Update);
        assert!(!same.has_updated);

        let changed = table.set("a", "2");
        assert!(changed.has_updated);

        let removed = table.remove("a").unwrap();
        assert_eq!(removed.event_type, EventType::Delete);
        assert!(removed.value.is_none());
        assert!(table.remove("a").is_none());
    }

    #[test]
    fn test_watchers_receive_every_write() {
        let table = ParamTable::new();
        let events = Arc::new(PlMutex::new(Vec::new()));
        table.watch("a", recording_handler("first", &events));
        table.watch("a", recording_handler("second", &events));
        table.watch("b", recording_handler("other", &events));

        table.set("a", "1");
        table.set("a", "1");

        let events = events.lock();
        assert_eq!(events.len(), 4);
        assert_eq!(events.iter().filter(|e| e.has_updated).count(), 2);
        assert!(events.iter().all(|e| e.key == "a"));
        assert_eq!(table.handler_count("a"), 2);
        assert_eq!(table.handler_count("b"), 1);
    }

    #[test]
    fn test_handler_sees_new_value() {
        let table = Arc::new(ParamTable::new());
        let seen = Arc::new(PlMutex::new(None));

        let reader = Arc::clone(&table);
        let sink = Arc::clone(&seen);
        table.watch(
            "a",
            EventHandler::new("reader", move |_| {
                *sink.lock() = reader.get("a");
            }),
        );

        table.set("a", "42");
        assert_eq!(seen.lock().as_deref(), Some("42"));
    }

    #[test]
    fn test_handler_may_register_watchers() {
        let table = Arc::new(ParamTable::new());
        let inner = Arc::clone(&table);
        table.watch(
            "a",
            EventHandler::new("registrar", move |_| {
                inner.watch("b", EventHandler::new("late", |_| {}));
            }),
        );

        table.set("a", "1");
        assert_eq!(table.handler_count("b"), 1);
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(
            ParamTable::env_var_name("queryNode.segcore.cgoPoolSizeRatio"),
            "QUERYNODE_SEGCORE_CGOPOOLSIZERATIO"
        );
    }

    #[test]
    fn test_load_env() {
        let key = "paramTableTest.loadEnv.value";
        std::env::set_var(ParamTable::env_var_name(key), "7");

        let table = ParamTable::new();
        assert_eq!(table.load_env(&[key, "paramTableTest.loadEnv.absent"]), 1);
        assert_eq!(table.get(key).as_deref(), Some("7"));

        std::env::remove_var(ParamTable::env_var_name(key));
    }
}
