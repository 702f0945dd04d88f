//! Configuration source and change notification
//!
//! This module provides:
//! - [`ConfigSource`] - read values and watch keys for changes
//! - [`ParamTable`] - in-memory source with environment overlay
//! - [`PoolParams`] - typed snapshot of the values pool sizing reads
//! - [`keys`] - the configuration keys consumed by the pools

mod param_table;
mod params;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use param_table::ParamTable;
pub use params::{keys, PoolParams};

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Key has no value and no default
    #[error("configuration key not set: {0}")]
    MissingKey(String),

    /// Value could not be parsed as the requested type
    #[error("invalid value for {key}: {value:?}")]
    Parse { key: String, value: String },
}

/// Kind of change a [`ConfigEvent`] describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Key was set for the first time
    Add,
    /// Key was overwritten
    Update,
    /// Key was removed
    Delete,
}

/// Notification delivered to watchers of a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEvent {
    /// Key that was written
    pub key: String,

    /// New value, `None` after a delete
    pub value: Option<String>,

    /// What happened to the key
    pub event_type: EventType,

    /// Whether the value differs from the previously observed one
    pub has_updated: bool,
}

impl ConfigEvent {
    /// Event for a key whose value changed
    pub fn updated(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            event_type: EventType::Update,
            has_updated: true,
        }
    }

    /// Event for a write that left the value as it was
    pub fn unchanged(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            event_type: EventType::Update,
            has_updated: false,
        }
    }
}

/// Named callback registered for a configuration key
#[derive(Clone)]
pub struct EventHandler {
    id: String,
    callback: Arc<dyn Fn(&ConfigEvent) + Send + Sync>,
}

impl EventHandler {
    /// Create a handler
    pub fn new<F>(id: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&ConfigEvent) + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            callback: Arc::new(callback),
        }
    }

    /// Handler identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Deliver an event
    pub fn on_event(&self, event: &ConfigEvent) {
        (self.callback)(event)
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler").field("id", &self.id).finish()
    }
}

/// Source of live configuration values
///
/// Reads must be cheap, in-memory lookups. Implementations deliver events for
/// a given key one at a time; events for different keys may be delivered
/// concurrently.
pub trait ConfigSource: Send + Sync {
    /// Current raw value of a key
    fn get(&self, key: &str) -> Option<String>;

    /// Register a handler invoked on every write to `key`
    ///
    /// Handlers stay registered for the lifetime of the source.
    fn watch(&self, key: &str, handler: EventHandler);
}
