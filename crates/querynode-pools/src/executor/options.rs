//! Worker pool construction options

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::affinity::AffinityHook;

/// Options applied when an executor is constructed
///
/// # Example
///
/// ```
/// use querynode_pools::executor::{AffinityHook, PoolOptions};
/// use std::time::Duration;
///
/// let options = PoolOptions::default()
///     .with_disable_purge(true)
///     .with_expiry_duration(Duration::from_secs(5))
///     .with_pre_handler(AffinityHook::pin_thread());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolOptions {
    /// Spawn every worker up front. A pre-allocated pool cannot be resized.
    pub pre_alloc: bool,

    /// Never reclaim idle workers
    pub disable_purge: bool,

    /// How long a worker may stay idle before it is reclaimed
    #[serde(with = "duration_millis")]
    pub expiry_duration: Duration,

    /// Hook each worker runs once, right before its first task
    #[serde(skip)]
    pub pre_handler: Option<AffinityHook>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            pre_alloc: false,
            disable_purge: false,
            expiry_duration: Duration::from_secs(1),
            pre_handler: None,
        }
    }
}

impl PoolOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn all workers at construction time
    pub fn with_pre_alloc(mut self, pre_alloc: bool) -> Self {
        self.pre_alloc = pre_alloc;
        self
    }

    /// Keep idle workers alive forever
    pub fn with_disable_purge(mut self, disable: bool) -> Self {
        self.disable_purge = disable;
        self
    }

    /// Set the idle worker expiry
    pub fn with_expiry_duration(mut self, expiry: Duration) -> Self {
        self.expiry_duration = expiry.max(Duration::from_millis(1));
        self
    }

    /// Set the hook each worker runs before its first task
    pub fn with_pre_handler(mut self, hook: AffinityHook) -> Self {
        self.pre_handler = Some(hook);
        self
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = PoolOptions::default();
        assert!(!options.pre_alloc);
        assert!(!options.disable_purge);
        assert_eq!(options.expiry_duration, Duration::from_secs(1));
        assert!(options.pre_handler.is_none());
    }

    #[test]
    fn test_options_builder() {
        let options = PoolOptions::new()
            .with_pre_alloc(true)
            .with_disable_purge(true)
            .with_expiry_duration(Duration::ZERO)
            .with_pre_handler(AffinityHook::new("noop", || {}));

        assert!(options.pre_alloc);
        assert!(options.disable_purge);
        assert_eq!(options.expiry_duration, Duration::from_millis(1));
        assert_eq!(options.pre_handler.map(|h| h.name()), Some("noop"));
    }

    #[test]
    fn test_serialization_skips_hook() {
        let options = PoolOptions::default()
            .with_disable_purge(true)
            .with_pre_handler(AffinityHook::pin_thread());

        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["disable_purge"], true);
        assert_eq!(json["expiry_duration"], 1000);
        assert!(json.get("pre_handler").is_none());

        let parsed: PoolOptions = serde_json::from_value(json).unwrap();
        assert!(parsed.disable_purge);
        assert!(parsed.pre_handler.is_none());
    }
}
