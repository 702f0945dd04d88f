//! The named pools and their per-kind policies

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::keys;
use crate::executor::{AffinityHook, PoolOptions};

/// Named worker pools
///
/// Search and query run on their own pool so that loads, deletes and other
/// native calls cannot starve them under heavy traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// Search and query execution
    Search,
    /// Miscellaneous dynamic native operations
    Dynamic,
    /// Segment and index loading
    Load,
}

/// When workers run their affinity hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupPolicy {
    /// All workers spin up and run the hook before the pool is published,
    /// and again for new workers after every resize
    Eager,
    /// Each worker runs the hook right before its first task
    Lazy,
}

impl PoolKind {
    /// Every kind, in registry slot order
    pub const ALL: [PoolKind; 3] = [PoolKind::Search, PoolKind::Dynamic, PoolKind::Load];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Search => 0,
            Self::Dynamic => 1,
            Self::Load => 2,
        }
    }

    /// Tag used in logs and as the worker thread name prefix
    pub fn tag(self) -> &'static str {
        match self {
            Self::Search => "SQPool",
            Self::Dynamic => "DynamicPool",
            Self::Load => "LoadPool",
        }
    }

    pub fn warmup_policy(self) -> WarmupPolicy {
        match self {
            Self::Search => WarmupPolicy::Eager,
            Self::Dynamic | Self::Load => WarmupPolicy::Lazy,
        }
    }

    /// Whether idle workers are kept forever
    pub fn purge_disabled(self) -> bool {
        matches!(self, Self::Search)
    }

    /// Configuration keys feeding this kind's size formula
    pub fn watched_keys(self) -> &'static [&'static str] {
        match self {
            Self::Search => &[keys::MAX_READ_CONCURRENCY, keys::CGO_POOL_SIZE_RATIO],
            Self::Dynamic => &[],
            Self::Load => &[keys::MIDDLE_PRIORITY_THREAD_CORE_COEFFICIENT],
        }
    }

    /// Identifier of the change handler registered for `key`
    pub fn handler_id(self, key: &str) -> String {
        format!("querynode.{}.resize:{}", self, key)
    }

    /// Executor options for this kind
    ///
    /// Pre-allocation is always off so the pool can be resized later. Lazy
    /// kinds get `hook` as the per-worker pre-handler; eager kinds receive it
    /// through warm-up instead.
    pub fn pool_options(self, hook: &AffinityHook, expiry: Duration) -> PoolOptions {
        let options = PoolOptions::new()
            .with_pre_alloc(false)
            .with_disable_purge(self.purge_disabled())
            .with_expiry_duration(expiry);

        match self.warmup_policy() {
            WarmupPolicy::Eager => options,
            WarmupPolicy::Lazy => options.with_pre_handler(hook.clone()),
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Search => write!(f, "search"),
            Self::Dynamic => write!(f, "dynamic"),
            Self::Load => write!(f, "load"),
        }
    }
}
