//! Typed view of the configuration values pool sizing depends on

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::ConfigSource;

/// Configuration keys consumed by the pools
pub mod keys {
    /// Maximum number of concurrent read requests
    pub const MAX_READ_CONCURRENCY: &str = "queryNode.scheduler.maxReadConcurrency";
    /// Search/query pool workers per unit of read concurrency
    pub const CGO_POOL_SIZE_RATIO: &str = "queryNode.segcore.cgoPoolSizeRatio";
    /// Load pool workers per usable processor
    pub const MIDDLE_PRIORITY_THREAD_CORE_COEFFICIENT: &str =
        "common.threadCoreCoefficient.middlePriority";

    /// Every key above
    pub const ALL: &[&str] = &[
        MAX_READ_CONCURRENCY,
        CGO_POOL_SIZE_RATIO,
        MIDDLE_PRIORITY_THREAD_CORE_COEFFICIENT,
    ];

    pub(crate) const DEFAULT_MAX_READ_CONCURRENCY: f64 = 16.0;
    pub(crate) const DEFAULT_CGO_POOL_SIZE_RATIO: f64 = 2.0;
    pub(crate) const DEFAULT_MIDDLE_PRIORITY_THREAD_CORE_COEFFICIENT: i64 = 5;
}

/// Snapshot of the sizing parameters
///
/// Unset keys take their defaults. A value that does not parse reads as zero,
/// which the sizing formulas turn into a rejected, non-positive size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolParams {
    pub max_read_concurrency: f64,
    pub cgo_pool_size_ratio: f64,
    pub middle_priority_thread_core_coefficient: i64,
}

impl Default for PoolParams {
    fn default() -> Self {
        Self {
            max_read_concurrency: keys::DEFAULT_MAX_READ_CONCURRENCY,
            cgo_pool_size_ratio: keys::DEFAULT_CGO_POOL_SIZE_RATIO,
            middle_priority_thread_core_coefficient:
                keys::DEFAULT_MIDDLE_PRIORITY_THREAD_CORE_COEFFICIENT,
        }
    }
}

impl PoolParams {
    /// Read the current values from a source
    pub fn read(source: &dyn ConfigSource) -> Self {
        Self {
            max_read_concurrency: read_float(
                source,
                keys::MAX_READ_CONCURRENCY,
                keys::DEFAULT_MAX_READ_CONCURRENCY,
            ),
            cgo_pool_size_ratio: read_float(
                source,
                keys::CGO_POOL_SIZE_RATIO,
                keys::DEFAULT_CGO_POOL_SIZE_RATIO,
            ),
            middle_priority_thread_core_coefficient: read_int(
                source,
                keys::MIDDLE_PRIORITY_THREAD_CORE_COEFFICIENT,
                keys::DEFAULT_MIDDLE_PRIORITY_THREAD_CORE_COEFFICIENT,
            ),
        }
    }
}

fn read_float(source: &dyn ConfigSource, key: &str, default: f64) -> f64 {
    let Some(raw) = source.get(key) else {
        return default;
    };
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => {
            warn!(key, value = %raw, "Invalid numeric configuration value, reading as 0");
            0.0
        }
    }
}

fn read_int(source: &dyn ConfigSource, key: &str, default: i64) -> i64 {
    let Some(raw) = source.get(key) else {
        return default;
    };
    let trimmed = raw.trim();
    // Integer keys also accept whole floats such as "4.0".
    match trimmed.parse::<i64>() {
        Ok(value) => value,
        Err(_) => match trimmed.parse::<f64>() {
            Ok(value) if value.is_finite() && value.fract() == 0.0 => value as i64,
            _ => {
                warn!(key, value = %raw, "Invalid integer configuration value, reading as 0");
                0
            }
        },
    }
}
