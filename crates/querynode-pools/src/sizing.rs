//! Pool size formulas
//!
//! Pure functions of configuration and hardware. Results are signed: a
//! misconfiguration yields a non-positive size, which callers reject.

use crate::config::PoolParams;
use crate::kind::PoolKind;

/// `ceil(max_read_concurrency * cgo_pool_size_ratio)`
pub fn search_pool_size(max_read_concurrency: f64, cgo_pool_size_ratio: f64) -> i64 {
    let size = (max_read_concurrency * cgo_pool_size_ratio).ceil();
    if size.is_nan() {
        return 0;
    }
    // Float-to-int casts saturate at the i64 bounds.
    size as i64
}

/// One worker per usable processor
pub fn dynamic_pool_size(cpu_num: usize) -> i64 {
    i64::try_from(cpu_num).unwrap_or(i64::MAX)
}

/// `cpu_num * middle_priority_thread_core_coefficient`
pub fn load_pool_size(cpu_num: usize, middle_priority_thread_core_coefficient: i64) -> i64 {
    dynamic_pool_size(cpu_num).saturating_mul(middle_priority_thread_core_coefficient)
}

/// Target size of `kind` for the given inputs
pub fn target_size(kind: PoolKind, params: &PoolParams, cpu_num: usize) -> i64 {
    match kind {
        PoolKind::Search => {
            search_pool_size(params.max_read_concurrency, params.cgo_pool_size_ratio)
        }
        PoolKind::Dynamic => dynamic_pool_size(cpu_num),
        PoolKind::Load => {
            load_pool_size(cpu_num, params.middle_priority_thread_core_coefficient)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_pool_size() {
        assert_eq!(search_pool_size(8.0, 0.5), 4);
        assert_eq!(search_pool_size(16.0, 0.5), 8);
        assert_eq!(search_pool_size(3.0, 0.5), 2);
        assert_eq!(search_pool_size(0.0, 2.0), 0);
        assert_eq!(search_pool_size(8.0, -1.0), -8);
        assert_eq!(search_pool_size(f64::NAN, 1.0), 0);
    }

    #[test]
    fn test_load_pool_size() {
        assert_eq!(load_pool_size(4, 2), 8);
        assert_eq!(load_pool_size(4, 0), 0);
        assert_eq!(load_pool_size(4, -1), -4);
        assert_eq!(load_pool_size(usize::MAX, 2), i64::MAX);
    }

    #[test]
    fn test_target_size_per_kind() {
        let params = PoolParams {
            max_read_concurrency: 8.0,
            cgo_pool_size_ratio: 0.5,
            middle_priority_thread_core_coefficient: 2,
        };

        assert_eq!(target_size(PoolKind::Search, &params, 4), 4);
        assert_eq!(target_size(PoolKind::Dynamic, &params, 4), 4);
        assert_eq!(target_size(PoolKind::Load, &params, 4), 8);
    }
}
