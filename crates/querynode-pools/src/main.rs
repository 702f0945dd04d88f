use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use querynode_pools::config::keys;
use querynode_pools::telemetry::{init_logging, LoggingConfig};
use querynode_pools::{ParamTable, PoolKind, PoolRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "info")
    // - QUERYNODE_SCHEDULER_MAXREADCONCURRENCY, QUERYNODE_SEGCORE_CGOPOOLSIZERATIO,
    //   COMMON_THREADCORECOEFFICIENT_MIDDLEPRIORITY: pool sizing overrides
    init_logging(&LoggingConfig::from_env()).context("Failed to initialize logging")?;

    let config = Arc::new(ParamTable::from_env());
    let registry = PoolRegistry::new(config.clone());

    for kind in PoolKind::ALL {
        let pool = registry
            .get(kind)
            .with_context(|| format!("Failed to initialize {} pool", kind))?;
        tracing::info!(pool = kind.tag(), size = pool.cap(), "Pool ready");
    }

    // Fan a batch of CPU-bound work out to the search pool
    let search = registry.search_pool()?;
    let handles = (0..32u64)
        .map(|n| search.submit(move || (0..=n * 10_000).sum::<u64>()))
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to submit search work")?;

    let mut total = 0u64;
    for handle in handles {
        total += handle.await.context("Search task failed")?;
    }
    tracing::info!(total, completed = search.completed(), "Search batch finished");

    // An operator doubles the read concurrency; the live pool follows
    let current: f64 = config
        .get_as(keys::MAX_READ_CONCURRENCY)
        .unwrap_or(16.0);
    config.set(keys::MAX_READ_CONCURRENCY, (current * 2.0).to_string());
    tracing::info!(
        target_size = registry.target_size(PoolKind::Search),
        size = search.cap(),
        "Search pool after configuration change"
    );

    // Give purgeable pools a chance to shed idle workers before reporting
    tokio::time::sleep(Duration::from_millis(1500)).await;

    for kind in PoolKind::ALL {
        let pool = registry.get(kind)?;
        let stats = registry.resize_stats(kind);
        println!(
            "{}",
            serde_json::json!({
                "pool": kind,
                "state": registry.state(kind),
                "capacity": pool.cap(),
                "running": pool.running(),
                "completed": pool.completed(),
                "resize": stats,
            })
        );
    }

    Ok(())
}
