//! Hardware introspection

use std::sync::atomic::{AtomicUsize, Ordering};

/// Reports host processing capacity
pub trait HardwareInfo: Send + Sync {
    /// Number of usable processors, always at least 1
    fn cpu_num(&self) -> usize;
}

/// Host hardware as reported by the OS
///
/// Honors cgroup CPU quotas through `num_cpus`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHardware;

impl HardwareInfo for SystemHardware {
    fn cpu_num(&self) -> usize {
        num_cpus::get().max(1)
    }
}

/// Fixed processor count, adjustable at runtime
#[derive(Debug)]
pub struct FixedHardware {
    cpus: AtomicUsize,
}

impl FixedHardware {
    pub fn new(cpus: usize) -> Self {
        Self {
            cpus: AtomicUsize::new(cpus.max(1)),
        }
    }

    /// Change the reported processor count
    pub fn set_cpu_num(&self, cpus: usize) {
        self.cpus.store(cpus.max(1), Ordering::Relaxed);
    }
}

impl HardwareInfo for FixedHardware {
    fn cpu_num(&self) -> usize {
        self.cpus.load(Ordering::Relaxed)
    }
}
