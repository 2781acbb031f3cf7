//! Memory cost estimation for admission.

use std::collections::HashMap;

use crate::config::{DEFAULT_KIND_MEMORY_MB, OrchestratorConfig};
use crate::task::Task;

/// Upper bound on any single estimate, in MB (1 PiB).
pub const MAX_ESTIMATE_MB: u64 = 1 << 30;

/// Estimates a task's memory footprint from its kind and parameters.
#[derive(Debug, Clone)]
pub struct MemoryEstimator {
    table: HashMap<String, u64>,
}

impl MemoryEstimator {
    pub fn new(table: HashMap<String, u64>) -> Self {
        Self { table }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.kind_memory_mb.clone())
    }

    /// Base estimate for a kind, before parameter adjustments.
    pub fn base_mb(&self, kind: &str) -> u64 {
        self.table
            .get(kind)
            .copied()
            .unwrap_or(DEFAULT_KIND_MEMORY_MB)
    }

    /// Estimated MB for `task`.
    ///
    /// An explicit `memory_mb` parameter wins. Otherwise the kind's base is
    /// raised by `document_size_mb * 2`, `search_depth * 64` and
    /// `(max_results / 10) * 16`. The result never exceeds [`MAX_ESTIMATE_MB`].
    pub fn estimate(&self, task: &Task) -> u64 {
        if let Some(mb) = task.param_f64("memory_mb")
            && mb >= 0.0
        {
            return (mb.ceil() as u64).min(MAX_ESTIMATE_MB);
        }

        let mut extra = 0.0;
        if let Some(size) = task.param_f64("document_size_mb") {
            extra += size * 2.0;
        }
        if let Some(depth) = task.param_f64("search_depth") {
            extra += depth * 64.0;
        }
        if let Some(results) = task.param_f64("max_results") {
            extra += (results / 10.0).floor() * 16.0;
        }

        // Float-to-int casts saturate, so only the sum needs guarding.
        self.base_mb(&task.kind)
            .saturating_add(extra.max(0.0).ceil() as u64)
            .min(MAX_ESTIMATE_MB)
    }
}
