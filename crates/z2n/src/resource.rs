//! Memory budgeting for spectrum allocation.
//!
//! The guard is pure: it never asks the operating system how much memory is
//! free. Callers pass a budget (typically a fraction of available memory
//! measured by the outer layer) and the guard picks a backing.

use crate::error::Result;
use crate::grid::FrequencyGrid;
use crate::store::{BackingStore, ELEMENT_SIZE};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default memory budget for in-memory spectra (1 GiB).
pub const DEFAULT_BUDGET_BYTES: u64 = 1024 * 1024 * 1024;

/// Configuration for resource decisions.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    /// Bytes a spectrum may occupy in RAM before it moves to disk.
    pub budget_bytes: u64,
    /// Directory that receives memory-mapped scratch files.
    ///
    /// Default: the system temporary directory.
    pub scratch_dir: PathBuf,
    /// Whether the frequency axis follows the power values onto disk.
    ///
    /// When false only the power values count against the budget and the
    /// axis always stays in memory.
    ///
    /// Default: true
    pub materialize_axis: bool,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_BUDGET_BYTES,
            scratch_dir: std::env::temp_dir(),
            materialize_axis: true,
        }
    }
}

impl ResourceConfig {
    /// Sets the memory budget.
    pub fn with_budget(mut self, budget_bytes: u64) -> Self {
        self.budget_bytes = budget_bytes;
        self
    }

    /// Sets the scratch directory for disk-backed stores.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Sets whether the frequency axis is counted in the estimate.
    pub fn with_materialized_axis(mut self, materialize: bool) -> Self {
        self.materialize_axis = materialize;
        self
    }
}

/// Outcome of a resource check for one grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDecision {
    /// Estimated footprint of the spectrum in bytes.
    pub estimated_bytes: u64,
    /// Budget the estimate was compared against.
    pub available_bytes: u64,
    /// True if the spectrum must live in a memory-mapped scratch file.
    pub use_disk_backing: bool,
}

/// Decides where a spectrum for a given grid should live.
#[derive(Debug, Clone, Default)]
pub struct ResourceGuard {
    config: ResourceConfig,
}

impl ResourceGuard {
    /// Creates a guard with the given configuration.
    pub fn new(config: ResourceConfig) -> Self {
        Self { config }
    }

    /// Returns the guard configuration.
    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Estimated footprint in bytes of a spectrum over `grid`.
    ///
    /// Eight bytes per power value, doubled when the frequency axis is
    /// materialized.
    pub fn estimate(&self, grid: &FrequencyGrid) -> u64 {
        let per_bin = if self.config.materialize_axis {
            2 * ELEMENT_SIZE
        } else {
            ELEMENT_SIZE
        };
        (grid.bin_count() as u64).saturating_mul(per_bin)
    }

    /// Picks in-memory storage iff the estimate is strictly below
    /// `budget_bytes`, disk-backed storage otherwise. Never fails.
    pub fn decide(&self, grid: &FrequencyGrid, budget_bytes: u64) -> ResourceDecision {
        let estimated_bytes = self.estimate(grid);
        let use_disk_backing = estimated_bytes >= budget_bytes;
        debug!(
            "Resource decision: {} bytes against budget {} -> {}",
            estimated_bytes,
            budget_bytes,
            if use_disk_backing { "disk" } else { "memory" }
        );
        ResourceDecision {
            estimated_bytes,
            available_bytes: budget_bytes,
            use_disk_backing,
        }
    }

    /// Decides against the configured budget.
    pub fn decide_configured(&self, grid: &FrequencyGrid) -> ResourceDecision {
        self.decide(grid, self.config.budget_bytes)
    }

    /// Allocates a zeroed store of `len` elements following `decision`.
    ///
    /// # Errors
    ///
    /// Returns `Z2nError::OutOfResources` when the chosen backing cannot be
    /// obtained; the request is never shrunk.
    pub fn allocate(&self, decision: &ResourceDecision, len: usize) -> Result<BackingStore> {
        if decision.use_disk_backing {
            info!(
                "Spectrum of {} bytes exceeds budget of {} bytes, mapping to {}",
                decision.estimated_bytes,
                decision.available_bytes,
                self.config.scratch_dir.display()
            );
        }
        BackingStore::allocate(len, decision.use_disk_backing, self.scratch_dir())
    }

    /// Directory used for scratch files.
    pub fn scratch_dir(&self) -> &Path {
        &self.config.scratch_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn grid(bins: usize) -> FrequencyGrid {
        FrequencyGrid::build(0.0, bins as f64, 1.0).unwrap()
    }

    #[test]
    fn test_estimate_counts_axis() {
        let g = grid(100);
        let guard = ResourceGuard::default();
        assert_eq!(guard.estimate(&g), 1600);

        let guard = ResourceGuard::new(ResourceConfig::default().with_materialized_axis(false));
        assert_eq!(guard.estimate(&g), 800);
    }

    #[test]
    fn test_decide_boundary() {
        let g = grid(100);
        let guard = ResourceGuard::default();

        assert!(!guard.decide(&g, 1601).use_disk_backing);
        assert!(guard.decide(&g, 1600).use_disk_backing);
        assert!(guard.decide(&g, 0).use_disk_backing);

        let decision = guard.decide(&g, 4096);
        assert_eq!(decision.estimated_bytes, 1600);
        assert_eq!(decision.available_bytes, 4096);
    }

    #[test]
    fn test_decide_on_huge_grid() {
        let guard = ResourceGuard::default();
        let g = FrequencyGrid::build(0.0, 1.0, 1e-15).unwrap();
        let decision = guard.decide(&g, 1024);
        assert!(decision.use_disk_backing);
        assert!(decision.estimated_bytes >= 16 * 999_999_999_999_999);
    }

    #[test]
    fn test_allocate_follows_decision() {
        let temp_dir = TempDir::new().unwrap();
        let guard = ResourceGuard::new(
            ResourceConfig::default()
                .with_budget(0)
                .with_scratch_dir(temp_dir.path()),
        );
        let g = grid(10);
        let decision = guard.decide_configured(&g);
        let store = guard.allocate(&decision, g.bin_count()).unwrap();
        assert!(store.is_disk_backed());
        assert_eq!(store.len(), 10);
        assert!(store.scratch_path().unwrap().starts_with(temp_dir.path()));
    }
}
