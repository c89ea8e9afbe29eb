use crate::grid::Grid;
use crate::pipeline::{fatal, Pending, PipelineError};
use active_matter_common::Particles;
use log::info;
use std::sync::OnceLock;

/// An observer that derives a statistic from every simulation step.
///
/// `advance` receives handles to the state the engine is *about to* commit.
/// Implementations retire their own previous unit of work (blocking on it if
/// needed), then start the next one against the fresh handles, so a
/// processor is never more than one step behind the engine. Handles are
/// read-only snapshots.
pub trait StateProcessor: Send + Sync {
    fn advance(&self, particles: Pending<Particles>, grid: Pending<Grid>);

    /// Inactive processors are skipped by the engine. Work already in flight
    /// still completes and published values are kept.
    fn is_active(&self) -> bool;

    fn set_active(&self, active: bool);

    /// Blocks until the processor has no unpublished work in flight.
    fn settle(&self) {}
}

static PROCESSOR_POOL: OnceLock<rayon::ThreadPool> = OnceLock::new();

/// Process-wide pool shared by all processors. Kept apart from the engine's
/// workers and from rayon's global pool: processor jobs block on engine
/// results, and the engine's parallel phases run on the global pool.
pub fn processor_pool() -> &'static rayon::ThreadPool {
    PROCESSOR_POOL.get_or_init(|| {
        let pool = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("state-processor-{}", i))
            .build()
            .unwrap_or_else(|e| fatal("building processor pool", &PipelineError::Spawn(e.to_string())));
        info!("Using {} state processor threads.", pool.current_num_threads());
        pool
    })
}
