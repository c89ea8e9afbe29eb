use crate::grid::{for_each_pair_within, Grid};
use crate::pipeline::{fatal, Pending};
use crate::processor::StateProcessor;
use crate::simulation::SimulationEngine;
use active_matter_common::{Particle, Particles, SimParams};
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Number of other particles touching each particle (center distance below 1).
pub fn neighbor_counts(particles: &[Particle], grid: &Grid, params: &SimParams) -> Vec<u32> {
    let mut counts = vec![0u32; particles.len()];
    for_each_pair_within(particles, grid, params, 1.0, |i, j, _, _, _| {
        counts[i] += 1;
        counts[j] += 1;
    });
    counts
}

struct Inner {
    counts: Vec<u32>,
    received: Option<(Pending<Particles>, Pending<Grid>)>,
}

/// Tracks how many touching neighbors each particle has.
///
/// Runs on the caller's thread. Each `advance` evaluates the handles it
/// received on the previous call, which the engine has already committed, and
/// keeps the new ones for next time, so it never waits on the engine.
pub struct ClusterInspector {
    params: Arc<SimParams>,
    active: AtomicBool,
    inner: Mutex<Inner>,
}

impl ClusterInspector {
    pub fn attach(engine: &mut SimulationEngine) -> Arc<Self> {
        let params = Arc::new(engine.params().clone());
        let current = engine.current();
        let counts = neighbor_counts(&current.particles, &current.grid, &params);
        let inspector = Arc::new(ClusterInspector {
            params,
            active: AtomicBool::new(true),
            inner: Mutex::new(Inner { counts, received: None }),
        });
        engine.register_state_processor(inspector.clone());
        inspector
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evaluate(&self, inner: &mut Inner) {
        let Some((particles, grid)) = inner.received.take() else {
            return;
        };
        let particles = particles.wait().unwrap_or_else(|e| fatal("cluster inspection", &e));
        let grid = grid.wait().unwrap_or_else(|e| fatal("cluster inspection", &e));
        inner.counts = neighbor_counts(&particles, &grid, &self.params);
    }

    pub fn counts(&self) -> Vec<u32> {
        self.lock().counts.clone()
    }

    pub fn mean_neighbor_count(&self) -> f64 {
        let inner = self.lock();
        if inner.counts.is_empty() {
            return 0.0;
        }
        inner.counts.iter().map(|&c| f64::from(c)).sum::<f64>() / inner.counts.len() as f64
    }

    /// Histogram of neighbor counts; the last bin collects everything at or
    /// above `max_bins - 1`.
    pub fn distribution(&self, max_bins: usize) -> Vec<u32> {
        let mut bins = vec![0u32; max_bins];
        if max_bins == 0 {
            return bins;
        }
        for &c in &self.lock().counts {
            bins[(c as usize).min(max_bins - 1)] += 1;
        }
        bins
    }
}

impl StateProcessor for ClusterInspector {
    fn advance(&self, particles: Pending<Particles>, grid: Pending<Grid>) {
        let mut inner = self.lock();
        self.evaluate(&mut inner);
        inner.received = Some((particles, grid));
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    fn settle(&self) {
        let mut inner = self.lock();
        self.evaluate(&mut inner);
        debug!("Cluster inspector settled on {} particles", inner.counts.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use active_matter_common::Dynamics;

    fn params() -> SimParams {
        let dynamics = Dynamics { speed: 0.0, k: 1.0, position_noise: 0.0, angular_noise: 0.0, dt: 0.1 };
        SimParams::with_dimensions(8.0, 8.0, 0.1, &dynamics, 0).unwrap()
    }

    #[test]
    fn counts_touching_neighbors_both_ways() {
        let params = params();
        let particles = vec![
            Particle::new(2.0, 2.0, 0.0),
            Particle::new(2.6, 2.0, 0.0),
            Particle::new(1.9, 2.8, 0.0),
            Particle::new(5.0, 5.0, 0.0),
            // Across the seam from particle 5.
            Particle::new(7.8, 0.3, 0.0),
            Particle::new(0.2, 7.7, 0.0),
        ];
        let grid = Grid::for_params(&particles, &params);
        assert_eq!(neighbor_counts(&particles, &grid, &params), vec![2, 1, 1, 0, 1, 1]);
    }

    #[test]
    fn touching_at_exactly_one_is_not_a_neighbor() {
        let params = params();
        let particles = vec![Particle::new(3.0, 3.0, 0.0), Particle::new(4.0, 3.0, 0.0)];
        let grid = Grid::for_params(&particles, &params);
        assert_eq!(neighbor_counts(&particles, &grid, &params), vec![0, 0]);
    }

    #[test]
    fn distribution_folds_the_tail_into_the_last_bin() {
        let params = params();
        let particles = vec![
            Particle::new(4.0, 4.0, 0.0),
            Particle::new(4.5, 4.0, 0.0),
            Particle::new(3.5, 4.0, 0.0),
            Particle::new(4.0, 4.5, 0.0),
            Particle::new(1.0, 1.0, 0.0),
        ];
        let mut engine = SimulationEngine::from_particles(params, particles).unwrap();
        let inspector = ClusterInspector::attach(&mut engine);
        // Particle 0 touches 1, 2 and 3; 1 touches 0 and 3; 2 touches 0 and 3;
        // 3 touches 0, 1 and 2.
        assert_eq!(inspector.counts(), vec![3, 2, 2, 3, 0]);
        assert_eq!(inspector.distribution(3), vec![1, 0, 4]);
        assert!((inspector.mean_neighbor_count() - 2.0).abs() < 1e-12);
        assert!(inspector.distribution(0).is_empty());
    }
}
