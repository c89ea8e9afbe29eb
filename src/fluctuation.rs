//! Number-fluctuation (ΔN vs N) estimation.
//!
//! A square window sized to hold `Nl` particles on average is dropped at
//! random positions; the mean and standard deviation of the occupancy over
//! the samples give one point of the ΔN-vs-N diagnostic.

use crate::grid::Grid;
use crate::pipeline::{fatal, pending, Pending};
use crate::processor::{processor_pool, StateProcessor};
use crate::simulation::SimulationEngine;
use active_matter_common::{Particle, Particles, SimParams, PARTICLE_AREA};
use log::{debug, warn};
use rand::prelude::*;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Windows sampled per update.
pub const SAMPLES_PER_UPDATE: usize = 500;

/// Welford's running mean and variance.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    sum_sq: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.sum_sq += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance; zero until two values have been seen.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.sum_sq / (self.count - 1) as f64
        }
    }

    pub fn stdev(&self) -> f64 {
        self.variance().sqrt()
    }
}

impl Extend<f64> for RunningStats {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for value in iter {
            self.push(value);
        }
    }
}

/// Mean occupancy N and its standard deviation ΔN.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeltaN {
    pub mean: f64,
    pub stdev: f64,
}

/// Half side length of the square window holding `target_occupancy`
/// particles on average at the given packing fraction.
pub fn window_half_width(target_occupancy: f64, packing_fraction: f64) -> f64 {
    (PARTICLE_AREA * target_occupancy / packing_fraction).sqrt() / 2.0
}

/// Number of particles strictly inside the square of half side `half`
/// centered on `(cx, cy)`, with periodic wrap. Each cell the square overlaps
/// is visited once and particles are tested through their nearest image, so a
/// square wider than the domain sees each particle once.
pub fn count_in_window(
    cx: f64,
    cy: f64,
    half: f64,
    particles: &[Particle],
    grid: &Grid,
    params: &SimParams,
) -> u32 {
    let (col_lo, cols) = cell_span(cx, half, grid.cell_width(), grid.n_cols());
    let (row_lo, rows) = cell_span(cy, half, grid.cell_height(), grid.n_rows());

    let mut count = 0;
    for dr in 0..rows {
        let row = (row_lo + dr as isize).rem_euclid(grid.n_rows() as isize) as usize;
        for dc in 0..cols {
            let col = (col_lo + dc as isize).rem_euclid(grid.n_cols() as isize) as usize;
            for &i in grid.cell(col, row) {
                let p = &particles[i as usize];
                let dx = nearest_image(p.x - cx, params.width);
                let dy = nearest_image(p.y - cy, params.height);
                if dx.abs() < half && dy.abs() < half {
                    count += 1;
                }
            }
        }
    }
    count
}

/// First cell the window touches along one axis and how many distinct cells
/// it spans, at most `n`.
fn cell_span(center: f64, half: f64, cell_size: f64, n: usize) -> (isize, usize) {
    let lo = ((center - half) / cell_size).floor() as isize;
    let hi = ((center + half) / cell_size).floor() as isize;
    (lo, ((hi - lo + 1) as usize).min(n))
}

/// Maps a separation into `[-period/2, period/2)`.
#[inline(always)]
fn nearest_image(d: f64, period: f64) -> f64 {
    d - period * (d / period + 0.5).floor()
}

fn draw_centers<R: Rng>(params: &SimParams, rng: &mut R) -> Vec<(f64, f64)> {
    (0..SAMPLES_PER_UPDATE)
        .map(|_| {
            let x = rng.random::<f64>() * params.width;
            let y = rng.random::<f64>() * params.height;
            (x, y)
        })
        .collect()
}

/// Counts in parallel, folds in sample order.
fn sample_windows(
    centers: &[(f64, f64)],
    half: f64,
    particles: &[Particle],
    grid: &Grid,
    params: &SimParams,
) -> DeltaN {
    let counts: Vec<u32> = centers
        .par_iter()
        .map(|&(cx, cy)| count_in_window(cx, cy, half, particles, grid, params))
        .collect();
    let mut stats = RunningStats::new();
    stats.extend(counts.into_iter().map(f64::from));
    DeltaN { mean: stats.mean(), stdev: stats.stdev() }
}

/// One ΔN estimate of `particles` with [`SAMPLES_PER_UPDATE`] windows whose
/// centers are drawn from `rng`.
pub fn estimate<R: Rng>(
    particles: &[Particle],
    grid: &Grid,
    params: &SimParams,
    target_occupancy: f64,
    rng: &mut R,
) -> DeltaN {
    let half = window_half_width(target_occupancy, params.packing_fraction());
    let centers = draw_centers(params, rng);
    sample_windows(&centers, half, particles, grid, params)
}

struct Inner {
    rng: StdRng,
    value: DeltaN,
    updates: u64,
    in_flight: Option<Pending<DeltaN>>,
}

/// Pipelined ΔN estimator for one target occupancy.
///
/// Window centers are drawn on the caller's thread when the work is
/// submitted, so the sequence of estimates depends only on the seed and the
/// simulation.
pub struct FluctuationEstimator {
    target_occupancy: f64,
    half_width: f64,
    params: Arc<SimParams>,
    active: AtomicBool,
    inner: Mutex<Inner>,
}

impl FluctuationEstimator {
    /// Estimates the engine's committed state right away, then registers the
    /// estimator so it follows every subsequent step.
    pub fn attach(engine: &mut SimulationEngine, target_occupancy: f64, seed: u64) -> Arc<Self> {
        let params = Arc::new(engine.params().clone());
        let half_width = window_half_width(target_occupancy, params.packing_fraction());
        if 2.0 * half_width > params.width.min(params.height) {
            warn!(
                "Sampling window for Nl={} ({:.2} wide) exceeds the {:.2}x{:.2} domain.",
                target_occupancy,
                2.0 * half_width,
                params.width,
                params.height
            );
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let current = engine.current();
        let centers = draw_centers(&params, &mut rng);
        let value = sample_windows(&centers, half_width, &current.particles, &current.grid, &params);
        debug!(
            "Initial estimate for Nl={}: N={:.3} dN={:.3}",
            target_occupancy, value.mean, value.stdev
        );

        let estimator = Arc::new(FluctuationEstimator {
            target_occupancy,
            half_width,
            params,
            active: AtomicBool::new(true),
            inner: Mutex::new(Inner { rng, value, updates: 0, in_flight: None }),
        });
        engine.register_state_processor(estimator.clone());
        estimator
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retire(&self, inner: &mut Inner) {
        let Some(result) = inner.in_flight.take() else {
            return;
        };
        match result.wait() {
            Ok(value) => {
                inner.value = *value;
                inner.updates += 1;
                debug!(
                    "Estimate {} for Nl={}: N={:.3} dN={:.3}",
                    inner.updates, self.target_occupancy, value.mean, value.stdev
                );
            }
            Err(e) => fatal("fluctuation estimate", &e),
        }
    }

    /// The most recently published estimate.
    pub fn value(&self) -> DeltaN {
        self.lock().value
    }

    pub fn mean(&self) -> f64 {
        self.value().mean
    }

    pub fn stdev(&self) -> f64 {
        self.value().stdev
    }

    pub fn target_occupancy(&self) -> f64 {
        self.target_occupancy
    }

    /// Estimates published since the initial one.
    pub fn updates(&self) -> u64 {
        self.lock().updates
    }
}

impl StateProcessor for FluctuationEstimator {
    fn advance(&self, particles: Pending<Particles>, grid: Pending<Grid>) {
        let mut inner = self.lock();
        self.retire(&mut inner);

        let centers = draw_centers(&self.params, &mut inner.rng);
        let (promise, result) = pending();
        let params = Arc::clone(&self.params);
        let half = self.half_width;
        processor_pool().spawn(move || {
            let state = particles.wait().and_then(|p| grid.wait().map(|g| (p, g)));
            match state {
                Ok((particles, grid)) => {
                    promise.fulfil(sample_windows(&centers, half, &particles, &grid, &params));
                }
                Err(e) => promise.fail(e),
            }
        });
        inner.in_flight = Some(result);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    fn settle(&self) {
        let mut inner = self.lock();
        self.retire(&mut inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use active_matter_common::Dynamics;
    use approx::assert_abs_diff_eq;

    fn params(width: f64, height: f64, packing_fraction: f64) -> SimParams {
        let dynamics = Dynamics { speed: 0.0, k: 0.0, position_noise: 0.0, angular_noise: 0.0, dt: 0.1 };
        SimParams::with_dimensions(width, height, packing_fraction, &dynamics, 0).unwrap()
    }

    #[test]
    fn constant_sequence_has_zero_spread() {
        let mut stats = RunningStats::new();
        stats.extend([5.0; 10]);
        assert_abs_diff_eq!(stats.mean(), 5.0);
        assert_abs_diff_eq!(stats.stdev(), 0.0);
    }

    #[test]
    fn welford_matches_two_pass() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0, 13.5, -1.25];
        let mut stats = RunningStats::new();
        stats.extend(values);

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        assert_eq!(stats.count(), values.len() as u64);
        assert_abs_diff_eq!(stats.mean(), mean, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.variance(), variance, epsilon = 1e-12);
    }

    #[test]
    fn single_value_has_zero_variance() {
        let mut stats = RunningStats::new();
        stats.push(3.0);
        assert_eq!(stats.variance(), 0.0);
    }

    #[test]
    fn window_area_holds_target_on_average() {
        let half = window_half_width(20.0, 0.5);
        let area = (2.0 * half).powi(2);
        assert_abs_diff_eq!(0.5 * area / PARTICLE_AREA, 20.0, epsilon = 1e-9);
    }

    #[test]
    fn window_counts_across_both_seams() {
        let params = params(10.0, 10.0, 0.1);
        let particles = vec![
            Particle::new(0.2, 0.2, 0.0),
            Particle::new(9.8, 9.8, 0.0),
            Particle::new(9.8, 0.2, 0.0),
            Particle::new(0.2, 9.8, 0.0),
            Particle::new(5.0, 5.0, 0.0),
        ];
        let grid = Grid::for_params(&particles, &params);
        assert_eq!(count_in_window(0.0, 0.0, 0.5, &particles, &grid, &params), 4);
        assert_eq!(count_in_window(9.9, 0.1, 0.5, &particles, &grid, &params), 4);
        assert_eq!(count_in_window(5.0, 5.0, 0.5, &particles, &grid, &params), 1);
        assert_eq!(count_in_window(2.5, 7.5, 0.5, &particles, &grid, &params), 0);
        // Strict bounds.
        assert_eq!(count_in_window(5.5, 5.0, 0.5, &particles, &grid, &params), 0);
    }

    #[test]
    fn window_almost_as_wide_as_domain_sees_wrapped_images() {
        let params = params(10.0, 10.0, 0.1);
        let particles = vec![Particle::new(0.2, 5.0, 0.0), Particle::new(9.9, 5.0, 0.0)];
        let grid = Grid::for_params(&particles, &params);
        // Side 9.6: the image of particle 0 at x = 10.2 is 4.7 from the center.
        assert_eq!(count_in_window(5.5, 5.0, 4.8, &particles, &grid, &params), 2);
        // The 0.4 wide gap left by the window now holds particle 1.
        assert_eq!(count_in_window(4.95, 5.0, 4.8, &particles, &grid, &params), 1);
    }

    #[test]
    fn oversized_window_counts_each_particle_once() {
        let params = params(4.0, 4.0, 0.1);
        let particles = vec![Particle::new(1.0, 1.0, 0.0), Particle::new(3.0, 2.5, 0.0)];
        let grid = Grid::for_params(&particles, &params);
        assert_eq!(count_in_window(2.0, 2.0, 10.0, &particles, &grid, &params), 2);
    }

    #[test]
    fn estimate_is_reproducible_per_seed() {
        let params = params(20.0, 20.0, 0.5);
        let mut rng = StdRng::seed_from_u64(9);
        let particles = crate::state::scatter(&params, &mut rng);
        let grid = Grid::for_params(&particles, &params);

        let a = estimate(&particles, &grid, &params, 10.0, &mut StdRng::seed_from_u64(1));
        let b = estimate(&particles, &grid, &params, 10.0, &mut StdRng::seed_from_u64(1));
        let c = estimate(&particles, &grid, &params, 10.0, &mut StdRng::seed_from_u64(2));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.stdev > 0.0);
    }
}
