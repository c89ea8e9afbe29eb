use crate::grid::Grid;
use active_matter_common::{wrap_coordinate, Particle, Particles, SimParams};
use rand::prelude::*;
use std::f64::consts::TAU;
use std::sync::Arc;

/// A committed simulation state: particles and the grid built from exactly
/// those particles. Both halves are immutable and shared by reference count.
#[derive(Debug, Clone)]
pub struct SimState {
    pub particles: Arc<Particles>,
    pub grid: Arc<Grid>,
}

impl SimState {
    /// Builds the grid for `particles` and wraps both up as a committed state.
    pub fn new(particles: Particles, params: &SimParams) -> Self {
        let grid = Grid::for_params(&particles, params);
        SimState { particles: Arc::new(particles), grid: Arc::new(grid) }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
}

/// Uniform random scatter of `params.n_particles` particles over the domain
/// with uniform headings. Draws x, y and heading per particle, in that order.
pub fn scatter<R: Rng>(params: &SimParams, rng: &mut R) -> Particles {
    (0..params.n_particles)
        .map(|_| {
            let x = rng.random::<f64>() * params.width;
            let y = rng.random::<f64>() * params.height;
            let theta = rng.random::<f64>() * TAU;
            Particle {
                x: wrap_coordinate(x, params.width),
                y: wrap_coordinate(y, params.height),
                theta,
            }
        })
        .collect()
}
