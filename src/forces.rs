use crate::grid::{for_each_pair_within, Grid};
use active_matter_common::{Particle, SimParams};
use rand::prelude::*;
use rand_distr::StandardNormal;

/// Rate of change of one particle for a single step, before multiplying by `dt`.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Delta {
    pub dx: f64,
    pub dy: f64,
    pub dtheta: f64,
}

/// Contact distance squared: disks of unit diameter touch at separation 1.
const CONTACT_DIST_SQ: f64 = 1.0;

/// Soft repulsion between every overlapping pair.
///
/// For a pair at separation `r < 1` the first particle receives `f * (dx, dy)`
/// with `f = -k (1 - r) / r` and the second the exact negation, so the
/// collision contributions of a step always sum to zero. Coincident particles
/// (`r == 0`) have no defined direction and are skipped.
pub fn collision_deltas(particles: &[Particle], grid: &Grid, params: &SimParams) -> Vec<Delta> {
    let mut deltas = vec![Delta::default(); particles.len()];
    let k = params.k;

    for_each_pair_within(particles, grid, params, CONTACT_DIST_SQ, |i, j, dx, dy, r2| {
        if r2 == 0.0 {
            return;
        }
        let r = r2.sqrt();
        let f = -k * (1.0 - r) / r;
        let (fx, fy) = (f * dx, f * dy);
        deltas[i].dx += fx;
        deltas[i].dy += fy;
        deltas[j].dx -= fx;
        deltas[j].dy -= fy;
    });

    deltas
}

/// Adds self-propulsion along each heading plus Gaussian position and heading
/// noise. Particles are visited in index order and draw three normals each
/// (x, y, heading), so the result only depends on the stream's state.
pub fn add_propulsion_and_noise<R: Rng>(
    particles: &[Particle],
    deltas: &mut [Delta],
    params: &SimParams,
    rng: &mut R,
) {
    for (particle, delta) in particles.iter().zip(deltas.iter_mut()) {
        let (hx, hy) = particle.heading();
        let nx: f64 = rng.sample(StandardNormal);
        let ny: f64 = rng.sample(StandardNormal);
        let ntheta: f64 = rng.sample(StandardNormal);
        delta.dx += params.speed * hx + params.position_noise * nx;
        delta.dy += params.speed * hy + params.position_noise * ny;
        delta.dtheta += params.angular_noise * ntheta;
    }
}

/// Full per-step derivative: collisions, then propulsion and noise.
pub fn compute_deltas<R: Rng>(
    particles: &[Particle],
    grid: &Grid,
    params: &SimParams,
    rng: &mut R,
) -> Vec<Delta> {
    let mut deltas = collision_deltas(particles, grid, params);
    add_propulsion_and_noise(particles, &mut deltas, params, rng);
    deltas
}
