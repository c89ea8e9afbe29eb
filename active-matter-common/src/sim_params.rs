use crate::particle::PARTICLE_AREA;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Per-particle dynamics shared by every simulation in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dynamics {
    /// Self-propulsion speed (diameters per unit time).
    pub speed: f64,
    /// Strength of the soft repulsion between overlapping disks.
    pub k: f64,
    /// Positional noise amplitude (diameters per unit time).
    pub position_noise: f64,
    /// Heading noise amplitude (radians per unit time).
    pub angular_noise: f64,
    /// Euler integration timestep.
    pub dt: f64,
}

/// Simulation parameters plus the grid geometry derived from the domain size.
/// Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimParams {
    // Domain & grid
    pub width: f64,
    pub height: f64,
    pub n_cols: usize,
    pub n_rows: usize,
    pub cell_width: f64,
    pub cell_height: f64,

    pub n_particles: usize,

    // Dynamics
    pub speed: f64,
    pub k: f64,
    pub position_noise: f64,
    pub angular_noise: f64,
    pub dt: f64,

    /// Seed of the engine's private random stream.
    pub seed: u64,
}

impl SimParams {
    /// Domain of the given size, filled with as many particles as gets closest
    /// to `packing_fraction`.
    pub fn with_dimensions(
        width: f64,
        height: f64,
        packing_fraction: f64,
        dynamics: &Dynamics,
        seed: u64,
    ) -> Result<Self> {
        if !packing_fraction.is_finite() || packing_fraction <= 0.0 {
            anyhow::bail!("packing_fraction must be positive, got {}", packing_fraction);
        }
        let n_particles = (width * height * packing_fraction / PARTICLE_AREA).round();
        if !n_particles.is_finite() || n_particles < 0.0 {
            anyhow::bail!("domain {}x{} does not yield a valid particle count", width, height);
        }
        Self::build(width, height, n_particles as usize, dynamics, seed)
    }

    /// Square domain sized so that `total_particles` disks cover `packing_fraction` of it.
    pub fn with_particle_count(
        packing_fraction: f64,
        total_particles: usize,
        dynamics: &Dynamics,
        seed: u64,
    ) -> Result<Self> {
        if !packing_fraction.is_finite() || packing_fraction <= 0.0 {
            anyhow::bail!("packing_fraction must be positive, got {}", packing_fraction);
        }
        let side = (total_particles as f64 * PARTICLE_AREA / packing_fraction).sqrt();
        Self::build(side, side, total_particles, dynamics, seed)
    }

    fn build(
        width: f64,
        height: f64,
        n_particles: usize,
        dynamics: &Dynamics,
        seed: u64,
    ) -> Result<Self> {
        if !width.is_finite() || !height.is_finite() || width < 1.0 || height < 1.0 {
            anyhow::bail!(
                "domain must be at least one particle diameter in each direction, got {}x{}",
                width,
                height
            );
        }
        if n_particles == 0 {
            anyhow::bail!("simulation must contain at least one particle");
        }
        if n_particles > u32::MAX as usize {
            anyhow::bail!("too many particles: {}", n_particles);
        }
        let Dynamics { speed, k, position_noise, angular_noise, dt } = *dynamics;
        for (name, value) in [("speed", speed), ("k", k), ("dt", dt)] {
            if !value.is_finite() {
                anyhow::bail!("{} must be finite, got {}", name, value);
            }
        }
        for (name, value) in [("position_noise", position_noise), ("angular_noise", angular_noise)] {
            if !value.is_finite() || value < 0.0 {
                anyhow::bail!("{} must be finite and non-negative, got {}", name, value);
            }
        }
        if dt < 0.0 {
            anyhow::bail!("dt must be non-negative, got {}", dt);
        }

        let n_cols = width.floor() as usize;
        let n_rows = height.floor() as usize;

        Ok(SimParams {
            width,
            height,
            n_cols,
            n_rows,
            cell_width: width / n_cols as f64,
            cell_height: height / n_rows as f64,
            n_particles,
            speed,
            k,
            position_noise,
            angular_noise,
            dt,
            seed,
        })
    }

    /// Exact fraction of the domain covered by particle disks.
    pub fn packing_fraction(&self) -> f64 {
        self.n_particles as f64 * PARTICLE_AREA / (self.width * self.height)
    }
}
