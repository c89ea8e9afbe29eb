use crate::sim_params::{Dynamics, SimParams};
use anyhow::Result;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

// Domain of a single simulation
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DomainConfig {
    #[serde(default = "default_packing_fraction")]
    pub packing_fraction: f64,
    #[serde(default = "default_side")]
    pub width: f64,
    #[serde(default = "default_side")]
    pub height: f64,
}

// One simulation per packing fraction, all holding the same number of particles.
// When present this replaces [domain].
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SweepConfig {
    pub packing_fractions: Vec<f64>,
    pub total_particles: usize,
    #[serde(default)]
    pub master_seed: u64,
}

// Particle dynamics
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DynamicsConfig {
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(default = "default_k")]
    pub k: f64,
    #[serde(default = "default_position_noise")]
    pub position_noise: f64,
    #[serde(default = "default_angular_noise")]
    pub angular_noise: f64,
    #[serde(default = "default_dt")]
    pub dt: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct InitialConditions {
    #[serde(default)]
    pub seed: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    pub total_steps: u64,
    #[serde(default = "default_record_interval")]
    pub record_interval_steps: u64,
}

// Statistics attached to every simulation
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AnalysisConfig {
    /// Target mean occupancies Nl of the sampling windows.
    pub target_occupancies: Vec<f64>,
    /// Seeds the estimators of a single-domain run (sweeps use the master seed).
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub cluster_inspector: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    pub save_stats: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
}

// Main configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    #[serde(default)]
    pub domain: DomainConfig,
    #[serde(default)]
    pub sweep: Option<SweepConfig>,
    #[serde(default)]
    pub dynamics: DynamicsConfig,
    #[serde(default)]
    pub initial_conditions: InitialConditions,
    pub timing: TimingConfig,
    pub analysis: AnalysisConfig,
    pub output: OutputConfig,
}

/// A fully validated simulation together with the estimators to attach to it.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub params: SimParams,
    /// `(target occupancy, estimator seed)` pairs.
    pub estimators: Vec<(f64, u64)>,
}

impl Default for DomainConfig {
    fn default() -> Self {
        DomainConfig {
            packing_fraction: default_packing_fraction(),
            width: default_side(),
            height: default_side(),
        }
    }
}

impl Default for DynamicsConfig {
    fn default() -> Self {
        DynamicsConfig {
            speed: default_speed(),
            k: default_k(),
            position_noise: default_position_noise(),
            angular_noise: default_angular_noise(),
            dt: default_dt(),
        }
    }
}

impl From<&DynamicsConfig> for Dynamics {
    fn from(config: &DynamicsConfig) -> Self {
        Dynamics {
            speed: config.speed,
            k: config.k,
            position_noise: config.position_noise,
            angular_noise: config.angular_noise,
            dt: config.dt,
        }
    }
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))
    }

    /// Parses and validates a configuration held in memory.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;

        // --- Validation ---
        if config.analysis.target_occupancies.is_empty() {
            anyhow::bail!("analysis.target_occupancies must not be empty.");
        }
        if let Some(bad) = config
            .analysis
            .target_occupancies
            .iter()
            .find(|nl| !nl.is_finite() || **nl <= 0.0)
        {
            anyhow::bail!("target occupancy must be positive, got {}.", bad);
        }
        if config.timing.record_interval_steps == 0 {
            anyhow::bail!("timing.record_interval_steps must be greater than 0.");
        }
        if let Some(sweep) = &config.sweep {
            if sweep.packing_fractions.is_empty() {
                anyhow::bail!("sweep.packing_fractions must not be empty.");
            }
        }
        if let Some(format) = config.output.format.as_deref() {
            if !matches!(format, "json" | "bincode" | "messagepack") {
                anyhow::bail!("Unknown output format '{}'.", format);
            }
        }
        // Parameter ranges are checked by building the plans once.
        config.run_plans()?;

        Ok(config)
    }

    /// Converts the configuration into one validated plan per simulation.
    ///
    /// For sweeps the simulation seed and then one seed per estimator are drawn,
    /// in that order, from a generator seeded with `master_seed`, so a sweep is
    /// reproducible from a single number.
    pub fn run_plans(&self) -> Result<Vec<RunPlan>> {
        let dynamics = Dynamics::from(&self.dynamics);
        let targets = &self.analysis.target_occupancies;

        match &self.sweep {
            Some(sweep) => {
                let mut rng = StdRng::seed_from_u64(sweep.master_seed);
                sweep
                    .packing_fractions
                    .iter()
                    .map(|&packing_fraction| {
                        let params = SimParams::with_particle_count(
                            packing_fraction,
                            sweep.total_particles,
                            &dynamics,
                            rng.random(),
                        )?;
                        let estimators = targets.iter().map(|&nl| (nl, rng.random())).collect();
                        Ok(RunPlan { params, estimators })
                    })
                    .collect()
            }
            None => {
                let params = SimParams::with_dimensions(
                    self.domain.width,
                    self.domain.height,
                    self.domain.packing_fraction,
                    &dynamics,
                    self.initial_conditions.seed,
                )?;
                let mut rng = StdRng::seed_from_u64(self.analysis.seed);
                let estimators = targets.iter().map(|&nl| (nl, rng.random())).collect();
                Ok(vec![RunPlan { params, estimators }])
            }
        }
    }
}

fn default_packing_fraction() -> f64 {
    0.7
}

fn default_side() -> f64 {
    10.0
}

fn default_speed() -> f64 {
    0.1
}

fn default_k() -> f64 {
    3.0
}

fn default_position_noise() -> f64 {
    0.01
}

fn default_angular_noise() -> f64 {
    0.3
}

fn default_dt() -> f64 {
    0.05
}

fn default_record_interval() -> u64 {
    100
}
