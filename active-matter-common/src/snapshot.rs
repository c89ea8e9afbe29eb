use serde::{Deserialize, Serialize};

/// The ΔN-vs-N estimate of one sampling configuration at a given time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaNRecord {
    /// Requested mean occupancy Nl of the sampling window.
    pub target_occupancy: f64,
    /// Measured mean occupancy N.
    pub mean: f64,
    /// Standard deviation ΔN of the occupancy.
    pub stdev: f64,
}

/// Statistics of one simulation at a specific step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Index of the simulation within the run (one per packing fraction in a sweep).
    pub run: usize,
    /// Number of committed steps the statistics were computed from.
    pub step: u64,
    /// `step * dt`.
    pub time: f64,
    pub particle_count: u32,
    /// Exact packing fraction of the simulation.
    pub packing_fraction: f64,
    pub delta_n: Vec<DeltaNRecord>,
    /// Mean number of touching neighbors, if the cluster inspector is enabled.
    pub mean_neighbor_count: Option<f64>,
    /// `neighbor_count_distribution[n]` is the number of particles with exactly n touching neighbors.
    pub neighbor_count_distribution: Option<Vec<u32>>,
}
