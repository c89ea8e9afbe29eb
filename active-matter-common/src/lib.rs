pub mod config;
pub mod particle;
pub mod sim_params;
pub mod snapshot;

// Re-export key types for easier use by dependent crates
pub use config::{AnalysisConfig, DomainConfig, DynamicsConfig, InitialConditions, OutputConfig, RunPlan, SimulationConfig, SweepConfig, TimingConfig};
pub use particle::{wrap_coordinate, Particle, Particles, PARTICLE_AREA};
pub use sim_params::{Dynamics, SimParams};
pub use snapshot::{DeltaNRecord, Snapshot};
