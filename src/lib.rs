pub mod cluster;
pub mod fluctuation;
pub mod forces;
pub mod grid;
pub mod integrator;
pub mod output;
pub mod pipeline;
pub mod processor;
pub mod simulation;
pub mod state;
pub mod study;

pub use cluster::{neighbor_counts, ClusterInspector};
pub use fluctuation::{DeltaN, FluctuationEstimator, RunningStats, SAMPLES_PER_UPDATE};
pub use grid::Grid;
pub use pipeline::{Pending, PipelineError};
pub use processor::StateProcessor;
pub use simulation::{EngineState, SimulationEngine};
pub use state::SimState;
pub use study::{DeltaNRow, DeltaNStudy};
