use crate::cluster::ClusterInspector;
use crate::fluctuation::FluctuationEstimator;
use crate::processor::StateProcessor;
use crate::simulation::SimulationEngine;
use active_matter_common::{DeltaNRecord, RunPlan, Snapshot};
use anyhow::Result;
use log::info;
use std::sync::Arc;

/// Bins of the recorded neighbor count histogram.
pub const NEIGHBOR_BINS: usize = 10;

/// One simulation and the processors attached to it.
pub struct StudyRun {
    pub engine: SimulationEngine,
    pub estimators: Vec<Arc<FluctuationEstimator>>,
    pub clusters: Option<Arc<ClusterInspector>>,
}

/// One row of the ΔN-vs-N table.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaNRow {
    pub packing_fraction: f64,
    pub target_occupancy: f64,
    pub mean: f64,
    pub stdev: f64,
}

impl DeltaNRow {
    pub fn log10_mean(&self) -> f64 {
        self.mean.log10()
    }

    pub fn log10_stdev(&self) -> f64 {
        self.stdev.log10()
    }
}

/// A set of simulations (one per packing fraction in a sweep) advanced in
/// lockstep, each with one estimator per target occupancy.
pub struct DeltaNStudy {
    runs: Vec<StudyRun>,
}

impl DeltaNStudy {
    pub fn from_plan(plans: &[RunPlan], with_clusters: bool) -> Result<Self> {
        let mut runs = Vec::with_capacity(plans.len());
        for (index, plan) in plans.iter().enumerate() {
            let mut engine = SimulationEngine::new(plan.params.clone())?;
            let estimators = plan
                .estimators
                .iter()
                .map(|&(target, seed)| FluctuationEstimator::attach(&mut engine, target, seed))
                .collect::<Vec<_>>();
            let clusters = with_clusters.then(|| ClusterInspector::attach(&mut engine));
            info!(
                "Run {}: packing fraction {:.4}, {} estimators{}.",
                index,
                engine.packing_fraction(),
                estimators.len(),
                if clusters.is_some() { ", cluster inspector" } else { "" }
            );
            runs.push(StudyRun { engine, estimators, clusters });
        }
        Ok(DeltaNStudy { runs })
    }

    /// Advances every simulation by one step. Engines run on their own
    /// workers, so the simulations proceed concurrently.
    pub fn advance(&mut self) {
        for run in &mut self.runs {
            run.engine.advance();
        }
    }

    /// Commits every engine and publishes every processor's outstanding work.
    pub fn settle(&mut self) {
        for run in &mut self.runs {
            run.engine.synchronize();
            for estimator in &run.estimators {
                estimator.settle();
            }
            if let Some(clusters) = &run.clusters {
                clusters.settle();
            }
        }
    }

    pub fn runs(&self) -> &[StudyRun] {
        &self.runs
    }

    /// Statistics of every run, labelled with `step`. Call after [`settle`](Self::settle).
    pub fn snapshots(&self, step: u64) -> Vec<Snapshot> {
        self.runs
            .iter()
            .enumerate()
            .map(|(index, run)| Snapshot {
                run: index,
                step,
                time: step as f64 * run.engine.params().dt,
                particle_count: run.engine.n_particles() as u32,
                packing_fraction: run.engine.packing_fraction(),
                delta_n: run
                    .estimators
                    .iter()
                    .map(|e| {
                        let value = e.value();
                        DeltaNRecord {
                            target_occupancy: e.target_occupancy(),
                            mean: value.mean,
                            stdev: value.stdev,
                        }
                    })
                    .collect(),
                mean_neighbor_count: run.clusters.as_ref().map(|c| c.mean_neighbor_count()),
                neighbor_count_distribution: run.clusters.as_ref().map(|c| c.distribution(NEIGHBOR_BINS)),
            })
            .collect()
    }

    /// Current estimate of every (packing fraction, target occupancy) pair.
    pub fn delta_n_table(&self) -> Vec<DeltaNRow> {
        self.runs
            .iter()
            .flat_map(|run| {
                let packing_fraction = run.engine.packing_fraction();
                run.estimators.iter().map(move |e| {
                    let value = e.value();
                    DeltaNRow {
                        packing_fraction,
                        target_occupancy: e.target_occupancy(),
                        mean: value.mean,
                        stdev: value.stdev,
                    }
                })
            })
            .collect()
    }
}
