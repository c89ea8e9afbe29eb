use crate::forces::compute_deltas;
use crate::grid::Grid;
use crate::integrator;
use crate::pipeline::{fatal, pending, Pending, PipelineError, Promise, SerialExecutor};
use crate::processor::StateProcessor;
use crate::state::{scatter, SimState};
use active_matter_common::{Particles, SimParams};
use anyhow::Result;
use log::{debug, info, trace, warn};
use rand::prelude::*;
use std::sync::Arc;
use std::time::Instant;

/// Where the engine is in its one-stage pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// A committed state and nothing in flight.
    Ready,
    /// A committed state while the next one is computed in the background.
    Pipelined,
}

struct InFlight {
    particles: Pending<Particles>,
    grid: Pending<Grid>,
}

/// Owns the particle state and runs the simulation one step ahead of its callers.
///
/// Each [`advance`](Self::advance) commits the step computed in the background
/// since the previous call, immediately starts the next one on the engine's
/// dedicated worker, hands the pending results to the registered processors
/// and returns the freshly committed particles.
pub struct SimulationEngine {
    params: Arc<SimParams>,
    /// The committed state.
    current: SimState,
    in_flight: Option<InFlight>,
    /// Runs the steps in order and owns the engine's random stream.
    worker: SerialExecutor<StdRng>,
    processors: Vec<Arc<dyn StateProcessor>>,
    steps_committed: u64,
}

impl SimulationEngine {
    /// Creates an engine with a uniform random scatter drawn from `params.seed`.
    pub fn new(params: SimParams) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(params.seed);
        let particles = scatter(&params, &mut rng);
        Self::start(params, particles, rng)
    }

    /// Creates an engine from an explicit initial state. `params.n_particles`
    /// is replaced by the number of particles supplied.
    pub fn from_particles(mut params: SimParams, particles: Particles) -> Result<Self> {
        if particles.is_empty() {
            anyhow::bail!("simulation must contain at least one particle");
        }
        if let Some(index) = particles.iter().position(|p| {
            !p.is_finite()
                || !(0.0..params.width).contains(&p.x)
                || !(0.0..params.height).contains(&p.y)
        }) {
            anyhow::bail!(
                "particle {} lies outside the {}x{} domain",
                index,
                params.width,
                params.height
            );
        }
        params.n_particles = particles.len();
        let rng = StdRng::seed_from_u64(params.seed);
        Self::start(params, particles, rng)
    }

    fn start(params: SimParams, particles: Particles, rng: StdRng) -> Result<Self> {
        if params.n_cols < 3 || params.n_rows < 3 {
            warn!(
                "Grid of {}x{} cells is narrower than the neighbor stencil; pairs may interact through more than one periodic image.",
                params.n_cols, params.n_rows
            );
        }
        let current = SimState::new(particles, &params);
        let worker = SerialExecutor::spawn("simulation-step", rng)?;

        info!(
            "Simulation initialized: {} particles in {:.2}x{:.2} ({}x{} cells), packing fraction {:.4}.",
            params.n_particles,
            params.width,
            params.height,
            params.n_cols,
            params.n_rows,
            params.packing_fraction()
        );
        debug!("Simulation Parameters: {:#?}", params);

        Ok(Self {
            params: Arc::new(params),
            current,
            in_flight: None,
            worker,
            processors: Vec::new(),
            steps_committed: 0,
        })
    }

    /// Commits the step in flight (blocking until it is done), starts the
    /// next one, notifies the active processors and returns the committed
    /// particles.
    ///
    /// A failed background step terminates the process.
    pub fn advance(&mut self) -> Arc<Particles> {
        self.retire();

        let (particles_promise, particles) = pending();
        let (grid_promise, grid) = pending();
        let current = self.current.clone();
        let params = Arc::clone(&self.params);
        let submitted = self.worker.submit(move |rng: &mut StdRng| {
            run_step(&current, &params, rng, particles_promise, grid_promise);
        });
        if let Err(err) = submitted {
            fatal("submitting simulation step", &err);
        }

        for processor in self.processors.iter().filter(|p| p.is_active()) {
            processor.advance(particles.clone(), grid.clone());
        }
        self.in_flight = Some(InFlight { particles, grid });

        Arc::clone(&self.current.particles)
    }

    /// Commits the step in flight, if any, without starting another one.
    /// Leaves the engine [`EngineState::Ready`].
    pub fn synchronize(&mut self) -> Arc<Particles> {
        self.retire();
        Arc::clone(&self.current.particles)
    }

    fn retire(&mut self) {
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };
        let wait_start = Instant::now();
        let particles = in_flight
            .particles
            .wait()
            .unwrap_or_else(|e| fatal("simulation step", &e));
        let grid = in_flight
            .grid
            .wait()
            .unwrap_or_else(|e| fatal("simulation grid", &e));
        self.current = SimState { particles, grid };
        self.steps_committed += 1;
        trace!(
            "Step {} committed after waiting {:.2} ms",
            self.steps_committed,
            wait_start.elapsed().as_secs_f64() * 1000.0
        );
    }

    /// Adds a processor to be notified on every [`advance`](Self::advance).
    pub fn register_state_processor(&mut self, processor: Arc<dyn StateProcessor>) {
        self.processors.push(processor);
        debug!("Registered state processor #{}", self.processors.len());
    }

    pub fn state(&self) -> EngineState {
        if self.in_flight.is_some() {
            EngineState::Pipelined
        } else {
            EngineState::Ready
        }
    }

    /// Number of steps integrated into the committed state.
    pub fn steps_committed(&self) -> u64 {
        self.steps_committed
    }

    /// Simulation time of the committed state.
    pub fn time(&self) -> f64 {
        self.steps_committed as f64 * self.params.dt
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    /// The committed particles.
    pub fn particles(&self) -> Arc<Particles> {
        Arc::clone(&self.current.particles)
    }

    /// The grid of the committed particles.
    pub fn grid(&self) -> Arc<Grid> {
        Arc::clone(&self.current.grid)
    }

    pub fn current(&self) -> &SimState {
        &self.current
    }

    pub fn packing_fraction(&self) -> f64 {
        self.params.packing_fraction()
    }

    pub fn n_particles(&self) -> usize {
        self.params.n_particles
    }

    pub fn width(&self) -> f64 {
        self.params.width
    }

    pub fn height(&self) -> f64 {
        self.params.height
    }

    pub fn cell_width(&self) -> f64 {
        self.params.cell_width
    }

    pub fn cell_height(&self) -> f64 {
        self.params.cell_height
    }

    pub fn n_cols(&self) -> usize {
        self.params.n_cols
    }

    pub fn n_rows(&self) -> usize {
        self.params.n_rows
    }
}

/// One background step: forces, integration, then the grid of the *new*
/// particles. Particles are published before the grid is built so consumers
/// that only need positions can start early.
fn run_step(
    current: &SimState,
    params: &SimParams,
    rng: &mut StdRng,
    particles_out: Promise<Particles>,
    grid_out: Promise<Grid>,
) {
    let deltas = compute_deltas(&current.particles, &current.grid, params, rng);
    match integrator::step(&current.particles, &deltas, params) {
        Ok(next) => {
            let next = particles_out.fulfil(next);
            grid_out.fulfil(Grid::for_params(&next, params));
        }
        Err(e) => {
            let err = PipelineError::StepFailed(e.to_string());
            particles_out.fail(err.clone());
            grid_out.fail(err);
        }
    }
}
