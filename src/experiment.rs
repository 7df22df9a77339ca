//! The closed loop: dilute, dispense, measure, score, record.
//!
//! One [`OptimisationLoop`] owns one experiment directory. Each iteration
//! goes through two blocking steps (the dispense and the measurement); the
//! handles returned between them carry the iteration number, so a step can be
//! timed out, cancelled or retried without the tables or the counter moving.
//! Only [`OptimisationLoop::commit`] writes to disk and advances the counter.

use crate::config::ExperimentConfig;
use crate::dispense::{execute_plan, DispensePlan, LiquidHandler, ScriptGenerator};
use crate::error::{OptResult, OptobotError};
use crate::geometry::WellAddress;
use crate::measure::{check_shape, MeasurementRequest, MeasurementSource};
use crate::objective::{check_scores, Objective};
use crate::operator::{CancelToken, ConsoleOperator, Operator};
use crate::optimizer::{BatchObjective, SearchOutcome, SearchSpace, SearchStrategy};
use crate::store::{ExperimentStore, MEASUREMENTS_FILE};
use itertools::Itertools;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

/// Requested volumes may exceed the total by this much before dilution fails.
pub const DILUTION_TOLERANCE: f64 = 1e-9;

/// Prepends the diluent volume (`total_volume - sum(row)`) to each candidate.
///
/// Negative or non-finite requests, and rows asking for more than the well
/// holds, are rejected before anything is dispensed.
pub fn dilute(
    candidates: &[Vec<f64>],
    total_volume: f64,
    num_liquids: usize,
) -> OptResult<Vec<Vec<f64>>> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, row)| {
            if row.len() + 1 != num_liquids {
                return Err(OptobotError::Config(format!(
                    "candidate {} has {} volumes, expected one per non-diluent liquid ({})",
                    i,
                    row.len(),
                    num_liquids.saturating_sub(1)
                )));
            }
            if let Some(v) = row.iter().find(|v| !v.is_finite() || **v < 0.0) {
                return Err(OptobotError::Dilution(format!(
                    "candidate {} requests an invalid volume {}",
                    i, v
                )));
            }
            let requested: f64 = row.iter().sum();
            if requested > total_volume + DILUTION_TOLERANCE {
                return Err(OptobotError::Dilution(format!(
                    "candidate {} requests {} in total, more than the {} a well holds (diluent would be {})",
                    i,
                    requested,
                    total_volume,
                    total_volume - requested
                )));
            }
            let mut diluted = Vec::with_capacity(num_liquids);
            diluted.push((total_volume - requested).max(0.0));
            diluted.extend_from_slice(row);
            Ok(diluted)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    InFlight { iteration: usize },
}

/// The counter every address is derived from, and whether an iteration is
/// currently between `begin_iteration` and `commit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExperimentState {
    pub iteration: usize,
    pub phase: LoopPhase,
}

/// How a batch reaches the plate.
#[derive(Default)]
pub enum Dispenser {
    /// Write a protocol file and wait for the operator to run it.
    #[default]
    Script,
    /// Drive a connected robot directly.
    Live(Box<dyn LiquidHandler>),
}

impl fmt::Debug for Dispenser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script => f.write_str("Script"),
            Self::Live(_) => f.write_str("Live(<handler>)"),
        }
    }
}

#[derive(TypedBuilder)]
pub struct LoopBuildParams {
    pub config: ExperimentConfig,
    #[builder(setter(into))]
    pub exp_dir: PathBuf,
    pub objective: Box<dyn Objective>,
    #[builder(default)]
    pub measurement: MeasurementSource,
    #[builder(default)]
    pub dispenser: Dispenser,
    #[builder(default = Box::new(ConsoleOperator::new()) as Box<dyn Operator>)]
    pub operator: Box<dyn Operator>,
    #[builder(default)]
    pub cancel: CancelToken,
}

impl LoopBuildParams {
    /// Validates the configuration and opens (or resumes) the experiment.
    pub fn build_loop(self) -> OptResult<OptimisationLoop> {
        self.config.validate()?;
        if self.measurement.mode() != self.config.measurement_mode {
            return Err(OptobotError::Config(format!(
                "measurement mode is '{}' but a {:?} source was supplied",
                self.config.measurement_mode, self.measurement
            )));
        }

        let store = ExperimentStore::open_or_create(&self.exp_dir, &self.config)?;
        let state = ExperimentState {
            iteration: store.committed_iterations(),
            phase: LoopPhase::Idle,
        };
        info!(
            "🧪 Experiment '{}' ready at iteration {} ({} wells per iteration, {} of {} wells used)",
            self.config.name,
            state.iteration,
            self.config.batch_size,
            state.iteration * self.config.batch_size,
            self.config.capacity()
        );

        Ok(OptimisationLoop {
            script: ScriptGenerator::new(&self.config),
            config: self.config,
            store,
            state,
            objective: self.objective,
            measurement: self.measurement,
            dispenser: self.dispenser,
            operator: self.operator,
            cancel: self.cancel,
        })
    }
}

/// Returned by [`OptimisationLoop::begin_iteration`]; the batch is resolved
/// and (in script mode) the protocol is on disk.
#[derive(Debug)]
pub struct DispenseHandle {
    iteration: usize,
    plan: DispensePlan,
    diluted: Vec<Vec<f64>>,
    script: Option<PathBuf>,
}

impl DispenseHandle {
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn plan(&self) -> &DispensePlan {
        &self.plan
    }

    pub fn script_path(&self) -> Option<&Path> {
        self.script.as_deref()
    }
}

/// The liquid is in the wells.
#[derive(Debug)]
pub struct DispensedBatch {
    iteration: usize,
    wells: Vec<WellAddress>,
    diluted: Vec<Vec<f64>>,
}

impl DispensedBatch {
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn wells(&self) -> &[WellAddress] {
        &self.wells
    }
}

#[derive(Debug)]
pub struct MeasurementHandle {
    iteration: usize,
    wells: Vec<WellAddress>,
    diluted: Vec<Vec<f64>>,
}

impl MeasurementHandle {
    pub fn iteration(&self) -> usize {
        self.iteration
    }
}

/// Measurements for every well of the batch, shape-checked.
#[derive(Debug, Clone)]
pub struct MeasuredBatch {
    iteration: usize,
    wells: Vec<WellAddress>,
    diluted: Vec<Vec<f64>>,
    measurements: Vec<Vec<f64>>,
}

impl MeasuredBatch {
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn wells(&self) -> &[WellAddress] {
        &self.wells
    }

    pub fn diluted_volumes(&self) -> &[Vec<f64>] {
        &self.diluted
    }

    pub fn measurements(&self) -> &[Vec<f64>] {
        &self.measurements
    }
}

pub struct OptimisationLoop {
    config: ExperimentConfig,
    store: ExperimentStore,
    state: ExperimentState,
    objective: Box<dyn Objective>,
    measurement: MeasurementSource,
    dispenser: Dispenser,
    script: ScriptGenerator,
    operator: Box<dyn Operator>,
    cancel: CancelToken,
}

impl fmt::Debug for OptimisationLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisationLoop")
            .field("dir", &self.store.dir())
            .field("state", &self.state)
            .field("measurement", &self.measurement)
            .field("dispenser", &self.dispenser)
            .finish_non_exhaustive()
    }
}

impl OptimisationLoop {
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn store(&self) -> &ExperimentStore {
        &self.store
    }

    pub fn state(&self) -> ExperimentState {
        self.state
    }

    /// Iterations committed so far; the next iteration to run.
    pub fn iteration(&self) -> usize {
        self.state.iteration
    }

    /// A handle that aborts the blocking step in progress when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn check_handle(&self, iteration: usize) -> OptResult<()> {
        match self.state.phase {
            LoopPhase::InFlight { iteration: i } if i == iteration && i == self.state.iteration => {
                Ok(())
            }
            phase => Err(OptobotError::Iteration(format!(
                "handle for iteration {} is stale (loop is at iteration {}, {:?})",
                iteration, self.state.iteration, phase
            ))),
        }
    }

    fn check_cancelled(&self, step: &str) -> OptResult<()> {
        if self.cancel.is_cancelled() {
            return Err(OptobotError::Cancelled(step.to_string()));
        }
        Ok(())
    }

    /// Dilutes `candidates`, resolves their wells and, in script mode, writes
    /// the protocol. Nothing physical has happened yet.
    pub fn begin_iteration(&mut self, candidates: &[Vec<f64>]) -> OptResult<DispenseHandle> {
        if let LoopPhase::InFlight { iteration } = self.state.phase {
            return Err(OptobotError::Iteration(format!(
                "iteration {} is still in flight",
                iteration
            )));
        }
        let iteration = self.state.iteration;
        if iteration != self.store.committed_iterations() {
            return Err(OptobotError::Iteration(format!(
                "loop is at iteration {} but the tables hold {} iteration(s)",
                iteration,
                self.store.committed_iterations()
            )));
        }
        if candidates.len() != self.config.batch_size {
            return Err(OptobotError::Config(format!(
                "batch of {} candidates, expected {}",
                candidates.len(),
                self.config.batch_size
            )));
        }
        self.config.check_capacity(iteration + 1)?;

        let diluted = dilute(candidates, self.config.total_volume, self.config.num_liquids())?;
        let plan = DispensePlan::build(&self.config, self.store.mapper(), iteration, &diluted)?;
        let script = match self.dispenser {
            Dispenser::Script => Some(self.script.write(self.store.dir(), &plan)?),
            Dispenser::Live(_) => None,
        };

        let wells = plan.wells();
        info!(
            "▶️  Iteration {}: {} wells on plate slot(s) {} ({} .. {})",
            iteration,
            wells.len(),
            plan.plate_slots.iter().join(","),
            wells.first().map(|w| w.name()).unwrap_or_default(),
            wells.last().map(|w| w.name()).unwrap_or_default()
        );
        debug!(
            "Iteration {} wells: {:?}",
            iteration,
            wells.iter().map(|w| (w.plate, w.well_index)).collect::<Vec<_>>()
        );

        self.state.phase = LoopPhase::InFlight { iteration };
        Ok(DispenseHandle {
            iteration,
            plan,
            diluted,
            script,
        })
    }

    /// Blocks until the batch is physically in the wells.
    ///
    /// A live dispense that stops after liquid has moved leaves the wells in
    /// an unknown state. The iteration is then recorded as unusable and the
    /// counter moves on, so a retry lands on fresh wells.
    pub fn await_completion(&mut self, handle: DispenseHandle) -> OptResult<DispensedBatch> {
        self.check_handle(handle.iteration)?;

        let dispensed = match &mut self.dispenser {
            Dispenser::Script => {
                let path = handle
                    .script
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                self.operator.confirm(
                    "dispense",
                    &format!(
                        "Upload {} for iteration {}, run it on the robot and confirm when done.",
                        path, handle.iteration
                    ),
                    self.config.dispense_timeout(),
                    &self.cancel,
                )
            }
            Dispenser::Live(handler) => execute_plan(handler.as_mut(), &handle.plan),
        };

        match dispensed {
            Ok(()) => {}
            Err(e @ OptobotError::PartialDispense { .. }) => {
                self.retire_iteration(handle.iteration);
                return Err(e);
            }
            Err(e) => return Err(e),
        }
        if let Dispenser::Live(_) = self.dispenser {
            info!(
                "🤖 Robot dispensed {} transfers for iteration {}",
                handle.plan.transfer_count(),
                handle.iteration
            );
        }
        self.check_cancelled("dispense")?;

        Ok(DispensedBatch {
            iteration: handle.iteration,
            wells: handle.plan.wells(),
            diluted: handle.diluted,
        })
    }

    // Moves the counter past wells that may hold liquid. If the tables cannot
    // be written the in-memory counter still advances; `begin_iteration` then
    // refuses to run until the store agrees with it.
    fn retire_iteration(&mut self, iteration: usize) {
        if let Err(e) = self.store.write_unusable(iteration) {
            error!(
                "Could not record iteration {} as unusable: {}. Mark its wells by hand before resuming.",
                iteration, e
            );
        }
        self.state = ExperimentState {
            iteration: iteration + 1,
            phase: LoopPhase::Idle,
        };
    }

    pub fn begin_measurement(&mut self, batch: DispensedBatch) -> OptResult<MeasurementHandle> {
        self.check_handle(batch.iteration)?;
        if let MeasurementSource::Manual = self.measurement {
            info!(
                "✍️  Enter {} for wells {} .. {} in {}",
                self.config.measured_parameter_names.join(", "),
                batch.wells.first().map(|w| w.name()).unwrap_or_default(),
                batch.wells.last().map(|w| w.name()).unwrap_or_default(),
                self.store.path(MEASUREMENTS_FILE).display()
            );
        }
        Ok(MeasurementHandle {
            iteration: batch.iteration,
            wells: batch.wells,
            diluted: batch.diluted,
        })
    }

    /// Blocks until measurements for the batch are available and checks their
    /// shape against `(batch_size, measured parameters)`.
    pub fn await_measurement(&mut self, handle: MeasurementHandle) -> OptResult<MeasuredBatch> {
        self.check_handle(handle.iteration)?;

        let exp_dir = self.store.dir().to_path_buf();
        let request = MeasurementRequest {
            iteration: handle.iteration,
            batch_size: self.config.batch_size,
            num_measured_parameters: self.config.num_measured_parameters(),
            exp_dir: &exp_dir,
            diluted_volumes: &handle.diluted,
            wells: &handle.wells,
            geometry: self.config.plate_geometry(),
        };

        let measurements = match &mut self.measurement {
            MeasurementSource::Manual => {
                self.operator.confirm(
                    "measurement",
                    &format!(
                        "Fill in {} for iteration {} and confirm.",
                        self.store.path(MEASUREMENTS_FILE).display(),
                        handle.iteration
                    ),
                    self.config.measurement_timeout(),
                    &self.cancel,
                )?;
                self.store.read_manual_measurements(handle.iteration)?
            }
            MeasurementSource::Automatic(pipeline) => pipeline.measure(&request)?,
            MeasurementSource::UserSupplied(measure) => measure(&request)?,
        };
        self.check_cancelled("measurement")?;
        check_shape(
            &measurements,
            self.config.batch_size,
            self.config.num_measured_parameters(),
        )?;

        Ok(MeasuredBatch {
            iteration: handle.iteration,
            wells: handle.wells,
            diluted: handle.diluted,
            measurements,
        })
    }

    /// Scores the batch, persists all four tables and advances the counter.
    /// On any failure the counter stays where it was.
    pub fn commit(&mut self, measured: MeasuredBatch) -> OptResult<Vec<f64>> {
        self.check_handle(measured.iteration)?;

        let errors = self.objective.score(&measured.measurements)?;
        check_scores(&errors, self.config.batch_size)?;

        self.store.write_iteration(
            measured.iteration,
            &measured.diluted,
            &measured.measurements,
            &errors,
        )?;
        self.state = ExperimentState {
            iteration: measured.iteration + 1,
            phase: LoopPhase::Idle,
        };

        info!(
            "✅ Iteration {} committed, best error {:.4}",
            measured.iteration,
            errors.iter().copied().fold(f64::INFINITY, f64::min)
        );
        Ok(errors)
    }

    /// Drops the in-flight iteration. The counter and tables are untouched,
    /// so the same iteration can be run again.
    pub fn abort_iteration(&mut self) {
        if let LoopPhase::InFlight { iteration } = self.state.phase {
            warn!("Iteration {} aborted; it will be re-run", iteration);
        }
        self.state.phase = LoopPhase::Idle;
        self.cancel.reset();
    }

    /// Runs one full iteration: one batch of candidates in, one error per
    /// candidate out.
    pub fn invoke(&mut self, candidates: &[Vec<f64>]) -> OptResult<Vec<f64>> {
        if let LoopPhase::InFlight { iteration } = self.state.phase {
            return Err(OptobotError::Iteration(format!(
                "invoke called while iteration {} is in flight",
                iteration
            )));
        }
        let result = self.run_iteration(candidates);
        if let Err(e) = &result {
            self.abort_iteration();
            if e.is_retryable() {
                warn!("Iteration {} failed and can be retried: {}", self.state.iteration, e);
            }
        }
        result
    }

    fn run_iteration(&mut self, candidates: &[Vec<f64>]) -> OptResult<Vec<f64>> {
        let handle = self.begin_iteration(candidates)?;
        let dispensed = self.await_completion(handle)?;
        let pending = self.begin_measurement(dispensed)?;
        let measured = self.await_measurement(pending)?;
        self.commit(measured)
    }

    /// Runs `strategy` for `iterations` batches, starting at the current
    /// counter. Every limit that would stop the run part-way is checked first.
    pub fn optimise(
        &mut self,
        strategy: &mut dyn SearchStrategy,
        space: &SearchSpace,
        iterations: usize,
    ) -> OptResult<SearchOutcome> {
        if iterations == 0 {
            return Err(OptobotError::Config("iteration count must be positive".to_string()));
        }
        space.validate_for(&self.config)?;
        self.config.check_capacity(self.state.iteration + iterations)?;

        info!(
            "🚀 Running {} for {} iterations from iteration {} (space {})",
            strategy.name(),
            iterations,
            self.state.iteration,
            space
        );
        let batch_size = self.config.batch_size;
        strategy.run(self, space, iterations, batch_size)
    }
}

impl BatchObjective for OptimisationLoop {
    fn evaluate(&mut self, batch: &[Vec<f64>]) -> OptResult<Vec<f64>> {
        self.invoke(batch)
    }
}
