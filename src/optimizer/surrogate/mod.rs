//! Model-based batch search.
//!
//! An [`AskTell`] optimiser keeps every (candidate, error) pair it is told
//! about, fits a [`Surrogate`] on them and proposes the candidates with the
//! lowest lower confidence bound. Candidates within one batch are picked one
//! at a time, each pick being fed back to the model at the best error seen so
//! far, so a batch spreads out instead of stacking on a single optimum.

mod forest;
mod gp;

pub use self::forest::RandomForest;
pub use self::gp::GaussianProcess;

use super::{seeded_rng, BatchObjective, BestTracker, SearchOutcome, SearchSpace, SearchStrategy};
use crate::error::{OptResult, OptobotError};
use tracing::{debug, info};

/// A regression model over the unit cube that reports its own uncertainty.
pub trait Surrogate {
    fn name(&self) -> &'static str;
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> OptResult<()>;
    /// Predicted mean and standard deviation at `x`.
    fn predict(&self, x: &[f64]) -> (f64, f64);
}

pub const DEFAULT_KAPPA: f64 = 1.96;
pub const DEFAULT_CANDIDATES: usize = 512;

#[derive(Debug, Clone)]
pub struct AskTell<M> {
    space: SearchSpace,
    model: M,
    rng: fastrand::Rng,
    xs: Vec<Vec<f64>>,
    ys: Vec<f64>,
    n_initial: usize,
    kappa: f64,
    n_candidates: usize,
}

impl<M: Surrogate> AskTell<M> {
    /// The first `n_initial` points are sampled uniformly.
    pub fn new(space: SearchSpace, model: M, n_initial: usize, seed: Option<u64>) -> Self {
        Self {
            space,
            model,
            rng: seeded_rng(seed),
            xs: Vec::new(),
            ys: Vec::new(),
            n_initial: n_initial.max(1),
            kappa: DEFAULT_KAPPA,
            n_candidates: DEFAULT_CANDIDATES,
        }
    }

    pub fn with_kappa(mut self, kappa: f64) -> Self {
        self.kappa = kappa;
        self
    }

    pub fn observations(&self) -> usize {
        self.ys.len()
    }

    pub fn ask(&mut self, n: usize) -> OptResult<Vec<Vec<f64>>> {
        if self.ys.len() < self.n_initial {
            return Ok((0..n).map(|_| self.space.sample(&mut self.rng)).collect());
        }

        let mut train_x: Vec<Vec<f64>> = self.xs.iter().map(|x| self.space.normalize(x)).collect();
        let mut train_y = self.ys.clone();
        let lie = train_y.iter().copied().fold(f64::INFINITY, f64::min);

        let mut candidates: Vec<Vec<f64>> = (0..self.n_candidates)
            .map(|_| self.space.sample(&mut self.rng))
            .collect();

        let mut batch = Vec::with_capacity(n);
        for _ in 0..n {
            if candidates.is_empty() {
                batch.push(self.space.sample(&mut self.rng));
                continue;
            }
            self.model.fit(&train_x, &train_y)?;

            let (pick, lcb) = candidates
                .iter()
                .map(|c| {
                    let (mean, std) = self.model.predict(&self.space.normalize(c));
                    mean - self.kappa * std
                })
                .enumerate()
                .fold((0, f64::INFINITY), |best, (i, v)| if v < best.1 { (i, v) } else { best });
            debug!("{} picked candidate with LCB {:.4}", self.model.name(), lcb);

            let chosen = candidates.swap_remove(pick);
            train_x.push(self.space.normalize(&chosen));
            train_y.push(lie);
            batch.push(chosen);
        }
        Ok(batch)
    }

    /// Records observed errors. Non-finite errors are dropped.
    pub fn tell(&mut self, xs: &[Vec<f64>], ys: &[f64]) -> OptResult<()> {
        if xs.len() != ys.len() {
            return Err(OptobotError::Objective(format!(
                "told {} points but {} errors",
                xs.len(),
                ys.len()
            )));
        }
        for (x, &y) in xs.iter().zip(ys) {
            if y.is_finite() {
                self.xs.push(x.clone());
                self.ys.push(y);
            }
        }
        Ok(())
    }
}

/// Runs an [`AskTell`] optimiser one batch per iteration.
#[derive(Debug, Clone)]
pub struct SurrogateSearch<M> {
    model: M,
    seed: Option<u64>,
    kappa: f64,
}

impl<M: Surrogate + Clone> SurrogateSearch<M> {
    pub fn new(model: M, seed: Option<u64>) -> Self {
        Self {
            model,
            seed,
            kappa: DEFAULT_KAPPA,
        }
    }

    pub fn with_kappa(mut self, kappa: f64) -> Self {
        self.kappa = kappa;
        self
    }
}

impl<M: Surrogate + Clone> SearchStrategy for SurrogateSearch<M> {
    fn name(&self) -> &'static str {
        self.model.name()
    }

    fn run(
        &mut self,
        objective: &mut dyn BatchObjective,
        space: &SearchSpace,
        iterations: usize,
        batch_size: usize,
    ) -> OptResult<SearchOutcome> {
        let mut optimizer = AskTell::new(space.clone(), self.model.clone(), batch_size, self.seed)
            .with_kappa(self.kappa);
        let mut tracker = BestTracker::new();

        for iteration in 0..iterations {
            let batch = optimizer.ask(batch_size)?;
            let scores = tracker.evaluate(objective, &batch)?;
            optimizer.tell(&batch, &scores)?;
            debug!(
                "{} iteration {}: {} observations",
                self.model.name(),
                iteration,
                optimizer.observations()
            );
        }

        let outcome = tracker.finish()?;
        info!(
            "{} finished: best cost {:.4} after {} iterations",
            self.model.name(),
            outcome.best_score,
            outcome.evaluations
        );
        Ok(outcome)
    }
}
