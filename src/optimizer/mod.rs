//! Black-box search strategies.
//!
//! Every strategy proposes whole batches and receives one error per
//! candidate back. The optimisation loop is just another [`BatchObjective`],
//! so the same strategy runs against a closure in tests and against the robot
//! in production.

pub mod space;
pub mod surrogate;
pub mod swarm;

pub use self::space::SearchSpace;
pub use self::surrogate::{AskTell, GaussianProcess, RandomForest, Surrogate, SurrogateSearch};
pub use self::swarm::ParticleSwarm;

use crate::error::{OptResult, OptobotError};
use serde::Serialize;
use strum_macros::{Display, EnumString};

/// Anything that scores a batch of candidates, one error per candidate.
pub trait BatchObjective {
    fn evaluate(&mut self, batch: &[Vec<f64>]) -> OptResult<Vec<f64>>;
}

impl<F> BatchObjective for F
where
    F: FnMut(&[Vec<f64>]) -> OptResult<Vec<f64>>,
{
    fn evaluate(&mut self, batch: &[Vec<f64>]) -> OptResult<Vec<f64>> {
        self(batch)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub best_params: Vec<f64>,
    pub best_score: f64,
    /// Number of batch evaluations performed.
    pub evaluations: usize,
    /// Best score seen after each evaluation.
    pub history: Vec<f64>,
}

pub trait SearchStrategy {
    fn name(&self) -> &'static str;

    /// Calls `objective` exactly `iterations` times with batches of
    /// `batch_size` candidates drawn from `space`.
    fn run(
        &mut self,
        objective: &mut dyn BatchObjective,
        space: &SearchSpace,
        iterations: usize,
        batch_size: usize,
    ) -> OptResult<SearchOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum StrategyKind {
    #[strum(serialize = "PSO")]
    Pso,
    #[strum(serialize = "GP")]
    Gp,
    #[strum(serialize = "RF")]
    Rf,
}

impl StrategyKind {
    pub fn build(self, seed: Option<u64>) -> Box<dyn SearchStrategy> {
        match self {
            Self::Pso => Box::new(ParticleSwarm::new(seed)),
            Self::Gp => Box::new(SurrogateSearch::new(GaussianProcess::default(), seed)),
            Self::Rf => Box::new(SurrogateSearch::new(RandomForest::new(seed), seed)),
        }
    }
}

pub(crate) fn seeded_rng(seed: Option<u64>) -> fastrand::Rng {
    if let Some(s) = seed {
        fastrand::Rng::with_seed(s)
    } else {
        fastrand::Rng::new()
    }
}

/// Running best over every evaluated candidate.
#[derive(Debug, Clone)]
pub(crate) struct BestTracker {
    params: Vec<f64>,
    score: f64,
    evaluations: usize,
    history: Vec<f64>,
}

impl BestTracker {
    pub(crate) fn new() -> Self {
        Self {
            params: Vec::new(),
            score: f64::INFINITY,
            evaluations: 0,
            history: Vec::new(),
        }
    }

    /// Evaluates `batch` through `objective` and folds the results in.
    pub(crate) fn evaluate(
        &mut self,
        objective: &mut dyn BatchObjective,
        batch: &[Vec<f64>],
    ) -> OptResult<Vec<f64>> {
        let scores = objective.evaluate(batch)?;
        if scores.len() != batch.len() {
            return Err(OptobotError::Objective(format!(
                "{} scores returned for {} candidates",
                scores.len(),
                batch.len()
            )));
        }
        for (params, &score) in batch.iter().zip(&scores) {
            if score < self.score {
                self.score = score;
                self.params = params.clone();
            }
        }
        self.evaluations += 1;
        self.history.push(self.score);
        Ok(scores)
    }

    pub(crate) fn finish(self) -> OptResult<SearchOutcome> {
        if self.params.is_empty() {
            return Err(OptobotError::Objective(
                "search finished without a finite score".to_string(),
            ));
        }
        Ok(SearchOutcome {
            best_params: self.params,
            best_score: self.score,
            evaluations: self.evaluations,
            history: self.history,
        })
    }
}
