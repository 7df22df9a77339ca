use crate::error::{OptResult, OptobotError};

/// Scores a batch of measurements; lower is better. Returns one error per row.
pub trait Objective {
    fn score(&mut self, measurements: &[Vec<f64>]) -> OptResult<Vec<f64>>;
}

impl<F> Objective for F
where
    F: FnMut(&[Vec<f64>]) -> Vec<f64>,
{
    fn score(&mut self, measurements: &[Vec<f64>]) -> OptResult<Vec<f64>> {
        Ok(self(measurements))
    }
}

/// Sum of squared differences to a target measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct SquaredDistance {
    target: Vec<f64>,
}

impl SquaredDistance {
    pub fn new(target: Vec<f64>) -> OptResult<Self> {
        if target.is_empty() || target.iter().any(|v| !v.is_finite()) {
            return Err(OptobotError::Config(format!(
                "target measurement {:?} must be non-empty and finite",
                target
            )));
        }
        Ok(Self { target })
    }

    pub fn target(&self) -> &[f64] {
        &self.target
    }
}

impl Objective for SquaredDistance {
    fn score(&mut self, measurements: &[Vec<f64>]) -> OptResult<Vec<f64>> {
        measurements
            .iter()
            .map(|row| {
                if row.len() != self.target.len() {
                    return Err(OptobotError::Objective(format!(
                        "measurement has {} values, target has {}",
                        row.len(),
                        self.target.len()
                    )));
                }
                Ok(row
                    .iter()
                    .zip(&self.target)
                    .map(|(m, t)| (m - t) * (m - t))
                    .sum())
            })
            .collect()
    }
}

/// Checks a returned score vector before it reaches the store.
pub fn check_scores(scores: &[f64], expected: usize) -> OptResult<()> {
    if scores.len() != expected {
        return Err(OptobotError::Objective(format!(
            "{} scores for a batch of {}",
            scores.len(),
            expected
        )));
    }
    if let Some(i) = scores.iter().position(|s| !s.is_finite()) {
        return Err(OptobotError::Objective(format!(
            "score {} of the batch is {}",
            i, scores[i]
        )));
    }
    Ok(())
}
