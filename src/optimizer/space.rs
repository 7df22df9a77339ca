use crate::config::ExperimentConfig;
use crate::error::{OptResult, OptobotError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Volume bounds for each non-diluent liquid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    bounds: Vec<(f64, f64)>,
}

impl SearchSpace {
    pub fn new(bounds: Vec<(f64, f64)>) -> OptResult<Self> {
        if bounds.is_empty() {
            return Err(OptobotError::Config("search space has no dimensions".to_string()));
        }
        for (i, &(lo, hi)) in bounds.iter().enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo < 0.0 || lo > hi {
                return Err(OptobotError::Config(format!(
                    "bound {} ({}:{}) must satisfy 0 <= lo <= hi",
                    i, lo, hi
                )));
            }
        }
        Ok(Self { bounds })
    }

    /// The same `[lo, hi]` for every dimension.
    pub fn uniform(dims: usize, lo: f64, hi: f64) -> OptResult<Self> {
        Self::new(vec![(lo, hi); dims])
    }

    #[inline]
    pub fn dims(&self) -> usize {
        self.bounds.len()
    }

    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    /// Largest total volume any candidate in the space can request.
    pub fn max_total(&self) -> f64 {
        self.bounds.iter().map(|(_, hi)| hi).sum()
    }

    /// The space must have one dimension per non-diluent liquid and no corner
    /// of it may ask for more than the well holds.
    pub fn validate_for(&self, config: &ExperimentConfig) -> OptResult<()> {
        let expected = config.num_liquids() - 1;
        if self.dims() != expected {
            return Err(OptobotError::Config(format!(
                "search space has {} dimensions, but there are {} non-diluent liquids",
                self.dims(),
                expected
            )));
        }
        if self.max_total() > config.total_volume + 1e-9 {
            return Err(OptobotError::Config(format!(
                "upper bounds add up to {}, more than the total volume of {}",
                self.max_total(),
                config.total_volume
            )));
        }
        Ok(())
    }

    pub fn clip(&self, point: &mut [f64]) {
        for (v, &(lo, hi)) in point.iter_mut().zip(&self.bounds) {
            *v = v.clamp(lo, hi);
        }
    }

    pub fn sample(&self, rng: &mut fastrand::Rng) -> Vec<f64> {
        self.bounds
            .iter()
            .map(|&(lo, hi)| lo + rng.f64() * (hi - lo))
            .collect()
    }

    /// Maps a point to the unit cube. Degenerate dimensions map to 0.
    pub fn normalize(&self, point: &[f64]) -> Vec<f64> {
        point
            .iter()
            .zip(&self.bounds)
            .map(|(v, &(lo, hi))| if hi > lo { (v - lo) / (hi - lo) } else { 0.0 })
            .collect()
    }
}

impl FromStr for SearchSpace {
    type Err = OptobotError;

    /// Parses `lo:hi,lo:hi,...`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bounds = s
            .split(',')
            .map(|part| -> OptResult<(f64, f64)> {
                let (lo, hi) = part.trim().split_once(':').ok_or_else(|| {
                    OptobotError::Config(format!("bound '{}' is not of the form lo:hi", part))
                })?;
                let parse = |v: &str| {
                    v.trim().parse::<f64>().map_err(|_| {
                        OptobotError::Config(format!("'{}' in bound '{}' is not a number", v, part))
                    })
                };
                Ok((parse(lo)?, parse(hi)?))
            })
            .collect::<OptResult<Vec<_>>>()?;
        Self::new(bounds)
    }
}

impl fmt::Display for SearchSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (lo, hi)) in self.bounds.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{}", lo, hi)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let space: SearchSpace = "0:30, 5:30,0:20.5".parse().unwrap();
        assert_eq!(space.dims(), 3);
        assert_eq!(space.bounds()[2], (0.0, 20.5));
        assert_eq!(space.to_string(), "0:30,5:30,0:20.5");
    }

    #[test]
    fn test_rejects_inverted_or_negative_bounds() {
        assert!("10:5".parse::<SearchSpace>().is_err());
        assert!("-1:5".parse::<SearchSpace>().is_err());
        assert!("1-5".parse::<SearchSpace>().is_err());
        assert!("".parse::<SearchSpace>().is_err());
    }

    #[test]
    fn test_validate_for_checks_total_volume() {
        let config = ExperimentConfig::default();
        assert!(SearchSpace::uniform(3, 0.0, 30.0)
            .unwrap()
            .validate_for(&config)
            .is_ok());
        assert!(SearchSpace::uniform(3, 0.0, 31.0)
            .unwrap()
            .validate_for(&config)
            .is_err());
        assert!(SearchSpace::uniform(2, 0.0, 30.0)
            .unwrap()
            .validate_for(&config)
            .is_err());
    }
}
