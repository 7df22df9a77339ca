use super::{seeded_rng, BatchObjective, BestTracker, SearchOutcome, SearchSpace, SearchStrategy};
use crate::error::{OptResult, OptobotError};
use tracing::{debug, info};

/// Global-best particle swarm. One particle per well of the batch.
#[derive(Debug, Clone)]
pub struct ParticleSwarm {
    /// Pull towards each particle's own best.
    pub c1: f64,
    /// Pull towards the swarm's best.
    pub c2: f64,
    /// Inertia.
    pub w: f64,
    rng: fastrand::Rng,
}

impl ParticleSwarm {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            c1: 0.3,
            c2: 0.5,
            w: 0.1,
            rng: seeded_rng(seed),
        }
    }

    pub fn with_coefficients(mut self, c1: f64, c2: f64, w: f64) -> Self {
        self.c1 = c1;
        self.c2 = c2;
        self.w = w;
        self
    }
}

struct Particle {
    position: Vec<f64>,
    velocity: Vec<f64>,
    best_position: Vec<f64>,
    best_score: f64,
}

impl SearchStrategy for ParticleSwarm {
    fn name(&self) -> &'static str {
        "PSO"
    }

    fn run(
        &mut self,
        objective: &mut dyn BatchObjective,
        space: &SearchSpace,
        iterations: usize,
        batch_size: usize,
    ) -> OptResult<SearchOutcome> {
        if batch_size == 0 {
            return Err(OptobotError::Config("swarm needs at least one particle".to_string()));
        }
        let rng = &mut self.rng;

        let mut swarm: Vec<Particle> = (0..batch_size)
            .map(|_| {
                let position = space.sample(rng);
                let velocity = space
                    .bounds()
                    .iter()
                    .map(|&(lo, hi)| (rng.f64() * 2.0 - 1.0) * 0.1 * (hi - lo))
                    .collect();
                Particle {
                    best_position: position.clone(),
                    position,
                    velocity,
                    best_score: f64::INFINITY,
                }
            })
            .collect();

        let mut tracker = BestTracker::new();
        let mut global_best: Option<(Vec<f64>, f64)> = None;

        for iteration in 0..iterations {
            let positions: Vec<Vec<f64>> = swarm.iter().map(|p| p.position.clone()).collect();
            let scores = tracker.evaluate(objective, &positions)?;

            for (particle, &score) in swarm.iter_mut().zip(&scores) {
                if score < particle.best_score {
                    particle.best_score = score;
                    particle.best_position = particle.position.clone();
                }
                if global_best.as_ref().map_or(score.is_finite(), |(_, g)| score < *g) {
                    global_best = Some((particle.position.clone(), score));
                }
            }

            let Some((best, best_score)) = global_best.as_ref() else {
                continue;
            };
            debug!("PSO iteration {}: best cost {:.4}", iteration, best_score);

            for particle in &mut swarm {
                for d in 0..space.dims() {
                    let r1 = rng.f64();
                    let r2 = rng.f64();
                    particle.velocity[d] = self.w * particle.velocity[d]
                        + self.c1 * r1 * (particle.best_position[d] - particle.position[d])
                        + self.c2 * r2 * (best[d] - particle.position[d]);
                    particle.position[d] += particle.velocity[d];
                }
                space.clip(&mut particle.position);
            }
        }

        let outcome = tracker.finish()?;
        info!(
            "PSO finished: best cost {:.4} after {} iterations",
            outcome.best_score, outcome.evaluations
        );
        Ok(outcome)
    }
}
