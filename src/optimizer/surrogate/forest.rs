use super::Surrogate;
use crate::error::{OptResult, OptobotError};
use crate::optimizer::seeded_rng;

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn predict(&self, x: &[f64]) -> f64 {
        match self {
            Node::Leaf(v) => *v,
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if x[*feature] <= *threshold {
                    left.predict(x)
                } else {
                    right.predict(x)
                }
            }
        }
    }
}

/// Bagged regression trees. The spread of the per-tree predictions is the
/// uncertainty estimate.
#[derive(Debug, Clone)]
pub struct RandomForest {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    rng: fastrand::Rng,
    trees: Vec<Node>,
}

impl RandomForest {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            n_trees: 64,
            max_depth: 8,
            min_samples_leaf: 1,
            rng: seeded_rng(seed.map(|s| s ^ 0x5eed_f0e5)),
            trees: Vec::new(),
        }
    }
}

struct TreeParams {
    max_depth: usize,
    min_samples_leaf: usize,
}

fn mean_of(idx: &[usize], y: &[f64]) -> f64 {
    idx.iter().map(|&i| y[i]).sum::<f64>() / idx.len() as f64
}

fn sse(idx: &[usize], y: &[f64]) -> f64 {
    let m = mean_of(idx, y);
    idx.iter().map(|&i| (y[i] - m) * (y[i] - m)).sum()
}

fn build(
    x: &[Vec<f64>],
    y: &[f64],
    idx: Vec<usize>,
    depth: usize,
    params: &TreeParams,
    rng: &mut fastrand::Rng,
) -> Node {
    let leaf = Node::Leaf(mean_of(&idx, y));
    if depth >= params.max_depth || idx.len() < 2 * params.min_samples_leaf.max(1) {
        return leaf;
    }
    let parent = sse(&idx, y);
    if parent <= 1e-12 {
        return leaf;
    }

    let dims = x[idx[0]].len();
    // Each split looks at a random half of the features (at least one).
    let mut features: Vec<usize> = (0..dims).collect();
    rng.shuffle(&mut features);
    features.truncate(dims.div_ceil(2).max(1));

    let mut best: Option<(f64, usize, f64)> = None;
    for &f in &features {
        let mut sorted = idx.clone();
        sorted.sort_by(|&a, &b| x[a][f].total_cmp(&x[b][f]));
        let min_leaf = params.min_samples_leaf.max(1);
        for cut in min_leaf..=(sorted.len() - min_leaf) {
            let lo = x[sorted[cut - 1]][f];
            let hi = x[sorted[cut]][f];
            if hi <= lo {
                continue;
            }
            let cost = sse(&sorted[..cut], y) + sse(&sorted[cut..], y);
            if best.map_or(true, |(c, _, _)| cost < c) {
                best = Some((cost, f, 0.5 * (lo + hi)));
            }
        }
    }

    match best {
        Some((cost, feature, threshold)) if cost < parent => {
            let (left, right): (Vec<usize>, Vec<usize>) =
                idx.into_iter().partition(|&i| x[i][feature] <= threshold);
            Node::Split {
                feature,
                threshold,
                left: Box::new(build(x, y, left, depth + 1, params, rng)),
                right: Box::new(build(x, y, right, depth + 1, params, rng)),
            }
        }
        _ => leaf,
    }
}

impl Surrogate for RandomForest {
    fn name(&self) -> &'static str {
        "RF"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> OptResult<()> {
        let n = x.len();
        if n == 0 || n != y.len() {
            return Err(OptobotError::Objective(format!(
                "cannot fit a forest on {} points and {} targets",
                n,
                y.len()
            )));
        }
        let params = TreeParams {
            max_depth: self.max_depth,
            min_samples_leaf: self.min_samples_leaf,
        };
        let rng = &mut self.rng;
        self.trees = (0..self.n_trees.max(1))
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.usize(0..n)).collect();
                build(x, y, sample, 0, &params, rng)
            })
            .collect();
        Ok(())
    }

    fn predict(&self, x: &[f64]) -> (f64, f64) {
        if self.trees.is_empty() {
            return (0.0, 1.0);
        }
        let preds: Vec<f64> = self.trees.iter().map(|t| t.predict(x)).collect();
        let n = preds.len() as f64;
        let mean = preds.iter().sum::<f64>() / n;
        let var = preds.iter().map(|p| (p - mean) * (p - mean)).sum::<f64>() / n;
        (mean, var.sqrt().max(1e-9))
    }
}
