use anyhow::{bail, ensure, Result};
use ndarray::{ArrayView1, ArrayView2};
use rand::{seq::index::sample, Rng};
use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::config::{Criterion, TrainerConfig};

/// Random forest hyperparameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForestParams {
    /// Number of trees.
    pub n_estimators: usize,
    /// Minimum samples required to split a node.
    pub min_samples_split: usize,
    /// Minimum samples in each leaf.
    pub min_samples_leaf: usize,
    /// Depth limit; unlimited when `None`.
    pub max_depth: Option<usize>,
    /// Impurity measure.
    pub criterion: Criterion,
    /// Seed from which every tree's generator is derived.
    pub random_state: u64,
}

impl From<&TrainerConfig> for ForestParams {
    fn from(config: &TrainerConfig) -> Self {
        Self {
            n_estimators: config.n_estimators,
            min_samples_split: config.min_samples_split,
            min_samples_leaf: config.min_samples_leaf,
            max_depth: config.max_depth,
            criterion: config.criterion,
            random_state: config.random_state,
        }
    }
}

/// Tree node. Leaves hold the fraction of positive training samples that reached them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Node {
    /// Terminal node.
    Leaf {
        /// Probability of class 1.
        p1: f64,
    },
    /// Internal node: samples with `x[feature] <= threshold` go left.
    Split {
        /// Feature index.
        feature: usize,
        /// Split point.
        threshold: f64,
        /// Subtree for values at or below the threshold.
        left: Box<Node>,
        /// Subtree for values above the threshold.
        right: Box<Node>,
    },
}

impl Node {
    fn probability(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut node = self;
        loop {
            match node {
                Self::Leaf { p1 } => return *p1,
                Self::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    fn depth(&self) -> usize {
        match self {
            Self::Leaf { .. } => 0,
            Self::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

/// Bagged ensemble of binary decision trees.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RandomForest {
    params: ForestParams,
    n_features: usize,
    trees: Vec<Node>,
}

impl RandomForest {
    /// Fits the forest; trees are grown in parallel and the result depends only on the seed.
    pub fn fit(params: ForestParams, features: ArrayView2<'_, f64>, labels: &[u8]) -> Result<Self> {
        ensure!(params.n_estimators > 0, "n_estimators must be positive");
        ensure!(!labels.is_empty(), "cannot fit a forest on zero samples");
        ensure!(
            features.nrows() == labels.len(),
            "{} feature rows for {} labels",
            features.nrows(),
            labels.len()
        );
        if let Some(bad) = labels.iter().find(|&&label| label > 1) {
            bail!("labels must be 0 or 1, found {bad}");
        }
        let n_features = features.ncols();
        ensure!(n_features > 0, "cannot fit a forest on zero features");

        let trees = (0..params.n_estimators)
            .into_par_iter()
            .map(|tree_idx| {
                let mut rng = ChaCha8Rng::seed_from_u64(params.random_state);
                rng.set_stream(tree_idx as u64);
                let n = labels.len();
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let grower = TreeGrower {
                    params: &params,
                    features: features.reborrow(),
                    labels,
                    max_features: max_features(n_features),
                };
                grower.grow(bootstrap, 0, &mut rng)
            })
            .collect();

        Ok(Self {
            params,
            n_features,
            trees,
        })
    }

    /// Mean positive-class probability across trees, one per row.
    pub fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Result<Vec<f64>> {
        ensure!(
            features.ncols() == self.n_features,
            "forest expects {} features, got {}",
            self.n_features,
            features.ncols()
        );
        #[allow(clippy::cast_precision_loss)]
        let n_trees = self.trees.len() as f64;
        Ok(features
            .outer_iter()
            .map(|row| self.trees.iter().map(|tree| tree.probability(row)).sum::<f64>() / n_trees)
            .collect())
    }

    /// Predicted labels: 1 when the mean probability exceeds one half.
    pub fn predict(&self, features: ArrayView2<'_, f64>) -> Result<Vec<u8>> {
        Ok(self
            .predict_proba(features)?
            .into_iter()
            .map(|p| u8::from(p > 0.5))
            .collect())
    }

    /// Number of input features.
    #[must_use]
    pub const fn n_features(&self) -> usize {
        self.n_features
    }

    /// Number of trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Depth of the deepest tree.
    #[must_use]
    pub fn max_tree_depth(&self) -> usize {
        self.trees.iter().map(Node::depth).max().unwrap_or(0)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn max_features(n_features: usize) -> usize {
    ((n_features as f64).sqrt().floor() as usize).max(1)
}

struct TreeGrower<'a> {
    params: &'a ForestParams,
    features: ArrayView2<'a, f64>,
    labels: &'a [u8],
    max_features: usize,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl TreeGrower<'_> {
    fn grow(&self, samples: Vec<usize>, depth: usize, rng: &mut ChaCha8Rng) -> Node {
        let positives = samples.iter().filter(|&&idx| self.labels[idx] == 1).count();
        let leaf = Node::Leaf {
            p1: fraction(positives, samples.len()),
        };
        let at_depth_limit = self.params.max_depth.is_some_and(|limit| depth >= limit);
        if at_depth_limit
            || samples.len() < self.params.min_samples_split
            || samples.len() < 2 * self.params.min_samples_leaf
            || positives == 0
            || positives == samples.len()
        {
            return leaf;
        }

        let candidates = sample(rng, self.features.ncols(), self.max_features);
        let mut best: Option<BestSplit> = None;
        for feature in candidates.iter() {
            if let Some(found) = self.best_split_on(feature, &samples) {
                if best.as_ref().map_or(true, |current| found.impurity < current.impurity) {
                    best = Some(found);
                }
            }
        }
        let Some(best) = best else {
            return leaf;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&idx| self.features[[idx, best.feature]] <= best.threshold);
        Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: Box::new(self.grow(left, depth + 1, rng)),
            right: Box::new(self.grow(right, depth + 1, rng)),
        }
    }

    fn best_split_on(&self, feature: usize, samples: &[usize]) -> Option<BestSplit> {
        let mut ordered: Vec<(f64, u8)> = samples
            .iter()
            .map(|&idx| (self.features[[idx, feature]], self.labels[idx]))
            .collect();
        ordered.sort_by(|a, b| a.0.total_cmp(&b.0));

        let n = ordered.len();
        let total_pos = ordered.iter().filter(|(_, label)| *label == 1).count();
        let min_leaf = self.params.min_samples_leaf;
        let mut left_pos = 0;
        let mut best: Option<BestSplit> = None;
        for split in 1..n {
            left_pos += usize::from(ordered[split - 1].1);
            if split < min_leaf || n - split < min_leaf {
                continue;
            }
            let (lo, hi) = (ordered[split - 1].0, ordered[split].0);
            if lo >= hi {
                continue;
            }
            let weighted = (fraction(split, n) * self.impurity(left_pos, split))
                + (fraction(n - split, n) * self.impurity(total_pos - left_pos, n - split));
            if best.as_ref().map_or(true, |current| weighted < current.impurity) {
                best = Some(BestSplit {
                    feature,
                    threshold: lo + (hi - lo) / 2.0,
                    impurity: weighted,
                });
            }
        }
        best
    }

    fn impurity(&self, positives: usize, total: usize) -> f64 {
        let p = fraction(positives, total);
        let q = 1.0 - p;
        match self.params.criterion {
            Criterion::Gini => p.mul_add(-p, q.mul_add(-q, 1.0)),
            Criterion::Entropy => -[p, q]
                .iter()
                .filter(|&&v| v > 0.0)
                .map(|&v| v * v.log2())
                .sum::<f64>(),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn fraction(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
