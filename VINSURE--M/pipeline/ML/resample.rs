use anyhow::{ensure, Result};
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use rand::Rng;
use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};
use rayon::prelude::*;

use super::neighbors::KdTree;

/// Combined over- and under-sampling for binary labels: SMOTE grows the minority class to the
/// majority count, then edited nearest neighbours removes every sample whose neighbourhood is
/// not unanimous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmoteEnn {
    smote_neighbors: usize,
    enn_neighbors: usize,
    random_state: u64,
}

/// Sizes of the resampling steps, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResampleReport {
    /// Synthetic minority samples created.
    pub synthesized: usize,
    /// Samples removed by the cleaning step.
    pub removed: usize,
    /// True when cleaning would have emptied a class and was skipped.
    pub cleaning_skipped: bool,
}

impl SmoteEnn {
    /// Creates a resampler.
    #[must_use]
    pub const fn new(smote_neighbors: usize, enn_neighbors: usize, random_state: u64) -> Self {
        Self {
            smote_neighbors,
            enn_neighbors,
            random_state,
        }
    }

    /// Resamples `features`/`labels` (labels in {0,1}).
    pub fn fit_resample(
        &self,
        features: ArrayView2<'_, f64>,
        labels: &[u8],
    ) -> Result<(Array2<f64>, Vec<u8>, ResampleReport)> {
        ensure!(
            features.nrows() == labels.len(),
            "{} feature rows for {} labels",
            features.nrows(),
            labels.len()
        );
        let mut report = ResampleReport::default();
        let (x_smote, y_smote) = self.oversample(features, labels, &mut report)?;
        let keep = self.clean(x_smote.view(), &y_smote);
        let kept_labels: Vec<u8> = keep.iter().map(|&idx| y_smote[idx]).collect();
        let classes_survive = [0_u8, 1].iter().all(|class| {
            !y_smote.contains(class) || kept_labels.contains(class)
        });
        if !classes_survive {
            report.cleaning_skipped = true;
            return Ok((x_smote, y_smote, report));
        }
        report.removed = y_smote.len() - keep.len();
        Ok((x_smote.select(Axis(0), &keep), kept_labels, report))
    }

    fn oversample(
        &self,
        features: ArrayView2<'_, f64>,
        labels: &[u8],
        report: &mut ResampleReport,
    ) -> Result<(Array2<f64>, Vec<u8>)> {
        let positives = labels.iter().filter(|&&label| label == 1).count();
        let negatives = labels.len() - positives;
        let (minority_class, minority_count, majority_count) = if positives < negatives {
            (1_u8, positives, negatives)
        } else {
            (0_u8, negatives, positives)
        };
        if minority_count < 2 || minority_count == majority_count {
            return Ok((features.to_owned(), labels.to_vec()));
        }

        let minority: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, &label)| label == minority_class)
            .map(|(idx, _)| idx)
            .collect();
        let k = self.smote_neighbors.min(minority_count - 1);
        if k == 0 {
            return Ok((features.to_owned(), labels.to_vec()));
        }
        let tree = KdTree::build(features, minority.clone());
        let neighbours: Vec<Vec<usize>> = minority
            .par_iter()
            .map(|&idx| tree.nearest(idx, k))
            .collect();

        let wanted = majority_count - minority_count;
        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);
        let mut synthetic = Array2::<f64>::zeros((wanted, features.ncols()));
        for mut row in synthetic.outer_iter_mut() {
            let pick = rng.gen_range(0..minority.len());
            let base = features.row(minority[pick]);
            let neighbour = features.row(neighbours[pick][rng.gen_range(0..k)]);
            let gap: f64 = rng.gen();
            for ((out, &a), &b) in row.iter_mut().zip(base).zip(neighbour) {
                *out = gap.mul_add(b - a, a);
            }
        }
        report.synthesized = wanted;

        let stacked = concatenate(Axis(0), &[features.reborrow(), synthetic.view()])?;
        let mut stacked_labels = labels.to_vec();
        stacked_labels.resize(labels.len() + wanted, minority_class);
        Ok((stacked, stacked_labels))
    }

    fn clean(&self, features: ArrayView2<'_, f64>, labels: &[u8]) -> Vec<usize> {
        let n = labels.len();
        let k = self.enn_neighbors.min(n.saturating_sub(1));
        if k == 0 {
            return (0..n).collect();
        }
        let tree = KdTree::build(features, (0..n).collect());
        (0..n)
            .into_par_iter()
            .filter(|&idx| {
                tree.nearest(idx, k)
                    .iter()
                    .all(|&other| labels[other] == labels[idx])
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn imbalanced() -> (Array2<f64>, Vec<u8>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..20 {
            rows.push([f64::from(i) * 0.1, 0.0]);
            labels.push(0);
        }
        for i in 0..5 {
            rows.push([10.0 + f64::from(i) * 0.1, 10.0]);
            labels.push(1);
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        (Array2::from_shape_vec((rows.len(), 2), flat).unwrap(), labels)
    }

    #[test]
    fn balances_separable_classes() {
        let (x, y) = imbalanced();
        let (rx, ry, report) = SmoteEnn::new(5, 3, 42).fit_resample(x.view(), &y).unwrap();
        assert_eq!(report.synthesized, 15);
        assert_eq!(report.removed, 0);
        assert_eq!(rx.nrows(), ry.len());
        assert_eq!(ry.iter().filter(|&&l| l == 1).count(), 20);
        assert_eq!(ry.iter().filter(|&&l| l == 0).count(), 20);
        for (row, &label) in rx.outer_iter().zip(&ry).skip(25) {
            assert_eq!(label, 1);
            assert!((10.0..=10.4).contains(&row[0]));
            assert!((row[1] - 10.0).abs() < 1e-12);
        }
    }

    #[test]
    fn seed_makes_resampling_reproducible() {
        let (x, y) = imbalanced();
        let sampler = SmoteEnn::new(3, 3, 7);
        let first = sampler.fit_resample(x.view(), &y).unwrap();
        let second = sampler.fit_resample(x.view(), &y).unwrap();
        assert_eq!(first.0, second.0);
        assert_eq!(first.1, second.1);
    }

    #[test]
    fn cleaning_removes_mislabelled_neighbourhood() {
        let mut values: Vec<f64> = (0..10).map(f64::from).collect();
        values.extend((100..110).map(f64::from));
        values.extend([4.5, 104.5]);
        let mut y = vec![0_u8; 10];
        y.extend([1_u8; 10]);
        y.extend([1, 0]);
        let x = Array2::from_shape_vec((values.len(), 1), values).unwrap();
        let (rx, ry, report) = SmoteEnn::new(3, 3, 1).fit_resample(x.view(), &y).unwrap();
        assert_eq!(report.synthesized, 0);
        assert!(!report.cleaning_skipped);
        assert_eq!(report.removed, 10);
        assert!(rx.iter().all(|&v| (v - 4.5).abs() > 1e-9 && (v - 104.5).abs() > 1e-9));
        assert!(ry.contains(&0) && ry.contains(&1));
    }

    #[test]
    fn cleaning_that_would_empty_a_class_is_skipped() {
        // Alternating labels: every neighbourhood is mixed.
        let x = Array2::from_shape_vec((10, 1), (0..10).map(f64::from).collect()).unwrap();
        let y: Vec<u8> = (0..10).map(|i| i % 2).collect();
        let (rx, ry, report) = SmoteEnn::new(5, 3, 1).fit_resample(x.view(), &y).unwrap();
        assert!(report.cleaning_skipped);
        assert_eq!(report.synthesized, 0);
        assert_eq!(report.removed, 0);
        assert_eq!(rx, x);
        assert_eq!(ry, y);
    }

    #[test]
    fn single_class_passes_through() {
        let x = array![[0.0], [1.0], [2.0]];
        let (rx, ry, report) = SmoteEnn::new(5, 3, 1).fit_resample(x.view(), &[0, 0, 0]).unwrap();
        assert_eq!(rx, x);
        assert_eq!(ry, vec![0, 0, 0]);
        assert_eq!(report, ResampleReport::default());
    }
}
