use crate::entity::ClassificationMetric;

/// Scores binary predictions against labels with 1 as the positive class.
///
/// Ratios with a zero denominator are reported as 0.
#[must_use]
pub fn classification_metric(labels: &[u8], predictions: &[u8]) -> ClassificationMetric {
    let (mut tp, mut fp, mut fn_, mut correct) = (0_usize, 0_usize, 0_usize, 0_usize);
    for (&label, &prediction) in labels.iter().zip(predictions) {
        if label == prediction {
            correct += 1;
        }
        match (label, prediction) {
            (1, 1) => tp += 1,
            (0, 1) => fp += 1,
            (1, 0) => fn_ += 1,
            _ => {}
        }
    }
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    ClassificationMetric {
        accuracy: ratio(correct, labels.len().min(predictions.len())),
        f1,
        precision,
        recall,
    }
}

/// Share of matching predictions.
#[must_use]
pub fn accuracy(labels: &[u8], predictions: &[u8]) -> f64 {
    classification_metric(labels, predictions).accuracy
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_mixed_predictions() {
        let labels = [1, 1, 0, 0, 1];
        let predictions = [1, 0, 1, 0, 1];
        let metric = classification_metric(&labels, &predictions);
        assert!((metric.accuracy - 0.6).abs() < 1e-12);
        assert!((metric.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((metric.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((metric.f1 - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn zero_division_yields_zero() {
        let metric = classification_metric(&[0, 0, 0], &[0, 0, 0]);
        assert!((metric.accuracy - 1.0).abs() < f64::EPSILON);
        assert!(metric.precision.abs() < f64::EPSILON);
        assert!(metric.recall.abs() < f64::EPSILON);
        assert!(metric.f1.abs() < f64::EPSILON);
        assert!(accuracy(&[], &[]).abs() < f64::EPSILON);
    }
}
