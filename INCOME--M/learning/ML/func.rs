use serde::{Deserialize, Serialize};

/// Probabilities are clipped to `[EPS, 1 - EPS]` before taking logs.
const EPS: f64 = 1e-15;

/// Numerically stable logistic function.
#[must_use]
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Fraction of predictions equal to their label.
#[must_use]
pub fn accuracy(predictions: &[f64], labels: &[f64]) -> f64 {
    if predictions.is_empty() || predictions.len() != labels.len() {
        return 0.0;
    }
    let correct = predictions
        .iter()
        .zip(labels)
        .filter(|(pred, label)| (*pred - *label).abs() < 0.5)
        .count();
    correct as f64 / predictions.len() as f64
}

/// Mean binary cross-entropy.
#[must_use]
pub fn log_loss(probabilities: &[f64], labels: &[f64]) -> f64 {
    if probabilities.is_empty() || probabilities.len() != labels.len() {
        return 0.0;
    }
    probabilities
        .iter()
        .zip(labels)
        .map(|(p, y)| {
            let p = p.clamp(EPS, 1.0 - EPS);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum::<f64>()
        / probabilities.len() as f64
}

/// Area under the ROC curve via the rank statistic, averaging tied ranks.
///
/// Returns 0.5 when only one class is present.
#[must_use]
pub fn roc_auc(scores: &[f64], labels: &[f64]) -> f64 {
    if scores.len() != labels.len() {
        return 0.5;
    }
    let positives = labels.iter().filter(|&&y| y >= 0.5).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
    let mut ranks = vec![0.0; scores.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && scores[order[end + 1]] == scores[order[start]] {
            end += 1;
        }
        let rank = (start + end) as f64 / 2.0 + 1.0;
        for &idx in &order[start..=end] {
            ranks[idx] = rank;
        }
        start = end + 1;
    }

    let positive_rank_sum: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(y, _)| **y >= 0.5)
        .map(|(_, rank)| rank)
        .sum();
    let p = positives as f64;
    (positive_rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64)
}

/// Confusion-matrix derived metrics for the positive class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    /// Correct predictions over all predictions.
    pub accuracy: f64,
    /// True positives over predicted positives.
    pub precision: f64,
    /// True positives over actual positives.
    pub recall: f64,
    /// Harmonic mean of precision and recall.
    pub f1: f64,
    /// Mean binary cross-entropy of the probabilities.
    pub log_loss: f64,
    /// Area under the ROC curve of the probabilities.
    pub roc_auc: f64,
    /// True positives.
    pub tp: usize,
    /// False positives.
    pub fp: usize,
    /// True negatives.
    pub tn: usize,
    /// False negatives.
    pub fn_count: usize,
}

impl ClassificationMetrics {
    /// Computes metrics from hard predictions and positive-class probabilities.
    #[must_use]
    pub fn compute(predictions: &[f64], probabilities: &[f64], labels: &[f64]) -> Self {
        let (mut tp, mut fp, mut tn, mut fn_count) = (0, 0, 0, 0);
        for (pred, label) in predictions.iter().zip(labels) {
            match (*pred >= 0.5, *label >= 0.5) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, false) => tn += 1,
                (false, true) => fn_count += 1,
            }
        }
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_count);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            accuracy: ratio(tp + tn, tp + fp + tn + fn_count),
            precision,
            recall,
            f1,
            log_loss: log_loss(probabilities, labels),
            roc_auc: roc_auc(probabilities, labels),
            tp,
            fp,
            tn,
            fn_count,
        }
    }

    /// Metric name/value pairs, each name prefixed with `prefix`.
    #[must_use]
    pub fn named(&self, prefix: &str) -> Vec<(String, f64)> {
        [
            ("accuracy", self.accuracy),
            ("precision", self.precision),
            ("recall", self.recall),
            ("f1", self.f1),
            ("log_loss", self.log_loss),
            ("roc_auc", self.roc_auc),
        ]
        .into_iter()
        .map(|(name, value)| (format!("{prefix}{name}"), value))
        .collect()
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(1000.0) <= 1.0);
        assert!(sigmoid(-1000.0) >= 0.0);
        assert!(sigmoid(-1000.0).is_finite());
    }

    #[test]
    fn mixed_confusion_counts() {
        // 3 TP, 1 FP, 2 TN, 1 FN
        let preds = [1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0];
        let labels = [1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        let m = ClassificationMetrics::compute(&preds, &preds, &labels);
        assert_eq!((m.tp, m.fp, m.tn, m.fn_count), (3, 1, 2, 1));
        assert!((m.accuracy - 5.0 / 7.0).abs() < 1e-9);
        assert!((m.precision - 0.75).abs() < 1e-9);
        assert!((m.recall - 0.75).abs() < 1e-9);
        assert!((m.f1 - 0.75).abs() < 1e-9);
    }

    #[test]
    fn empty_inputs_yield_zeroes() {
        let m = ClassificationMetrics::compute(&[], &[], &[]);
        assert!(m.accuracy.abs() < 1e-12);
        assert!(m.f1.abs() < 1e-12);
        assert!((m.roc_auc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn auc_handles_perfect_and_tied_scores() {
        let labels = [0.0, 0.0, 1.0, 1.0];
        assert!((roc_auc(&[0.1, 0.2, 0.8, 0.9], &labels) - 1.0).abs() < 1e-12);
        assert!((roc_auc(&[0.5, 0.5, 0.5, 0.5], &labels) - 0.5).abs() < 1e-12);
        assert!(roc_auc(&[0.9, 0.8, 0.2, 0.1], &labels).abs() < 1e-12);
    }

    #[test]
    fn log_loss_clips_certain_mistakes() {
        let loss = log_loss(&[0.0], &[1.0]);
        assert!(loss.is_finite());
        assert!(loss > 30.0);
    }

    #[test]
    fn named_metrics_carry_prefix() {
        let m = ClassificationMetrics::compute(&[1.0], &[0.9], &[1.0]);
        let named = m.named("test_");
        assert_eq!(named[0].0, "test_accuracy");
        assert_eq!(named.len(), 6);
    }
}
