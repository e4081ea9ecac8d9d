use serde::{Deserialize, Serialize};

use super::{func::ClassificationMetrics, ml::FitSummary};

/// Report describing a finished training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Model name.
    pub model: String,
    /// Fit outcome.
    pub fit: FitSummary,
    /// Wall-clock training time.
    pub elapsed_seconds: f64,
}

impl TrainingReport {
    /// Renders a concise summary string.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "[ML] model={} epochs={} train_log_loss={:.4} train_accuracy={:.4} time={:.2}s",
            self.model,
            self.fit.epochs,
            self.fit.training_log_loss,
            self.fit.training_accuracy,
            self.elapsed_seconds
        )
    }
}

/// Held-out evaluation results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Model name.
    pub model: String,
    /// Number of evaluated samples.
    pub samples: usize,
    /// Computed metrics.
    pub metrics: ClassificationMetrics,
}

impl EvaluationReport {
    /// Renders a concise summary string.
    #[must_use]
    pub fn summary(&self) -> String {
        let m = &self.metrics;
        format!(
            "[EVAL] model={} n={} acc={:.4} prec={:.4} rec={:.4} f1={:.4} log_loss={:.4} auc={:.4} (tp={} fp={} tn={} fn={})",
            self.model,
            self.samples,
            m.accuracy,
            m.precision,
            m.recall,
            m.f1,
            m.log_loss,
            m.roc_auc,
            m.tp,
            m.fp,
            m.tn,
            m.fn_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_summary_lists_metrics() {
        let report = EvaluationReport {
            model: "LogisticRegression".into(),
            samples: 2,
            metrics: ClassificationMetrics::compute(&[1.0, 0.0], &[0.8, 0.3], &[1.0, 0.0]),
        };
        let summary = report.summary();
        assert!(summary.contains("acc=1.0000"));
        assert!(summary.contains("n=2"));
    }
}
