//! Classical machine learning pipeline modules.

/// Preprocessing: scaler, encoders, fitted transforms.
pub mod editor;
/// Metric helpers.
pub mod func;
/// Model implementations.
pub mod ml;
/// Reporting utilities.
pub mod reporter;
/// Artifact persistence.
pub mod saver;

use std::time::Instant;

use ndarray::{Array1, Array2};
use serde_json::json;
use shared_logging::LogLevel;

use func::ClassificationMetrics;
use ml::{train_model, LogisticRegressionModel, TrainingConfig};
use reporter::{EvaluationReport, TrainingReport};

use crate::telemetry::LearningTelemetry;

/// Train/evaluate stage of the income pipeline.
#[derive(Debug, Default)]
pub struct ClassicalMlPipeline {
    config: TrainingConfig,
    telemetry: Option<LearningTelemetry>,
}

impl ClassicalMlPipeline {
    /// Creates a pipeline with the given hyperparameters.
    #[must_use]
    pub const fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            telemetry: None,
        }
    }

    /// Attaches telemetry sinks for structured logging.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: LearningTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Hyperparameters in use.
    #[must_use]
    pub const fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Fits a model on the training split.
    pub fn train(
        &self,
        features: &Array2<f64>,
        labels: &Array1<f64>,
    ) -> anyhow::Result<(LogisticRegressionModel, TrainingReport)> {
        self.log(
            LogLevel::Debug,
            "classical_ml_training_start",
            json!({
                "samples": features.nrows(),
                "feature_dim": features.ncols(),
                "epochs": self.config.epochs,
                "learning_rate": self.config.learning_rate,
            }),
        );
        let start = Instant::now();
        let (model, fit) = train_model(features, labels, &self.config)?;
        let report = TrainingReport {
            model: LogisticRegressionModel::CLASS_NAME.into(),
            fit,
            elapsed_seconds: start.elapsed().as_secs_f64(),
        };
        self.log(
            LogLevel::Info,
            &format!(
                "Model training complete. Time taken: {:.2} seconds",
                report.elapsed_seconds
            ),
            json!({
                "training_log_loss": report.fit.training_log_loss,
                "training_accuracy": report.fit.training_accuracy,
            }),
        );
        Ok((model, report))
    }

    /// Scores the model on the held-out split and reports the metrics.
    pub fn evaluate(
        &self,
        model: &LogisticRegressionModel,
        features: &Array2<f64>,
        labels: &Array1<f64>,
    ) -> anyhow::Result<EvaluationReport> {
        evaluate(model, features, labels, self.telemetry.as_ref())
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        log(self.telemetry.as_ref(), level, message, metadata);
    }
}

/// Computes held-out metrics and logs them.
pub fn evaluate(
    model: &LogisticRegressionModel,
    features: &Array2<f64>,
    labels: &Array1<f64>,
    telemetry: Option<&LearningTelemetry>,
) -> anyhow::Result<EvaluationReport> {
    anyhow::ensure!(
        features.nrows() == labels.len(),
        "{} test rows but {} labels",
        features.nrows(),
        labels.len()
    );
    let probabilities = model.predict_proba(features.view())?;
    let predictions = model.predict(features.view())?;
    let metrics =
        ClassificationMetrics::compute(&predictions.to_vec(), &probabilities.to_vec(), &labels.to_vec());
    let report = EvaluationReport {
        model: LogisticRegressionModel::CLASS_NAME.into(),
        samples: labels.len(),
        metrics,
    };
    log(
        telemetry,
        LogLevel::Info,
        &report.summary(),
        serde_json::to_value(&report.metrics).unwrap_or_default(),
    );
    Ok(report)
}

fn log(
    telemetry: Option<&LearningTelemetry>,
    level: LogLevel,
    message: &str,
    metadata: serde_json::Value,
) {
    if let Some(tel) = telemetry {
        let _ = tel.log(level, message, metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn train_then_evaluate_reports_metrics() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("training.log");
        let telemetry = LearningTelemetry::builder("adult-income")
            .log_path(&log_path)
            .build()
            .unwrap();
        let pipeline = ClassicalMlPipeline::new(TrainingConfig {
            learning_rate: 0.5,
            epochs: 200,
            ..TrainingConfig::default()
        })
        .with_telemetry(telemetry);

        let x = array![[-1.5], [-1.0], [-0.5], [0.5], [1.0], [1.5]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let (model, training) = pipeline.train(&x, &y).unwrap();
        assert_eq!(training.model, "LogisticRegression");

        let x_test = array![[-2.0], [2.0]];
        let y_test = array![0.0, 1.0];
        let report = pipeline.evaluate(&model, &x_test, &y_test).unwrap();
        assert!((report.metrics.accuracy - 1.0).abs() < 1e-12);
        assert!((report.metrics.roc_auc - 1.0).abs() < 1e-12);

        let content = std::fs::read_to_string(log_path).unwrap();
        assert!(content.contains("Model training complete. Time taken:"));
        assert!(content.contains("[EVAL]"));
    }

    #[test]
    fn evaluate_rejects_mismatched_labels() {
        let model = LogisticRegressionModel::new(1, &TrainingConfig::default());
        let x = array![[0.0], [1.0]];
        let y = array![0.0];
        assert!(evaluate(&model, &x, &y, None).is_err());
    }
}
