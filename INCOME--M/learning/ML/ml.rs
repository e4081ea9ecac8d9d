use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classical_ml::func::{accuracy, log_loss, sigmoid};

/// Hyperparameters for [`LogisticRegressionModel::fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Gradient descent step size.
    pub learning_rate: f64,
    /// Full-batch passes over the training set.
    pub epochs: usize,
    /// L2 penalty applied to the weights (not the bias).
    pub l2: f64,
    /// Probability at or above which a sample is predicted positive.
    pub threshold: f64,
    /// Seed for weight initialisation.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            epochs: 500,
            l2: 1e-4,
            threshold: 0.5,
            seed: 42,
        }
    }
}

/// Outcome of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    /// Epochs executed.
    pub epochs: usize,
    /// Log-loss on the training set after the last epoch.
    pub training_log_loss: f64,
    /// Accuracy on the training set after the last epoch.
    pub training_accuracy: f64,
}

/// Binary logistic regression with bias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegressionModel {
    weights: Array1<f64>,
    bias: f64,
    threshold: f64,
}

impl LogisticRegressionModel {
    /// Model class name reported to the tracking service.
    pub const CLASS_NAME: &'static str = "LogisticRegression";

    /// Creates a model with small seeded random weights.
    #[must_use]
    pub fn new(feature_dim: usize, config: &TrainingConfig) -> Self {
        let mut rng = SmallRng::seed_from_u64(config.seed);
        Self {
            weights: (0..feature_dim)
                .map(|_| rng.gen_range(-0.01..0.01))
                .collect(),
            bias: 0.0,
            threshold: config.threshold,
        }
    }

    /// Number of input features.
    #[must_use]
    pub fn feature_dim(&self) -> usize {
        self.weights.len()
    }

    /// Learned weights.
    #[must_use]
    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    /// Learned bias.
    #[must_use]
    pub const fn bias(&self) -> f64 {
        self.bias
    }

    /// Positive-class probabilities.
    pub fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError> {
        if features.ncols() != self.weights.len() {
            return Err(ModelError::FeatureMismatch {
                expected: self.weights.len(),
                found: features.ncols(),
            });
        }
        Ok((features.dot(&self.weights) + self.bias).mapv(sigmoid))
    }

    /// Hard 0/1 predictions.
    pub fn predict(&self, features: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError> {
        let threshold = self.threshold;
        Ok(self
            .predict_proba(features)?
            .mapv(|p| if p >= threshold { 1.0 } else { 0.0 }))
    }

    /// Mean accuracy on the given samples.
    pub fn score(
        &self,
        features: ArrayView2<'_, f64>,
        labels: ArrayView1<'_, f64>,
    ) -> Result<f64, ModelError> {
        check_lengths(features, labels)?;
        let predictions = self.predict(features)?;
        Ok(accuracy(&predictions.to_vec(), &labels.to_vec()))
    }

    /// Fits the model with full-batch gradient descent.
    pub fn fit(
        &mut self,
        features: ArrayView2<'_, f64>,
        labels: ArrayView1<'_, f64>,
        config: &TrainingConfig,
    ) -> Result<FitSummary, ModelError> {
        check_lengths(features, labels)?;
        if features.nrows() == 0 {
            return Err(ModelError::EmptyTrainingSet);
        }
        if features.ncols() != self.weights.len() {
            return Err(ModelError::FeatureMismatch {
                expected: self.weights.len(),
                found: features.ncols(),
            });
        }

        let n = features.nrows() as f64;
        for _ in 0..config.epochs {
            let probabilities = self.predict_proba(features)?;
            let error = &probabilities - &labels;
            let grad = features.t().dot(&error) / n + &self.weights * config.l2;
            let bias_grad = error.sum() / n;
            self.weights.scaled_add(-config.learning_rate, &grad);
            self.bias -= config.learning_rate * bias_grad;
        }

        let probabilities = self.predict_proba(features)?;
        let labels_vec = labels.to_vec();
        let probabilities_vec = probabilities.to_vec();
        let training_log_loss = log_loss(&probabilities_vec, &labels_vec);
        if !training_log_loss.is_finite() || self.weights.iter().any(|w| !w.is_finite()) {
            return Err(ModelError::Diverged);
        }
        let predictions: Vec<f64> = probabilities_vec
            .iter()
            .map(|&p| if p >= self.threshold { 1.0 } else { 0.0 })
            .collect();
        Ok(FitSummary {
            epochs: config.epochs,
            training_log_loss,
            training_accuracy: accuracy(&predictions, &labels_vec),
        })
    }
}

/// Trains a fresh model on the given split.
pub fn train_model(
    features: &Array2<f64>,
    labels: &Array1<f64>,
    config: &TrainingConfig,
) -> Result<(LogisticRegressionModel, FitSummary), ModelError> {
    let mut model = LogisticRegressionModel::new(features.ncols(), config);
    let summary = model.fit(features.view(), labels.view(), config)?;
    Ok((model, summary))
}

fn check_lengths(
    features: ArrayView2<'_, f64>,
    labels: ArrayView1<'_, f64>,
) -> Result<(), ModelError> {
    if features.nrows() == labels.len() {
        Ok(())
    } else {
        Err(ModelError::LabelMismatch {
            rows: features.nrows(),
            labels: labels.len(),
        })
    }
}

/// Errors raised while fitting or applying the model.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// No training rows.
    #[error("training set is empty")]
    EmptyTrainingSet,
    /// Feature rows and labels disagree in length.
    #[error("{rows} feature rows but {labels} labels")]
    LabelMismatch {
        /// Feature row count.
        rows: usize,
        /// Label count.
        labels: usize,
    },
    /// Input width differs from the fitted width.
    #[error("expected {expected} features, found {found}")]
    FeatureMismatch {
        /// Fitted feature count.
        expected: usize,
        /// Provided feature count.
        found: usize,
    },
    /// Loss or weights became non-finite.
    #[error("training diverged (non-finite loss)")]
    Diverged,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn separable() -> (Array2<f64>, Array1<f64>) {
        let x = array![[-2.0], [-1.5], [-1.0], [-0.5], [0.5], [1.0], [1.5], [2.0]];
        let y = array![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    #[test]
    fn learns_separable_data() {
        let (x, y) = separable();
        let config = TrainingConfig {
            learning_rate: 0.5,
            epochs: 300,
            ..TrainingConfig::default()
        };
        let (model, summary) = train_model(&x, &y, &config).unwrap();
        assert!((summary.training_accuracy - 1.0).abs() < 1e-12);
        assert!(summary.training_log_loss < 0.3);
        assert!(model.weights()[0] > 0.0);
        assert!((model.score(x.view(), y.view()).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn same_seed_reproduces_model() {
        let (x, y) = separable();
        let config = TrainingConfig::default();
        let (a, sa) = train_model(&x, &y, &config).unwrap();
        let (b, sb) = train_model(&x, &y, &config).unwrap();
        assert_eq!(a, b);
        assert_eq!(sa, sb);
    }

    #[test]
    fn shape_errors_are_fatal() {
        let (x, _) = separable();
        let short = array![0.0, 1.0];
        let err = train_model(&x, &short, &TrainingConfig::default()).unwrap_err();
        assert_eq!(err, ModelError::LabelMismatch { rows: 8, labels: 2 });

        let model = LogisticRegressionModel::new(3, &TrainingConfig::default());
        let err = model.predict(x.view()).unwrap_err();
        assert_eq!(
            err,
            ModelError::FeatureMismatch {
                expected: 3,
                found: 1
            }
        );
    }

    #[test]
    fn empty_training_set_is_rejected() {
        let x = Array2::<f64>::zeros((0, 2));
        let y = Array1::<f64>::zeros(0);
        let err = train_model(&x, &y, &TrainingConfig::default()).unwrap_err();
        assert_eq!(err, ModelError::EmptyTrainingSet);
    }

    #[test]
    fn exploding_learning_rate_diverges() {
        let x = array![[1e300], [-1e300]];
        let y = array![1.0, 0.0];
        let config = TrainingConfig {
            learning_rate: 1e300,
            epochs: 5,
            ..TrainingConfig::default()
        };
        let err = train_model(&x, &y, &config).unwrap_err();
        assert_eq!(err, ModelError::Diverged);
    }
}
