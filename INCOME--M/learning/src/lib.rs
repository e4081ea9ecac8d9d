#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Income-bracket learning stack: tabular loading, preprocessing, logistic regression,
//! evaluation, and artifact persistence.

/// Run configuration (paths + hyperparameters).
#[path = "../config.rs"]
pub mod config;

/// Comma-separated dataset loading.
#[path = "../dataloader.rs"]
pub mod dataloader;

/// Classical ML pipeline.
#[path = "../ML/main.rs"]
pub mod classical_ml;

/// Telemetry helpers for structured logging.
#[path = "../telemetry.rs"]
pub mod telemetry;

pub use classical_ml::{
    editor::{
        preprocess_data, CategoryEncoder, Encoders, FittedPreprocessor, PreprocessError,
        PreprocessOptions, PreprocessedData, StandardScaler, UNSEEN_CATEGORY_CODE,
    },
    evaluate,
    func::ClassificationMetrics,
    ml::{train_model, FitSummary, LogisticRegressionModel, ModelError, TrainingConfig},
    reporter::{EvaluationReport, TrainingReport},
    saver::{ArtifactError, ArtifactStore, SavedArtifacts, ENCODERS_FILE, MODEL_FILE, SCALER_FILE},
    ClassicalMlPipeline,
};
pub use config::PipelineConfig;
pub use dataloader::{
    load_data, read_table, ColumnKind, ColumnSpec, DataLoaderError, ReadOptions, TabularDataset,
    TabularSchema,
};
pub use telemetry::{LearningTelemetry, LearningTelemetryBuilder};
