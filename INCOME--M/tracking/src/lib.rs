#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Experiment tracking for training runs: an MLflow REST client, a local
//! `mlruns` file store, and a run handle that logs params, metrics and artifacts.

/// Environment-driven tracking settings.
#[path = "../settings.rs"]
pub mod settings;

/// Backend seam and shared run types.
#[path = "../backend.rs"]
pub mod backend;

/// MLflow REST API backend.
#[path = "../rest.rs"]
pub mod rest;

/// Local directory backend.
#[path = "../file_store.rs"]
pub mod file_store;

/// Run lifecycle handle.
#[path = "../run.rs"]
pub mod run;

pub use backend::{
    artifact_destination, artifact_relative_path, ArtifactDestination, Metric, Param, RunInfo,
    RunStatus, RunTag, TrackingBackend, TrackingError,
};
pub use file_store::FileStoreBackend;
pub use rest::MlflowRestBackend;
pub use run::{is_valid_run_id, now_millis, ActiveRun, TrackingClient};
pub use settings::{TrackingAuth, TrackingSettings, TrackingTarget};
