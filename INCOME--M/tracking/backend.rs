use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run in progress.
    Running,
    /// Queued, not started.
    Scheduled,
    /// Completed successfully.
    Finished,
    /// Ended with an error.
    Failed,
    /// Terminated externally.
    Killed,
}

impl RunStatus {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Scheduled => "SCHEDULED",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Killed => "KILLED",
        }
    }

    /// Numeric code used by file stores.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Running => 1,
            Self::Scheduled => 2,
            Self::Finished => 3,
            Self::Failed => 4,
            Self::Killed => 5,
        }
    }

    /// Inverse of [`Self::code`].
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Running),
            2 => Some(Self::Scheduled),
            3 => Some(Self::Finished),
            4 => Some(Self::Failed),
            5 => Some(Self::Killed),
            _ => None,
        }
    }

    /// Parses a wire name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        [
            Self::Running,
            Self::Scheduled,
            Self::Finished,
            Self::Failed,
            Self::Killed,
        ]
        .into_iter()
        .find(|status| status.as_str() == value)
    }
}

/// Metric sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Metric name.
    pub key: String,
    /// Value.
    pub value: f64,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    /// Step index.
    pub step: i64,
}

/// Run parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name.
    pub key: String,
    /// Stringified value.
    pub value: String,
}

/// Run tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTag {
    /// Tag name.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl RunTag {
    /// Creates a tag.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Identity and state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    /// Run identifier.
    pub run_id: String,
    /// Owning experiment.
    pub experiment_id: String,
    /// Display name.
    pub run_name: String,
    /// Root URI for the run's artifacts.
    pub artifact_uri: String,
    /// Current status.
    pub status: RunStatus,
    /// Start time, milliseconds since the epoch.
    pub start_time: i64,
    /// End time, once ended.
    pub end_time: Option<i64>,
}

/// Storage seam for experiment tracking.
#[async_trait]
pub trait TrackingBackend: Send + Sync {
    /// Returns the id of the named experiment, creating it when absent.
    async fn get_or_create_experiment(&self, name: &str) -> Result<String, TrackingError>;

    /// Creates a run in `RUNNING` state.
    async fn create_run(
        &self,
        experiment_id: &str,
        run_name: &str,
        start_time: i64,
        tags: &[RunTag],
    ) -> Result<RunInfo, TrackingError>;

    /// Fetches a run.
    async fn get_run(&self, run_id: &str) -> Result<RunInfo, TrackingError>;

    /// Records metrics, params and tags.
    async fn log_batch(
        &self,
        run_id: &str,
        metrics: &[Metric],
        params: &[Param],
        tags: &[RunTag],
    ) -> Result<(), TrackingError>;

    /// Uploads a local file under `artifact_path` (run artifact root when `None`).
    async fn log_artifact(
        &self,
        run: &RunInfo,
        local_path: &Path,
        artifact_path: Option<&str>,
    ) -> Result<(), TrackingError>;

    /// Sets the terminal status and end time.
    async fn update_run(
        &self,
        run_id: &str,
        status: RunStatus,
        end_time: i64,
    ) -> Result<(), TrackingError>;
}

/// Where an artifact lands for a given artifact root URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactDestination {
    /// Path below `/api/2.0/mlflow-artifacts/artifacts/` on the tracking server.
    Proxy(String),
    /// Local file path.
    Local(PathBuf),
}

/// Resolves the destination of `relative` under the run's artifact root.
pub fn artifact_destination(
    artifact_uri: &str,
    relative: &str,
) -> Result<ArtifactDestination, TrackingError> {
    validate_relative(relative)?;
    if let Some(rest) = artifact_uri.strip_prefix("mlflow-artifacts:") {
        // mlflow-artifacts://host:port/path carries an authority before the path.
        let path = rest.strip_prefix("//").map_or(rest, |with_host| {
            with_host.find('/').map_or("", |idx| &with_host[idx..])
        });
        let path = path.trim_matches('/');
        return Ok(ArtifactDestination::Proxy(join_url(path, relative)));
    }
    let local = artifact_uri
        .strip_prefix("file://")
        .or_else(|| artifact_uri.strip_prefix("file:"))
        .or_else(|| (!artifact_uri.contains("://")).then_some(artifact_uri));
    match local {
        Some(root) if !root.is_empty() => Ok(ArtifactDestination::Local(
            Path::new(root).join(relative),
        )),
        _ => Err(TrackingError::UnsupportedArtifactUri(
            artifact_uri.to_string(),
        )),
    }
}

/// Joins an optional artifact sub-path with a file name.
pub fn artifact_relative_path(local_path: &Path, artifact_path: Option<&str>) -> Result<String, TrackingError> {
    let file_name = local_path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| TrackingError::InvalidArtifactPath(local_path.display().to_string()))?;
    let relative = match artifact_path.map(|p| p.trim_matches('/')) {
        Some(dir) if !dir.is_empty() => format!("{dir}/{file_name}"),
        _ => file_name.to_string(),
    };
    validate_relative(&relative)?;
    Ok(relative)
}

/// Copies `local_path` to `destination`, creating parent directories.
pub(crate) async fn copy_local(local_path: &Path, destination: &Path) -> Result<(), TrackingError> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| TrackingError::io(parent, source))?;
    }
    tokio::fs::copy(local_path, destination)
        .await
        .map_err(|source| TrackingError::io(local_path, source))?;
    Ok(())
}

pub(crate) fn validate_relative(relative: &str) -> Result<(), TrackingError> {
    let path = Path::new(relative);
    let valid = !relative.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(TrackingError::InvalidArtifactPath(relative.to_string()))
    }
}

fn join_url(base: &str, relative: &str) -> String {
    if base.is_empty() {
        relative.to_string()
    } else {
        format!("{base}/{relative}")
    }
}

/// Errors raised by tracking backends.
#[derive(Debug, Error)]
pub enum TrackingError {
    /// Transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// Server rejected the call.
    #[error("tracking server returned {status} {code}: {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// MLflow error code.
        code: String,
        /// Server message.
        message: String,
    },
    /// Filesystem failure.
    #[error("io error at {path:?}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// JSON encoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// YAML encoding failure.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// Tracking URI scheme not handled.
    #[error("unsupported tracking uri `{0}`")]
    UnsupportedUri(String),
    /// Artifact root scheme not handled.
    #[error("unsupported artifact uri `{0}`")]
    UnsupportedArtifactUri(String),
    /// Artifact path escapes the run root.
    #[error("invalid artifact path `{0}`")]
    InvalidArtifactPath(String),
    /// Run or experiment not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Stored data could not be interpreted.
    #[error("corrupt tracking data: {0}")]
    Corrupt(String),
}

impl TrackingError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
