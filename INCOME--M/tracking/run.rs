use std::{path::Path, sync::Arc};

use chrono::Utc;

use crate::{
    backend::{Metric, Param, RunInfo, RunStatus, RunTag, TrackingBackend, TrackingError},
    file_store::FileStoreBackend,
    rest::MlflowRestBackend,
    settings::{TrackingSettings, TrackingTarget},
};

/// Tag holding the display name of a run.
pub const TAG_RUN_NAME: &str = "mlflow.runName";
/// Tag naming the program that produced a run.
pub const TAG_SOURCE_NAME: &str = "mlflow.source.name";
/// Tag naming the source kind.
pub const TAG_SOURCE_TYPE: &str = "mlflow.source.type";
/// Tag naming the user who started the run.
pub const TAG_USER: &str = "mlflow.user";

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// True when `id` looks like a run id (32 lowercase hex digits).
#[must_use]
pub fn is_valid_run_id(id: &str) -> bool {
    id.len() == 32
        && id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Entry point for recording runs against the configured backend.
#[derive(Clone)]
pub struct TrackingClient {
    settings: TrackingSettings,
    backend: Arc<dyn TrackingBackend>,
}

impl std::fmt::Debug for TrackingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingClient")
            .field("tracking_uri", &self.settings.tracking_uri)
            .field("experiment_name", &self.settings.experiment_name)
            .finish_non_exhaustive()
    }
}

impl TrackingClient {
    /// Builds the backend selected by the tracking URI.
    pub fn connect(settings: TrackingSettings) -> Result<Self, TrackingError> {
        let backend: Arc<dyn TrackingBackend> = match settings.target()? {
            TrackingTarget::Rest(base_url) => {
                Arc::new(MlflowRestBackend::new(base_url, settings.auth.clone())?)
            }
            TrackingTarget::FileStore(root) => Arc::new(FileStoreBackend::open(root)?),
        };
        Ok(Self::with_backend(settings, backend))
    }

    /// Uses an already-constructed backend.
    #[must_use]
    pub fn with_backend(settings: TrackingSettings, backend: Arc<dyn TrackingBackend>) -> Self {
        Self { settings, backend }
    }

    /// Settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &TrackingSettings {
        &self.settings
    }

    /// Creates the experiment if needed and opens a `RUNNING` run in it.
    pub async fn start_run(&self, extra_tags: &[RunTag]) -> Result<ActiveRun, TrackingError> {
        let experiment_id = self
            .backend
            .get_or_create_experiment(&self.settings.experiment_name)
            .await?;
        let mut tags = vec![
            RunTag::new(TAG_RUN_NAME, &self.settings.run_name),
            RunTag::new(TAG_SOURCE_NAME, "trn"),
            RunTag::new(TAG_SOURCE_TYPE, "LOCAL"),
        ];
        if let Some(user) = &self.settings.user {
            tags.push(RunTag::new(TAG_USER, user));
        }
        for tag in extra_tags {
            tags.retain(|existing| existing.key != tag.key);
            tags.push(tag.clone());
        }
        let info = self
            .backend
            .create_run(&experiment_id, &self.settings.run_name, now_millis(), &tags)
            .await?;
        Ok(ActiveRun {
            backend: Arc::clone(&self.backend),
            info,
        })
    }

    /// Fetches a previously recorded run.
    pub async fn get_run(&self, run_id: &str) -> Result<RunInfo, TrackingError> {
        self.backend.get_run(run_id).await
    }
}

/// A run that has been started and not yet ended.
pub struct ActiveRun {
    backend: Arc<dyn TrackingBackend>,
    info: RunInfo,
}

impl std::fmt::Debug for ActiveRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveRun").field("info", &self.info).finish_non_exhaustive()
    }
}

impl ActiveRun {
    /// Run metadata as returned at creation.
    #[must_use]
    pub const fn info(&self) -> &RunInfo {
        &self.info
    }

    /// Run identifier.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.info.run_id
    }

    /// Logs parameters in one batch.
    pub async fn log_params(&self, params: &[(String, String)]) -> Result<(), TrackingError> {
        let params: Vec<Param> = params
            .iter()
            .map(|(key, value)| Param {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        self.backend.log_batch(&self.info.run_id, &[], &params, &[]).await
    }

    /// Logs a single parameter.
    pub async fn log_param(&self, key: &str, value: &str) -> Result<(), TrackingError> {
        self.log_params(&[(key.to_string(), value.to_string())]).await
    }

    /// Logs metrics at step 0 with the current timestamp.
    pub async fn log_metrics(&self, metrics: &[(String, f64)]) -> Result<(), TrackingError> {
        let timestamp = now_millis();
        let metrics: Vec<Metric> = metrics
            .iter()
            .map(|(key, value)| Metric {
                key: key.clone(),
                value: *value,
                timestamp,
                step: 0,
            })
            .collect();
        self.backend.log_batch(&self.info.run_id, &metrics, &[], &[]).await
    }

    /// Logs one metric sample.
    pub async fn log_metric(&self, key: &str, value: f64, step: i64) -> Result<(), TrackingError> {
        let metric = Metric {
            key: key.to_string(),
            value,
            timestamp: now_millis(),
            step,
        };
        self.backend.log_batch(&self.info.run_id, &[metric], &[], &[]).await
    }

    /// Sets tags on the run.
    pub async fn set_tags(&self, tags: &[RunTag]) -> Result<(), TrackingError> {
        self.backend.log_batch(&self.info.run_id, &[], &[], tags).await
    }

    /// Uploads `local_path` under `artifact_path` (artifact root when `None`).
    pub async fn log_artifact(
        &self,
        local_path: &Path,
        artifact_path: Option<&str>,
    ) -> Result<(), TrackingError> {
        self.backend
            .log_artifact(&self.info, local_path, artifact_path)
            .await
    }

    /// Ends the run with `status`.
    pub async fn end(self, status: RunStatus) -> Result<RunInfo, TrackingError> {
        let end_time = now_millis();
        self.backend
            .update_run(&self.info.run_id, status, end_time)
            .await?;
        Ok(RunInfo {
            status,
            end_time: Some(end_time),
            ..self.info
        })
    }

    /// Ends the run as `FINISHED` when `outcome` is `Ok`, `FAILED` otherwise.
    ///
    /// The error of `outcome` wins over a failure to end the run.
    pub async fn close<T, E>(self, outcome: Result<T, E>) -> Result<T, E>
    where
        E: From<TrackingError>,
    {
        match outcome {
            Ok(value) => {
                self.end(RunStatus::Finished).await?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.end(RunStatus::Failed).await;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::runtime::Runtime;

    fn file_client(root: &Path) -> TrackingClient {
        let settings = TrackingSettings::from_lookup(|_| None).with_overrides(
            Some(format!("file:{}", root.display())),
            Some("adult-income".into()),
            Some("unit".into()),
        );
        TrackingClient::connect(settings).unwrap()
    }

    #[test]
    fn run_ids_are_validated() {
        assert!(is_valid_run_id("0123456789abcdef0123456789abcdef"));
        assert!(!is_valid_run_id("0123456789ABCDEF0123456789ABCDEF"));
        assert!(!is_valid_run_id("abc"));
        assert!(!is_valid_run_id("0123456789abcdef0123456789abcdeg"));
    }

    #[test]
    fn close_marks_success_and_failure() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempdir().unwrap();
            let client = file_client(dir.path());

            let run = client.start_run(&[]).await.unwrap();
            let id = run.run_id().to_string();
            assert!(is_valid_run_id(&id));
            let value: Result<u8, TrackingError> = run.close(Ok(7)).await;
            assert_eq!(value.unwrap(), 7);
            assert_eq!(client.get_run(&id).await.unwrap().status, RunStatus::Finished);

            let run = client.start_run(&[]).await.unwrap();
            let id = run.run_id().to_string();
            let failed: Result<(), TrackingError> = run
                .close(Err(TrackingError::Corrupt("boom".into())))
                .await;
            assert!(matches!(failed, Err(TrackingError::Corrupt(_))));
            let info = client.get_run(&id).await.unwrap();
            assert_eq!(info.status, RunStatus::Failed);
            assert!(info.end_time.is_some());
        });
    }

    #[test]
    fn default_tags_can_be_overridden() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempdir().unwrap();
            let client = file_client(dir.path());
            let run = client
                .start_run(&[RunTag::new(TAG_SOURCE_NAME, "notebook")])
                .await
                .unwrap();
            let tag_path = dir
                .path()
                .join(&run.info().experiment_id)
                .join(run.run_id())
                .join("tags")
                .join(TAG_SOURCE_NAME);
            assert_eq!(std::fs::read_to_string(tag_path).unwrap(), "notebook");
            run.end(RunStatus::Killed).await.unwrap();
        });
    }
}
