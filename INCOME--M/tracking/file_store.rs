use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

use crate::{
    backend::{
        artifact_destination, artifact_relative_path, copy_local, validate_relative,
        ArtifactDestination, Metric, Param, RunInfo, RunStatus, RunTag, TrackingBackend,
        TrackingError,
    },
    run::now_millis,
};

const META_FILE: &str = "meta.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ExperimentMeta {
    artifact_location: String,
    creation_time: i64,
    experiment_id: String,
    last_update_time: i64,
    lifecycle_stage: String,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RunMeta {
    artifact_uri: String,
    end_time: Option<i64>,
    experiment_id: String,
    lifecycle_stage: String,
    run_id: String,
    run_name: String,
    start_time: i64,
    status: u8,
}

impl RunMeta {
    fn from_info(info: &RunInfo) -> Self {
        Self {
            artifact_uri: info.artifact_uri.clone(),
            end_time: info.end_time,
            experiment_id: info.experiment_id.clone(),
            lifecycle_stage: "active".into(),
            run_id: info.run_id.clone(),
            run_name: info.run_name.clone(),
            start_time: info.start_time,
            status: info.status.code(),
        }
    }

    fn into_info(self) -> Result<RunInfo, TrackingError> {
        let status = RunStatus::from_code(self.status).ok_or_else(|| {
            TrackingError::Corrupt(format!("run {} has status code {}", self.run_id, self.status))
        })?;
        Ok(RunInfo {
            run_id: self.run_id,
            experiment_id: self.experiment_id,
            run_name: self.run_name,
            artifact_uri: self.artifact_uri,
            status,
            start_time: self.start_time,
            end_time: self.end_time,
        })
    }
}

/// Tracking backend writing an `mlruns`-style directory tree.
///
/// ```text
/// <root>/<experiment_id>/meta.yaml
/// <root>/<experiment_id>/<run_id>/meta.yaml
/// <root>/<experiment_id>/<run_id>/{params,metrics,tags,artifacts}/
/// ```
#[derive(Debug, Clone)]
pub struct FileStoreBackend {
    root: PathBuf,
}

impl FileStoreBackend {
    /// Opens (and creates) the store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, TrackingError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|source| TrackingError::io(root, source))?;
        let root = root
            .canonicalize()
            .map_err(|source| TrackingError::io(root, source))?;
        Ok(Self { root })
    }

    /// Store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn experiment_dirs(&self) -> Result<Vec<(String, PathBuf)>, TrackingError> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|source| TrackingError::io(&self.root, source))?;
        let mut dirs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| TrackingError::io(&self.root, source))?
        {
            let path = entry.path();
            if path.join(META_FILE).is_file() {
                let id = entry.file_name().to_string_lossy().into_owned();
                dirs.push((id, path));
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    async fn find_run_dir(&self, run_id: &str) -> Result<PathBuf, TrackingError> {
        validate_relative(run_id)?;
        for (_, dir) in self.experiment_dirs().await? {
            let candidate = dir.join(run_id);
            if candidate.join(META_FILE).is_file() {
                return Ok(candidate);
            }
        }
        Err(TrackingError::NotFound(format!("run {run_id}")))
    }

    async fn write_entry(&self, dir: &Path, key: &str, contents: &str) -> Result<(), TrackingError> {
        validate_relative(key)?;
        let path = dir.join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| TrackingError::io(parent, source))?;
        }
        fs::write(&path, contents)
            .await
            .map_err(|source| TrackingError::io(&path, source))
    }
}

#[async_trait]
impl TrackingBackend for FileStoreBackend {
    async fn get_or_create_experiment(&self, name: &str) -> Result<String, TrackingError> {
        let mut next_id = 0_u64;
        for (id, dir) in self.experiment_dirs().await? {
            let meta: ExperimentMeta = read_yaml(&dir.join(META_FILE)).await?;
            if meta.name == name {
                return Ok(id);
            }
            if let Ok(numeric) = id.parse::<u64>() {
                next_id = next_id.max(numeric + 1);
            }
        }
        let id = next_id.to_string();
        let dir = self.root.join(&id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| TrackingError::io(&dir, source))?;
        let now = now_millis();
        let meta = ExperimentMeta {
            artifact_location: format!("file://{}", dir.display()),
            creation_time: now,
            experiment_id: id.clone(),
            last_update_time: now,
            lifecycle_stage: "active".into(),
            name: name.to_string(),
        };
        write_yaml(&dir.join(META_FILE), &meta).await?;
        Ok(id)
    }

    async fn create_run(
        &self,
        experiment_id: &str,
        run_name: &str,
        start_time: i64,
        tags: &[RunTag],
    ) -> Result<RunInfo, TrackingError> {
        validate_relative(experiment_id)?;
        let experiment_dir = self.root.join(experiment_id);
        if !experiment_dir.join(META_FILE).is_file() {
            return Err(TrackingError::NotFound(format!("experiment {experiment_id}")));
        }
        let run_id = Uuid::new_v4().simple().to_string();
        let run_dir = experiment_dir.join(&run_id);
        for sub in ["params", "metrics", "tags", "artifacts"] {
            let dir = run_dir.join(sub);
            fs::create_dir_all(&dir)
                .await
                .map_err(|source| TrackingError::io(&dir, source))?;
        }
        let info = RunInfo {
            artifact_uri: format!("file://{}", run_dir.join("artifacts").display()),
            run_id,
            experiment_id: experiment_id.to_string(),
            run_name: run_name.to_string(),
            status: RunStatus::Running,
            start_time,
            end_time: None,
        };
        write_yaml(&run_dir.join(META_FILE), &RunMeta::from_info(&info)).await?;
        let tags_dir = run_dir.join("tags");
        for tag in tags {
            self.write_entry(&tags_dir, &tag.key, &tag.value).await?;
        }
        Ok(info)
    }

    async fn get_run(&self, run_id: &str) -> Result<RunInfo, TrackingError> {
        let run_dir = self.find_run_dir(run_id).await?;
        let meta: RunMeta = read_yaml(&run_dir.join(META_FILE)).await?;
        meta.into_info()
    }

    async fn log_batch(
        &self,
        run_id: &str,
        metrics: &[Metric],
        params: &[Param],
        tags: &[RunTag],
    ) -> Result<(), TrackingError> {
        let run_dir = self.find_run_dir(run_id).await?;
        let params_dir = run_dir.join("params");
        for param in params {
            validate_relative(&param.key)?;
            let path = params_dir.join(&param.key);
            if let Ok(existing) = fs::read_to_string(&path).await {
                if existing != param.value {
                    return Err(TrackingError::Api {
                        status: 400,
                        code: "INVALID_PARAMETER_VALUE".into(),
                        message: format!(
                            "param `{}` already logged with value `{existing}`",
                            param.key
                        ),
                    });
                }
                continue;
            }
            self.write_entry(&params_dir, &param.key, &param.value).await?;
        }

        let metrics_dir = run_dir.join("metrics");
        for metric in metrics {
            validate_relative(&metric.key)?;
            let path = metrics_dir.join(&metric.key);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|source| TrackingError::io(parent, source))?;
            }
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|source| TrackingError::io(&path, source))?;
            let line = format!("{} {} {}\n", metric.timestamp, metric.value, metric.step);
            file.write_all(line.as_bytes())
                .await
                .map_err(|source| TrackingError::io(&path, source))?;
            file.flush()
                .await
                .map_err(|source| TrackingError::io(&path, source))?;
        }

        let tags_dir = run_dir.join("tags");
        for tag in tags {
            self.write_entry(&tags_dir, &tag.key, &tag.value).await?;
        }
        Ok(())
    }

    async fn log_artifact(
        &self,
        run: &RunInfo,
        local_path: &Path,
        artifact_path: Option<&str>,
    ) -> Result<(), TrackingError> {
        let relative = artifact_relative_path(local_path, artifact_path)?;
        match artifact_destination(&run.artifact_uri, &relative)? {
            ArtifactDestination::Local(destination) => copy_local(local_path, &destination).await,
            ArtifactDestination::Proxy(_) => Err(TrackingError::UnsupportedArtifactUri(
                run.artifact_uri.clone(),
            )),
        }
    }

    async fn update_run(
        &self,
        run_id: &str,
        status: RunStatus,
        end_time: i64,
    ) -> Result<(), TrackingError> {
        let run_dir = self.find_run_dir(run_id).await?;
        let path = run_dir.join(META_FILE);
        let mut meta: RunMeta = read_yaml(&path).await?;
        meta.status = status.code();
        meta.end_time = Some(end_time);
        write_yaml(&path, &meta).await
    }
}

async fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, TrackingError> {
    let text = fs::read_to_string(path)
        .await
        .map_err(|source| TrackingError::io(path, source))?;
    serde_yaml::from_str(&text)
        .map_err(|err| TrackingError::Corrupt(format!("{}: {err}", path.display())))
}

async fn write_yaml<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), TrackingError> {
    let text = serde_yaml::to_string(value)?;
    fs::write(path, text)
        .await
        .map_err(|source| TrackingError::io(path, source))
}
