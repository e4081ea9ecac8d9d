use std::path::Path;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    backend::{
        artifact_destination, artifact_relative_path, copy_local, ArtifactDestination, Metric,
        Param, RunInfo, RunStatus, RunTag, TrackingBackend, TrackingError,
    },
    settings::TrackingAuth,
};

/// Maximum params per `log-batch` request.
pub const MAX_PARAMS_PER_BATCH: usize = 100;
/// Maximum tags per `log-batch` request.
pub const MAX_TAGS_PER_BATCH: usize = 100;
/// Maximum metrics per `log-batch` request.
pub const MAX_METRICS_PER_BATCH: usize = 1000;

const RESOURCE_DOES_NOT_EXIST: &str = "RESOURCE_DOES_NOT_EXIST";

/// MLflow REST API 2.0 client.
#[derive(Debug, Clone)]
pub struct MlflowRestBackend {
    client: Client,
    base_url: String,
    auth: Option<TrackingAuth>,
}

impl MlflowRestBackend {
    /// Creates a client for the server at `base_url`.
    pub fn new(base_url: impl Into<String>, auth: Option<TrackingAuth>) -> Result<Self, TrackingError> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow/{path}", self.base_url)
    }

    fn artifact_endpoint(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow-artifacts/artifacts/{path}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some(TrackingAuth::Bearer(token)) => request.bearer_auth(token),
            Some(TrackingAuth::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            None => request,
        }
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, TrackingError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let request = self.authorize(self.client.post(self.endpoint(path)).json(body));
        let response = check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn get<R>(&self, path: &str, query: &[(&str, &str)]) -> Result<R, TrackingError>
    where
        R: DeserializeOwned,
    {
        let request = self.authorize(self.client.get(self.endpoint(path)).query(query));
        let response = check(request.send().await?).await?;
        Ok(response.json().await?)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ExperimentEnvelope {
    experiment: ExperimentWire,
}

#[derive(Debug, Deserialize)]
struct ExperimentWire {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct RunEnvelope {
    run: RunWire,
}

#[derive(Debug, Deserialize)]
struct RunWire {
    info: RunInfoWire,
}

#[derive(Debug, Deserialize)]
struct RunInfoWire {
    run_id: String,
    experiment_id: String,
    #[serde(default)]
    run_name: String,
    #[serde(default)]
    artifact_uri: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    start_time: Option<Value>,
    #[serde(default)]
    end_time: Option<Value>,
}

impl RunInfoWire {
    fn into_info(self) -> Result<RunInfo, TrackingError> {
        let status = match self.status.as_deref() {
            None => RunStatus::Running,
            Some(raw) => RunStatus::parse(raw)
                .ok_or_else(|| TrackingError::Corrupt(format!("unknown run status `{raw}`")))?,
        };
        Ok(RunInfo {
            run_id: self.run_id,
            experiment_id: self.experiment_id,
            run_name: self.run_name,
            artifact_uri: self.artifact_uri,
            status,
            start_time: self.start_time.as_ref().and_then(int64).unwrap_or_default(),
            end_time: self.end_time.as_ref().and_then(int64),
        })
    }
}

/// Proto int64 fields may arrive as JSON numbers or strings.
fn int64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

async fn check(response: Response) -> Result<Response, TrackingError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(api_error(status.as_u16(), &text))
}

fn api_error(status: u16, text: &str) -> TrackingError {
    let body = serde_json::from_str::<ApiErrorBody>(text).unwrap_or(ApiErrorBody {
        error_code: String::new(),
        message: text.to_string(),
    });
    TrackingError::Api {
        status,
        code: body.error_code,
        message: body.message,
    }
}

/// One `runs/log-batch` request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogBatchRequest {
    /// Target run.
    pub run_id: String,
    /// Metrics in this request.
    pub metrics: Vec<Metric>,
    /// Params in this request.
    pub params: Vec<Param>,
    /// Tags in this request.
    pub tags: Vec<RunTag>,
}

/// Splits a batch into requests honouring the server's per-request limits.
#[must_use]
pub fn split_batches(
    run_id: &str,
    metrics: &[Metric],
    params: &[Param],
    tags: &[RunTag],
) -> Vec<LogBatchRequest> {
    let empty = |run_id: &str| LogBatchRequest {
        run_id: run_id.to_string(),
        metrics: Vec::new(),
        params: Vec::new(),
        tags: Vec::new(),
    };
    let mut requests = Vec::new();
    for chunk in params.chunks(MAX_PARAMS_PER_BATCH) {
        let mut request = empty(run_id);
        request.params = chunk.to_vec();
        requests.push(request);
    }
    for chunk in tags.chunks(MAX_TAGS_PER_BATCH) {
        let mut request = empty(run_id);
        request.tags = chunk.to_vec();
        requests.push(request);
    }
    for chunk in metrics.chunks(MAX_METRICS_PER_BATCH) {
        let mut request = empty(run_id);
        request.metrics = chunk.to_vec();
        requests.push(request);
    }
    requests
}

#[async_trait]
impl TrackingBackend for MlflowRestBackend {
    async fn get_or_create_experiment(&self, name: &str) -> Result<String, TrackingError> {
        match self
            .get::<ExperimentEnvelope>("experiments/get-by-name", &[("experiment_name", name)])
            .await
        {
            Ok(envelope) => Ok(envelope.experiment.experiment_id),
            Err(TrackingError::Api { code, .. }) if code == RESOURCE_DOES_NOT_EXIST => {
                let created: CreateExperimentResponse = self
                    .post("experiments/create", &json!({ "name": name }))
                    .await?;
                Ok(created.experiment_id)
            }
            Err(err) => Err(err),
        }
    }

    async fn create_run(
        &self,
        experiment_id: &str,
        run_name: &str,
        start_time: i64,
        tags: &[RunTag],
    ) -> Result<RunInfo, TrackingError> {
        let envelope: RunEnvelope = self
            .post(
                "runs/create",
                &json!({
                    "experiment_id": experiment_id,
                    "run_name": run_name,
                    "start_time": start_time,
                    "tags": tags,
                }),
            )
            .await?;
        envelope.run.info.into_info()
    }

    async fn get_run(&self, run_id: &str) -> Result<RunInfo, TrackingError> {
        match self
            .get::<RunEnvelope>("runs/get", &[("run_id", run_id)])
            .await
        {
            Ok(envelope) => envelope.run.info.into_info(),
            Err(TrackingError::Api { code, .. }) if code == RESOURCE_DOES_NOT_EXIST => {
                Err(TrackingError::NotFound(format!("run {run_id}")))
            }
            Err(err) => Err(err),
        }
    }

    async fn log_batch(
        &self,
        run_id: &str,
        metrics: &[Metric],
        params: &[Param],
        tags: &[RunTag],
    ) -> Result<(), TrackingError> {
        for request in split_batches(run_id, metrics, params, tags) {
            let _: Value = self.post("runs/log-batch", &request).await?;
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
            ArtifactDestination::Proxy(path) => {
                let bytes = tokio::fs::read(local_path)
                    .await
                    .map_err(|source| TrackingError::io(local_path, source))?;
                let request = self
                    .authorize(self.client.put(self.artifact_endpoint(&path)))
                    .body(bytes);
                check(request.send().await?).await?;
                Ok(())
            }
            ArtifactDestination::Local(destination) => copy_local(local_path, &destination).await,
        }
    }

    async fn update_run(
        &self,
        run_id: &str,
        status: RunStatus,
        end_time: i64,
    ) -> Result<(), TrackingError> {
        let _: Value = self
            .post(
                "runs/update",
                &json!({
                    "run_id": run_id,
                    "status": status.as_str(),
                    "end_time": end_time,
                }),
            )
            .await?;
        Ok(())
    }
}
