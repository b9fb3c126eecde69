//! MLflow tracking server backend
//!
//! Talks to the MLflow REST API (`/api/2.0/mlflow`) with a blocking
//! `reqwest` client. Runs are created on the server the first time they are
//! persisted or receive an artifact; local run IDs are mapped to server IDs.

use std::collections::{BTreeMap, HashMap};

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::storage::{
    validate_artifact_path, ModelVersion, Result, TrackingBackend, TrackingStorageError,
};
use super::{now_ms, Run, RunStatus};

const API_PREFIX: &str = "/api/2.0/mlflow";
const ARTIFACTS_PREFIX: &str = "/api/2.0/mlflow-artifacts/artifacts";
const RESOURCE_ALREADY_EXISTS: &str = "RESOURCE_ALREADY_EXISTS";
const RESOURCE_DOES_NOT_EXIST: &str = "RESOURCE_DOES_NOT_EXIST";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ExperimentResponse {
    experiment: Experiment,
}

#[derive(Debug, Deserialize)]
struct Experiment {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    run: RemoteRunBody,
}

#[derive(Debug, Default, Deserialize)]
struct SearchRunsResponse {
    #[serde(default)]
    runs: Vec<RemoteRunBody>,
}

#[derive(Debug, Deserialize)]
struct RemoteRunBody {
    info: RunInfo,
    #[serde(default)]
    data: RunData,
}

#[derive(Debug, Deserialize)]
struct RunInfo {
    run_id: String,
    #[serde(default)]
    run_name: Option<String>,
    #[serde(default)]
    experiment_id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    start_time: Option<u64>,
    #[serde(default)]
    end_time: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RunData {
    #[serde(default)]
    metrics: Vec<RemoteMetric>,
    #[serde(default)]
    params: Vec<KeyValue>,
    #[serde(default)]
    tags: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct RemoteMetric {
    key: String,
    value: f64,
    #[serde(default)]
    step: u64,
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct ModelVersionResponse {
    model_version: RemoteModelVersion,
}

#[derive(Debug, Deserialize)]
struct RemoteModelVersion {
    name: String,
    version: String,
}

/// Server-side identity of a local run
#[derive(Debug, Clone)]
struct RemoteRun {
    run_id: String,
    experiment_id: String,
}

/// MLflow REST tracking backend with model registry support
#[derive(Debug)]
pub struct MlflowRestBackend {
    base_url: String,
    client: Client,
    /// Experiment name -> experiment ID
    experiments: HashMap<String, String>,
    /// Local run ID -> server run
    remote_runs: HashMap<String, RemoteRun>,
}

impl MlflowRestBackend {
    /// Create a backend for the tracking server at `base_url`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("model-select-eval/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            experiments: HashMap::new(),
            remote_runs: HashMap::new(),
        })
    }

    /// Server run ID for a local run, if the run reached the server
    #[must_use]
    pub fn remote_run_id(&self, run_id: &str) -> Option<&str> {
        self.remote_runs.get(run_id).map(|r| r.run_id.as_str())
    }

    fn api(&self, endpoint: &str) -> String {
        format!("{}{API_PREFIX}/{endpoint}", self.base_url)
    }

    fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        let parsed: Option<ErrorBody> = serde_json::from_str(&body).ok();
        let (code, message) = parsed.map_or_else(
            || (String::new(), body.clone()),
            |e| (e.error_code, e.message),
        );
        Err(TrackingStorageError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }

    fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
        let response = Self::check(request.send()?)?;
        Ok(response.json()?)
    }

    fn experiment_id(&mut self, name: &str) -> Result<String> {
        if let Some(id) = self.experiments.get(name) {
            return Ok(id.clone());
        }

        let lookup = Self::send::<ExperimentResponse>(
            self.client
                .get(self.api("experiments/get-by-name"))
                .query(&[("experiment_name", name)]),
        );
        let id = match lookup {
            Ok(found) => found.experiment.experiment_id,
            Err(TrackingStorageError::Api { ref code, .. }) if code == RESOURCE_DOES_NOT_EXIST => {
                let created: CreateExperimentResponse = Self::send(
                    self.client
                        .post(self.api("experiments/create"))
                        .json(&json!({ "name": name })),
                )?;
                tracing::info!(experiment = name, id = %created.experiment_id, "Created experiment");
                created.experiment_id
            }
            Err(e) => return Err(e),
        };

        self.experiments.insert(name.to_string(), id.clone());
        Ok(id)
    }

    fn ensure_remote_run(&mut self, run: &Run) -> Result<RemoteRun> {
        if let Some(remote) = self.remote_runs.get(&run.run_id) {
            return Ok(remote.clone());
        }

        let experiment_id = self.experiment_id(&run.experiment_name)?;
        let tags: Vec<_> = run
            .tags
            .iter()
            .map(|(k, v)| json!({ "key": k, "value": v }))
            .collect();
        let created: RunResponse = Self::send(self.client.post(self.api("runs/create")).json(
            &json!({
                "experiment_id": experiment_id,
                "run_name": run.run_name,
                "start_time": run.start_time_ms.unwrap_or_else(now_ms),
                "tags": tags,
            }),
        ))?;

        let remote = RemoteRun {
            run_id: created.run.info.run_id,
            experiment_id,
        };
        tracing::debug!(run_id = %run.run_id, remote_run_id = %remote.run_id, "Created server run");
        self.remote_runs.insert(run.run_id.clone(), remote.clone());
        Ok(remote)
    }

    fn server_id<'a>(&'a self, run_id: &'a str) -> &'a str {
        self.remote_run_id(run_id).unwrap_or(run_id)
    }

    fn convert(&self, body: RemoteRunBody) -> Run {
        let local_id = self
            .remote_runs
            .iter()
            .find(|(_, r)| r.run_id == body.info.run_id)
            .map_or_else(|| body.info.run_id.clone(), |(local, _)| local.clone());
        let experiment_name = self
            .experiments
            .iter()
            .find(|(_, id)| **id == body.info.experiment_id)
            .map_or_else(|| body.info.experiment_id.clone(), |(name, _)| name.clone());

        let mut metrics: BTreeMap<String, Vec<(f64, u64)>> = BTreeMap::new();
        for m in body.data.metrics {
            metrics.entry(m.key).or_default().push((m.value, m.step));
        }

        Run {
            run_id: local_id,
            run_name: body.info.run_name,
            experiment_name,
            status: RunStatus::from_mlflow(&body.info.status).unwrap_or(RunStatus::Active),
            params: body.data.params.into_iter().map(|p| (p.key, p.value)).collect(),
            metrics,
            artifacts: Vec::new(),
            tags: body
                .data
                .tags
                .into_iter()
                .filter(|t| !t.key.starts_with("mlflow."))
                .map(|t| (t.key, t.value))
                .collect(),
            start_time_ms: body.info.start_time,
            end_time_ms: body.info.end_time,
        }
    }
}

impl TrackingBackend for MlflowRestBackend {
    fn save_run(&mut self, run: &Run) -> Result<()> {
        let remote = self.ensure_remote_run(run)?;
        let timestamp = run.end_time_ms.unwrap_or_else(now_ms);

        let metrics: Vec<_> = run
            .metrics
            .iter()
            .flat_map(|(key, values)| {
                values.iter().map(move |(value, step)| {
                    json!({ "key": key, "value": value, "timestamp": timestamp, "step": step })
                })
            })
            .collect();
        let params: Vec<_> = run
            .params
            .iter()
            .map(|(k, v)| json!({ "key": k, "value": v }))
            .collect();

        Self::send::<serde_json::Value>(self.client.post(self.api("runs/log-batch")).json(
            &json!({
                "run_id": remote.run_id,
                "metrics": metrics,
                "params": params,
                "tags": [],
            }),
        ))?;

        if run.status != RunStatus::Active {
            Self::send::<serde_json::Value>(self.client.post(self.api("runs/update")).json(
                &json!({
                    "run_id": remote.run_id,
                    "status": run.status.as_mlflow(),
                    "end_time": timestamp,
                }),
            ))?;
        }
        Ok(())
    }

    fn load_run(&self, run_id: &str) -> Result<Run> {
        let response = Self::send::<RunResponse>(
            self.client
                .get(self.api("runs/get"))
                .query(&[("run_id", self.server_id(run_id))]),
        );
        match response {
            Ok(found) => Ok(self.convert(found.run)),
            Err(TrackingStorageError::Api { ref code, .. }) if code == RESOURCE_DOES_NOT_EXIST => {
                Err(TrackingStorageError::RunNotFound(run_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn list_runs(&self) -> Result<Vec<Run>> {
        if self.experiments.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<&String> = self.experiments.values().collect();
        let found: SearchRunsResponse = Self::send(
            self.client
                .post(self.api("runs/search"))
                .json(&json!({ "experiment_ids": ids, "max_results": 1000 })),
        )?;
        let mut runs: Vec<Run> = found.runs.into_iter().map(|r| self.convert(r)).collect();
        runs.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(runs)
    }

    fn save_artifact(&mut self, run: &Run, artifact_path: &str, bytes: &[u8]) -> Result<String> {
        validate_artifact_path(artifact_path)?;
        let remote = self.ensure_remote_run(run)?;
        let url = format!(
            "{}{ARTIFACTS_PREFIX}/{}/{}/artifacts/{artifact_path}",
            self.base_url, remote.experiment_id, remote.run_id
        );

        let response = self
            .client
            .put(&url)
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()?;
        Self::check(response)?;
        Ok(format!("runs:/{}/{artifact_path}", remote.run_id))
    }

    fn register_model(
        &mut self,
        name: &str,
        run: &Run,
        artifact_path: &str,
    ) -> Result<ModelVersion> {
        let remote = self.ensure_remote_run(run)?;

        let created = Self::send::<serde_json::Value>(
            self.client
                .post(self.api("registered-models/create"))
                .json(&json!({ "name": name })),
        );
        match created {
            Ok(_) => tracing::info!(model = name, "Created registered model"),
            Err(TrackingStorageError::Api { ref code, .. }) if code == RESOURCE_ALREADY_EXISTS => {}
            Err(e) => return Err(e),
        }

        let source = format!("runs:/{}/{artifact_path}", remote.run_id);
        let version: ModelVersionResponse = Self::send(
            self.client.post(self.api("model-versions/create")).json(&json!({
                "name": name,
                "source": source,
                "run_id": remote.run_id,
            })),
        )?;

        Ok(ModelVersion {
            name: version.model_version.name,
            version: version.model_version.version,
            run_id: run.run_id.clone(),
            source,
        })
    }

    fn supports_registry(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }
}
