//! GitLab CI provider
//!
//! Drives pipelines through the GitLab REST v4 API. The workspace's
//! `namespace` names the project pipelines are created in, either as a
//! numeric id or as a `group/project` path. The stage plan travels to the
//! project's CI configuration in the `CONDUIT_PIPELINE_PLAN` variable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_core::domain::log::{LogEntry, LogLevel};
use conduit_core::domain::provider::{ProviderInfo, ProviderStatus};
use conduit_core::domain::run::{PipelineRun, RunStatus, Stage, Task, TaskExit, TaskStatus};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{ProviderAdapter, ProviderConnection, ProviderError, ProviderFactory, StatusReport};

const DEFAULT_TAIL_INTERVAL: Duration = Duration::from_secs(2);
const TAIL_CHANNEL_CAPACITY: usize = 256;

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid ANSI regex"));

// =============================================================================
// Factory
// =============================================================================

pub struct GitLabFactory;

impl ProviderFactory for GitLabFactory {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "gitlab".to_string(),
            display_name: "GitLab CI".to_string(),
            description: "Pipelines on GitLab runners through the REST v4 API".to_string(),
            features: vec![
                "cancel".to_string(),
                "logs".to_string(),
                "log-streaming".to_string(),
                "variables".to_string(),
            ],
            status: ProviderStatus::Available,
        }
    }

    fn connect(
        &self,
        connection: ProviderConnection,
    ) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        Ok(Arc::new(GitLabProvider::new(connection)?))
    }
}

// =============================================================================
// Adapter
// =============================================================================

#[derive(Clone)]
pub struct GitLabProvider {
    client: Client,
    /// `{endpoint}/api/v4/projects/{project}`
    project_url: String,
    tail_interval: Duration,
}

impl GitLabProvider {
    pub fn new(connection: ProviderConnection) -> Result<Self, ProviderError> {
        let config = &connection.config;

        let project = config
            .namespace
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                ProviderError::Terminal(
                    "GitLab provider requires a namespace naming the project".to_string(),
                )
            })?;

        let token = connection.token.as_deref().ok_or_else(|| {
            ProviderError::Terminal("GitLab provider requires an API token credential".to_string())
        })?;

        let mut token_value = HeaderValue::from_str(token).map_err(|_| {
            ProviderError::Terminal("GitLab API token contains invalid characters".to_string())
        })?;
        token_value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert("private-token", token_value);

        let client = Client::builder()
            .timeout(connection.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderError::Terminal(format!("failed to build HTTP client: {e}")))?;

        let tail_interval = config
            .settings
            .get("tail_interval_secs")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TAIL_INTERVAL);

        Ok(Self {
            client,
            project_url: format!(
                "{}/api/v4/projects/{}",
                config.endpoint.trim_end_matches('/'),
                encode_project(project)
            ),
            tail_interval,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(format!("{}{}", self.project_url, path))
            .send()
            .await
            .map_err(request_error)?;

        decode(check_status(response).await?).await
    }

    async fn get_pipeline(&self, handle: &str) -> Result<GlPipeline, ProviderError> {
        self.get_json(&format!("/pipelines/{handle}")).await
    }

    /// Jobs of a pipeline in creation order
    async fn list_jobs(&self, handle: &str) -> Result<Vec<GlJob>, ProviderError> {
        let mut jobs: Vec<GlJob> = self
            .get_json(&format!("/pipelines/{handle}/jobs?per_page=100"))
            .await?;
        jobs.sort_by_key(|job| job.id);
        Ok(jobs)
    }

    async fn job_trace(&self, job_id: u64) -> Result<String, ProviderError> {
        let response = self
            .client
            .get(format!("{}/jobs/{}/trace", self.project_url, job_id))
            .send()
            .await
            .map_err(request_error)?;

        check_status(response)
            .await?
            .text()
            .await
            .map_err(request_error)
    }

    /// Polls job traces and forwards lines not yet sent
    ///
    /// Stops once the pipeline is terminal and every trace has been read
    /// after that observation, on a terminal error, or when the receiver
    /// goes away.
    async fn follow(self, handle: String, stage: String, task: String, tx: mpsc::Sender<LogEntry>) {
        let mut forwarded: HashMap<u64, usize> = HashMap::new();

        loop {
            if tx.is_closed() {
                return;
            }

            let pipeline = match self.get_pipeline(&handle).await {
                Ok(pipeline) => pipeline,
                Err(err) if err.is_transient() => {
                    debug!("Log tail for GitLab pipeline {} backing off: {}", handle, err);
                    tokio::time::sleep(self.tail_interval).await;
                    continue;
                }
                Err(err) => {
                    warn!("Stopping log tail for GitLab pipeline {}: {}", handle, err);
                    return;
                }
            };
            let finished = map_pipeline_status(&pipeline.status).is_terminal();

            let jobs = match self.list_jobs(&handle).await {
                Ok(jobs) => jobs,
                Err(err) if err.is_transient() => {
                    debug!("Log tail for GitLab pipeline {} backing off: {}", handle, err);
                    tokio::time::sleep(self.tail_interval).await;
                    continue;
                }
                Err(err) => {
                    warn!("Stopping log tail for GitLab pipeline {}: {}", handle, err);
                    return;
                }
            };

            // A trace missed on the final round would lose the job's last lines
            let mut complete = true;
            for job in jobs
                .iter()
                .filter(|j| j.started_at.is_some() && j.matches(&stage, &task))
            {
                let trace = match self.job_trace(job.id).await {
                    Ok(trace) => trace,
                    Err(err) if err.is_transient() => {
                        debug!("Skipping trace of GitLab job {} this round: {}", job.id, err);
                        complete = false;
                        continue;
                    }
                    Err(err) => {
                        warn!("Stopping log tail for GitLab pipeline {}: {}", handle, err);
                        return;
                    }
                };

                let lines = trace_lines(&trace, job.is_finished());
                let sent = forwarded.entry(job.id).or_insert(0);
                for line in lines.iter().skip(*sent) {
                    if let Some(entry) = job.log_entry(line) {
                        if tx.send(entry).await.is_err() {
                            return;
                        }
                    }
                }
                *sent = (*sent).max(lines.len());
            }

            if finished && complete {
                return;
            }
            tokio::time::sleep(self.tail_interval).await;
        }
    }
}

#[async_trait]
impl ProviderAdapter for GitLabProvider {
    fn name(&self) -> &str {
        "gitlab"
    }

    async fn check_connectivity(&self) -> Result<(), ProviderError> {
        let project: GlProject = self.get_json("").await?;
        debug!("Connected to GitLab project {}", project.path_with_namespace);
        Ok(())
    }

    async fn submit(&self, run: &PipelineRun) -> Result<String, ProviderError> {
        let body = CreatePipelineBody {
            git_ref: &run.config_snapshot.source.revision,
            variables: pipeline_variables(run)?,
        };

        let response = self
            .client
            .post(format!("{}/pipeline", self.project_url))
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let pipeline: GlPipeline = decode(check_status(response).await?).await?;
        debug!("GitLab accepted run {} as pipeline {}", run.id, pipeline.id);
        Ok(pipeline.id.to_string())
    }

    async fn query_status(&self, handle: &str) -> Result<StatusReport, ProviderError> {
        let pipeline = self.get_pipeline(handle).await?;
        let jobs = self.list_jobs(handle).await?;
        let status = map_pipeline_status(&pipeline.status);

        let message = match status {
            RunStatus::Failed => Some(failure_summary(&jobs)),
            _ => None,
        };

        Ok(StatusReport {
            status,
            stages: build_stages(&jobs),
            message,
        })
    }

    async fn cancel(&self, handle: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(format!("{}/pipelines/{}/cancel", self.project_url, handle))
            .send()
            .await
            .map_err(request_error)?;

        check_status(response).await?;
        Ok(())
    }

    async fn fetch_logs(
        &self,
        handle: &str,
        stage: &str,
        task: &str,
    ) -> Result<Vec<LogEntry>, ProviderError> {
        let jobs = self.list_jobs(handle).await?;
        let mut entries = Vec::new();

        for job in jobs
            .iter()
            .filter(|j| j.started_at.is_some() && j.matches(stage, task))
        {
            let trace = self.job_trace(job.id).await?;
            entries.extend(
                trace_lines(&trace, true)
                    .iter()
                    .filter_map(|line| job.log_entry(line)),
            );
        }

        Ok(entries)
    }

    async fn tail_logs(
        &self,
        handle: &str,
        stage: &str,
        task: &str,
    ) -> Result<mpsc::Receiver<LogEntry>, ProviderError> {
        // Fail fast on an unknown pipeline instead of handing back a dead channel
        self.get_pipeline(handle).await?;

        let (tx, rx) = mpsc::channel(TAIL_CHANNEL_CAPACITY);
        let follower = self.clone();
        let (handle, stage, task) = (handle.to_string(), stage.to_string(), task.to_string());
        tokio::spawn(async move { follower.follow(handle, stage, task, tx).await });

        Ok(rx)
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct GlProject {
    path_with_namespace: String,
}

#[derive(Debug, Deserialize)]
struct GlPipeline {
    id: u64,
    status: String,
}

#[derive(Debug, Deserialize)]
struct GlJob {
    id: u64,
    name: String,
    stage: String,
    status: String,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    failure_reason: Option<String>,
}

impl GlJob {
    fn matches(&self, stage: &str, task: &str) -> bool {
        (stage.is_empty() || self.stage == stage) && (task.is_empty() || self.name == task)
    }

    fn is_finished(&self) -> bool {
        !matches!(
            map_job_status(&self.status),
            TaskStatus::Pending | TaskStatus::Running
        )
    }

    fn to_task(&self) -> Task {
        let status = map_job_status(&self.status);
        let exit = (status == TaskStatus::Failed).then(|| TaskExit {
            exit_code: None,
            message: self.failure_reason.clone(),
        });

        Task {
            name: self.name.clone(),
            status,
            started_at: self.started_at,
            finished_at: self.finished_at,
            exit,
        }
    }

    fn log_entry(&self, raw_line: &str) -> Option<LogEntry> {
        let message = clean_line(raw_line)?;
        let level = if message.starts_with("ERROR:") {
            LogLevel::Error
        } else if message.starts_with("WARNING:") {
            LogLevel::Warning
        } else {
            LogLevel::Info
        };

        Some(LogEntry {
            timestamp: self.started_at.unwrap_or_else(Utc::now),
            stage: self.stage.clone(),
            task: self.name.clone(),
            level,
            message,
        })
    }
}

#[derive(Debug, Serialize)]
struct CreatePipelineBody<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    variables: Vec<Variable>,
}

#[derive(Debug, PartialEq, Serialize)]
struct Variable {
    key: String,
    value: String,
}

impl Variable {
    fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

// =============================================================================
// Translation helpers
// =============================================================================

/// GitLab expects project paths URL-encoded in the path segment
fn encode_project(project: &str) -> String {
    project.replace('/', "%2F")
}

fn pipeline_variables(run: &PipelineRun) -> Result<Vec<Variable>, ProviderError> {
    let config = &run.config_snapshot;
    let plan = serde_json::to_string(&config.stages)
        .map_err(|e| ProviderError::Terminal(format!("failed to encode stage plan: {e}")))?;

    let mut variables: Vec<Variable> = config
        .environment
        .iter()
        .map(|(key, value)| Variable::new(key, value))
        .collect();

    variables.push(Variable::new("CONDUIT_RUN_ID", run.id.to_string()));
    variables.push(Variable::new("CONDUIT_WORKSPACE_ID", &run.workspace_id));
    variables.push(Variable::new("CONDUIT_PIPELINE_NAME", &config.name));
    variables.push(Variable::new("CONDUIT_PIPELINE_PLAN", plan));
    if let Some(sha) = &config.source.commit_sha {
        variables.push(Variable::new("CONDUIT_COMMIT_SHA", sha));
    }
    if let Some(timeout) = config.timeout_seconds {
        variables.push(Variable::new("CONDUIT_TIMEOUT_SECONDS", timeout.to_string()));
    }

    Ok(variables)
}

fn map_pipeline_status(status: &str) -> RunStatus {
    match status {
        "running" => RunStatus::Running,
        "success" => RunStatus::Succeeded,
        "failed" => RunStatus::Failed,
        "canceled" | "canceling" | "skipped" => RunStatus::Canceled,
        // created, waiting_for_resource, preparing, pending, scheduled, manual
        _ => RunStatus::Queued,
    }
}

fn map_job_status(status: &str) -> TaskStatus {
    match status {
        "running" => TaskStatus::Running,
        "success" => TaskStatus::Succeeded,
        "failed" => TaskStatus::Failed,
        "canceled" | "canceling" => TaskStatus::Canceled,
        "skipped" => TaskStatus::Skipped,
        _ => TaskStatus::Pending,
    }
}

/// Groups jobs into stages, keeping the order stages first appear in
fn build_stages(jobs: &[GlJob]) -> Vec<Stage> {
    let mut stages: Vec<Stage> = Vec::new();
    for job in jobs {
        match stages.iter_mut().find(|s| s.name == job.stage) {
            Some(stage) => stage.tasks.push(job.to_task()),
            None => stages.push(Stage {
                name: job.stage.clone(),
                tasks: vec![job.to_task()],
            }),
        }
    }
    stages
}

fn failure_summary(jobs: &[GlJob]) -> String {
    let failed: Vec<String> = jobs
        .iter()
        .filter(|job| job.status == "failed")
        .map(|job| match &job.failure_reason {
            Some(reason) => format!("job '{}' failed: {}", job.name, reason),
            None => format!("job '{}' failed", job.name),
        })
        .collect();

    if failed.is_empty() {
        "pipeline failed".to_string()
    } else {
        failed.join("; ")
    }
}

/// Raw trace lines; the trailing partial line is kept only once the job is done
fn trace_lines(raw: &str, include_partial: bool) -> Vec<&str> {
    let mut lines: Vec<&str> = raw.split('\n').collect();
    if let Some(last) = lines.last() {
        if last.is_empty() || !include_partial {
            lines.pop();
        }
    }
    lines
}

/// Strips carriage-return overwrites, section markers and ANSI colors
fn clean_line(raw: &str) -> Option<String> {
    let visible = raw.rsplit('\r').next().unwrap_or(raw);
    let text = ANSI_ESCAPE.replace_all(visible, "");
    let text = text.trim_end();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn request_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() {
        ProviderError::Transient(format!("GitLab request failed: {err}"))
    } else {
        ProviderError::Terminal(format!("GitLab request failed: {err}"))
    }
}

fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let message = format!("GitLab returned {}: {}", status, body.trim());
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        ProviderError::Transient(message)
    } else {
        ProviderError::Terminal(message)
    }
}

async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::Terminal(format!("failed to decode GitLab response: {e}")))
}
