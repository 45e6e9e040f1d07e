//! Pipeline Service
//!
//! The facade every caller goes through. Validates requests, picks the
//! workspace's provider adapter, drives runs through the state machine and
//! publishes lifecycle events. Runs belonging to another workspace are
//! reported as not found.
//!
//! Locking:
//! - a per-run mutex serializes every status change of one run
//! - a per-workspace read/write guard orders credential deletion (write)
//!   against run creation (read), so a credential cannot disappear between
//!   the existence check and the run being persisted

use chrono::Utc;
use conduit_core::domain::config::PipelineConfig;
use conduit_core::domain::credential::CredentialInfo;
use conduit_core::domain::event::{LifecycleEvent, LifecycleEventKind};
use conduit_core::domain::log::LogEntry;
use conduit_core::domain::provider::{ProviderConfig, ProviderInfo};
use conduit_core::domain::run::{PipelineRun, RunStatus};
use conduit_core::domain::template::{ParamValue, PipelineTemplate};
use conduit_core::dto::credential::CreateCredential;
use conduit_core::dto::pipeline::{LogPage, LogQuery};
use conduit_core::dto::template::CreateTemplate;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::credential::CredentialVault;
use super::events::EventSink;
use super::lifecycle::{self, RunEvent, Transition};
use super::locks::LockTable;
use super::log_stream::{LogMultiplexer, LogStreamConfig, LogSubscription, StreamEnd};
use super::template::{self, TemplateCatalog};
use crate::error::{ServiceError, ServiceResult};
use crate::provider::{ProviderAdapter, ProviderConnection, ProviderRegistry, RetryPolicy};
use crate::repository::{LogRepository, ProviderConfigRepository, Repositories, RunRepository};

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub retry: RetryPolicy,
    /// Upper bound on each individual provider call
    pub provider_timeout: Duration,
    /// Resubmissions allowed after transient failures before a run is failed
    pub max_requeues: u32,
    pub default_list_limit: usize,
    pub max_list_limit: usize,
    pub default_log_page: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            provider_timeout: Duration::from_secs(30),
            max_requeues: 3,
            default_list_limit: 50,
            max_list_limit: 500,
            default_log_page: 500,
        }
    }
}

type AdapterCache = RwLock<HashMap<String, (ProviderConfig, Arc<dyn ProviderAdapter>)>>;

pub struct PipelineService {
    runs: Arc<dyn RunRepository>,
    logs: Arc<dyn LogRepository>,
    provider_configs: Arc<dyn ProviderConfigRepository>,
    registry: ProviderRegistry,
    vault: CredentialVault,
    catalog: TemplateCatalog,
    multiplexer: LogMultiplexer,
    events: Arc<dyn EventSink>,
    settings: ServiceSettings,
    adapters: AdapterCache,
    run_locks: LockTable<Uuid, Mutex<()>>,
    workspace_guards: LockTable<String, RwLock<()>>,
}

impl PipelineService {
    pub fn new(
        repos: Repositories,
        registry: ProviderRegistry,
        events: Arc<dyn EventSink>,
        settings: ServiceSettings,
        log_config: LogStreamConfig,
    ) -> Arc<Self> {
        let multiplexer = LogMultiplexer::new(log_config, settings.retry.clone(), repos.logs.clone());
        Arc::new(Self {
            runs: repos.runs,
            logs: repos.logs,
            provider_configs: repos.provider_configs,
            registry,
            vault: CredentialVault::new(repos.credentials, repos.secrets),
            catalog: TemplateCatalog::new(repos.templates),
            multiplexer,
            events,
            settings,
            adapters: RwLock::new(HashMap::new()),
            run_locks: LockTable::default(),
            workspace_guards: LockTable::default(),
        })
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Validates, submits and persists a new run in `Pending`
    ///
    /// Nothing is persisted when submission fails.
    pub async fn create_pipeline(
        &self,
        workspace_id: &str,
        config: PipelineConfig,
    ) -> ServiceResult<PipelineRun> {
        let workspace_guard = self.workspace_guards.get(&workspace_id.to_string());
        let _shared = workspace_guard.read().await;

        let violations = self.validate_config(workspace_id, &config).await?;
        if !violations.is_empty() {
            return Err(ServiceError::Validation(violations));
        }

        let (provider, adapter) = self.adapter_for(workspace_id).await?;
        let run = PipelineRun::new(workspace_id, provider.provider, config, "");
        self.submit_and_persist(run, adapter).await
    }

    pub async fn get_pipeline(&self, workspace_id: &str, id: Uuid) -> ServiceResult<PipelineRun> {
        self.find_run(Some(workspace_id), id).await
    }

    /// Runs of the workspace, newest first
    pub async fn list_pipelines(
        &self,
        workspace_id: &str,
        project_id: Option<&str>,
        limit: Option<usize>,
    ) -> ServiceResult<Vec<PipelineRun>> {
        let limit = limit
            .unwrap_or(self.settings.default_list_limit)
            .clamp(1, self.settings.max_list_limit);
        Ok(self.runs.list(workspace_id, project_id, limit).await?)
    }

    /// Cancels a live run; cancelling a canceled run is a no-op
    pub async fn cancel_pipeline(&self, workspace_id: &str, id: Uuid) -> ServiceResult<PipelineRun> {
        let (guard, mut run) = self.lock_run(Some(workspace_id), id).await?;

        match run.status {
            RunStatus::Canceled => return Ok(run),
            RunStatus::Succeeded | RunStatus::Failed => {
                return Err(ServiceError::Conflict(format!(
                    "run {} is already {}",
                    id, run.status
                )));
            }
            _ => {}
        }

        let adapter = self.adapter_for_run(&run).await?;
        let handle = run.external_handle.clone();
        let acknowledged = self
            .settings
            .retry
            .run("cancel", || adapter.cancel(&handle))
            .await;
        match acknowledged {
            Ok(()) => {}
            // The handle of a retrying run is already abandoned
            Err(e) if run.status == RunStatus::Retrying => {
                warn!("Cancel of stale handle {} for run {} failed: {}", handle, id, e);
            }
            Err(e) => return Err(e.into()),
        }

        self.transition(&mut run, RunEvent::CancelAcknowledged).await?;
        drop(guard);
        self.run_locks.release(&id);
        Ok(run)
    }

    /// Deletes a finished run together with its stored log history
    pub async fn delete_pipeline(&self, workspace_id: &str, id: Uuid) -> ServiceResult<()> {
        let (guard, run) = self.lock_run(Some(workspace_id), id).await?;
        if !run.is_terminal() {
            return Err(ServiceError::Conflict(format!(
                "run {} is still {}",
                id, run.status
            )));
        }

        let purged = self.logs.delete_by_run(id).await?;
        if !self.runs.delete(id).await? {
            return Err(ServiceError::not_found(format!("pipeline run {id}")));
        }
        drop(guard);
        self.run_locks.remove(&id);

        info!("Pipeline run deleted: {} ({} log entries)", id, purged);
        Ok(())
    }

    /// New `Pending` run from a failed or canceled one; the original is untouched
    pub async fn retry_pipeline(&self, workspace_id: &str, id: Uuid) -> ServiceResult<PipelineRun> {
        let original = self.find_run(Some(workspace_id), id).await?;
        let run = lifecycle::retry_from(&original)?;

        let workspace_guard = self.workspace_guards.get(&workspace_id.to_string());
        let _shared = workspace_guard.read().await;

        let violations = self
            .check_credentials(workspace_id, &run.config_snapshot)
            .await?;
        if !violations.is_empty() {
            return Err(ServiceError::Validation(violations));
        }

        let adapter = self.adapter_for_run(&original).await?;
        self.submit_and_persist(run, adapter).await
    }

    /// Queries the backend once and applies what it reports
    pub async fn sync_pipeline(&self, id: Uuid) -> ServiceResult<PipelineRun> {
        self.sync(None, id).await
    }

    /// Workspace-scoped `sync_pipeline`
    pub async fn sync_pipeline_for(&self, workspace_id: &str, id: Uuid) -> ServiceResult<PipelineRun> {
        self.sync(Some(workspace_id), id).await
    }

    /// Every non-terminal run, oldest first
    pub async fn active_runs(&self) -> ServiceResult<Vec<PipelineRun>> {
        Ok(self.runs.list_active().await?)
    }

    // =========================================================================
    // Logs
    // =========================================================================

    /// One page of historical log output, filtered by stage/task when set
    pub async fn get_pipeline_logs(
        &self,
        workspace_id: &str,
        id: Uuid,
        query: LogQuery,
    ) -> ServiceResult<LogPage> {
        let run = self.find_run(Some(workspace_id), id).await?;
        let entries = self.read_logs(&run, &query.stage, &query.task).await?;

        let limit = query.limit.unwrap_or(self.settings.default_log_page).max(1);
        let total = entries.len();
        let entries: Vec<LogEntry> = entries.into_iter().skip(query.offset).take(limit).collect();
        let end = query.offset.saturating_add(entries.len());

        Ok(LogPage {
            entries,
            next_offset: (end < total).then_some(end),
        })
    }

    /// Live log stream; a finished run replays its history and ends
    pub async fn stream_pipeline_logs(
        &self,
        workspace_id: &str,
        id: Uuid,
        stage: &str,
        task: &str,
    ) -> ServiceResult<LogSubscription> {
        let run = self.find_run(Some(workspace_id), id).await?;
        if let Some(subscription) = self.multiplexer.attach(id, stage, task) {
            return Ok(subscription);
        }

        if run.is_terminal() {
            let history = self.read_logs(&run, stage, task).await?;
            return Ok(LogSubscription::replay(history, StreamEnd::RunFinished));
        }

        let adapter = self.adapter_for_run(&run).await?;
        let subscription = self.multiplexer.subscribe(&run, adapter, stage, task);

        // A transition between the read above and the subscribe would have
        // found no stream to finish
        if self.find_run(None, id).await?.is_terminal() {
            self.multiplexer.run_finished(id);
        }
        Ok(subscription)
    }

    // =========================================================================
    // Templates
    // =========================================================================

    pub async fn list_templates(&self, provider: Option<&str>) -> ServiceResult<Vec<PipelineTemplate>> {
        self.catalog.list(provider).await
    }

    pub async fn get_template(&self, id: Uuid) -> ServiceResult<PipelineTemplate> {
        self.catalog.get(id).await
    }

    pub async fn create_template(&self, req: CreateTemplate) -> ServiceResult<PipelineTemplate> {
        self.catalog.create(req).await
    }

    pub async fn delete_template(&self, id: Uuid) -> ServiceResult<()> {
        self.catalog.delete(id).await
    }

    /// Resolves a template and creates a run from it; nothing is submitted
    /// when resolution fails
    pub async fn create_pipeline_from_template(
        &self,
        workspace_id: &str,
        template_id: Uuid,
        params: &BTreeMap<String, ParamValue>,
    ) -> ServiceResult<PipelineRun> {
        let template = self.catalog.get(template_id).await?;
        let config = template::resolve(&template, params)?;

        match self.provider_configs.get(workspace_id).await? {
            Some(active) if active.provider != template.provider => {
                return Err(ServiceError::validation(format!(
                    "Template '{}' targets provider '{}' but the workspace uses '{}'",
                    template.name, template.provider, active.provider
                )));
            }
            _ => {}
        }

        self.create_pipeline(workspace_id, config).await
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    pub async fn create_credential(
        &self,
        workspace_id: &str,
        req: CreateCredential,
    ) -> ServiceResult<CredentialInfo> {
        self.vault.create(workspace_id, req).await
    }

    pub async fn list_credentials(&self, workspace_id: &str) -> ServiceResult<Vec<CredentialInfo>> {
        self.vault.list(workspace_id).await
    }

    /// Deletes a credential no live run or provider config depends on
    pub async fn delete_credential(&self, workspace_id: &str, name: &str) -> ServiceResult<()> {
        let workspace_guard = self.workspace_guards.get(&workspace_id.to_string());
        let _exclusive = workspace_guard.write().await;

        if !self.vault.exists(workspace_id, name).await? {
            return Err(ServiceError::not_found(format!("credential '{name}'")));
        }

        let holders: Vec<String> = self
            .runs
            .list_active_in_workspace(workspace_id)
            .await?
            .into_iter()
            .filter(|run| run.config_snapshot.references_credential(name))
            .map(|run| run.id.to_string())
            .collect();
        if !holders.is_empty() {
            return Err(ServiceError::Conflict(format!(
                "credential '{}' is referenced by active runs: {}",
                name,
                holders.join(", ")
            )));
        }

        if let Some(config) = self.provider_configs.get(workspace_id).await? {
            if config.token_credential.as_deref() == Some(name) {
                return Err(ServiceError::Conflict(format!(
                    "credential '{name}' authenticates the workspace provider"
                )));
            }
        }

        self.vault.delete(workspace_id, name).await
    }

    // =========================================================================
    // Providers
    // =========================================================================

    pub fn list_providers(&self) -> Vec<ProviderInfo> {
        self.registry.list()
    }

    pub async fn get_provider_config(&self, workspace_id: &str) -> ServiceResult<ProviderConfig> {
        self.provider_configs
            .get(workspace_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("provider config for workspace {workspace_id}")))
    }

    /// Connects and checks the backend before committing the new config
    pub async fn set_provider_config(
        &self,
        workspace_id: &str,
        config: ProviderConfig,
    ) -> ServiceResult<ProviderConfig> {
        let workspace_guard = self.workspace_guards.get(&workspace_id.to_string());
        let _exclusive = workspace_guard.write().await;

        let mut violations = Vec::new();
        if self.registry.get(&config.provider).is_none() {
            violations.push(format!("Provider '{}' is not registered", config.provider));
        }
        if !(config.endpoint.starts_with("http://") || config.endpoint.starts_with("https://")) {
            violations.push(format!(
                "Provider endpoint '{}' must be an http(s) URL",
                config.endpoint
            ));
        }
        if let Some(name) = &config.token_credential {
            if !self.vault.exists(workspace_id, name).await? {
                violations.push(format!("Credential '{name}' does not exist"));
            }
        }
        if !violations.is_empty() {
            return Err(ServiceError::Validation(violations));
        }

        // Live runs can only be driven by the provider they were submitted to
        let switching = self
            .provider_configs
            .get(workspace_id)
            .await?
            .is_some_and(|current| current.provider != config.provider);
        if switching {
            let live: Vec<String> = self
                .runs
                .list_active_in_workspace(workspace_id)
                .await?
                .into_iter()
                .map(|run| run.id.to_string())
                .collect();
            if !live.is_empty() {
                return Err(ServiceError::Conflict(format!(
                    "cannot switch workspace {} to '{}' while runs are active: {}",
                    workspace_id,
                    config.provider,
                    live.join(", ")
                )));
            }
        }

        let adapter = self.connect(workspace_id, &config).await?;
        self.settings
            .retry
            .run("connectivity check", || adapter.check_connectivity())
            .await?;

        self.provider_configs.set(workspace_id, &config).await?;
        self.adapters
            .write()
            .await
            .insert(workspace_id.to_string(), (config.clone(), adapter));

        info!(
            "Provider config set for workspace {}: {} at {}",
            workspace_id, config.provider, config.endpoint
        );
        Ok(config)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn find_run(&self, workspace_id: Option<&str>, id: Uuid) -> ServiceResult<PipelineRun> {
        self.runs
            .find_by_id(id)
            .await?
            .filter(|run| workspace_id.is_none_or(|ws| run.workspace_id == ws))
            .ok_or_else(|| ServiceError::not_found(format!("pipeline run {id}")))
    }

    /// Takes the run's lock, then reads the run fresh
    async fn lock_run(
        &self,
        workspace_id: Option<&str>,
        id: Uuid,
    ) -> ServiceResult<(OwnedMutexGuard<()>, PipelineRun)> {
        self.find_run(workspace_id, id).await?;
        let guard = self.run_locks.get(&id).lock_owned().await;
        let run = self.find_run(workspace_id, id).await?;
        Ok((guard, run))
    }

    /// The single place a run's status changes: state machine, store, events
    async fn transition(&self, run: &mut PipelineRun, event: RunEvent) -> ServiceResult<Transition> {
        let transition = lifecycle::apply(run, event, Utc::now())?;
        if !self.runs.update(run).await? {
            return Err(ServiceError::not_found(format!("pipeline run {}", run.id)));
        }

        info!(
            "Pipeline run {} {} -> {}",
            run.id, transition.from, transition.to
        );
        self.publish(
            run,
            LifecycleEventKind::Transitioned {
                from: transition.from,
                to: transition.to,
            },
        );
        if transition.to.is_terminal() {
            self.publish(
                run,
                LifecycleEventKind::Completed {
                    status: transition.to,
                },
            );
            self.multiplexer.run_finished(run.id);
        }
        Ok(transition)
    }

    fn publish(&self, run: &PipelineRun, kind: LifecycleEventKind) {
        self.events.publish(LifecycleEvent {
            run_id: run.id,
            workspace_id: run.workspace_id.clone(),
            kind,
            at: Utc::now(),
        });
    }

    async fn submit_and_persist(
        &self,
        mut run: PipelineRun,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> ServiceResult<PipelineRun> {
        let pending = &run;
        let handle = self
            .settings
            .retry
            .run("submit", || adapter.submit(pending))
            .await?;
        run.external_handle = handle;

        if let Err(e) = self.runs.insert(&run).await {
            if let Err(cancel_err) = adapter.cancel(&run.external_handle).await {
                warn!(
                    "Orphaned backend pipeline {} for unsaved run {}: {}",
                    run.external_handle, run.id, cancel_err
                );
            }
            return Err(e.into());
        }

        for name in run.config_snapshot.credential_refs() {
            self.vault.touch(&run.workspace_id, name).await;
        }

        self.publish(
            &run,
            LifecycleEventKind::Created {
                retry_of: run.retry_of,
            },
        );
        info!(
            "Pipeline run created: {} ({}) on {} as {}",
            run.id, run.config_snapshot.name, run.provider, run.external_handle
        );
        Ok(run)
    }

    async fn sync(&self, workspace_id: Option<&str>, id: Uuid) -> ServiceResult<PipelineRun> {
        let (guard, mut run) = self.lock_run(workspace_id, id).await?;
        let synced = self.sync_locked(&mut run).await;
        drop(guard);

        if run.is_terminal() {
            self.run_locks.release(&id);
        }
        synced.map(|()| run)
    }

    /// Applies one status observation; the caller holds the run's lock
    async fn sync_locked(&self, run: &mut PipelineRun) -> ServiceResult<()> {
        if run.is_terminal() {
            return Ok(());
        }
        let id = run.id;

        let adapter = self.adapter_for_run(run).await?;
        if run.status == RunStatus::Retrying {
            return self.requeue(run, adapter.as_ref()).await;
        }

        let handle = run.external_handle.clone();
        let observed = self
            .settings
            .retry
            .run("query status", || adapter.query_status(&handle))
            .await;

        match observed {
            Ok(report) => {
                let stages_changed = lifecycle::merge_stages(run, &report.stages);
                let events =
                    lifecycle::reconcile(run.status, report.status, report.message.as_deref());
                if events.is_empty() {
                    if stages_changed {
                        self.runs.update(run).await?;
                    }
                } else {
                    for event in events {
                        self.transition(run, event).await?;
                    }
                }
            }
            Err(e) if e.is_transient() && run.status == RunStatus::Running => {
                self.transition(
                    run,
                    RunEvent::TransientError {
                        reason: e.to_string(),
                    },
                )
                .await?;
                self.requeue(run, adapter.as_ref()).await?;
            }
            Err(e) if e.is_transient() => {
                warn!("Status query for run {} failed, will retry: {}", id, e);
            }
            // The backend lost the run; it never reached Running if it was not there yet
            Err(e) => {
                self.transition(
                    run,
                    RunEvent::Failed {
                        reason: e.to_string(),
                    },
                )
                .await?;
            }
        }

        Ok(())
    }

    /// Resubmits a `Retrying` run under a new handle, or gives up on it
    async fn requeue(&self, run: &mut PipelineRun, adapter: &dyn ProviderAdapter) -> ServiceResult<()> {
        if run.requeue_count >= self.settings.max_requeues {
            let reason = format!("gave up after {} requeues", run.requeue_count);
            self.transition(run, RunEvent::Failed { reason }).await?;
            return Ok(());
        }

        if let Err(e) = adapter.cancel(&run.external_handle).await {
            debug!(
                "Abandoning handle {} of run {} without cancel: {}",
                run.external_handle, run.id, e
            );
        }

        let snapshot: &PipelineRun = run;
        let resubmitted = self
            .settings
            .retry
            .run("resubmit", || adapter.submit(snapshot))
            .await;

        match resubmitted {
            Ok(handle) => {
                self.transition(run, RunEvent::Requeued { handle }).await?;
                self.publish(
                    run,
                    LifecycleEventKind::Requeued {
                        handle: run.external_handle.clone(),
                        attempt: run.requeue_count,
                    },
                );
                info!(
                    "Pipeline run {} requeued as {} (attempt {})",
                    run.id, run.external_handle, run.requeue_count
                );
            }
            Err(e) if e.is_transient() => {
                warn!("Requeue of run {} failed, will retry: {}", run.id, e);
            }
            Err(e) => {
                self.transition(
                    run,
                    RunEvent::Failed {
                        reason: e.to_string(),
                    },
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Provider output when reachable, stored history otherwise
    async fn read_logs(&self, run: &PipelineRun, stage: &str, task: &str) -> ServiceResult<Vec<LogEntry>> {
        match self.adapter_for_run(run).await {
            Ok(adapter) => {
                let fetched = self
                    .settings
                    .retry
                    .run("fetch logs", || {
                        adapter.fetch_logs(&run.external_handle, stage, task)
                    })
                    .await;
                match fetched {
                    Ok(entries) => return Ok(entries),
                    Err(e) => warn!(
                        "Fetching logs of run {} from provider failed, using history: {}",
                        run.id, e
                    ),
                }
            }
            Err(e) => debug!("No adapter for run {}, using history: {}", run.id, e),
        }
        Ok(self.logs.find(run.id, stage, task).await?)
    }

    async fn validate_config(
        &self,
        workspace_id: &str,
        config: &PipelineConfig,
    ) -> ServiceResult<Vec<String>> {
        let mut violations = Vec::new();

        if config.name.trim().is_empty() {
            violations.push("Pipeline name cannot be empty".to_string());
        } else if config.name.len() > 255 {
            violations.push("Pipeline name is too long (max 255 characters)".to_string());
        }
        if config.project_id.trim().is_empty() {
            violations.push("Project id cannot be empty".to_string());
        }
        if config.source.repository.trim().is_empty() {
            violations.push("Source repository cannot be empty".to_string());
        }
        if config.source.revision.trim().is_empty() {
            violations.push("Source revision cannot be empty".to_string());
        }

        if config.stages.is_empty() {
            violations.push("Pipeline must define at least one stage".to_string());
        }
        let mut stage_names = HashSet::new();
        for stage in &config.stages {
            if stage.name.trim().is_empty() {
                violations.push("Stage name cannot be empty".to_string());
            } else if !stage_names.insert(stage.name.as_str()) {
                violations.push(format!("Stage '{}' is defined more than once", stage.name));
            }
            if stage.tasks.is_empty() {
                violations.push(format!("Stage '{}' must define at least one task", stage.name));
            }
            let mut task_names = HashSet::new();
            for task in &stage.tasks {
                if task.name.trim().is_empty() {
                    violations.push(format!("Task name in stage '{}' cannot be empty", stage.name));
                } else if !task_names.insert(task.name.as_str()) {
                    violations.push(format!(
                        "Task '{}' is defined more than once in stage '{}'",
                        task.name, stage.name
                    ));
                }
            }
        }

        violations.extend(self.check_credentials(workspace_id, config).await?);

        match self.provider_configs.get(workspace_id).await? {
            None => violations.push(format!("Workspace '{workspace_id}' has no provider configured")),
            Some(active) if self.registry.get(&active.provider).is_none() => {
                violations.push(format!("Provider '{}' is not registered", active.provider));
            }
            Some(_) => {}
        }

        Ok(violations)
    }

    async fn check_credentials(
        &self,
        workspace_id: &str,
        config: &PipelineConfig,
    ) -> ServiceResult<Vec<String>> {
        let mut violations = Vec::new();
        let mut seen = HashSet::new();
        for name in config.credential_refs() {
            if seen.insert(name) && !self.vault.exists(workspace_id, name).await? {
                violations.push(format!("Credential '{name}' does not exist"));
            }
        }
        Ok(violations)
    }

    /// The workspace's connected adapter, reconnecting when its config changed
    async fn adapter_for(
        &self,
        workspace_id: &str,
    ) -> ServiceResult<(ProviderConfig, Arc<dyn ProviderAdapter>)> {
        let config = self.provider_configs.get(workspace_id).await?.ok_or_else(|| {
            ServiceError::validation(format!("Workspace '{workspace_id}' has no provider configured"))
        })?;

        if let Some((cached, adapter)) = self.adapters.read().await.get(workspace_id) {
            if *cached == config {
                return Ok((config, adapter.clone()));
            }
        }

        let adapter = self.connect(workspace_id, &config).await?;
        self.adapters
            .write()
            .await
            .insert(workspace_id.to_string(), (config.clone(), adapter.clone()));
        Ok((config, adapter))
    }

    /// Adapter for an existing run, which must still be on its original provider
    async fn adapter_for_run(&self, run: &PipelineRun) -> ServiceResult<Arc<dyn ProviderAdapter>> {
        let (config, adapter) = self.adapter_for(&run.workspace_id).await?;
        if config.provider != run.provider {
            return Err(ServiceError::Conflict(format!(
                "run {} was submitted to '{}' but the workspace now uses '{}'",
                run.id, run.provider, config.provider
            )));
        }
        Ok(adapter)
    }

    async fn connect(
        &self,
        workspace_id: &str,
        config: &ProviderConfig,
    ) -> ServiceResult<Arc<dyn ProviderAdapter>> {
        let factory = self.registry.get(&config.provider).ok_or_else(|| {
            ServiceError::validation(format!("Provider '{}' is not registered", config.provider))
        })?;

        let token = match &config.token_credential {
            Some(name) => self
                .vault
                .read(workspace_id, name)
                .await?
                .api_token()
                .map(str::to_string),
            None => None,
        };

        debug!("Connecting {} for workspace {}", config.provider, workspace_id);
        Ok(factory.connect(ProviderConnection {
            config: config.clone(),
            token,
            request_timeout: self.settings.provider_timeout,
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::fake::{FakeProvider, FakeProviderFactory};
    use crate::provider::ProviderError;
    use crate::service::events::ChannelEventSink;
    use crate::service::log_stream::LogEvent;
    use conduit_core::domain::config::{SourceRef, StageDefinition, TaskDefinition};
    use conduit_core::domain::credential::{CredentialSecret, GitCredential, RegistryCredential};
    use conduit_core::domain::provider::ResourceLimits;
    use conduit_core::domain::template::{ParamType, ParameterDefinition};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WS: &str = "ws-1";

    struct Harness {
        service: Arc<PipelineService>,
        provider: Arc<FakeProvider>,
        factory: Arc<FakeProviderFactory>,
        events: mpsc::Receiver<LifecycleEvent>,
    }

    fn fake_provider_config() -> ProviderConfig {
        ProviderConfig {
            provider: "fake".to_string(),
            endpoint: "https://ci.example.com".to_string(),
            namespace: Some("group/app".to_string()),
            token_credential: Some("ci-token".to_string()),
            default_limits: ResourceLimits::default(),
            settings: BTreeMap::new(),
        }
    }

    async fn harness() -> Harness {
        let provider = FakeProvider::new();
        let factory = FakeProviderFactory::new(provider.clone());
        let registry = ProviderRegistry::new()
            .with_factory(factory.clone())
            .with_factory(FakeProviderFactory::named("other", provider.clone()));
        let (sink, events) = ChannelEventSink::new(256);

        let settings = ServiceSettings {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            max_requeues: 2,
            ..ServiceSettings::default()
        };
        let log_config = LogStreamConfig {
            buffer_capacity: 100,
            flush_batch: 10,
            inactivity_timeout: Duration::from_secs(5),
            drain_grace: Duration::from_millis(50),
        };

        let service = PipelineService::new(
            Repositories::in_memory(),
            registry,
            Arc::new(sink),
            settings,
            log_config,
        );

        service
            .create_credential(WS, git_token("ci-token"))
            .await
            .unwrap();
        service
            .create_credential(WS, git_token("deploy-key"))
            .await
            .unwrap();
        service
            .set_provider_config(WS, fake_provider_config())
            .await
            .unwrap();

        Harness {
            service,
            provider,
            factory,
            events,
        }
    }

    fn git_token(name: &str) -> CreateCredential {
        CreateCredential {
            name: name.to_string(),
            description: None,
            secret: CredentialSecret::Git(GitCredential::Token {
                username: "ci".to_string(),
                token: format!("{name}-secret"),
            }),
        }
    }

    fn task(name: &str) -> TaskDefinition {
        TaskDefinition {
            name: name.to_string(),
            image: Some("rust:1".to_string()),
            commands: vec![format!("make {name}")],
            timeout_seconds: None,
        }
    }

    fn two_stage_config() -> PipelineConfig {
        PipelineConfig {
            name: "build-and-test".to_string(),
            project_id: "proj-1".to_string(),
            source: SourceRef {
                repository: "https://git.example.com/app.git".to_string(),
                revision: "main".to_string(),
                commit_sha: None,
                credential: Some("deploy-key".to_string()),
            },
            stages: vec![
                StageDefinition {
                    name: "build".to_string(),
                    tasks: vec![task("compile")],
                },
                StageDefinition {
                    name: "test".to_string(),
                    tasks: vec![task("unit"), task("lint")],
                },
            ],
            environment: BTreeMap::new(),
            credentials: vec![],
            timeout_seconds: None,
        }
    }

    async fn set_and_sync(h: &Harness, run: &PipelineRun, status: RunStatus) -> PipelineRun {
        h.provider.set_status(&run.external_handle, status);
        h.service.sync_pipeline(run.id).await.unwrap()
    }

    fn drain(events: &mut mpsc::Receiver<LifecycleEvent>) -> Vec<LifecycleEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    async fn wait_for_tail(provider: &FakeProvider) {
        timeout(Duration::from_secs(2), async {
            while provider.tails_opened() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("upstream tail was never opened");
    }

    #[tokio::test]
    async fn test_two_stage_run_reaches_succeeded() {
        let mut h = harness().await;

        let run = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.stages.len(), 2);
        assert_eq!(run.stages[1].tasks.len(), 2);
        assert_eq!(run.external_handle, "fake-1");
        assert_eq!(run.provider, "fake");

        let run = h.service.sync_pipeline(run.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Queued);

        let run = set_and_sync(&h, &run, RunStatus::Running).await;
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.started_at.is_some());
        assert!(run.finished_at.is_none());

        let run = set_and_sync(&h, &run, RunStatus::Succeeded).await;
        assert_eq!(run.status, RunStatus::Succeeded);
        let finished_at = run.finished_at;
        assert!(finished_at.is_some());

        let again = h.service.sync_pipeline(run.id).await.unwrap();
        assert_eq!(again.finished_at, finished_at);
        let read = h.service.get_pipeline(WS, run.id).await.unwrap();
        assert_eq!(read.finished_at, finished_at);
        assert_eq!(read.status, RunStatus::Succeeded);

        assert_eq!(
            drain(&mut h.events),
            vec![
                LifecycleEventKind::Created { retry_of: None },
                LifecycleEventKind::Transitioned {
                    from: RunStatus::Pending,
                    to: RunStatus::Queued
                },
                LifecycleEventKind::Transitioned {
                    from: RunStatus::Queued,
                    to: RunStatus::Running
                },
                LifecycleEventKind::Transitioned {
                    from: RunStatus::Running,
                    to: RunStatus::Succeeded
                },
                LifecycleEventKind::Completed {
                    status: RunStatus::Succeeded
                },
            ]
        );

        // Connected once by set_provider_config, then served from the cache
        assert_eq!(h.factory.connections(), 1);
    }

    #[tokio::test]
    async fn test_skipped_states_are_walked_edge_by_edge() {
        let mut h = harness().await;
        let run = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();
        drain(&mut h.events);

        let run = set_and_sync(&h, &run, RunStatus::Succeeded).await;
        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(run.started_at.is_some());

        let transitions: Vec<_> = drain(&mut h.events)
            .into_iter()
            .filter_map(|kind| match kind {
                LifecycleEventKind::Transitioned { from, to } => Some((from, to)),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                (RunStatus::Pending, RunStatus::Queued),
                (RunStatus::Queued, RunStatus::Running),
                (RunStatus::Running, RunStatus::Succeeded),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_running_then_cancel_again() {
        let h = harness().await;
        let run = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();
        let run = set_and_sync(&h, &run, RunStatus::Running).await;

        let canceled = h.service.cancel_pipeline(WS, run.id).await.unwrap();
        assert_eq!(canceled.status, RunStatus::Canceled);
        assert!(canceled.finished_at.is_some());
        assert_eq!(h.provider.cancellations(), 1);

        let again = h.service.cancel_pipeline(WS, run.id).await.unwrap();
        assert_eq!(again.status, RunStatus::Canceled);
        assert_eq!(again.finished_at, canceled.finished_at);
        assert_eq!(h.provider.cancellations(), 1);
    }

    #[tokio::test]
    async fn test_cancel_pending_run() {
        let h = harness().await;
        let run = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();

        let canceled = h.service.cancel_pipeline(WS, run.id).await.unwrap();
        assert_eq!(canceled.status, RunStatus::Canceled);
        assert!(canceled.started_at.is_none());
    }

    #[tokio::test]
    async fn test_cancel_finished_run_conflicts() {
        let h = harness().await;
        let run = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();
        let run = set_and_sync(&h, &run, RunStatus::Succeeded).await;

        assert!(matches!(
            h.service.cancel_pipeline(WS, run.id).await,
            Err(ServiceError::Conflict(_))
        ));
        assert_eq!(h.provider.cancellations(), 0);

        let unchanged = h.service.get_pipeline(WS, run.id).await.unwrap();
        assert_eq!(unchanged, run);
    }

    #[tokio::test]
    async fn test_retry_failed_run_keeps_lineage() {
        let h = harness().await;
        let run = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();
        h.provider.set_failure_message(&run.external_handle, "unit tests failed");
        let failed = set_and_sync(&h, &run, RunStatus::Failed).await;
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.status_message.as_deref(), Some("unit tests failed"));

        let retried = h.service.retry_pipeline(WS, failed.id).await.unwrap();
        assert_ne!(retried.id, failed.id);
        assert_eq!(retried.status, RunStatus::Pending);
        assert_eq!(retried.retry_of, Some(failed.id));
        assert_eq!(retried.config_snapshot, failed.config_snapshot);
        assert_eq!(retried.external_handle, "fake-2");

        let original = h.service.get_pipeline(WS, failed.id).await.unwrap();
        assert_eq!(original, failed);
    }

    #[tokio::test]
    async fn test_retry_requires_failed_or_canceled() {
        let h = harness().await;
        let run = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();

        assert!(matches!(
            h.service.retry_pipeline(WS, run.id).await,
            Err(ServiceError::Conflict(_))
        ));
        let run = set_and_sync(&h, &run, RunStatus::Succeeded).await;
        assert!(matches!(
            h.service.retry_pipeline(WS, run.id).await,
            Err(ServiceError::Conflict(_))
        ));
        assert_eq!(h.provider.submissions(), 1);
    }

    #[tokio::test]
    async fn test_delete_requires_terminal_run() {
        let h = harness().await;
        let run = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();

        assert!(matches!(
            h.service.delete_pipeline(WS, run.id).await,
            Err(ServiceError::Conflict(_))
        ));

        h.service.cancel_pipeline(WS, run.id).await.unwrap();
        h.service.delete_pipeline(WS, run.id).await.unwrap();
        assert!(matches!(
            h.service.get_pipeline(WS, run.id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_credential_delete_guard() {
        let h = harness().await;
        h.service
            .create_credential(
                WS,
                CreateCredential {
                    name: "registry-bot".to_string(),
                    description: None,
                    secret: CredentialSecret::Registry(RegistryCredential {
                        registry: "registry.example.com".to_string(),
                        username: "bot".to_string(),
                        password: "hunter2".to_string(),
                        email: None,
                    }),
                },
            )
            .await
            .unwrap();

        let mut config = two_stage_config();
        config.credentials = vec!["registry-bot".to_string()];
        let run = h.service.create_pipeline(WS, config).await.unwrap();

        match h.service.delete_credential(WS, "registry-bot").await {
            Err(ServiceError::Conflict(message)) => assert!(message.contains(&run.id.to_string())),
            other => panic!("expected conflict, got {other:?}"),
        }

        set_and_sync(&h, &run, RunStatus::Succeeded).await;
        h.service.delete_credential(WS, "registry-bot").await.unwrap();
        assert!(matches!(
            h.service.delete_credential(WS, "registry-bot").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_provider_token_credential_cannot_be_deleted() {
        let h = harness().await;
        assert!(matches!(
            h.service.delete_credential(WS, "ci-token").await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_lists_every_violation() {
        let h = harness().await;
        let mut config = two_stage_config();
        config.name = String::new();
        config.stages.clear();
        config.credentials = vec!["missing".to_string()];

        match h.service.create_pipeline(WS, config).await {
            Err(ServiceError::Validation(v)) => assert_eq!(
                v,
                vec![
                    "Pipeline name cannot be empty".to_string(),
                    "Pipeline must define at least one stage".to_string(),
                    "Credential 'missing' does not exist".to_string(),
                ]
            ),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(h.provider.submissions(), 0);
    }

    #[tokio::test]
    async fn test_workspace_without_provider_is_rejected() {
        let h = harness().await;
        let mut config = two_stage_config();
        config.source.credential = None;

        match h.service.create_pipeline("ws-2", config).await {
            Err(ServiceError::Validation(v)) => {
                assert_eq!(v, vec!["Workspace 'ws-2' has no provider configured".to_string()])
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_submit_failures() {
        let h = harness().await;

        h.provider
            .fail_next_submit(ProviderError::Transient("503".to_string()));
        let run = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();
        assert_eq!(h.provider.submissions(), 2);
        assert_eq!(run.external_handle, "fake-1");

        h.provider
            .fail_next_submit(ProviderError::Terminal("project archived".to_string()));
        assert!(matches!(
            h.service.create_pipeline(WS, two_stage_config()).await,
            Err(ServiceError::Provider(ProviderError::Terminal(_)))
        ));
        let runs = h.service.list_pipelines(WS, None, None).await.unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn test_transient_error_requeues_running_run() {
        let mut h = harness().await;
        let run = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();
        let run = set_and_sync(&h, &run, RunStatus::Running).await;

        for _ in 0..3 {
            h.provider
                .fail_next_query(ProviderError::Transient("timeout".to_string()));
        }
        let requeued = h.service.sync_pipeline(run.id).await.unwrap();
        assert_eq!(requeued.status, RunStatus::Queued);
        assert_eq!(requeued.requeue_count, 1);
        assert_eq!(requeued.external_handle, "fake-2");
        assert_eq!(h.provider.submissions(), 2);

        let events = drain(&mut h.events);
        assert_eq!(
            events[events.len() - 2..],
            [
                LifecycleEventKind::Transitioned {
                    from: RunStatus::Retrying,
                    to: RunStatus::Queued
                },
                LifecycleEventKind::Requeued {
                    handle: "fake-2".to_string(),
                    attempt: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_terminal_query_error_fails_run() {
        let h = harness().await;
        let run = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();
        let run = set_and_sync(&h, &run, RunStatus::Running).await;

        h.provider
            .fail_next_query(ProviderError::Terminal("pipeline deleted".to_string()));
        let failed = h.service.sync_pipeline(run.id).await.unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(
            failed.status_message.as_deref(),
            Some("provider error: pipeline deleted")
        );
        assert!(failed.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_provider_switch_waits_for_live_runs() {
        let h = harness().await;
        let run = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();
        let run = set_and_sync(&h, &run, RunStatus::Running).await;

        let mut other = fake_provider_config();
        other.provider = "other".to_string();
        match h.service.set_provider_config(WS, other.clone()).await {
            Err(ServiceError::Conflict(msg)) => assert!(msg.contains(&run.id.to_string())),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(h.service.get_provider_config(WS).await.unwrap().provider, "fake");

        // The run is still driven by its own provider
        let synced = h.service.sync_pipeline(run.id).await.unwrap();
        assert_eq!(synced.status, RunStatus::Running);
        let canceled = h.service.cancel_pipeline(WS, run.id).await.unwrap();
        assert_eq!(canceled.status, RunStatus::Canceled);

        // Same provider at another endpoint is not a switch
        let mut moved = fake_provider_config();
        moved.endpoint = "https://ci2.example.com".to_string();
        let live = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();
        h.service.set_provider_config(WS, moved).await.unwrap();
        h.service.cancel_pipeline(WS, live.id).await.unwrap();

        let switched = h.service.set_provider_config(WS, other).await.unwrap();
        assert_eq!(switched.provider, "other");
    }

    #[tokio::test]
    async fn test_terminal_query_error_before_start_keeps_started_at_unset() {
        let h = harness().await;
        let run = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();
        let run = h.service.sync_pipeline(run.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Queued);

        h.provider
            .fail_next_query(ProviderError::Terminal("pipeline deleted".to_string()));
        let failed = h.service.sync_pipeline(run.id).await.unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert!(failed.started_at.is_none());
        assert!(failed.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_finished_runs_release_their_locks() {
        let h = harness().await;
        let first = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();
        let second = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();

        h.service.sync_pipeline(first.id).await.unwrap();
        h.service.sync_pipeline(second.id).await.unwrap();
        assert_eq!(h.service.run_locks.len(), 2);

        set_and_sync(&h, &first, RunStatus::Succeeded).await;
        h.service.cancel_pipeline(WS, second.id).await.unwrap();
        assert_eq!(h.service.run_locks.len(), 0);

        // Still usable afterwards
        h.service.delete_pipeline(WS, first.id).await.unwrap();
        assert_eq!(h.service.run_locks.len(), 0);
    }

    #[tokio::test]
    async fn test_other_workspace_sees_not_found() {
        let h = harness().await;
        let run = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();

        assert!(matches!(
            h.service.get_pipeline("ws-2", run.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            h.service.cancel_pipeline("ws-2", run.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(h.service.list_pipelines("ws-2", None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_template_missing_parameter_submits_nothing() {
        let h = harness().await;
        let mut body = two_stage_config();
        body.source.revision = "{{branch}}".to_string();

        let template = h
            .service
            .create_template(CreateTemplate {
                name: "build".to_string(),
                description: None,
                provider: "fake".to_string(),
                parameters: vec![ParameterDefinition {
                    name: "branch".to_string(),
                    param_type: ParamType::String,
                    description: None,
                    required: true,
                    default: None,
                    allowed_values: vec![],
                }],
                body,
            })
            .await
            .unwrap();

        match h
            .service
            .create_pipeline_from_template(WS, template.id, &BTreeMap::new())
            .await
        {
            Err(ServiceError::Validation(v)) => {
                assert!(v.contains(&"missing required parameter 'branch'".to_string()))
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(h.provider.submissions(), 0);

        let params = BTreeMap::from([("branch".to_string(), ParamValue::from("release"))]);
        let run = h
            .service
            .create_pipeline_from_template(WS, template.id, &params)
            .await
            .unwrap();
        assert_eq!(run.config_snapshot.source.revision, "release");
        assert_eq!(h.provider.submissions(), 1);
    }

    #[tokio::test]
    async fn test_log_pages() {
        let h = harness().await;
        let run = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();
        for line in ["one", "two", "three"] {
            h.provider.emit_log(&run.external_handle, "build", "compile", line);
        }
        h.provider.emit_log(&run.external_handle, "test", "unit", "other");

        let query = LogQuery {
            stage: "build".to_string(),
            limit: Some(2),
            ..LogQuery::default()
        };
        let first = h.service.get_pipeline_logs(WS, run.id, query.clone()).await.unwrap();
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.next_offset, Some(2));

        let second = h
            .service
            .get_pipeline_logs(
                WS,
                run.id,
                LogQuery {
                    offset: 2,
                    ..query
                },
            )
            .await
            .unwrap();
        assert_eq!(second.entries.len(), 1);
        assert_eq!(second.entries[0].message, "three");
        assert_eq!(second.next_offset, None);
    }

    #[tokio::test]
    async fn test_concurrent_observers_see_same_order() {
        let h = harness().await;
        let run = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();

        let mut first = h.service.stream_pipeline_logs(WS, run.id, "", "").await.unwrap();
        let mut second = h.service.stream_pipeline_logs(WS, run.id, "", "").await.unwrap();
        wait_for_tail(&h.provider).await;
        assert_eq!(h.provider.tails_opened(), 1);

        for line in ["a", "b", "c"] {
            h.provider.emit_log(&run.external_handle, "build", "compile", line);
        }

        for subscription in [&mut first, &mut second] {
            let mut seen = Vec::new();
            for _ in 0..3 {
                match timeout(Duration::from_secs(2), subscription.next()).await {
                    Ok(Some(LogEvent::Entry(entry))) => seen.push(entry.message),
                    other => panic!("expected entry, got {other:?}"),
                }
            }
            assert_eq!(seen, vec!["a", "b", "c"]);
        }

        set_and_sync(&h, &run, RunStatus::Succeeded).await;
        for subscription in [&mut first, &mut second] {
            let end = timeout(Duration::from_secs(2), subscription.next()).await.unwrap();
            assert_eq!(end, Some(LogEvent::End(StreamEnd::RunFinished)));
        }
    }

    #[tokio::test]
    async fn test_stream_of_finished_run_replays_history() {
        let h = harness().await;
        let run = h.service.create_pipeline(WS, two_stage_config()).await.unwrap();
        h.provider.emit_log(&run.external_handle, "build", "compile", "done");
        set_and_sync(&h, &run, RunStatus::Succeeded).await;

        let mut subscription = h.service.stream_pipeline_logs(WS, run.id, "", "").await.unwrap();
        match subscription.next().await {
            Some(LogEvent::Entry(entry)) => assert_eq!(entry.message, "done"),
            other => panic!("expected entry, got {other:?}"),
        }
        assert_eq!(
            subscription.next().await,
            Some(LogEvent::End(StreamEnd::RunFinished))
        );
        assert_eq!(subscription.next().await, None);
        assert_eq!(h.provider.tails_opened(), 0);
    }

    #[tokio::test]
    async fn test_set_provider_config_validates_before_committing() {
        let h = harness().await;

        let mut bad = fake_provider_config();
        bad.provider = "jenkins".to_string();
        bad.endpoint = "ci.example.com".to_string();
        match h.service.set_provider_config(WS, bad).await {
            Err(ServiceError::Validation(v)) => assert_eq!(v.len(), 2),
            other => panic!("expected validation error, got {other:?}"),
        }

        h.provider.set_reachable(false);
        let mut moved = fake_provider_config();
        moved.endpoint = "https://ci2.example.com".to_string();
        assert!(matches!(
            h.service.set_provider_config(WS, moved).await,
            Err(ServiceError::Provider(_))
        ));

        let current = h.service.get_provider_config(WS).await.unwrap();
        assert_eq!(current.endpoint, "https://ci.example.com");
        assert!(matches!(
            h.service.get_provider_config("ws-2").await,
            Err(ServiceError::NotFound(_))
        ));
        assert_eq!(h.service.list_providers()[0].name, "fake");
    }
}
