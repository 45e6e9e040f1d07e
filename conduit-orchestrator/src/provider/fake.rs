//! Scripted in-process provider
//!
//! Records every call and lets tests drive backend state by hand: status
//! changes, log output, and one-shot failures per operation.

use async_trait::async_trait;
use chrono::Utc;
use conduit_core::domain::log::{LogEntry, LogLevel};
use conduit_core::domain::provider::{ProviderInfo, ProviderStatus};
use conduit_core::domain::run::{PipelineRun, RunStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    ProviderAdapter, ProviderConnection, ProviderError, ProviderFactory, StatusReport,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    CheckConnectivity,
    Submit { run_id: Uuid },
    QueryStatus(String),
    Cancel(String),
    FetchLogs(String),
    TailLogs(String),
}

struct Tail {
    stage: String,
    task: String,
    tx: mpsc::Sender<LogEntry>,
}

struct FakeRun {
    report: StatusReport,
    logs: Vec<LogEntry>,
    tails: Vec<Tail>,
}

#[derive(Default)]
struct FakeState {
    next_handle: u64,
    runs: HashMap<String, FakeRun>,
    submit_errors: VecDeque<ProviderError>,
    query_errors: VecDeque<ProviderError>,
    cancel_errors: VecDeque<ProviderError>,
    unreachable: bool,
    calls: Vec<FakeCall>,
}

pub struct FakeProvider {
    state: Mutex<FakeState>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState::default()),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_status(&self, handle: &str, status: RunStatus) {
        let mut state = self.state();
        let run = state.runs.get_mut(handle).expect("unknown handle");
        run.report.status = status;
    }

    pub fn set_failure_message(&self, handle: &str, message: &str) {
        let mut state = self.state();
        let run = state.runs.get_mut(handle).expect("unknown handle");
        run.report.message = Some(message.to_string());
    }

    /// Appends a log line and pushes it to every matching live tail
    pub fn emit_log(&self, handle: &str, stage: &str, task: &str, message: &str) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            stage: stage.to_string(),
            task: task.to_string(),
            level: LogLevel::Info,
            message: message.to_string(),
        };
        let mut state = self.state();
        let run = state.runs.get_mut(handle).expect("unknown handle");
        run.logs.push(entry.clone());
        for tail in &run.tails {
            if entry.matches(&tail.stage, &tail.task) {
                let _ = tail.tx.try_send(entry.clone());
            }
        }
    }

    /// Ends every live tail of a run, as a backend does once output is complete
    pub fn close_tails(&self, handle: &str) {
        let mut state = self.state();
        if let Some(run) = state.runs.get_mut(handle) {
            run.tails.clear();
        }
    }

    pub fn fail_next_submit(&self, err: ProviderError) {
        self.state().submit_errors.push_back(err);
    }

    pub fn fail_next_query(&self, err: ProviderError) {
        self.state().query_errors.push_back(err);
    }

    pub fn fail_next_cancel(&self, err: ProviderError) {
        self.state().cancel_errors.push_back(err);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().unreachable = !reachable;
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.state().calls.clone()
    }

    pub fn submissions(&self) -> usize {
        self.count(|call| matches!(call, FakeCall::Submit { .. }))
    }

    pub fn cancellations(&self) -> usize {
        self.count(|call| matches!(call, FakeCall::Cancel(_)))
    }

    pub fn tails_opened(&self) -> usize {
        self.count(|call| matches!(call, FakeCall::TailLogs(_)))
    }

    fn count(&self, pred: impl Fn(&FakeCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }
}

#[async_trait]
impl ProviderAdapter for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn check_connectivity(&self) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.calls.push(FakeCall::CheckConnectivity);
        if state.unreachable {
            return Err(ProviderError::Transient("connection refused".to_string()));
        }
        Ok(())
    }

    async fn submit(&self, run: &PipelineRun) -> Result<String, ProviderError> {
        let mut state = self.state();
        state.calls.push(FakeCall::Submit { run_id: run.id });
        if let Some(err) = state.submit_errors.pop_front() {
            return Err(err);
        }

        state.next_handle += 1;
        let handle = format!("fake-{}", state.next_handle);
        state.runs.insert(
            handle.clone(),
            FakeRun {
                report: StatusReport {
                    status: RunStatus::Queued,
                    stages: run.stages.clone(),
                    message: None,
                },
                logs: Vec::new(),
                tails: Vec::new(),
            },
        );
        Ok(handle)
    }

    async fn query_status(&self, handle: &str) -> Result<StatusReport, ProviderError> {
        let mut state = self.state();
        state.calls.push(FakeCall::QueryStatus(handle.to_string()));
        if let Some(err) = state.query_errors.pop_front() {
            return Err(err);
        }
        state
            .runs
            .get(handle)
            .map(|run| run.report.clone())
            .ok_or_else(|| ProviderError::Terminal(format!("unknown pipeline {handle}")))
    }

    async fn cancel(&self, handle: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.calls.push(FakeCall::Cancel(handle.to_string()));
        if let Some(err) = state.cancel_errors.pop_front() {
            return Err(err);
        }
        if let Some(run) = state.runs.get_mut(handle) {
            run.report.status = RunStatus::Canceled;
        }
        Ok(())
    }

    async fn fetch_logs(
        &self,
        handle: &str,
        stage: &str,
        task: &str,
    ) -> Result<Vec<LogEntry>, ProviderError> {
        let mut state = self.state();
        state.calls.push(FakeCall::FetchLogs(handle.to_string()));
        let run = state
            .runs
            .get(handle)
            .ok_or_else(|| ProviderError::Terminal(format!("unknown pipeline {handle}")))?;
        Ok(run
            .logs
            .iter()
            .filter(|e| e.matches(stage, task))
            .cloned()
            .collect())
    }

    async fn tail_logs(
        &self,
        handle: &str,
        stage: &str,
        task: &str,
    ) -> Result<mpsc::Receiver<LogEntry>, ProviderError> {
        let mut state = self.state();
        state.calls.push(FakeCall::TailLogs(handle.to_string()));
        let run = state
            .runs
            .get_mut(handle)
            .ok_or_else(|| ProviderError::Terminal(format!("unknown pipeline {handle}")))?;

        // Tails start from the beginning of the output, as trace-based backends do
        let (tx, rx) = mpsc::channel(1024);
        for entry in run.logs.iter().filter(|e| e.matches(stage, task)) {
            let _ = tx.try_send(entry.clone());
        }
        run.tails.push(Tail {
            stage: stage.to_string(),
            task: task.to_string(),
            tx,
        });
        Ok(rx)
    }
}

/// Factory handing out one shared `FakeProvider`
pub struct FakeProviderFactory {
    pub provider: Arc<FakeProvider>,
    name: String,
    connections: AtomicUsize,
}

impl FakeProviderFactory {
    pub fn new(provider: Arc<FakeProvider>) -> Arc<Self> {
        Self::named("fake", provider)
    }

    /// Registers the provider under another backend kind
    pub fn named(name: &str, provider: Arc<FakeProvider>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            name: name.to_string(),
            connections: AtomicUsize::new(0),
        })
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl ProviderFactory for FakeProviderFactory {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.name.clone(),
            display_name: "Fake".to_string(),
            description: "Scripted in-process backend".to_string(),
            features: vec!["logs".to_string()],
            status: ProviderStatus::Beta,
        }
    }

    fn connect(
        &self,
        _connection: ProviderConnection,
    ) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(self.provider.clone())
    }
}
