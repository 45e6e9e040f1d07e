//! Log stream multiplexer
//!
//! Serves any number of observers of one run from a single upstream tail.
//! The first observer opens the tail; every entry is appended to a bounded
//! in-memory buffer and fanned out to the observers whose stage/task filter
//! it matches. New observers first get a replay of the buffer, then live
//! entries, with no gap and no duplicate in between.
//!
//! Buffered entries are written to the log repository in batches and only
//! flushed entries are ever evicted. A reopened tail replays output the run
//! already produced; entries history already holds are fanned out but not
//! written again. A stream ends when the upstream closes,
//! when the run turns terminal (after trailing output is drained), or after
//! a period without upstream progress.

use conduit_core::domain::log::LogEntry;
use conduit_core::domain::run::PipelineRun;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::provider::{ProviderAdapter, RetryPolicy};
use crate::repository::LogRepository;

#[derive(Debug, Clone)]
pub struct LogStreamConfig {
    /// Entries kept in memory per run for replay
    pub buffer_capacity: usize,
    /// Unflushed entries that trigger a write to history
    pub flush_batch: usize,
    /// A stream with no upstream progress for this long is ended
    pub inactivity_timeout: Duration,
    /// How long trailing output is awaited once the run is terminal
    pub drain_grace: Duration,
}

impl Default for LogStreamConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
            flush_batch: 100,
            inactivity_timeout: Duration::from_secs(300),
            drain_grace: Duration::from_secs(2),
        }
    }
}

/// Why a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEnd {
    RunFinished,
    Inactive,
    UpstreamFailed,
}

impl StreamEnd {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamEnd::RunFinished => "run_finished",
            StreamEnd::Inactive => "inactive",
            StreamEnd::UpstreamFailed => "upstream_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    Entry(LogEntry),
    /// Always the last event of a subscription
    End(StreamEnd),
}

/// One observer's view of a run's log stream
///
/// Dropping it disconnects the observer without affecting the others.
pub struct LogSubscription {
    rx: mpsc::UnboundedReceiver<LogEvent>,
    done: bool,
}

impl LogSubscription {
    /// A subscription that replays `entries` and then ends
    pub fn replay(entries: Vec<LogEntry>, end: StreamEnd) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for entry in entries {
            let _ = tx.send(LogEvent::Entry(entry));
        }
        let _ = tx.send(LogEvent::End(end));
        Self { rx, done: false }
    }

    pub async fn next(&mut self) -> Option<LogEvent> {
        if self.done {
            return None;
        }
        let event = self.rx.recv().await;
        if matches!(event, Some(LogEvent::End(_)) | None) {
            self.done = true;
        }
        event
    }
}

// =============================================================================
// Per-run channel
// =============================================================================

struct Observer {
    stage: String,
    task: String,
    tx: mpsc::UnboundedSender<LogEvent>,
}

#[derive(Default)]
struct ChannelState {
    buffer: VecDeque<LogEntry>,
    /// How many of the newest buffered entries are not yet in history
    unflushed: usize,
    observers: Vec<Observer>,
    ended: Option<StreamEnd>,
}

impl ChannelState {
    /// Drops the oldest flushed entries beyond `capacity`
    fn evict(&mut self, capacity: usize) {
        while self.buffer.len() > capacity && self.buffer.len() > self.unflushed {
            self.buffer.pop_front();
        }
    }

    fn unflushed_entries(&self) -> Vec<LogEntry> {
        let start = self.buffer.len() - self.unflushed;
        self.buffer.iter().skip(start).cloned().collect()
    }
}

struct RunChannel {
    state: Mutex<ChannelState>,
    finished: watch::Sender<bool>,
}

impl RunChannel {
    fn new() -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            state: Mutex::new(ChannelState::default()),
            finished,
        }
    }

    fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an observer unless the stream already ended
    ///
    /// Replay and registration happen under one lock, so the observer sees
    /// each entry exactly once.
    fn attach(&self, stage: &str, task: &str) -> Option<LogSubscription> {
        let mut state = self.state();
        if state.ended.is_some() {
            return None;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for entry in state.buffer.iter().filter(|e| e.matches(stage, task)) {
            let _ = tx.send(LogEvent::Entry(entry.clone()));
        }
        state.observers.push(Observer {
            stage: stage.to_string(),
            task: task.to_string(),
            tx,
        });

        Some(LogSubscription { rx, done: false })
    }

    /// Buffers and fans out one entry; returns a batch when a flush is due
    ///
    /// `durable` entries are already in history and never flushed again.
    fn push(&self, entry: LogEntry, durable: bool, config: &LogStreamConfig) -> Option<Vec<LogEntry>> {
        let mut state = self.state();

        state.observers.retain(|o| !o.tx.is_closed());
        for observer in &state.observers {
            if entry.matches(&observer.stage, &observer.task) {
                let _ = observer.tx.send(LogEvent::Entry(entry.clone()));
            }
        }

        state.buffer.push_back(entry);
        if durable {
            state.evict(config.buffer_capacity);
            return None;
        }
        state.unflushed += 1;

        if state.unflushed >= config.flush_batch || state.buffer.len() > config.buffer_capacity {
            Some(state.unflushed_entries())
        } else {
            None
        }
    }

    /// Records that the oldest `count` unflushed entries are durable, then
    /// evicts flushed entries beyond capacity
    fn mark_flushed(&self, count: usize, capacity: usize) {
        let mut state = self.state();
        state.unflushed -= count.min(state.unflushed);
        state.evict(capacity);
    }

    fn pending_flush(&self) -> Vec<LogEntry> {
        self.state().unflushed_entries()
    }

    fn close(&self, reason: StreamEnd) {
        let mut state = self.state();
        state.ended = Some(reason);
        for observer in state.observers.drain(..) {
            let _ = observer.tx.send(LogEvent::End(reason));
        }
    }

    fn observer_count(&self) -> usize {
        let mut state = self.state();
        state.observers.retain(|o| !o.tx.is_closed());
        state.observers.len()
    }
}

// =============================================================================
// Multiplexer
// =============================================================================

type ChannelMap = Arc<Mutex<HashMap<Uuid, Arc<RunChannel>>>>;

pub struct LogMultiplexer {
    config: LogStreamConfig,
    retry: RetryPolicy,
    history: Arc<dyn LogRepository>,
    channels: ChannelMap,
}

impl LogMultiplexer {
    pub fn new(config: LogStreamConfig, retry: RetryPolicy, history: Arc<dyn LogRepository>) -> Self {
        Self {
            config,
            retry,
            history,
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<RunChannel>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Joins the run's live stream if one is open
    pub fn attach(&self, run_id: Uuid, stage: &str, task: &str) -> Option<LogSubscription> {
        let channel = self.channels().get(&run_id).cloned()?;
        channel.attach(stage, task)
    }

    /// Joins the run's live stream, opening the upstream tail if none is open
    pub fn subscribe(
        &self,
        run: &PipelineRun,
        adapter: Arc<dyn ProviderAdapter>,
        stage: &str,
        task: &str,
    ) -> LogSubscription {
        let mut channels = self.channels();
        if let Some(subscription) = channels
            .get(&run.id)
            .and_then(|channel| channel.attach(stage, task))
        {
            return subscription;
        }

        let channel = Arc::new(RunChannel::new());
        let subscription = channel.attach(stage, task).unwrap_or_else(|| {
            LogSubscription::replay(Vec::new(), StreamEnd::UpstreamFailed)
        });
        channels.insert(run.id, channel.clone());
        drop(channels);

        debug!("Opening log stream for run {}", run.id);
        let pump = Pump {
            run_id: run.id,
            handle: run.external_handle.clone(),
            finished: channel.finished.subscribe(),
            channel,
            adapter,
            history: self.history.clone(),
            channels: self.channels.clone(),
            config: self.config.clone(),
            retry: self.retry.clone(),
            already_stored: 0,
        };
        tokio::spawn(pump.run());

        subscription
    }

    /// Tells the run's stream, if any, that the run reached a terminal state
    pub fn run_finished(&self, run_id: Uuid) {
        if let Some(channel) = self.channels().get(&run_id) {
            channel.finished.send_replace(true);
        }
    }

    pub fn observer_count(&self, run_id: Uuid) -> usize {
        self.channels()
            .get(&run_id)
            .map(|channel| channel.observer_count())
            .unwrap_or(0)
    }

    pub fn is_streaming(&self, run_id: Uuid) -> bool {
        self.channels().contains_key(&run_id)
    }
}

/// Background task moving entries from the upstream tail into a channel
struct Pump {
    run_id: Uuid,
    handle: String,
    channel: Arc<RunChannel>,
    adapter: Arc<dyn ProviderAdapter>,
    history: Arc<dyn LogRepository>,
    channels: ChannelMap,
    config: LogStreamConfig,
    retry: RetryPolicy,
    finished: watch::Receiver<bool>,
    /// Leading upstream entries an earlier stream of this run already stored
    already_stored: usize,
}

impl Pump {
    async fn run(mut self) {
        self.already_stored = match self.history.count(self.run_id).await {
            Ok(stored) => stored,
            Err(err) => {
                warn!("Failed to count stored log entries of run {}: {}", self.run_id, err);
                0
            }
        };

        let upstream = self
            .retry
            .run("tail_logs", || self.adapter.tail_logs(&self.handle, "", ""))
            .await;

        let reason = match upstream {
            Ok(upstream) => self.forward(upstream).await,
            Err(err) => {
                warn!("Failed to open log tail for run {}: {}", self.run_id, err);
                StreamEnd::UpstreamFailed
            }
        };

        let remaining = self.channel.pending_flush();
        if !remaining.is_empty() {
            self.flush(remaining).await;
        }
        self.channel.close(reason);

        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if channels
            .get(&self.run_id)
            .is_some_and(|current| Arc::ptr_eq(current, &self.channel))
        {
            channels.remove(&self.run_id);
        }
        drop(channels);

        debug!("Log stream for run {} ended: {}", self.run_id, reason.as_str());
    }

    async fn forward(&mut self, mut upstream: mpsc::Receiver<LogEntry>) -> StreamEnd {
        loop {
            tokio::select! {
                entry = upstream.recv() => match entry {
                    Some(entry) => self.ingest(entry).await,
                    None => return StreamEnd::RunFinished,
                },
                _ = wait_finished(&mut self.finished) => {
                    while let Ok(Some(entry)) =
                        tokio::time::timeout(self.config.drain_grace, upstream.recv()).await
                    {
                        self.ingest(entry).await;
                    }
                    return StreamEnd::RunFinished;
                }
                _ = tokio::time::sleep(self.config.inactivity_timeout) => {
                    return StreamEnd::Inactive;
                }
            }
        }
    }

    async fn ingest(&mut self, entry: LogEntry) {
        let durable = self.already_stored > 0;
        if durable {
            self.already_stored -= 1;
        }
        if let Some(batch) = self.channel.push(entry, durable, &self.config) {
            self.flush(batch).await;
        }
    }

    async fn flush(&self, batch: Vec<LogEntry>) {
        match self.history.append(self.run_id, &batch).await {
            Ok(()) => self
                .channel
                .mark_flushed(batch.len(), self.config.buffer_capacity),
            Err(err) => warn!(
                "Failed to flush {} log entries for run {}: {}",
                batch.len(),
                self.run_id,
                err
            ),
        }
    }
}

async fn wait_finished(finished: &mut watch::Receiver<bool>) {
    let _ = finished.wait_for(|done| *done).await;
}
