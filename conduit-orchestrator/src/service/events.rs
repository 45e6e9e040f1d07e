//! Lifecycle event publishing
//!
//! Run lifecycle events go to the monitoring side fire-and-forget:
//! `publish` never blocks and never fails the operation that emitted it.

use conduit_core::domain::event::{LifecycleEvent, LifecycleEventKind};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub trait EventSink: Send + Sync {
    fn publish(&self, event: LifecycleEvent);
}

/// Bounded channel sink; events are dropped with a warning when it is full
pub struct ChannelEventSink {
    tx: mpsc::Sender<LifecycleEvent>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Sink whose events are drained into the tracing log by a background task
    pub fn spawn_logging(capacity: usize) -> Self {
        let (sink, mut rx) = Self::new(capacity);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                log_event(&event);
            }
        });
        sink
    }
}

impl EventSink for ChannelEventSink {
    fn publish(&self, event: LifecycleEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Event channel full, dropping event for run {}", event.run_id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

fn log_event(event: &LifecycleEvent) {
    match &event.kind {
        LifecycleEventKind::Created { retry_of: Some(original) } => info!(
            "[event] run {} created in workspace {} (retry of {})",
            event.run_id, event.workspace_id, original
        ),
        LifecycleEventKind::Created { retry_of: None } => info!(
            "[event] run {} created in workspace {}",
            event.run_id, event.workspace_id
        ),
        LifecycleEventKind::Transitioned { from, to } => {
            info!("[event] run {} {} -> {}", event.run_id, from, to)
        }
        LifecycleEventKind::Requeued { handle, attempt } => info!(
            "[event] run {} requeued as {} (attempt {})",
            event.run_id, handle, attempt
        ),
        LifecycleEventKind::Completed { status } => {
            info!("[event] run {} completed: {}", event.run_id, status)
        }
    }
}
