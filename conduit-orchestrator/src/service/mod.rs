//! Service Module
//!
//! Business logic layer for the orchestrator.
//! `PipelineService` is the facade; the other modules are the pieces it
//! orchestrates between repositories and provider adapters.

pub mod credential;
pub mod events;
pub mod lifecycle;
mod locks;
pub mod log_stream;
pub mod pipeline;
pub mod template;

// Re-export for convenience
pub use credential::CredentialVault;
pub use events::{ChannelEventSink, EventSink};
pub use log_stream::{LogEvent, LogMultiplexer, LogStreamConfig, LogSubscription, StreamEnd};
pub use pipeline::{PipelineService, ServiceSettings};
pub use template::TemplateCatalog;
