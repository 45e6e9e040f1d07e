//! Conduit orchestrator
//!
//! Provider-agnostic pipeline orchestration: runs are validated, submitted
//! to the workspace's CI/CD backend through a provider adapter, tracked
//! through a strict state machine, and their logs multiplexed to any
//! number of observers.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod poller;
pub mod provider;
pub mod repository;
pub mod service;
