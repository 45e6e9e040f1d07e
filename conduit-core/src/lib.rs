//! Conduit Core
//!
//! Core types and abstractions for the Conduit pipeline orchestration engine.
//!
//! This crate contains:
//! - Domain types: Core business entities (PipelineRun, PipelineConfig, templates, credentials)
//! - DTOs: Request and response bodies exchanged with callers

pub mod domain;
pub mod dto;
