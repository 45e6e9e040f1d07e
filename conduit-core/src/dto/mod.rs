//! Data Transfer Objects
//!
//! Request and response bodies exchanged between callers (console, CLI,
//! automation) and the orchestrator. Domain types are reused directly where
//! the wire shape and the domain shape coincide.

pub mod credential;
pub mod pipeline;
pub mod template;
