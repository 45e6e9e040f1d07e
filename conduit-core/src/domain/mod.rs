//! Core domain types
//!
//! This module contains the core domain structures used across Conduit.
//! These types are provider-agnostic: adapters translate them into
//! backend-specific submissions and translate backend state back into them.

pub mod config;
pub mod credential;
pub mod event;
pub mod log;
pub mod provider;
pub mod run;
pub mod template;
