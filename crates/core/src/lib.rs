//! Core types and utilities for the cross-DEX arbitrage resolver
//!
//! This crate provides shared types used across all components:
//! - Token and pair snapshot definitions
//! - Routes, steps and opportunities
//! - Execution plans and results
//! - Collaborator traits (exchanges, chain, relay, flash loans)
//! - Configuration and error types

pub mod types;
pub mod tokens;
pub mod pairs;
pub mod route;
pub mod opportunities;
pub mod plan;
pub mod adapters;
pub mod config;
pub mod errors;

pub use types::*;
pub use tokens::*;
pub use pairs::*;
pub use route::*;
pub use opportunities::*;
pub use plan::*;
pub use adapters::*;
pub use config::*;
pub use errors::*;
