//! Opportunity execution
//!
//! Features:
//! - Slippage-bounded plan building with optional flash-loan wrapping
//! - Relay bundle simulation and profit validation before submission
//! - Atomic bundle submission with a sequential fallback
//! - In-flight route tracking

pub mod builder;
pub mod simulator;
pub mod submitter;
pub mod inflight;
pub mod coordinator;

pub use builder::{encode_callback, flash_loan_fee, PlanBuilder};
pub use simulator::{
    validate_margins, validate_simulation, BundleSimulator, SimulationError, SimulationOutcome,
};
pub use submitter::{SubmissionOutcome, SubmitterConfig, TransactionSubmitter};
pub use inflight::{InFlightGuard, InFlightRegistry};
pub use coordinator::{ExecutionCoordinator, ExecutionStats};
