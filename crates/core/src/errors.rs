//! Error types

use alloy_primitives::Address;
use thiserror::Error;

use crate::ExchangeId;

/// Core invariant violations on routes and opportunity lifecycle
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Step is disconnected: previous output {expected}, next input {actual}")]
    DisconnectedStep { expected: Address, actual: Address },

    #[error("Route does not start at {expected}: first input is {actual}")]
    WrongStartToken { expected: Address, actual: Address },

    #[error("Route is empty")]
    EmptyRoute,

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors returned by exchange adapters
///
/// The first three variants are "no route" conditions: expected while
/// exploring and pruned without noise.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("Insufficient liquidity")]
    NoLiquidity,

    #[error("Price impact too high")]
    PriceImpactTooHigh,

    #[error("Pool math underflow")]
    MathUnderflow,

    #[error("Operation not supported by {exchange}: {operation}")]
    Unsupported { exchange: ExchangeId, operation: String },

    #[error("Malformed adapter response: {0}")]
    Malformed(String),

    #[error("Adapter error: {0}")]
    Unknown(String),
}

impl AdapterError {
    /// True for conditions that just mean "this hop does not trade"
    pub fn is_no_route(&self) -> bool {
        matches!(
            self,
            AdapterError::NoLiquidity | AdapterError::PriceImpactTooHigh | AdapterError::MathUnderflow
        )
    }
}

/// Chain / node client errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Nonce too low")]
    NonceTooLow,

    #[error("Replacement transaction underpriced")]
    Underpriced,
}

/// Bundle relay errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Relay connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Unknown bundle: {0}")]
    UnknownBundle(String),

    #[error("Bundle rejected by relay: {0}")]
    Rejected(String),
}

/// Flash loan provider errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlashLoanError {
    #[error("Token not supported for flash loans: {0}")]
    UnsupportedToken(Address),

    #[error("Requested loan exceeds provider maximum")]
    AmountTooLarge,

    #[error("Flash loan provider error: {0}")]
    Provider(String),
}

/// Route search errors
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Could not read chain state: {0}")]
    Chain(#[from] ChainError),

    #[error("Invalid search request: {0}")]
    InvalidRequest(String),
}

/// Errors while turning an opportunity into executable transactions
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("No adapter registered for exchange {0}")]
    UnknownExchange(ExchangeId),

    #[error("Step {step} ({exchange}) failed to build: {source}")]
    StepBuild {
        step: usize,
        exchange: ExchangeId,
        #[source]
        source: AdapterError,
    },

    #[error("Flash loan preparation failed: {0}")]
    FlashLoan(#[from] FlashLoanError),

    #[error("Could not read chain state: {0}")]
    Chain(#[from] ChainError),
}

/// Result type alias
pub type CoreResult<T> = Result<T, CoreError>;
pub type AdapterResult<T> = Result<T, AdapterError>;
pub type ChainResult<T> = Result<T, ChainError>;
pub type RelayResult<T> = Result<T, RelayError>;
