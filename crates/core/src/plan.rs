//! Execution plan and result types

use alloy_primitives::{Address, Bytes, B256, I256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ExchangeId;

/// Unsigned transaction produced by an adapter or provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: u64,
}

/// One swap of the plan, with its slippage floor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapInstruction {
    pub step_index: usize,
    pub exchange: ExchangeId,
    pub min_amount_out: U256,
    pub transaction: TransactionRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashLoanInstruction {
    pub token: Address,
    pub amount: U256,
    pub fee: U256,
    pub transaction: TransactionRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MevProtection {
    pub target_block: u64,
}

/// Provider-facing instructions for one execution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub opportunity_id: String,
    pub swaps: Vec<SwapInstruction>,
    pub flash_loan: Option<FlashLoanInstruction>,
    pub mev_protection: Option<MevProtection>,
    pub deadline: u64,
}

impl ExecutionPlan {
    /// Transactions in submission order
    ///
    /// With a flash loan the swaps run inside the loan callback, so the
    /// loan transaction is the only one sent.
    pub fn transactions(&self) -> Vec<TransactionRequest> {
        match &self.flash_loan {
            Some(loan) => vec![loan.transaction.clone()],
            None => self.swaps.iter().map(|s| s.transaction.clone()).collect(),
        }
    }

    pub fn flash_loan_fee(&self) -> U256 {
        self.flash_loan.as_ref().map_or(U256::ZERO, |l| l.fee)
    }

    pub fn total_gas_limit(&self) -> u64 {
        self.transactions().iter().map(|t| t.gas_limit).sum()
    }
}

/// Receipt for a mined transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub tx_hash: B256,
    pub success: bool,
    pub gas_used: u64,
    pub block_number: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Succeeded,
    Rejected,
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Rejected => "rejected",
            ExecutionStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Furthest point an execution attempt reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStage {
    Built,
    Simulated,
    RejectedBySimulation,
    Accepted,
    Submitted,
    Confirmed,
    Failed,
    TimedOut,
}

/// Outcome reported back to the caller for every `execute` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub opportunity_id: String,
    pub status: ExecutionStatus,
    pub stage: Option<ExecutionStage>,
    pub tx_or_bundle_id: Option<String>,
    pub realized_profit: Option<I256>,
    pub gas_used: Option<u64>,
    /// False when steps were sent one by one without bundle guarantees
    pub atomic: bool,
    pub error: Option<String>,
    pub failed_step: Option<usize>,
    pub latency_us: u64,
}

impl ExecutionResult {
    pub fn rejected(opportunity_id: &str, stage: Option<ExecutionStage>, reason: String) -> Self {
        Self {
            opportunity_id: opportunity_id.to_string(),
            status: ExecutionStatus::Rejected,
            stage,
            tx_or_bundle_id: None,
            realized_profit: None,
            gas_used: None,
            atomic: true,
            error: Some(reason),
            failed_step: None,
            latency_us: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }
}
