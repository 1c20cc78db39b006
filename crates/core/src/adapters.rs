//! Collaborator interfaces consumed by the resolver
//!
//! Exchange adapters, the chain client, the bundle relay and flash loan
//! providers live outside this workspace; these traits are the seam.

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    AdapterError, AdapterResult, BlockInfo, ChainResult, ExchangeId, FlashLoanError,
    RelayResult, TransactionReceipt, TransactionRequest,
};

/// Best route an exchange found internally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestPath {
    pub path: Vec<Address>,
    pub amount_out: U256,
    pub gas_estimate: u64,
}

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn id(&self) -> ExchangeId;

    async fn supports_token(&self, token: Address) -> bool;

    async fn get_amount_out(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
    ) -> AdapterResult<U256>;

    async fn estimate_swap_gas(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
    ) -> AdapterResult<u64>;

    async fn get_pairs_for_token(&self, token: Address) -> AdapterResult<Vec<(Address, Address)>>;

    async fn build_swap_transaction(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        min_amount_out: U256,
        recipient: Address,
        deadline: u64,
    ) -> AdapterResult<TransactionRequest>;

    fn supports_multi_hop(&self) -> bool {
        false
    }

    async fn find_best_path(
        &self,
        _token_in: Address,
        _token_out: Address,
        _amount_in: U256,
        _max_hops: usize,
    ) -> AdapterResult<BestPath> {
        Err(AdapterError::Unsupported {
            exchange: self.id(),
            operation: "find_best_path".to_string(),
        })
    }

    async fn build_multi_hop_swap_transaction(
        &self,
        _path: &[Address],
        _amounts: &[U256],
        _recipient: Address,
        _deadline: u64,
    ) -> AdapterResult<TransactionRequest> {
        Err(AdapterError::Unsupported {
            exchange: self.id(),
            operation: "build_multi_hop_swap_transaction".to_string(),
        })
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn current_block(&self) -> ChainResult<BlockInfo>;

    async fn gas_price(&self) -> ChainResult<U256>;

    async fn send_transaction(&self, tx: &TransactionRequest) -> ChainResult<B256>;

    /// `None` while the transaction is still pending
    async fn transaction_receipt(&self, tx_hash: B256) -> ChainResult<Option<TransactionReceipt>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleSimulation {
    pub success: bool,
    pub gas_used: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleProfit {
    pub net_profit: alloy_primitives::I256,
    pub gas_cost: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleStatus {
    Pending,
    Included { block_number: u64 },
    Failed { reason: String },
}

/// Private relay accepting ordered, all-or-nothing bundles
#[async_trait]
pub trait BundleRelay: Send + Sync {
    async fn create_bundle(
        &self,
        target_block: u64,
        transactions: Vec<TransactionRequest>,
    ) -> RelayResult<String>;

    async fn simulate_bundle(&self, bundle_id: &str) -> RelayResult<BundleSimulation>;

    async fn calculate_bundle_profit(
        &self,
        bundle_id: &str,
        token_addresses: &[Address],
    ) -> RelayResult<BundleProfit>;

    /// Returns the relay-assigned bundle hash
    async fn submit_bundle(&self, bundle_id: &str) -> RelayResult<String>;

    async fn bundle_status(&self, bundle_id: &str) -> RelayResult<BundleStatus>;
}

#[async_trait]
pub trait FlashLoanProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn supported_tokens(&self) -> Result<Vec<Address>, FlashLoanError>;

    /// Fee as a fraction of the borrowed amount
    async fn fee_percentage(&self, token: Address) -> Result<f64, FlashLoanError>;

    async fn max_loan_amount(&self, token: Address) -> Result<U256, FlashLoanError>;

    async fn prepare_flash_loan(
        &self,
        token: Address,
        amount: U256,
        target_contract: Address,
        callback_data: Bytes,
    ) -> Result<TransactionRequest, FlashLoanError>;
}
