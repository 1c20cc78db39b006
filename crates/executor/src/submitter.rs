//! Submission and confirmation
//!
//! Two paths: an atomic relay bundle, or transactions sent one at a time
//! through the chain client when no relay is available. Neither path retries.

use alloy_primitives::B256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use dexarb_core::{
    BundleRelay, BundleStatus, ChainClient, ExecutionConfig, ExecutionPlan, ExecutionStage,
    TransactionReceipt,
};

use crate::simulator::with_timeout;

/// How a submission ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Confirmed {
        id: String,
        block_number: Option<u64>,
        gas_used: Option<u64>,
    },
    Failed {
        id: Option<String>,
        reason: String,
        /// Index into the plan's transactions
        failed_step: Option<usize>,
        /// Furthest point reached before the failure
        stage: ExecutionStage,
    },
    TimedOut {
        id: String,
    },
}

impl SubmissionOutcome {
    pub fn id(&self) -> Option<&str> {
        match self {
            SubmissionOutcome::Confirmed { id, .. } | SubmissionOutcome::TimedOut { id } => {
                Some(id.as_str())
            }
            SubmissionOutcome::Failed { id, .. } => id.as_deref(),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, SubmissionOutcome::Confirmed { .. })
    }
}

/// Submitter configuration
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    pub poll_interval: Duration,
    pub confirmation_timeout: Duration,
    pub call_timeout: Duration,
}

impl From<&ExecutionConfig> for SubmitterConfig {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            confirmation_timeout: config.confirmation_timeout(),
            call_timeout: config.call_timeout(),
        }
    }
}

/// Sends plans and waits for them to land
pub struct TransactionSubmitter {
    chain: Arc<dyn ChainClient>,
    relay: Option<Arc<dyn BundleRelay>>,
    config: SubmitterConfig,
}

impl TransactionSubmitter {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        relay: Option<Arc<dyn BundleRelay>>,
        config: SubmitterConfig,
    ) -> Self {
        Self { chain, relay, config }
    }

    /// Submit a simulated bundle and poll until it is included or fails
    pub async fn submit_bundle(&self, bundle_id: &str) -> SubmissionOutcome {
        let Some(relay) = &self.relay else {
            return SubmissionOutcome::Failed {
                id: Some(bundle_id.to_string()),
                reason: "no bundle relay configured".into(),
                failed_step: None,
                stage: ExecutionStage::Accepted,
            };
        };

        let hash = match with_timeout(self.config.call_timeout, relay.submit_bundle(bundle_id)).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!("Bundle {} submission failed: {}", bundle_id, e);
                return SubmissionOutcome::Failed {
                    id: Some(bundle_id.to_string()),
                    reason: e.to_string(),
                    failed_step: None,
                    stage: ExecutionStage::Accepted,
                };
            }
        };
        info!("Submitted bundle {} as {}", bundle_id, hash);

        let poll = async {
            loop {
                match with_timeout(self.config.call_timeout, relay.bundle_status(&hash)).await {
                    Ok(BundleStatus::Included { block_number }) => {
                        return SubmissionOutcome::Confirmed {
                            id: hash.clone(),
                            block_number: Some(block_number),
                            gas_used: None,
                        };
                    }
                    Ok(BundleStatus::Failed { reason }) => {
                        return SubmissionOutcome::Failed {
                            id: Some(hash.clone()),
                            reason,
                            failed_step: None,
                            stage: ExecutionStage::Submitted,
                        };
                    }
                    Ok(BundleStatus::Pending) => debug!("Bundle {} pending", hash),
                    Err(e) => warn!("Bundle {} status check failed: {}", hash, e),
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.config.confirmation_timeout, poll).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Bundle {} not confirmed within {:?}", hash, self.config.confirmation_timeout);
                SubmissionOutcome::TimedOut { id: hash }
            }
        }
    }

    /// Send each transaction after the previous one is mined
    ///
    /// The first failure stops the sequence; later transactions are never
    /// sent.
    pub async fn submit_sequential(&self, plan: &ExecutionPlan) -> SubmissionOutcome {
        let transactions = plan.transactions();
        let mut last_hash = None;
        let mut last_block = None;
        let mut gas_used = 0u64;

        for (index, tx) in transactions.iter().enumerate() {
            let label = step_label(plan, index);

            let sent = tokio::time::timeout(self.config.call_timeout, self.chain.send_transaction(tx)).await;
            let hash = match sent {
                Ok(Ok(hash)) => hash,
                Ok(Err(e)) => {
                    return self.halt(last_hash, index, format!("{} could not be sent: {}", label, e));
                }
                Err(_) => {
                    return self.halt(last_hash, index, format!("{} send timed out", label));
                }
            };
            debug!("Sent {} as {}", label, hash);
            last_hash = Some(hash);

            match self.await_receipt(hash).await {
                Some(receipt) if receipt.success => {
                    gas_used += receipt.gas_used;
                    last_block = Some(receipt.block_number);
                }
                Some(_) => {
                    return self.halt(last_hash, index, format!("{} reverted", label));
                }
                None => {
                    warn!("{} ({}) not mined within {:?}", label, hash, self.config.confirmation_timeout);
                    return SubmissionOutcome::TimedOut { id: hash.to_string() };
                }
            }
        }

        match last_hash {
            Some(hash) => SubmissionOutcome::Confirmed {
                id: hash.to_string(),
                block_number: last_block,
                gas_used: Some(gas_used),
            },
            None => SubmissionOutcome::Failed {
                id: None,
                reason: "plan has no transactions".into(),
                failed_step: None,
                stage: ExecutionStage::Accepted,
            },
        }
    }

    /// Nothing is on chain yet only if the very first send failed
    fn halt(&self, last_hash: Option<B256>, index: usize, reason: String) -> SubmissionOutcome {
        warn!("Sequential execution halted: {}", reason);
        let stage = if last_hash.is_some() { ExecutionStage::Failed } else { ExecutionStage::Accepted };
        SubmissionOutcome::Failed {
            id: last_hash.map(|h| h.to_string()),
            reason,
            failed_step: Some(index),
            stage,
        }
    }

    /// Poll for a receipt; `None` on timeout
    async fn await_receipt(&self, hash: B256) -> Option<TransactionReceipt> {
        let poll = async {
            loop {
                match self.chain.transaction_receipt(hash).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => {}
                    Err(e) => warn!("Receipt lookup for {} failed: {}", hash, e),
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        };
        tokio::time::timeout(self.config.confirmation_timeout, poll).await.ok()
    }
}

fn step_label(plan: &ExecutionPlan, index: usize) -> String {
    if plan.flash_loan.is_some() {
        return "flash loan transaction".to_string();
    }
    match plan.swaps.get(index) {
        Some(swap) => format!("step {} ({})", swap.step_index, swap.exchange),
        None => format!("transaction {}", index),
    }
}
