//! Simulate-then-commit execution of validated opportunities

use alloy_primitives::I256;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use dexarb_core::{
    to_signed, BundleRelay, ChainClient, ExchangeAdapter, ExecutionConfig, ExecutionPlan,
    ExecutionResult, ExecutionStage, ExecutionStatus, FlashLoanProvider, Opportunity,
    OpportunityStatus, RejectionReason,
};

use crate::builder::PlanBuilder;
use crate::inflight::InFlightRegistry;
use crate::simulator::{validate_margins, validate_simulation, BundleSimulator};
use crate::submitter::{SubmissionOutcome, SubmitterConfig, TransactionSubmitter};

/// Running totals; only submitted attempts count as executions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub rejected_executions: u64,
    pub total_profit: I256,
    pub max_profit: I256,
}

/// Drives one opportunity from plan to confirmation
pub struct ExecutionCoordinator {
    builder: PlanBuilder,
    simulator: Option<BundleSimulator>,
    submitter: TransactionSubmitter,
    chain: Arc<dyn ChainClient>,
    config: ExecutionConfig,
    in_flight: Arc<InFlightRegistry>,
    stats: RwLock<ExecutionStats>,
}

impl ExecutionCoordinator {
    /// The relay is ignored when `use_relay` is off
    pub fn new(
        exchanges: Vec<Arc<dyn ExchangeAdapter>>,
        chain: Arc<dyn ChainClient>,
        relay: Option<Arc<dyn BundleRelay>>,
        config: ExecutionConfig,
    ) -> Self {
        let relay = relay.filter(|_| config.use_relay);
        let simulator = relay
            .clone()
            .map(|r| BundleSimulator::new(r, config.call_timeout()));
        let submitter = TransactionSubmitter::new(chain.clone(), relay, SubmitterConfig::from(&config));

        Self {
            builder: PlanBuilder::new(exchanges, config.clone()),
            simulator,
            submitter,
            chain,
            config,
            in_flight: InFlightRegistry::new(),
            stats: RwLock::new(ExecutionStats::default()),
        }
    }

    pub fn with_flash_loan_provider(mut self, provider: Arc<dyn FlashLoanProvider>) -> Self {
        self.builder = self.builder.with_flash_loan_provider(provider);
        self
    }

    pub fn has_relay(&self) -> bool {
        self.simulator.is_some()
    }

    pub fn in_flight(&self) -> &Arc<InFlightRegistry> {
        &self.in_flight
    }

    pub fn get_statistics(&self) -> ExecutionStats {
        *self.stats.read()
    }

    /// Execute a validated opportunity
    ///
    /// Always returns a result; nothing is submitted unless simulation (or,
    /// without a relay, the expected-profit check) passed. Never retries.
    pub async fn execute(&self, opp: &mut Opportunity) -> ExecutionResult {
        let started = Instant::now();
        let mut result = self.run(opp).await;
        result.latency_us = started.elapsed().as_micros() as u64;
        self.record(&result);

        info!(
            target: "audit",
            event = "EXECUTION_RESULT",
            opportunity_id = %result.opportunity_id,
            status = %result.status,
            stage = ?result.stage,
            atomic = result.atomic,
            id = ?result.tx_or_bundle_id,
            latency_us = result.latency_us,
            "Execution finished"
        );
        result
    }

    async fn run(&self, opp: &mut Opportunity) -> ExecutionResult {
        if opp.status() != &OpportunityStatus::Validated {
            warn!("Opportunity {} is {}, not executing", opp.id, opp.status());
            return ExecutionResult::rejected(&opp.id, None, RejectionReason::NotValidated.to_string());
        }

        // Held until this function returns, on every path
        let Some(_guard) = self.in_flight.try_acquire(&opp.route) else {
            return self.reject(opp, None, RejectionReason::RouteInFlight);
        };

        let target_block = match self.target_block().await {
            Ok(block) => block,
            Err(reason) => return self.reject(opp, None, RejectionReason::PlanBuildFailed(reason)),
        };

        let plan = match self.builder.build(opp, target_block).await {
            Ok(plan) => plan,
            Err(e) => return self.reject(opp, None, RejectionReason::PlanBuildFailed(e.to_string())),
        };
        let expected = opp.profit_native - to_signed(plan.flash_loan_fee());
        debug!(
            "Plan for {} built: {} transactions, gas limit {}, expected profit {}",
            opp.id,
            plan.transactions().len(),
            plan.total_gas_limit(),
            expected
        );

        match (&self.simulator, target_block) {
            (Some(simulator), Some(block)) => {
                self.execute_bundle(opp, simulator, &plan, block, expected).await
            }
            _ => self.execute_sequential(opp, &plan, expected).await,
        }
    }

    async fn target_block(&self) -> Result<Option<u64>, String> {
        if self.simulator.is_none() {
            return Ok(None);
        }
        match tokio::time::timeout(self.config.call_timeout(), self.chain.current_block()).await {
            Ok(Ok(block)) => Ok(Some(block.number + self.config.target_block_offset)),
            Ok(Err(e)) => Err(format!("could not read current block: {}", e)),
            Err(_) => Err("timed out reading current block".to_string()),
        }
    }

    async fn execute_bundle(
        &self,
        opp: &mut Opportunity,
        simulator: &BundleSimulator,
        plan: &ExecutionPlan,
        target_block: u64,
        expected: I256,
    ) -> ExecutionResult {
        let outcome = match simulator.simulate(plan, target_block, &[opp.route.start_token()]).await {
            Ok(outcome) => outcome,
            Err(e) => {
                return self.reject(
                    opp,
                    Some(e.stage),
                    RejectionReason::SimulationFailed(e.to_string()),
                )
            }
        };

        if let Err(reason) = validate_simulation(expected, &outcome, &self.config) {
            return self.reject(opp, Some(ExecutionStage::RejectedBySimulation), reason);
        }
        debug!(
            "Bundle {} accepted: simulated profit {}",
            outcome.bundle_id, outcome.profit.net_profit
        );

        if let Err(result) = self.begin(opp) {
            return result;
        }
        let submission = self.submitter.submit_bundle(&outcome.bundle_id).await;
        let gas_used = Some(outcome.simulation.gas_used);
        self.finish(opp, submission, outcome.profit.net_profit, gas_used, true)
    }

    async fn execute_sequential(
        &self,
        opp: &mut Opportunity,
        plan: &ExecutionPlan,
        expected: I256,
    ) -> ExecutionResult {
        if expected <= I256::ZERO {
            return self.reject(opp, Some(ExecutionStage::Built), RejectionReason::NotProfitable);
        }
        if let Err(reason) = validate_margins(expected, opp.route.gas_cost(), &self.config) {
            return self.reject(opp, Some(ExecutionStage::Built), reason);
        }

        warn!(
            "No bundle relay, executing {} as {} separate transactions",
            opp.id,
            plan.transactions().len()
        );
        if let Err(result) = self.begin(opp) {
            return result;
        }
        let submission = self.submitter.submit_sequential(plan).await;
        self.finish(opp, submission, expected, None, false)
    }

    fn begin(&self, opp: &mut Opportunity) -> Result<(), ExecutionResult> {
        opp.transition(OpportunityStatus::Executing).map_err(|e| {
            ExecutionResult::rejected(&opp.id, Some(ExecutionStage::Accepted), e.to_string())
        })
    }

    fn reject(
        &self,
        opp: &mut Opportunity,
        stage: Option<ExecutionStage>,
        reason: RejectionReason,
    ) -> ExecutionResult {
        let message = reason.to_string();
        info!("Opportunity {} rejected: {}", opp.id, message);
        if let Err(e) = opp.reject(reason) {
            warn!("Could not mark {} rejected: {}", opp.id, e);
        }
        ExecutionResult::rejected(&opp.id, stage, message)
    }

    fn finish(
        &self,
        opp: &mut Opportunity,
        submission: SubmissionOutcome,
        profit: I256,
        estimated_gas: Option<u64>,
        atomic: bool,
    ) -> ExecutionResult {
        let id = submission.id().map(str::to_string);
        let (status, stage, next, error, failed_step, gas_used) = match submission {
            SubmissionOutcome::Confirmed { gas_used, .. } => (
                ExecutionStatus::Succeeded,
                ExecutionStage::Confirmed,
                OpportunityStatus::Succeeded,
                None,
                None,
                gas_used.or(estimated_gas),
            ),
            SubmissionOutcome::Failed { reason, failed_step, stage, .. } => (
                ExecutionStatus::Failed,
                stage,
                OpportunityStatus::Failed(reason.clone()),
                Some(reason),
                failed_step,
                None,
            ),
            SubmissionOutcome::TimedOut { .. } => {
                let reason = "not confirmed before timeout".to_string();
                (
                    ExecutionStatus::Failed,
                    ExecutionStage::TimedOut,
                    OpportunityStatus::Failed(reason.clone()),
                    Some(reason),
                    None,
                    None,
                )
            }
        };

        if let Err(e) = opp.transition(next) {
            warn!("Could not record outcome for {}: {}", opp.id, e);
        }

        ExecutionResult {
            opportunity_id: opp.id.clone(),
            status,
            stage: Some(stage),
            tx_or_bundle_id: id,
            realized_profit: (status == ExecutionStatus::Succeeded).then_some(profit),
            gas_used,
            atomic,
            error,
            failed_step,
            latency_us: 0,
        }
    }

    fn record(&self, result: &ExecutionResult) {
        let mut stats = self.stats.write();
        match result.status {
            ExecutionStatus::Rejected => stats.rejected_executions += 1,
            ExecutionStatus::Failed => {
                stats.total_executions += 1;
                stats.failed_executions += 1;
            }
            ExecutionStatus::Succeeded => {
                stats.total_executions += 1;
                stats.successful_executions += 1;
                let profit = result.realized_profit.unwrap_or(I256::ZERO);
                stats.total_profit = stats.total_profit.saturating_add(profit);
                if stats.successful_executions == 1 || profit > stats.max_profit {
                    stats.max_profit = profit;
                }
            }
        }
    }
}
