//! Relay-side bundle simulation and profit validation

use alloy_primitives::{Address, I256, U256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use dexarb_core::{
    i256_to_f64, to_signed, BundleProfit, BundleRelay, BundleSimulation, ExecutionConfig,
    ExecutionPlan, ExecutionStage, RejectionReason, RelayError, RelayResult,
};

/// A relay call failed partway through simulation
#[derive(Debug, Error)]
#[error("{source}")]
pub struct SimulationError {
    /// Last stage completed before the failing call
    pub stage: ExecutionStage,
    pub source: RelayError,
}

impl SimulationError {
    fn at(stage: ExecutionStage) -> impl FnOnce(RelayError) -> Self {
        move |source| Self { stage, source }
    }
}

/// What the relay reported for a candidate bundle
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub bundle_id: String,
    pub target_block: u64,
    pub simulation: BundleSimulation,
    pub profit: BundleProfit,
}

/// Simulates plans on the relay before anything is submitted
pub struct BundleSimulator {
    relay: Arc<dyn BundleRelay>,
    call_timeout: Duration,
}

impl BundleSimulator {
    pub fn new(relay: Arc<dyn BundleRelay>, call_timeout: Duration) -> Self {
        Self { relay, call_timeout }
    }

    /// Create the bundle for `target_block`, simulate it and price it
    ///
    /// Profit is only requested when the simulation succeeded.
    pub async fn simulate(
        &self,
        plan: &ExecutionPlan,
        target_block: u64,
        profit_tokens: &[Address],
    ) -> Result<SimulationOutcome, SimulationError> {
        let bundle_id = with_timeout(
            self.call_timeout,
            self.relay.create_bundle(target_block, plan.transactions()),
        )
        .await
        .map_err(SimulationError::at(ExecutionStage::Built))?;

        let simulation = with_timeout(self.call_timeout, self.relay.simulate_bundle(&bundle_id))
            .await
            .map_err(SimulationError::at(ExecutionStage::Built))?;
        if !simulation.success {
            debug!("Bundle {} failed simulation", bundle_id);
            return Ok(SimulationOutcome {
                bundle_id,
                target_block,
                simulation,
                profit: BundleProfit { net_profit: I256::ZERO, gas_cost: U256::ZERO },
            });
        }

        let profit = with_timeout(
            self.call_timeout,
            self.relay.calculate_bundle_profit(&bundle_id, profit_tokens),
        )
        .await
        .map_err(SimulationError::at(ExecutionStage::Simulated))?;

        debug!(
            "Bundle {} simulated: gas {}, net profit {}",
            bundle_id, simulation.gas_used, profit.net_profit
        );
        Ok(SimulationOutcome { bundle_id, target_block, simulation, profit })
    }
}

/// Bound a relay call; elapsed calls surface as connection failures
pub async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = RelayResult<T>>,
) -> RelayResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RelayError::ConnectionFailed(format!("relay call timed out after {:?}", limit))),
    }
}

/// Accept or reject a simulated bundle against the expected profit
pub fn validate_simulation(
    expected: I256,
    outcome: &SimulationOutcome,
    config: &ExecutionConfig,
) -> Result<(), RejectionReason> {
    if !outcome.simulation.success {
        return Err(RejectionReason::SimulationFailed(format!(
            "bundle {} reverted in simulation",
            outcome.bundle_id
        )));
    }

    let simulated = outcome.profit.net_profit;
    if expected <= I256::ZERO {
        return Err(RejectionReason::NotProfitable);
    }
    let deviation = (i256_to_f64(simulated) - i256_to_f64(expected)).abs() / i256_to_f64(expected);
    if deviation > config.profit_deviation_tolerance {
        warn!(
            "Simulated profit {} deviates {:.1}% from expected {}",
            simulated,
            deviation * 100.0,
            expected
        );
        return Err(RejectionReason::ProfitDeviationTooHigh {
            expected: expected.to_string(),
            simulated: simulated.to_string(),
            deviation,
        });
    }

    validate_margins(simulated, outcome.profit.gas_cost, config)
}

/// Gas-margin and absolute-minimum checks shared by both submission paths
pub fn validate_margins(
    profit: I256,
    gas_cost: U256,
    config: &ExecutionConfig,
) -> Result<(), RejectionReason> {
    let margin_milli = (config.gas_safety_margin * 1_000.0).round().max(0.0) as u64;
    let required = gas_cost.saturating_mul(U256::from(1_000 + margin_milli)) / U256::from(1_000u64);
    if profit < to_signed(required) {
        return Err(RejectionReason::InsufficientGasMargin {
            profit: profit.to_string(),
            required: required.to_string(),
        });
    }

    let min = U256::from(config.min_profit_wei);
    if profit < to_signed(min) {
        return Err(RejectionReason::BelowMinimumProfit {
            profit: profit.to_string(),
            min: min.to_string(),
        });
    }
    Ok(())
}
