//! Configuration types

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{CoreError, CoreResult};

/// Hard ceiling on slippage tolerance
pub const MAX_SLIPPAGE_BPS: u16 = 500;

/// Live-quote route search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_path_length: usize,
    pub multi_hop_max_hops: usize,
    pub gas_price_multiplier: f64,
    pub max_concurrent_branches: usize,
    pub max_concurrent_quotes: usize,
    pub search_timeout_ms: u64,
    pub max_results: usize,
    /// Exchanges tried first, in this order; others follow alphabetically
    pub preferred_exchanges: Vec<String>,
    pub disabled_exchanges: Vec<String>,
    /// Empty means every token is allowed
    pub token_allowlist: Vec<Address>,
    pub token_denylist: Vec<Address>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_path_length: 3,
            multi_hop_max_hops: 3,
            gas_price_multiplier: 1.5,
            max_concurrent_branches: 8,
            max_concurrent_quotes: 16,
            search_timeout_ms: 5_000,
            max_results: 10,
            preferred_exchanges: vec![],
            disabled_exchanges: vec![],
            token_allowlist: vec![],
            token_denylist: vec![],
        }
    }
}

impl SearchConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn is_token_allowed(&self, token: &Address) -> bool {
        if self.token_denylist.contains(token) {
            return false;
        }
        self.token_allowlist.is_empty() || self.token_allowlist.contains(token)
    }

    pub fn is_exchange_enabled(&self, name: &str) -> bool {
        !self.disabled_exchanges.iter().any(|d| d == name)
    }

    /// Sort key: preferred exchanges by position, the rest after them
    pub fn exchange_rank(&self, name: &str) -> usize {
        self.preferred_exchanges
            .iter()
            .position(|p| p == name)
            .unwrap_or(self.preferred_exchanges.len())
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.max_path_length == 0 {
            return Err(CoreError::InvalidConfig("max_path_length must be at least 1".into()));
        }
        if self.max_concurrent_branches == 0 || self.max_concurrent_quotes == 0 {
            return Err(CoreError::InvalidConfig("concurrency limits must be at least 1".into()));
        }
        if !(self.gas_price_multiplier > 0.0) {
            return Err(CoreError::InvalidConfig("gas_price_multiplier must be positive".into()));
        }
        Ok(())
    }
}

/// Offline cycle detection over a pair snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub max_cycle_length: usize,
    pub min_profit_bps: f64,
    pub gas_per_hop: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_cycle_length: 4,
            min_profit_bps: 0.0,
            gas_per_hop: 150_000,
        }
    }
}

/// Opportunity scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub min_profit_usd: f64,
    pub min_margin_bps: f64,
    pub max_risk_score: f64,
    pub flash_loan_threshold_usd: f64,
    pub hop_weight: f64,
    pub liquidity_weight: f64,
    pub unknown_token_weight: f64,
    /// Hop count at which the hop component saturates
    pub max_hops_for_risk: usize,
    /// Liquidity at or above this is treated as riskless
    pub liquidity_floor_usd: f64,
    /// Margin that earns full margin credit in confidence
    pub target_margin_bps: f64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            min_profit_usd: 0.0,
            min_margin_bps: 0.0,
            max_risk_score: 1.0,
            flash_loan_threshold_usd: 10_000.0,
            hop_weight: 0.3,
            liquidity_weight: 0.4,
            unknown_token_weight: 0.3,
            max_hops_for_risk: 6,
            liquidity_floor_usd: 100_000.0,
            target_margin_bps: 50.0,
        }
    }
}

impl EvaluatorConfig {
    pub fn validate(&self) -> CoreResult<()> {
        let weights = [self.hop_weight, self.liquidity_weight, self.unknown_token_weight];
        if weights.iter().any(|w| *w < 0.0) {
            return Err(CoreError::InvalidConfig("risk weights must be non-negative".into()));
        }
        if self.max_hops_for_risk == 0 || self.liquidity_floor_usd <= 0.0 {
            return Err(CoreError::InvalidConfig("risk saturation points must be positive".into()));
        }
        Ok(())
    }
}

/// Execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub slippage_bps: u16,
    pub deadline_seconds: u64,
    pub profit_deviation_tolerance: f64,
    pub gas_safety_margin: f64,
    /// Absolute floor, in raw units of the start token
    pub min_profit_wei: u128,
    pub target_block_offset: u64,
    pub confirmation_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub call_timeout_ms: u64,
    pub recipient: Address,
    pub flash_loan_contract: Option<Address>,
    pub use_relay: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_bps: 100,
            deadline_seconds: 300,
            profit_deviation_tolerance: 0.10,
            gas_safety_margin: 0.20,
            min_profit_wei: 0,
            target_block_offset: 1,
            confirmation_timeout_ms: 60_000,
            poll_interval_ms: 1_000,
            call_timeout_ms: 10_000,
            recipient: Address::ZERO,
            flash_loan_contract: None,
            use_relay: true,
        }
    }
}

impl ExecutionConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.slippage_bps > MAX_SLIPPAGE_BPS {
            return Err(CoreError::InvalidConfig(format!(
                "slippage_bps {} exceeds {}",
                self.slippage_bps, MAX_SLIPPAGE_BPS
            )));
        }
        if self.profit_deviation_tolerance < 0.0 || self.gas_safety_margin < 0.0 {
            return Err(CoreError::InvalidConfig("tolerances must be non-negative".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(CoreError::InvalidConfig("poll_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Complete resolver configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub search: SearchConfig,
    pub cycles: CycleConfig,
    pub evaluator: EvaluatorConfig,
    pub execution: ExecutionConfig,
}

impl ResolverConfig {
    pub fn validate(&self) -> CoreResult<()> {
        self.search.validate()?;
        self.evaluator.validate()?;
        self.execution.validate()?;
        if self.cycles.max_cycle_length < 3 {
            return Err(CoreError::InvalidConfig("max_cycle_length must be at least 3".into()));
        }
        Ok(())
    }
}
