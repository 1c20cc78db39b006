//! Opportunity scoring and viability filtering

use alloy_primitives::{Address, I256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use dexarb_core::{
    i256_to_f64, u256_to_f64, CoreResult, EvaluatorConfig, Opportunity, OpportunityStatus,
    RejectionReason, Route, TokenRegistry,
};

/// Reference-currency price per whole token
#[derive(Debug, Clone, Default)]
pub struct PriceSnapshot {
    prices: HashMap<Address, f64>,
}

impl PriceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, token: Address, price: f64) -> Self {
        self.set(token, price);
        self
    }

    pub fn set(&mut self, token: Address, price: f64) {
        self.prices.insert(token, price);
    }

    pub fn price(&self, token: Address) -> Option<f64> {
        self.prices.get(&token).copied().filter(|p| p.is_finite() && *p >= 0.0)
    }
}

/// Market state supplied by an external feed
#[derive(Debug, Clone, Default)]
pub struct MarketConditions {
    /// Network congestion, 0.0 idle to 1.0 saturated
    pub congestion: f64,
    /// Recent price volatility, 0.0 calm to 1.0 extreme
    pub volatility: f64,
    /// Reference-currency liquidity per token
    pub token_liquidity: HashMap<Address, f64>,
}

impl MarketConditions {
    pub fn new(congestion: f64, volatility: f64) -> Self {
        Self { congestion, volatility, token_liquidity: HashMap::new() }
    }

    pub fn with_liquidity(mut self, token: Address, liquidity: f64) -> Self {
        self.token_liquidity.insert(token, liquidity);
        self
    }
}

/// Turns routes into scored opportunities
pub struct OpportunityEvaluator {
    config: EvaluatorConfig,
    tokens: Arc<TokenRegistry>,
}

impl OpportunityEvaluator {
    pub fn new(config: EvaluatorConfig, tokens: Arc<TokenRegistry>) -> Self {
        Self { config, tokens }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Score a route; the opportunity starts out `Discovered`
    pub fn evaluate(
        &self,
        route: Route,
        prices: &PriceSnapshot,
        conditions: Option<&MarketConditions>,
    ) -> Opportunity {
        let start = route.start_token();
        let scale = 10f64.powi(self.tokens.decimals(start) as i32);
        let price = prices.price(start).unwrap_or(0.0);

        let profit_native = route.net_profit();
        let amount_in = u256_to_f64(route.amount_in());
        let profit_units = i256_to_f64(profit_native);

        let min_liquidity = self.min_liquidity(&route, conditions);
        let risk_score = self.risk_score(&route, min_liquidity);

        let mut opp = Opportunity::new(route);
        opp.profit_native = profit_native;
        opp.profit_usd = profit_units / scale * price;
        opp.size_usd = amount_in / scale * price;
        opp.profit_margin = if amount_in > 0.0 { profit_units / amount_in } else { 0.0 };
        opp.risk_score = risk_score;
        opp.requires_flash_loan = opp.size_usd > self.config.flash_loan_threshold_usd;
        opp.requires_mev_protection = true;
        opp.confidence = self.confidence(opp.profit_margin, risk_score, min_liquidity, conditions);

        debug!(
            "Evaluated {}: profit ${:.4}, margin {:.2}bps, risk {:.3}, confidence {:.3}",
            opp.id,
            opp.profit_usd,
            opp.profit_bps(),
            opp.risk_score,
            opp.confidence
        );
        opp
    }

    /// Move a discovered opportunity to `Validated` or `Rejected`
    ///
    /// Returns whether it was validated.
    pub fn validate(&self, opp: &mut Opportunity) -> CoreResult<bool> {
        match self.rejection(opp) {
            Some(reason) => {
                debug!("Opportunity {} rejected: {}", opp.id, reason);
                opp.reject(reason)?;
                Ok(false)
            }
            None => {
                opp.transition(OpportunityStatus::Validated)?;
                Ok(true)
            }
        }
    }

    fn rejection(&self, opp: &Opportunity) -> Option<RejectionReason> {
        if opp.profit_native <= I256::ZERO {
            return Some(RejectionReason::NotProfitable);
        }
        if opp.profit_usd < self.config.min_profit_usd {
            return Some(RejectionReason::ProfitBelowMinimum {
                profit_usd: opp.profit_usd,
                min_usd: self.config.min_profit_usd,
            });
        }
        if opp.profit_bps() < self.config.min_margin_bps {
            return Some(RejectionReason::MarginBelowMinimum {
                margin_bps: opp.profit_bps(),
                min_bps: self.config.min_margin_bps,
            });
        }
        if opp.risk_score > self.config.max_risk_score {
            return Some(RejectionReason::RiskTooHigh {
                risk: opp.risk_score,
                max: self.config.max_risk_score,
            });
        }
        None
    }

    /// Best reference-currency profit first, ties broken by confidence
    pub fn rank(&self, mut opportunities: Vec<Opportunity>) -> Vec<Opportunity> {
        opportunities.sort_by(|a, b| {
            b.profit_usd
                .total_cmp(&a.profit_usd)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
        });
        opportunities
    }

    /// Smallest liquidity seen on the route's pools or tokens
    fn min_liquidity(&self, route: &Route, conditions: Option<&MarketConditions>) -> Option<f64> {
        let from_steps = route.steps().iter().filter_map(|s| s.liquidity);
        let from_tokens = conditions.into_iter().flat_map(|c| {
            route
                .token_path()
                .into_iter()
                .filter_map(move |t| c.token_liquidity.get(&t).copied())
        });
        from_steps
            .chain(from_tokens)
            .filter(|l| l.is_finite())
            .reduce(f64::min)
    }

    fn risk_score(&self, route: &Route, min_liquidity: Option<f64>) -> f64 {
        let c = &self.config;

        let hops = (route.hop_count() as f64 / c.max_hops_for_risk as f64).min(1.0);

        // Unknown liquidity is treated as the worst case
        let liquidity = match min_liquidity {
            Some(l) => 1.0 - (l / c.liquidity_floor_usd).clamp(0.0, 1.0),
            None => 1.0,
        };

        let path = route.token_path();
        let unknown = path.iter().filter(|t| !self.tokens.is_known(**t)).count() as f64
            / path.len().max(1) as f64;

        let total = c.hop_weight + c.liquidity_weight + c.unknown_token_weight;
        if total <= 0.0 {
            return 0.0;
        }
        ((c.hop_weight * hops + c.liquidity_weight * liquidity + c.unknown_token_weight * unknown)
            / total)
            .clamp(0.0, 1.0)
    }

    fn confidence(
        &self,
        margin: f64,
        risk: f64,
        min_liquidity: Option<f64>,
        conditions: Option<&MarketConditions>,
    ) -> f64 {
        let target = self.config.target_margin_bps.max(f64::EPSILON);
        let margin_score = (margin * 10_000.0 / target).clamp(0.0, 1.0);
        let mut confidence = 0.5 + 0.5 * margin_score;

        if let Some(c) = conditions {
            confidence *= 1.0 - 0.5 * c.congestion.clamp(0.0, 1.0);
            confidence *= 1.0 - 0.5 * c.volatility.clamp(0.0, 1.0);
        }

        // Thin pools are more exposed to being moved before inclusion
        if let Some(l) = min_liquidity {
            confidence *= 0.5 + 0.5 * (l / self.config.liquidity_floor_usd).clamp(0.0, 1.0);
        }

        confidence *= 1.0 - 0.5 * risk;
        confidence.clamp(0.0, 1.0)
    }
}
