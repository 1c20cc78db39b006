//! Arbitrage opportunity types

use alloy_primitives::I256;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CoreError, CoreResult, Route};

/// Why an opportunity was turned down
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectionReason {
    NotProfitable,
    ProfitBelowMinimum { profit_usd: f64, min_usd: f64 },
    MarginBelowMinimum { margin_bps: f64, min_bps: f64 },
    RiskTooHigh { risk: f64, max: f64 },
    NotValidated,
    RouteInFlight,
    PlanBuildFailed(String),
    SimulationFailed(String),
    ProfitDeviationTooHigh { expected: String, simulated: String, deviation: f64 },
    InsufficientGasMargin { profit: String, required: String },
    BelowMinimumProfit { profit: String, min: String },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::NotProfitable => write!(f, "route is not profitable"),
            RejectionReason::ProfitBelowMinimum { profit_usd, min_usd } => {
                write!(f, "profit ${:.4} below minimum ${:.4}", profit_usd, min_usd)
            }
            RejectionReason::MarginBelowMinimum { margin_bps, min_bps } => {
                write!(f, "margin {:.2}bps below minimum {:.2}bps", margin_bps, min_bps)
            }
            RejectionReason::RiskTooHigh { risk, max } => {
                write!(f, "risk score {:.3} above maximum {:.3}", risk, max)
            }
            RejectionReason::NotValidated => write!(f, "opportunity was not validated"),
            RejectionReason::RouteInFlight => {
                write!(f, "route overlaps an execution already in flight")
            }
            RejectionReason::PlanBuildFailed(e) => write!(f, "plan build failed: {}", e),
            RejectionReason::SimulationFailed(e) => write!(f, "simulation failed: {}", e),
            RejectionReason::ProfitDeviationTooHigh { expected, simulated, deviation } => write!(
                f,
                "profit deviation too high: expected {}, simulated {} ({:.1}%)",
                expected,
                simulated,
                deviation * 100.0
            ),
            RejectionReason::InsufficientGasMargin { profit, required } => {
                write!(f, "profit {} does not clear gas margin {}", profit, required)
            }
            RejectionReason::BelowMinimumProfit { profit, min } => {
                write!(f, "profit {} below absolute minimum {}", profit, min)
            }
        }
    }
}

/// Opportunity lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpportunityStatus {
    Discovered,
    Validated,
    Rejected(RejectionReason),
    Executing,
    Succeeded,
    Failed(String),
}

impl OpportunityStatus {
    pub fn name(&self) -> &'static str {
        match self {
            OpportunityStatus::Discovered => "discovered",
            OpportunityStatus::Validated => "validated",
            OpportunityStatus::Rejected(_) => "rejected",
            OpportunityStatus::Executing => "executing",
            OpportunityStatus::Succeeded => "succeeded",
            OpportunityStatus::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OpportunityStatus::Rejected(_) | OpportunityStatus::Succeeded | OpportunityStatus::Failed(_)
        )
    }

    fn can_transition_to(&self, next: &OpportunityStatus) -> bool {
        use OpportunityStatus::*;
        matches!(
            (self, next),
            (Discovered, Validated)
                | (Discovered, Rejected(_))
                | (Validated, Rejected(_))
                | (Validated, Executing)
                | (Executing, Succeeded)
                | (Executing, Failed(_))
        )
    }
}

impl fmt::Display for OpportunityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Scored route ready for validation and execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub route: Route,

    // Profit
    pub profit_native: I256,
    pub profit_usd: f64,
    pub size_usd: f64,
    pub profit_margin: f64,

    // Scoring
    pub risk_score: f64,    // 0.0 - 1.0
    pub confidence: f64,    // 0.0 - 1.0

    // Policy
    pub requires_flash_loan: bool,
    pub requires_mev_protection: bool,

    pub detected_at_ms: i64,
    status: OpportunityStatus,
}

impl Opportunity {
    pub fn new(route: Route) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            profit_native: route.net_profit(),
            route,
            profit_usd: 0.0,
            size_usd: 0.0,
            profit_margin: 0.0,
            risk_score: 0.0,
            confidence: 0.0,
            requires_flash_loan: false,
            requires_mev_protection: true,
            detected_at_ms: chrono::Utc::now().timestamp_millis(),
            status: OpportunityStatus::Discovered,
        }
    }

    pub fn status(&self) -> &OpportunityStatus {
        &self.status
    }

    /// Move along the lifecycle; skipping or reversing a state is an error
    pub fn transition(&mut self, next: OpportunityStatus) -> CoreResult<()> {
        if !self.status.can_transition_to(&next) {
            return Err(CoreError::InvalidTransition {
                from: self.status.name().to_string(),
                to: next.name().to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn reject(&mut self, reason: RejectionReason) -> CoreResult<()> {
        self.transition(OpportunityStatus::Rejected(reason))
    }

    /// Profit margin in basis points
    pub fn profit_bps(&self) -> f64 {
        self.profit_margin * 10_000.0
    }
}
