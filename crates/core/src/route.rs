//! Route and step types

use alloy_primitives::{Address, I256, U256};
use serde::{Deserialize, Serialize};

use crate::{to_signed, u256_to_f64, CoreError, CoreResult, ExchangeId};

/// A single swap leg executed on one exchange
///
/// `path` is set when the exchange routes internally through intermediate
/// tokens; it always starts with `token_in` and ends with `token_out`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub exchange: ExchangeId,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub amount_out: U256,
    pub gas_estimate: u64,
    pub path: Option<Vec<Address>>,
    pub liquidity: Option<f64>,
    pub pool: Option<Address>,
}

impl Step {
    pub fn new(
        exchange: ExchangeId,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        amount_out: U256,
        gas_estimate: u64,
    ) -> Self {
        Self {
            exchange,
            token_in,
            token_out,
            amount_in,
            amount_out,
            gas_estimate,
            path: None,
            liquidity: None,
            pool: None,
        }
    }

    pub fn with_path(mut self, path: Vec<Address>) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_liquidity(mut self, liquidity: f64) -> Self {
        self.liquidity = Some(liquidity);
        self
    }

    pub fn with_pool(mut self, pool: Address) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn is_multi_hop(&self) -> bool {
        self.path.as_ref().map_or(false, |p| p.len() > 2)
    }

    /// Swaps performed by this step, counting internal hops
    pub fn hop_count(&self) -> usize {
        match &self.path {
            Some(path) if path.len() > 1 => path.len() - 1,
            _ => 1,
        }
    }

    /// Every token touched, in order
    pub fn tokens(&self) -> Vec<Address> {
        match &self.path {
            Some(path) if path.len() >= 2 => path.clone(),
            _ => vec![self.token_in, self.token_out],
        }
    }
}

/// Ordered, connected sequence of steps with derived totals
///
/// Totals are rebuilt from the steps on every append, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    steps: Vec<Step>,
    start_token: Address,
    amount_in: U256,
    gas_price: U256,
    amount_out: U256,
    gas_units: u64,
    net_profit: I256,
}

impl Route {
    pub fn new(start_token: Address, amount_in: U256, gas_price: U256) -> Self {
        let mut route = Self {
            steps: Vec::new(),
            start_token,
            amount_in,
            gas_price,
            amount_out: U256::ZERO,
            gas_units: 0,
            net_profit: I256::ZERO,
        };
        route.recompute();
        route
    }

    pub fn from_steps(
        start_token: Address,
        amount_in: U256,
        gas_price: U256,
        steps: impl IntoIterator<Item = Step>,
    ) -> CoreResult<Self> {
        let mut route = Self::new(start_token, amount_in, gas_price);
        for step in steps {
            route.push(step)?;
        }
        Ok(route)
    }

    /// Append a step; it must consume what the route currently ends with
    pub fn push(&mut self, step: Step) -> CoreResult<()> {
        match self.steps.last() {
            Some(last) if last.token_out != step.token_in => {
                return Err(CoreError::DisconnectedStep {
                    expected: last.token_out,
                    actual: step.token_in,
                });
            }
            None if step.token_in != self.start_token => {
                return Err(CoreError::WrongStartToken {
                    expected: self.start_token,
                    actual: step.token_in,
                });
            }
            _ => {}
        }
        self.steps.push(step);
        self.recompute();
        Ok(())
    }

    /// Copy of this route extended by one step
    pub fn with_step(&self, step: Step) -> CoreResult<Self> {
        let mut next = self.clone();
        next.push(step)?;
        Ok(next)
    }

    fn recompute(&mut self) {
        self.amount_out = self.steps.last().map_or(U256::ZERO, |s| s.amount_out);
        self.gas_units = self.steps.iter().map(|s| s.gas_estimate).sum();
        self.net_profit = self.recomputed_net_profit();
    }

    /// `amount_out - amount_in - gas_units * gas_price`, from scratch
    pub fn recomputed_net_profit(&self) -> I256 {
        let amount_out = self.steps.last().map_or(U256::ZERO, |s| s.amount_out);
        let gas_units: u64 = self.steps.iter().map(|s| s.gas_estimate).sum();
        let gas_cost = self.gas_price.saturating_mul(U256::from(gas_units));
        to_signed(amount_out) - to_signed(self.amount_in) - to_signed(gas_cost)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn start_token(&self) -> Address {
        self.start_token
    }

    pub fn end_token(&self) -> Option<Address> {
        self.steps.last().map(|s| s.token_out)
    }

    pub fn amount_in(&self) -> U256 {
        self.amount_in
    }

    pub fn amount_out(&self) -> U256 {
        self.amount_out
    }

    pub fn gas_units(&self) -> u64 {
        self.gas_units
    }

    pub fn gas_price(&self) -> U256 {
        self.gas_price
    }

    pub fn gas_cost(&self) -> U256 {
        self.gas_price.saturating_mul(U256::from(self.gas_units))
    }

    pub fn net_profit(&self) -> I256 {
        self.net_profit
    }

    pub fn is_profitable(&self, min_profit: I256) -> bool {
        !self.steps.is_empty() && self.net_profit > min_profit
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Total swaps including intra-exchange hops
    pub fn hop_count(&self) -> usize {
        self.steps.iter().map(Step::hop_count).sum()
    }

    /// Get the token path
    pub fn token_path(&self) -> Vec<Address> {
        let mut path = vec![self.start_token];
        for step in &self.steps {
            let tokens = step.tokens();
            path.extend(tokens.into_iter().skip(1));
        }
        path
    }

    pub fn exchanges(&self) -> Vec<ExchangeId> {
        self.steps.iter().map(|s| s.exchange.clone()).collect()
    }

    /// Calculate effective price (amount_out / amount_in)
    pub fn effective_price(&self) -> f64 {
        if self.amount_in.is_zero() {
            return 0.0;
        }
        u256_to_f64(self.amount_out) / u256_to_f64(self.amount_in)
    }
}
