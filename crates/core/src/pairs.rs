//! Priced, exchange-tagged pair snapshots

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::ExchangeId;

/// One pool as seen in a market snapshot
///
/// `price` is units of `token_out` per unit of `token_in`, `fee` is a
/// fraction (0.003 = 0.3%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairQuote {
    pub exchange: ExchangeId,
    pub token_in: Address,
    pub token_out: Address,
    pub price: f64,
    pub liquidity: f64,
    pub fee: f64,
    pub pool_address: Option<Address>,
}

impl PairQuote {
    pub fn new(exchange: &str, token_in: Address, token_out: Address, price: f64, fee: f64) -> Self {
        Self {
            exchange: ExchangeId::new(exchange),
            token_in,
            token_out,
            price,
            liquidity: 0.0,
            fee,
            pool_address: None,
        }
    }

    pub fn with_liquidity(mut self, liquidity: f64) -> Self {
        self.liquidity = liquidity;
        self
    }

    pub fn with_pool(mut self, pool: Address) -> Self {
        self.pool_address = Some(pool);
        self
    }

    /// Output per unit of input after the pool fee
    pub fn effective_rate(&self) -> f64 {
        self.price * (1.0 - self.fee)
    }

    /// Same pool traded the other way; `None` for unusable prices
    pub fn inverse(&self) -> Option<PairQuote> {
        if !self.price.is_finite() || self.price <= 0.0 {
            return None;
        }
        Some(PairQuote {
            exchange: self.exchange.clone(),
            token_in: self.token_out,
            token_out: self.token_in,
            price: 1.0 / self.price,
            liquidity: self.liquidity,
            fee: self.fee,
            pool_address: self.pool_address,
        })
    }
}
