//! Identifiers, block info and numeric conversions

use alloy_primitives::{I256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Exchange identifier, as reported by its adapter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExchangeId(Arc<str>);

impl ExchangeId {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExchangeId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Latest block as seen by the chain client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub number: u64,
    pub base_fee: U256,
    pub gas_limit: u64,
}

/// `base_fee * multiplier`, multiplier kept to three decimals
pub fn scaled_gas_price(base_fee: U256, multiplier: f64) -> U256 {
    let milli = (multiplier * 1_000.0).round();
    if !(milli > 0.0) {
        return U256::ZERO;
    }
    base_fee.saturating_mul(U256::from(milli as u64)) / U256::from(1_000u64)
}

/// Lossy conversion used for ratios and reference-currency values
pub fn u256_to_f64(value: U256) -> f64 {
    value.to_string().parse().unwrap_or(0.0)
}

pub fn i256_to_f64(value: I256) -> f64 {
    value.to_string().parse().unwrap_or(0.0)
}

/// Saturating conversion; negative and NaN inputs map to zero
pub fn f64_to_u256(value: f64) -> U256 {
    if !value.is_finite() || value <= 0.0 {
        return U256::ZERO;
    }
    if value >= u128::MAX as f64 {
        return U256::from(u128::MAX);
    }
    U256::from(value as u128)
}

/// Amounts stay well below 2^255 in practice; larger values saturate
pub fn to_signed(value: U256) -> I256 {
    I256::try_from(value).unwrap_or(I256::MAX)
}
