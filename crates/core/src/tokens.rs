//! Token metadata keyed by address
//!
//! Routes carry raw on-chain amounts; decimals are only needed to express
//! them in a reference currency. Unregistered tokens are assumed to use 18.

use alloy_primitives::Address;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const DEFAULT_DECIMALS: u8 = 18;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub address: Address,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
}

impl Token {
    pub fn new(address: Address, symbol: &str, decimals: u8) -> Self {
        Self {
            address,
            symbol: Some(symbol.to_string()),
            decimals: Some(decimals),
        }
    }

    pub fn unknown(address: Address) -> Self {
        Self {
            address,
            symbol: None,
            decimals: None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.symbol {
            Some(symbol) => write!(f, "{}({})", symbol, self.address.to_checksum(None)),
            None => write!(f, "{}", self.address.to_checksum(None)),
        }
    }
}

/// Symbol/decimals lookup keyed by address
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: RwLock<HashMap<Address, Token>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: impl IntoIterator<Item = Token>) -> Self {
        let registry = Self::new();
        for token in tokens {
            registry.insert(token);
        }
        registry
    }

    pub fn insert(&self, token: Token) {
        self.tokens.write().insert(token.address, token);
    }

    /// Known token, or an address-only placeholder
    pub fn lookup(&self, address: Address) -> Token {
        self.tokens
            .read()
            .get(&address)
            .cloned()
            .unwrap_or_else(|| Token::unknown(address))
    }

    pub fn is_known(&self, address: Address) -> bool {
        self.tokens.read().contains_key(&address)
    }

    pub fn decimals(&self, address: Address) -> u8 {
        self.tokens
            .read()
            .get(&address)
            .and_then(|t| t.decimals)
            .unwrap_or(DEFAULT_DECIMALS)
    }

    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }
}
