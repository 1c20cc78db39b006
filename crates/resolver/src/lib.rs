//! Cross-DEX arbitrage resolver
//!
//! Ties route discovery, scoring and execution together behind one
//! contract:
//! - `find_opportunities` searches live quotes across exchange adapters
//! - `scan_snapshot` enumerates cycles over a pair snapshot
//! - `execute` simulates and commits a validated opportunity
//! - `get_statistics` reports search and execution totals

pub mod settings;
pub mod telemetry;

use alloy_primitives::{Address, I256, U256};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use dexarb_core::{
    scaled_gas_price, BundleRelay, ChainClient, CoreResult, ExchangeAdapter, ExecutionResult,
    FlashLoanProvider, Opportunity, PairQuote, ResolverConfig, Route, SearchError, TokenRegistry,
};
use dexarb_detector::{CycleFinder, OpportunityEvaluator, PairGraph, PathFinder, SearchRequest};
use dexarb_executor::{ExecutionCoordinator, ExecutionStats};

pub use dexarb_detector::{MarketConditions, PriceSnapshot};
pub use settings::load_settings;
pub use telemetry::init_tracing;

/// Per-call limits for `find_opportunities`
#[derive(Debug, Clone, Default)]
pub struct SearchConstraints {
    /// Defaults to the start token, i.e. a round trip
    pub end_token: Option<Address>,
    pub min_profit: I256,
    pub gas_price: Option<U256>,
    pub max_gas_price: Option<U256>,
    pub max_results: Option<usize>,
}

/// Totals reported by `get_statistics`
#[derive(Debug, Clone, Serialize)]
pub struct ResolverStats {
    pub opportunities_found: u64,
    pub opportunities_validated: u64,
    pub searches: u64,
    pub search_timeouts: u64,
    pub quotes_requested: u64,
    pub execution: ExecutionStats,
}

/// Assembles a resolver from its collaborators
pub struct ResolverBuilder {
    config: ResolverConfig,
    chain: Arc<dyn ChainClient>,
    exchanges: Vec<Arc<dyn ExchangeAdapter>>,
    relay: Option<Arc<dyn BundleRelay>>,
    flash_loans: Vec<Arc<dyn FlashLoanProvider>>,
    tokens: Arc<TokenRegistry>,
}

impl ResolverBuilder {
    pub fn exchange(mut self, exchange: Arc<dyn ExchangeAdapter>) -> Self {
        self.exchanges.push(exchange);
        self
    }

    pub fn relay(mut self, relay: Arc<dyn BundleRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn flash_loan_provider(mut self, provider: Arc<dyn FlashLoanProvider>) -> Self {
        self.flash_loans.push(provider);
        self
    }

    pub fn tokens(mut self, tokens: Arc<TokenRegistry>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn build(self) -> CoreResult<ArbitrageResolver> {
        self.config.validate()?;

        let path_finder = PathFinder::new(
            self.exchanges.clone(),
            self.chain.clone(),
            self.config.search.clone(),
        );
        let mut coordinator = ExecutionCoordinator::new(
            self.exchanges,
            self.chain.clone(),
            self.relay,
            self.config.execution.clone(),
        );
        for provider in self.flash_loans {
            coordinator = coordinator.with_flash_loan_provider(provider);
        }

        info!(
            "Resolver ready: {} exchanges, relay {}",
            path_finder.exchange_ids().len(),
            if coordinator.has_relay() { "available" } else { "unavailable" }
        );

        Ok(ArbitrageResolver {
            path_finder,
            cycles: CycleFinder::new(self.config.cycles.clone()),
            evaluator: OpportunityEvaluator::new(self.config.evaluator.clone(), self.tokens),
            coordinator,
            chain: self.chain,
            gas_price_multiplier: self.config.search.gas_price_multiplier,
            prices: RwLock::new(PriceSnapshot::new()),
            conditions: RwLock::new(None),
            opportunities_found: AtomicU64::new(0),
            opportunities_validated: AtomicU64::new(0),
        })
    }
}

/// Discovery-and-execution core
pub struct ArbitrageResolver {
    path_finder: PathFinder,
    cycles: CycleFinder,
    evaluator: OpportunityEvaluator,
    coordinator: ExecutionCoordinator,
    chain: Arc<dyn ChainClient>,
    gas_price_multiplier: f64,
    prices: RwLock<PriceSnapshot>,
    conditions: RwLock<Option<MarketConditions>>,
    opportunities_found: AtomicU64,
    opportunities_validated: AtomicU64,
}

impl ArbitrageResolver {
    pub fn builder(config: ResolverConfig, chain: Arc<dyn ChainClient>) -> ResolverBuilder {
        ResolverBuilder {
            config,
            chain,
            exchanges: Vec::new(),
            relay: None,
            flash_loans: Vec::new(),
            tokens: Arc::new(TokenRegistry::new()),
        }
    }

    /// Replace the reference prices used for scoring
    pub fn update_prices(&self, prices: PriceSnapshot) {
        *self.prices.write() = prices;
    }

    pub fn update_market_conditions(&self, conditions: MarketConditions) {
        *self.conditions.write() = Some(conditions);
    }

    /// Validated opportunities from a live-quote search, best first
    ///
    /// A search that times out or cannot read chain state yields no
    /// opportunities.
    pub async fn find_opportunities(
        &self,
        start: Address,
        amount_in: U256,
        constraints: SearchConstraints,
    ) -> Vec<Opportunity> {
        let end = constraints.end_token.unwrap_or(start);
        let mut request =
            SearchRequest::new(start, end, amount_in).with_min_profit(constraints.min_profit);
        request.gas_price = constraints.gas_price;
        request.max_gas_price = constraints.max_gas_price;
        request.max_results = constraints.max_results;

        let routes = match self.path_finder.find_paths(request).await {
            Ok(routes) => routes,
            Err(SearchError::Timeout(limit)) => {
                warn!("Opportunity search from {} abandoned after {:?}", start, limit);
                return vec![];
            }
            Err(e) => {
                warn!("Opportunity search from {} failed: {}", start, e);
                return vec![];
            }
        };

        self.score(routes)
    }

    /// Validated opportunities from cycles in a pair snapshot, best first
    pub async fn scan_snapshot(
        &self,
        pairs: &[PairQuote],
        start: Address,
        amount_in: U256,
    ) -> Vec<Opportunity> {
        let gas_price = match self.chain.current_block().await {
            Ok(block) => scaled_gas_price(block.base_fee, self.gas_price_multiplier),
            Err(e) => {
                warn!("Could not read base fee for snapshot scan, skipping: {}", e);
                return vec![];
            }
        };

        let graph = PairGraph::build(pairs);
        debug!(
            "Snapshot graph: {} tokens, {} edges",
            graph.token_count(),
            graph.edge_count()
        );
        let routes = self.cycles.scan(&graph, start, amount_in, gas_price);
        self.score(routes)
    }

    fn score(&self, routes: Vec<Route>) -> Vec<Opportunity> {
        let prices = self.prices.read().clone();
        let conditions = self.conditions.read().clone();

        let found = routes.len();
        let mut validated = Vec::with_capacity(found);
        for route in routes {
            let mut opp = self.evaluator.evaluate(route, &prices, conditions.as_ref());
            match self.evaluator.validate(&mut opp) {
                Ok(true) => validated.push(opp),
                Ok(false) => {}
                Err(e) => warn!("Could not validate {}: {}", opp.id, e),
            }
        }

        self.opportunities_found.fetch_add(found as u64, Ordering::Relaxed);
        self.opportunities_validated
            .fetch_add(validated.len() as u64, Ordering::Relaxed);
        info!("{} routes scored, {} opportunities validated", found, validated.len());

        self.evaluator.rank(validated)
    }

    /// Execute a validated opportunity; always yields a result
    pub async fn execute(&self, opportunity: &mut Opportunity) -> ExecutionResult {
        self.coordinator.execute(opportunity).await
    }

    pub fn get_statistics(&self) -> ResolverStats {
        let search = self.path_finder.stats();
        ResolverStats {
            opportunities_found: self.opportunities_found.load(Ordering::Relaxed),
            opportunities_validated: self.opportunities_validated.load(Ordering::Relaxed),
            searches: search.searches,
            search_timeouts: search.timeouts,
            quotes_requested: search.quotes_requested,
            execution: self.coordinator.get_statistics(),
        }
    }
}
