//! Live-quote route search across exchange adapters
//!
//! Three strategies run for every search:
//! - direct single-exchange swaps `start -> end`
//! - intra-exchange multi-hop routes from adapters that can find them
//! - depth-first cross-exchange exploration, one hop per exchange, with
//!   sibling branches quoted concurrently
//!
//! Only one search runs at a time. Quotes are memoised for the duration of a
//! search so sibling branches asking for the same hop share one adapter call.

use alloy_primitives::{Address, I256, U256};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use dexarb_core::{
    scaled_gas_price, AdapterError, AdapterResult, ChainClient, ExchangeAdapter, ExchangeId, Route,
    SearchConfig, SearchError, Step,
};

use crate::visited::VisitedSet;

/// Parameters of one discovery call
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub start_token: Address,
    pub end_token: Address,
    pub amount_in: U256,
    pub min_profit: I256,
    /// Overrides the base-fee derived gas price
    pub gas_price: Option<U256>,
    pub max_gas_price: Option<U256>,
    pub max_results: Option<usize>,
}

impl SearchRequest {
    pub fn new(start_token: Address, end_token: Address, amount_in: U256) -> Self {
        Self {
            start_token,
            end_token,
            amount_in,
            min_profit: I256::ZERO,
            gas_price: None,
            max_gas_price: None,
            max_results: None,
        }
    }

    /// Round trip back to the start token
    pub fn cycle(token: Address, amount_in: U256) -> Self {
        Self::new(token, token, amount_in)
    }

    pub fn with_min_profit(mut self, min_profit: I256) -> Self {
        self.min_profit = min_profit;
        self
    }

    pub fn with_gas_price(mut self, gas_price: U256) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    pub fn with_max_gas_price(mut self, max_gas_price: U256) -> Self {
        self.max_gas_price = Some(max_gas_price);
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }
}

/// Counters across all searches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub searches: u64,
    pub timeouts: u64,
    pub routes_found: u64,
    pub quotes_requested: u64,
    pub branches_pruned: u64,
    pub adapter_errors: u64,
}

#[derive(Debug, Default)]
struct SearchCounters {
    searches: AtomicU64,
    timeouts: AtomicU64,
    routes_found: AtomicU64,
    quotes_requested: AtomicU64,
    branches_pruned: AtomicU64,
    adapter_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
struct Quote {
    amount_out: U256,
    gas: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QuoteKey {
    exchange: ExchangeId,
    token_in: Address,
    token_out: Address,
    amount_in: U256,
}

/// Recursive multi-exchange route finder
pub struct PathFinder {
    exchanges: Vec<Arc<dyn ExchangeAdapter>>,
    chain: Arc<dyn ChainClient>,
    config: SearchConfig,
    search_lock: Mutex<()>,
    counters: SearchCounters,
}

impl PathFinder {
    /// Disabled exchanges are dropped; the rest are kept in preference order
    pub fn new(
        exchanges: Vec<Arc<dyn ExchangeAdapter>>,
        chain: Arc<dyn ChainClient>,
        config: SearchConfig,
    ) -> Self {
        let mut enabled: Vec<Arc<dyn ExchangeAdapter>> = exchanges
            .into_iter()
            .filter(|e| config.is_exchange_enabled(e.id().as_str()))
            .collect();
        enabled.sort_by(|a, b| {
            let (a, b) = (a.id(), b.id());
            (config.exchange_rank(a.as_str()), a).cmp(&(config.exchange_rank(b.as_str()), b))
        });

        Self {
            exchanges: enabled,
            chain,
            config,
            search_lock: Mutex::new(()),
            counters: SearchCounters::default(),
        }
    }

    pub fn exchange_ids(&self) -> Vec<ExchangeId> {
        self.exchanges.iter().map(|e| e.id()).collect()
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// True while a search holds the discovery lock
    pub fn is_searching(&self) -> bool {
        self.search_lock.try_lock().is_err()
    }

    pub fn stats(&self) -> SearchStats {
        let c = &self.counters;
        SearchStats {
            searches: c.searches.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            routes_found: c.routes_found.load(Ordering::Relaxed),
            quotes_requested: c.quotes_requested.load(Ordering::Relaxed),
            branches_pruned: c.branches_pruned.load(Ordering::Relaxed),
            adapter_errors: c.adapter_errors.load(Ordering::Relaxed),
        }
    }

    /// Profitable routes from `start_token` to `end_token`, best first
    ///
    /// Waiting for the discovery lock counts against the search timeout.
    /// On timeout every outstanding adapter call is dropped and the lock is
    /// released.
    pub async fn find_paths(&self, request: SearchRequest) -> Result<Vec<Route>, SearchError> {
        if request.amount_in.is_zero() {
            return Err(SearchError::InvalidRequest("amount_in must be positive".into()));
        }

        let timeout = self.config.search_timeout();
        match tokio::time::timeout(timeout, self.locked_search(&request)).await {
            Ok(result) => result,
            Err(_) => {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Route search {} -> {} timed out after {:?}",
                    request.start_token, request.end_token, timeout
                );
                Err(SearchError::Timeout(timeout))
            }
        }
    }

    async fn locked_search(&self, request: &SearchRequest) -> Result<Vec<Route>, SearchError> {
        let _guard = self.search_lock.lock().await;
        let started = Instant::now();
        self.counters.searches.fetch_add(1, Ordering::Relaxed);

        let gas_price = self.resolve_gas_price(request).await?;
        if let Some(max) = request.max_gas_price {
            if gas_price > max {
                warn!("Gas price {} above maximum {}, skipping search", gas_price, max);
                return Ok(vec![]);
            }
        }

        let ctx = SearchContext {
            request,
            gas_price,
            exchanges: &self.exchanges,
            config: &self.config,
            counters: &self.counters,
            permits: Semaphore::new(self.config.max_concurrent_quotes),
            quotes: DashMap::new(),
        };

        let root = Route::new(request.start_token, request.amount_in, gas_price);
        let (direct, multi_hop, explored) = tokio::join!(
            ctx.direct_routes(),
            ctx.multi_hop_routes(),
            explore(
                &ctx,
                root,
                VisitedSet::from_item(request.start_token),
                VisitedSet::new(),
            ),
        );

        let mut seen = HashSet::new();
        let mut routes: Vec<Route> = direct
            .into_iter()
            .chain(multi_hop)
            .chain(explored)
            .filter(|route| seen.insert(route_key(route)))
            .collect();

        routes.sort_by(|a, b| b.net_profit().cmp(&a.net_profit()));
        routes.truncate(request.max_results.unwrap_or(self.config.max_results));

        self.counters
            .routes_found
            .fetch_add(routes.len() as u64, Ordering::Relaxed);
        info!(
            "Route search {} -> {} found {} routes in {:?} ({} quotes, gas price {})",
            request.start_token,
            request.end_token,
            routes.len(),
            started.elapsed(),
            ctx.quotes.len(),
            gas_price
        );
        Ok(routes)
    }

    async fn resolve_gas_price(&self, request: &SearchRequest) -> Result<U256, SearchError> {
        if let Some(price) = request.gas_price {
            return Ok(price);
        }
        let block = self.chain.current_block().await?;
        Ok(scaled_gas_price(block.base_fee, self.config.gas_price_multiplier))
    }
}

/// Per-search state shared read-only by every branch
struct SearchContext<'a> {
    request: &'a SearchRequest,
    gas_price: U256,
    exchanges: &'a [Arc<dyn ExchangeAdapter>],
    config: &'a SearchConfig,
    counters: &'a SearchCounters,
    permits: Semaphore,
    quotes: DashMap<QuoteKey, AdapterResult<Quote>>,
}

impl<'a> SearchContext<'a> {
    async fn direct_routes(&self) -> Vec<Route> {
        let (start, end) = (self.request.start_token, self.request.end_token);
        if start == end {
            return vec![];
        }

        let mut routes = Vec::new();
        for exchange in self.exchanges {
            if !(exchange.supports_token(start).await && exchange.supports_token(end).await) {
                continue;
            }
            let quote = match self.quote(exchange, start, end, self.request.amount_in).await {
                Ok(q) => q,
                Err(e) => {
                    self.record_failure(&exchange.id(), "direct quote", &e);
                    continue;
                }
            };
            let step = Step::new(exchange.id(), start, end, self.request.amount_in, quote.amount_out, quote.gas);
            if let Some(route) = self.complete(self.root(), step) {
                routes.push(route);
            }
        }
        routes
    }

    async fn multi_hop_routes(&self) -> Vec<Route> {
        let (start, end) = (self.request.start_token, self.request.end_token);
        let max_hops = self.config.multi_hop_max_hops;

        let mut routes = Vec::new();
        for exchange in self.exchanges.iter().filter(|e| e.supports_multi_hop()) {
            if !(exchange.supports_token(start).await && exchange.supports_token(end).await) {
                continue;
            }
            let best = {
                let _permit = match self.permits.acquire().await {
                    Ok(p) => p,
                    Err(_) => return routes,
                };
                self.counters.quotes_requested.fetch_add(1, Ordering::Relaxed);
                exchange
                    .find_best_path(start, end, self.request.amount_in, max_hops)
                    .await
            };
            let best = match best {
                Ok(best) => best,
                Err(e) => {
                    self.record_failure(&exchange.id(), "multi-hop path", &e);
                    continue;
                }
            };

            let well_formed = best.path.len() >= 2
                && best.path.len() - 1 <= max_hops
                && best.path.first() == Some(&start)
                && best.path.last() == Some(&end);
            if !well_formed {
                let e = AdapterError::Malformed(format!("multi-hop path {:?}", best.path));
                self.record_failure(&exchange.id(), "multi-hop path", &e);
                continue;
            }
            if best.amount_out.is_zero() {
                self.counters.branches_pruned.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let step = Step::new(exchange.id(), start, end, self.request.amount_in, best.amount_out, best.gas_estimate)
                .with_path(best.path);
            if let Some(route) = self.complete(self.root(), step) {
                routes.push(route);
            }
        }
        routes
    }

    fn root(&self) -> Route {
        Route::new(self.request.start_token, self.request.amount_in, self.gas_price)
    }

    /// Append the final step and keep the route if it clears `min_profit`
    fn complete(&self, route: Route, step: Step) -> Option<Route> {
        match route.with_step(step) {
            Ok(route) if route.is_profitable(self.request.min_profit) => Some(route),
            Ok(route) => {
                debug!(
                    "Route {:?} unprofitable: net {}",
                    route.exchanges(),
                    route.net_profit()
                );
                None
            }
            Err(e) => {
                warn!("Discarding inconsistent route: {}", e);
                None
            }
        }
    }

    /// Exchanges trading `token`, unused ones first
    ///
    /// Falls back to every exchange trading `token` when all of them were
    /// already used on this branch.
    async fn candidate_exchanges(
        &self,
        token: Address,
        used: &VisitedSet<ExchangeId>,
    ) -> Vec<&'a Arc<dyn ExchangeAdapter>> {
        let exchanges: &'a [Arc<dyn ExchangeAdapter>] = self.exchanges;
        let mut trading = Vec::new();
        for exchange in exchanges {
            if exchange.supports_token(token).await {
                trading.push(exchange);
            }
        }
        let unused: Vec<&'a Arc<dyn ExchangeAdapter>> =
            trading.iter().copied().filter(|e| !used.contains(&e.id())).collect();
        if unused.is_empty() {
            trading
        } else {
            unused
        }
    }

    async fn quote(
        &self,
        exchange: &Arc<dyn ExchangeAdapter>,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
    ) -> AdapterResult<Quote> {
        let key = QuoteKey { exchange: exchange.id(), token_in, token_out, amount_in };
        let cached = self.quotes.get(&key).map(|entry| entry.value().clone());
        if let Some(hit) = cached {
            return hit;
        }

        let result = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| AdapterError::Unknown("quote limiter closed".into()))?;
            self.counters.quotes_requested.fetch_add(1, Ordering::Relaxed);

            let amount_out = exchange.get_amount_out(token_in, token_out, amount_in).await?;
            if amount_out.is_zero() {
                return Err(AdapterError::NoLiquidity);
            }
            let gas = exchange.estimate_swap_gas(token_in, token_out, amount_in).await?;
            Ok(Quote { amount_out, gas })
        }
        .await;

        self.quotes.insert(key, result.clone());
        result
    }

    fn record_failure(&self, exchange: &ExchangeId, what: &str, error: &AdapterError) {
        if error.is_no_route() {
            self.counters.branches_pruned.fetch_add(1, Ordering::Relaxed);
            debug!("{} on {} pruned: {}", what, exchange, error);
        } else {
            self.counters.adapter_errors.fetch_add(1, Ordering::Relaxed);
            warn!("{} on {} failed: {}", what, exchange, error);
        }
    }

    /// Take one hop to `next` on `exchange`, then keep exploring or finish
    async fn extend(
        &'a self,
        exchange: &'a Arc<dyn ExchangeAdapter>,
        route: Route,
        next: Address,
        visited_tokens: VisitedSet<Address>,
        visited_exchanges: VisitedSet<ExchangeId>,
    ) -> Vec<Route> {
        let current = route.end_token().unwrap_or(route.start_token());
        let amount = if route.is_empty() { route.amount_in() } else { route.amount_out() };

        let quote = match self.quote(exchange, current, next, amount).await {
            Ok(q) => q,
            Err(e) => {
                self.record_failure(&exchange.id(), "hop quote", &e);
                return vec![];
            }
        };

        let step = Step::new(exchange.id(), current, next, amount, quote.amount_out, quote.gas);
        if next == self.request.end_token {
            return self.complete(route, step).into_iter().collect();
        }

        let route = match route.with_step(step) {
            Ok(route) => route,
            Err(e) => {
                warn!("Discarding inconsistent branch: {}", e);
                return vec![];
            }
        };
        explore(self, route, visited_tokens.with(next), visited_exchanges.with(exchange.id())).await
    }
}

/// Depth-first expansion of `route` from its current end token
fn explore<'a>(
    ctx: &'a SearchContext<'a>,
    route: Route,
    visited_tokens: VisitedSet<Address>,
    visited_exchanges: VisitedSet<ExchangeId>,
) -> BoxFuture<'a, Vec<Route>> {
    async move {
        if route.len() >= ctx.config.max_path_length {
            return vec![];
        }
        let current = route.end_token().unwrap_or(route.start_token());
        let end = ctx.request.end_token;
        // The next hop is the last one allowed, so it has to close the route
        let last_hop = route.len() + 1 >= ctx.config.max_path_length;

        let mut hops: Vec<(&'a Arc<dyn ExchangeAdapter>, Address)> = Vec::new();
        let mut seen = HashSet::new();
        for exchange in ctx.candidate_exchanges(current, &visited_exchanges).await {
            let pairs = match exchange.get_pairs_for_token(current).await {
                Ok(pairs) => pairs,
                Err(e) => {
                    ctx.record_failure(&exchange.id(), "pair listing", &e);
                    continue;
                }
            };
            for (a, b) in pairs {
                let next = if a == current {
                    b
                } else if b == current {
                    a
                } else {
                    continue;
                };
                if next == current || !ctx.config.is_token_allowed(&next) {
                    continue;
                }
                if next != end && (last_hop || visited_tokens.contains(&next)) {
                    continue;
                }
                if seen.insert((exchange.id(), next)) {
                    hops.push((exchange, next));
                }
            }
        }

        let branches: Vec<BoxFuture<'a, Vec<Route>>> = hops
            .into_iter()
            .map(|(exchange, next)| {
                ctx.extend(
                    exchange,
                    route.clone(),
                    next,
                    visited_tokens.clone(),
                    visited_exchanges.clone(),
                )
                .boxed()
            })
            .collect();

        stream::iter(branches)
            .buffer_unordered(ctx.config.max_concurrent_branches)
            .flat_map(stream::iter)
            .collect::<Vec<Route>>()
            .await
    }
    .boxed()
}

fn route_key(route: &Route) -> (Vec<ExchangeId>, Vec<Address>) {
    (route.exchanges(), route.token_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use async_trait::async_trait;
    use dexarb_core::{
        BestPath, BlockInfo, ChainResult, TransactionReceipt, TransactionRequest,
    };
    use std::collections::HashMap;
    use std::time::Duration;

    const ONE: u128 = 1_000_000_000_000_000_000;

    fn token(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    struct MockChain {
        base_fee: U256,
    }

    #[async_trait]
    impl ChainClient for MockChain {
        async fn current_block(&self) -> ChainResult<BlockInfo> {
            Ok(BlockInfo { number: 100, base_fee: self.base_fee, gas_limit: 30_000_000 })
        }
        async fn gas_price(&self) -> ChainResult<U256> {
            Ok(self.base_fee)
        }
        async fn send_transaction(&self, _tx: &TransactionRequest) -> ChainResult<B256> {
            Ok(B256::ZERO)
        }
        async fn transaction_receipt(&self, _h: B256) -> ChainResult<Option<TransactionReceipt>> {
            Ok(None)
        }
    }

    fn chain() -> Arc<dyn ChainClient> {
        Arc::new(MockChain { base_fee: U256::from(10u64) })
    }

    /// Quotes `amount * rate * (1 - fee)` for every configured direction
    struct MockExchange {
        name: &'static str,
        rates: HashMap<(Address, Address), f64>,
        fee: f64,
        gas: u64,
        errors: HashMap<(Address, Address), AdapterError>,
        best_path: Option<BestPath>,
        delay_ms: AtomicU64,
    }

    impl MockExchange {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                rates: HashMap::new(),
                fee: 0.003,
                gas: 100_000,
                errors: HashMap::new(),
                best_path: None,
                delay_ms: AtomicU64::new(0),
            }
        }

        fn rate(mut self, from: Address, to: Address, rate: f64) -> Self {
            self.rates.insert((from, to), rate);
            self
        }

        fn error(mut self, from: Address, to: Address, err: AdapterError) -> Self {
            self.errors.insert((from, to), err);
            self
        }

        fn delay(self, ms: u64) -> Self {
            self.delay_ms.store(ms, Ordering::SeqCst);
            self
        }

        fn multi_hop(mut self, best: BestPath) -> Self {
            self.best_path = Some(best);
            self
        }

        fn tokens(&self) -> HashSet<Address> {
            self.rates
                .keys()
                .chain(self.errors.keys())
                .flat_map(|(a, b)| [*a, *b])
                .collect()
        }
    }

    #[async_trait]
    impl ExchangeAdapter for MockExchange {
        fn id(&self) -> ExchangeId {
            ExchangeId::new(self.name)
        }

        async fn supports_token(&self, token: Address) -> bool {
            self.tokens().contains(&token)
        }

        async fn get_amount_out(&self, token_in: Address, token_out: Address, amount_in: U256) -> AdapterResult<U256> {
            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if let Some(err) = self.errors.get(&(token_in, token_out)) {
                return Err(err.clone());
            }
            let rate = self.rates.get(&(token_in, token_out)).ok_or(AdapterError::NoLiquidity)?;
            let amount: f64 = amount_in.to_string().parse().unwrap();
            Ok(U256::from((amount * rate * (1.0 - self.fee)) as u128))
        }

        async fn estimate_swap_gas(&self, _a: Address, _b: Address, _amount: U256) -> AdapterResult<u64> {
            Ok(self.gas)
        }

        async fn get_pairs_for_token(&self, token: Address) -> AdapterResult<Vec<(Address, Address)>> {
            Ok(self
                .rates
                .keys()
                .chain(self.errors.keys())
                .filter(|(a, b)| *a == token || *b == token)
                .copied()
                .collect())
        }

        async fn build_swap_transaction(
            &self,
            _token_in: Address,
            _token_out: Address,
            _amount_in: U256,
            _min_amount_out: U256,
            _recipient: Address,
            _deadline: u64,
        ) -> AdapterResult<TransactionRequest> {
            Err(AdapterError::Unknown("not used".into()))
        }

        fn supports_multi_hop(&self) -> bool {
            self.best_path.is_some()
        }

        async fn find_best_path(&self, _a: Address, _b: Address, _amount: U256, _max_hops: usize) -> AdapterResult<BestPath> {
            self.best_path.clone().ok_or(AdapterError::NoLiquidity)
        }
    }

    fn finder(exchanges: Vec<MockExchange>, config: SearchConfig) -> PathFinder {
        let adapters: Vec<Arc<dyn ExchangeAdapter>> = exchanges
            .into_iter()
            .map(|e| Arc::new(e) as Arc<dyn ExchangeAdapter>)
            .collect();
        PathFinder::new(adapters, chain(), config)
    }

    fn two_exchange_arb() -> Vec<MockExchange> {
        vec![
            MockExchange::new("x").rate(token(1), token(2), 2000.0),
            MockExchange::new("y").rate(token(2), token(1), 1.0 / 1980.0),
        ]
    }

    #[tokio::test]
    async fn test_cross_exchange_cycle_found() {
        let finder = finder(two_exchange_arb(), SearchConfig::default());
        let request = SearchRequest::cycle(token(1), U256::from(ONE)).with_gas_price(U256::from(1u64));
        let routes = finder.find_paths(request).await.unwrap();

        assert_eq!(routes.len(), 1);
        let route = &routes[0];
        assert_eq!(route.token_path(), vec![token(1), token(2), token(1)]);
        assert_eq!(route.exchanges(), vec![ExchangeId::new("x"), ExchangeId::new("y")]);

        let expected = 2000.0 * 0.997 * (1.0 / 1980.0) * 0.997 - 1.0;
        let profit: f64 = route.net_profit().to_string().parse().unwrap();
        assert!((profit / ONE as f64 - expected).abs() < 1e-6);
        assert!(route.net_profit() > I256::ZERO);
    }

    #[tokio::test]
    async fn test_default_gas_price_is_one_and_a_half_base_fee() {
        let finder = finder(two_exchange_arb(), SearchConfig::default());
        let routes = finder
            .find_paths(SearchRequest::cycle(token(1), U256::from(ONE)))
            .await
            .unwrap();
        assert_eq!(routes[0].gas_price(), U256::from(15u64));
    }

    #[tokio::test]
    async fn test_max_gas_price_skips_search() {
        let finder = finder(two_exchange_arb(), SearchConfig::default());
        let request = SearchRequest::cycle(token(1), U256::from(ONE))
            .with_gas_price(U256::from(100u64))
            .with_max_gas_price(U256::from(50u64));
        assert!(finder.find_paths(request).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gas_can_make_route_unprofitable() {
        let finder = finder(two_exchange_arb(), SearchConfig::default());
        // ~4e15 profit vs 200k gas * 1e11
        let request = SearchRequest::cycle(token(1), U256::from(ONE))
            .with_gas_price(U256::from(100_000_000_000u64));
        assert!(finder.find_paths(request).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_min_profit_threshold() {
        let finder = finder(two_exchange_arb(), SearchConfig::default());
        let request = SearchRequest::cycle(token(1), U256::from(ONE))
            .with_gas_price(U256::ZERO)
            .with_min_profit(I256::from_raw(U256::from(ONE / 100)));
        assert!(finder.find_paths(request).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_routes_respect_depth_and_visits() {
        // Every exchange quotes every direction among four tokens
        let tokens = [token(1), token(2), token(3), token(4)];
        let mut exchanges = Vec::new();
        for name in ["a", "b", "c"] {
            let mut ex = MockExchange::new(name);
            ex.fee = 0.0;
            for from in tokens {
                for to in tokens {
                    if from != to {
                        ex = ex.rate(from, to, 1.01);
                    }
                }
            }
            exchanges.push(ex);
        }
        let config = SearchConfig { max_path_length: 3, max_results: 1_000, ..Default::default() };
        let finder = finder(exchanges, config);
        let routes = finder
            .find_paths(SearchRequest::cycle(token(1), U256::from(ONE)).with_gas_price(U256::ZERO))
            .await
            .unwrap();

        assert!(!routes.is_empty());
        for route in &routes {
            assert!(route.len() <= 3);
            assert_eq!(route.start_token(), token(1));
            assert_eq!(route.end_token(), Some(token(1)));
            for pair in route.steps().windows(2) {
                assert_eq!(pair[0].token_out, pair[1].token_in);
            }
            let path = route.token_path();
            let inner = &path[1..path.len() - 1];
            let distinct: HashSet<_> = inner.iter().collect();
            assert_eq!(distinct.len(), inner.len(), "token revisited in {:?}", path);
            assert!(!inner.contains(&token(1)));
        }
        for pair in routes.windows(2) {
            assert!(pair[0].net_profit() >= pair[1].net_profit());
        }
    }

    /// 1 -> 2 -> 3 -> 1 all on x, for 1.08x before gas
    fn single_exchange_triangle() -> MockExchange {
        let mut x = MockExchange::new("x")
            .rate(token(1), token(2), 2.0)
            .rate(token(2), token(3), 3.0)
            .rate(token(3), token(1), 0.18);
        x.fee = 0.0;
        x.gas = 0;
        x
    }

    #[tokio::test]
    async fn test_unrelated_exchange_does_not_hide_reuse() {
        let request = || SearchRequest::cycle(token(1), U256::from(ONE)).with_gas_price(U256::ZERO);

        let alone = finder(vec![single_exchange_triangle()], SearchConfig::default());
        let alone = alone.find_paths(request()).await.unwrap();

        let unrelated = MockExchange::new("y").rate(token(4), token(5), 1.0);
        let crowded = finder(vec![single_exchange_triangle(), unrelated], SearchConfig::default());
        let crowded = crowded.find_paths(request()).await.unwrap();

        assert_eq!(alone.len(), 1);
        assert_eq!(alone[0].token_path(), vec![token(1), token(2), token(3), token(1)]);
        assert_eq!(alone[0].exchanges(), vec![ExchangeId::new("x"); 3]);
        assert_eq!(crowded.len(), 1);
        assert_eq!(crowded[0].token_path(), alone[0].token_path());
        assert_eq!(crowded[0].amount_out(), alone[0].amount_out());
    }

    #[tokio::test]
    async fn test_last_hop_only_quotes_closing_pairs() {
        let config = || SearchConfig { max_path_length: 2, ..Default::default() };
        let request = || SearchRequest::cycle(token(1), U256::from(ONE)).with_gas_price(U256::from(1u64));

        let plain = finder(two_exchange_arb(), config());
        let plain_routes = plain.find_paths(request()).await.unwrap();

        // y also lists 2 -> 9, which can never close a two-hop cycle
        let dead_end = vec![
            MockExchange::new("x").rate(token(1), token(2), 2000.0),
            MockExchange::new("y")
                .rate(token(2), token(1), 1.0 / 1980.0)
                .rate(token(2), token(9), 5.0),
        ];
        let with_dead_end = finder(dead_end, config());
        let routes = with_dead_end.find_paths(request()).await.unwrap();

        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].token_path(), plain_routes[0].token_path());
        assert_eq!(with_dead_end.stats().quotes_requested, plain.stats().quotes_requested);
    }

    #[tokio::test]
    async fn test_results_truncated() {
        let tokens = [token(1), token(2), token(3)];
        let mut ex = MockExchange::new("a");
        ex.fee = 0.0;
        for from in tokens {
            for to in tokens {
                if from != to {
                    ex = ex.rate(from, to, 1.01);
                }
            }
        }
        let finder = finder(vec![ex], SearchConfig::default());
        let routes = finder
            .find_paths(
                SearchRequest::cycle(token(1), U256::from(ONE))
                    .with_gas_price(U256::ZERO)
                    .with_max_results(1),
            )
            .await
            .unwrap();
        assert_eq!(routes.len(), 1);
    }

    #[tokio::test]
    async fn test_direct_route_deduplicated() {
        let finder = finder(vec![MockExchange::new("x").rate(token(1), token(2), 2000.0)], SearchConfig::default());
        let routes = finder
            .find_paths(SearchRequest::new(token(1), token(2), U256::from(ONE)).with_gas_price(U256::ZERO))
            .await
            .unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].len(), 1);
    }

    #[tokio::test]
    async fn test_multi_hop_step_carries_path() {
        let best = BestPath {
            path: vec![token(1), token(3), token(1)],
            amount_out: U256::from(ONE + ONE / 50),
            gas_estimate: 250_000,
        };
        let ex = MockExchange::new("agg").rate(token(1), token(3), 1.0).multi_hop(best);
        let finder = finder(vec![ex], SearchConfig::default());
        let routes = finder
            .find_paths(SearchRequest::cycle(token(1), U256::from(ONE)).with_gas_price(U256::ZERO))
            .await
            .unwrap();

        assert_eq!(routes.len(), 1);
        let step = &routes[0].steps()[0];
        assert!(step.is_multi_hop());
        assert_eq!(step.path.as_deref(), Some(&[token(1), token(3), token(1)][..]));
        assert_eq!(routes[0].gas_units(), 250_000);
    }

    #[tokio::test]
    async fn test_malformed_multi_hop_dropped() {
        let best = BestPath {
            path: vec![token(2), token(1)],
            amount_out: U256::from(2 * ONE),
            gas_estimate: 1,
        };
        let ex = MockExchange::new("agg").rate(token(1), token(3), 1.0).multi_hop(best);
        let finder = finder(vec![ex], SearchConfig::default());
        let routes = finder
            .find_paths(SearchRequest::cycle(token(1), U256::from(ONE)).with_gas_price(U256::ZERO))
            .await
            .unwrap();
        assert!(routes.is_empty());
        assert_eq!(finder.stats().adapter_errors, 1);
    }

    #[tokio::test]
    async fn test_denylist_blocks_tokens() {
        let config = SearchConfig { token_denylist: vec![token(2)], ..Default::default() };
        let finder = finder(two_exchange_arb(), config);
        let routes = finder
            .find_paths(SearchRequest::cycle(token(1), U256::from(ONE)).with_gas_price(U256::ZERO))
            .await
            .unwrap();
        assert!(routes.is_empty());
    }

    #[tokio::test]
    async fn test_adapter_errors_do_not_abort_search() {
        let exchanges = vec![
            MockExchange::new("x")
                .rate(token(1), token(2), 2000.0)
                .error(token(1), token(3), AdapterError::Unknown("rpc down".into()))
                .error(token(1), token(4), AdapterError::PriceImpactTooHigh),
            MockExchange::new("y").rate(token(2), token(1), 1.0 / 1980.0),
        ];
        let finder = finder(exchanges, SearchConfig::default());
        let routes = finder
            .find_paths(SearchRequest::cycle(token(1), U256::from(ONE)).with_gas_price(U256::ZERO))
            .await
            .unwrap();

        assert_eq!(routes.len(), 1);
        let stats = finder.stats();
        assert_eq!(stats.adapter_errors, 1);
        assert!(stats.branches_pruned >= 1);
    }

    #[tokio::test]
    async fn test_all_branches_failing_yields_empty() {
        let ex = MockExchange::new("x").error(token(1), token(2), AdapterError::Malformed("garbage".into()));
        let finder = finder(vec![ex], SearchConfig::default());
        let routes = finder
            .find_paths(SearchRequest::cycle(token(1), U256::from(ONE)))
            .await
            .unwrap();
        assert!(routes.is_empty());
    }

    #[tokio::test]
    async fn test_preferred_and_disabled_exchanges() {
        let config = SearchConfig {
            preferred_exchanges: vec!["y".into()],
            disabled_exchanges: vec!["z".into()],
            ..Default::default()
        };
        let exchanges = vec![MockExchange::new("x"), MockExchange::new("z"), MockExchange::new("y")];
        let finder = finder(exchanges, config);
        assert_eq!(finder.exchange_ids(), vec![ExchangeId::new("y"), ExchangeId::new("x")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_searches_are_serialized() {
        let exchanges = vec![
            MockExchange::new("x").rate(token(1), token(2), 2000.0).delay(50),
            MockExchange::new("y").rate(token(2), token(1), 1.0 / 1980.0).delay(50),
        ];
        let finder = Arc::new(finder(exchanges, SearchConfig::default()));
        let request = SearchRequest::cycle(token(1), U256::from(ONE)).with_gas_price(U256::ZERO);

        let started = tokio::time::Instant::now();
        finder.find_paths(request.clone()).await.unwrap();
        let single = started.elapsed();
        assert!(single >= Duration::from_millis(100));

        let started = tokio::time::Instant::now();
        let first = tokio::spawn({
            let finder = finder.clone();
            let request = request.clone();
            async move { finder.find_paths(request).await }
        });
        tokio::task::yield_now().await;
        assert!(finder.is_searching());
        let second = finder.find_paths(request).await.unwrap();
        let first = first.await.unwrap().unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert!(started.elapsed() >= single * 2);
        assert!(!finder.is_searching());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_lock() {
        let x = Arc::new(MockExchange::new("x").rate(token(1), token(2), 2000.0).delay(60_000));
        let y: Arc<dyn ExchangeAdapter> = Arc::new(MockExchange::new("y").rate(token(2), token(1), 1.0 / 1980.0));
        let config = SearchConfig { search_timeout_ms: 100, ..Default::default() };
        let finder = PathFinder::new(vec![x.clone() as Arc<dyn ExchangeAdapter>, y], chain(), config);
        let request = SearchRequest::cycle(token(1), U256::from(ONE)).with_gas_price(U256::ZERO);

        let err = finder.find_paths(request.clone()).await.unwrap_err();
        assert!(matches!(err, SearchError::Timeout(_)));
        assert!(!finder.is_searching());
        assert_eq!(finder.stats().timeouts, 1);

        x.delay_ms.store(0, Ordering::SeqCst);
        let routes = finder.find_paths(request).await.unwrap();
        assert_eq!(routes.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let finder = finder(two_exchange_arb(), SearchConfig::default());
        let err = finder
            .find_paths(SearchRequest::cycle(token(1), U256::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidRequest(_)));
    }
}
