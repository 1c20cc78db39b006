//! Offline cycle detection over a pair snapshot
//!
//! Works purely from snapshot prices, no network calls. Used as a cheap
//! pre-filter before spending live quotes on a route.

use alloy_primitives::{Address, I256, U256};
use petgraph::graph::NodeIndex;
use rayon::prelude::*;
use tracing::debug;

use dexarb_core::{f64_to_u256, u256_to_f64, CycleConfig, Route, Step};

use crate::graph::PairGraph;

/// Depth-bounded simple-cycle enumeration
pub struct CycleFinder {
    config: CycleConfig,
}

impl CycleFinder {
    pub fn new(config: CycleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    /// Cycles starting from every token, closing token repeated
    pub fn find_cycles(&self, graph: &PairGraph, max_len: usize) -> Vec<Vec<Address>> {
        graph
            .node_indices()
            .par_iter()
            .flat_map_iter(|start| cycles_from(graph, *start, max_len))
            .collect()
    }

    /// Cycles through `start` holding at most `max_len` distinct tokens
    pub fn find_cycles_from(&self, graph: &PairGraph, start: Address, max_len: usize) -> Vec<Vec<Address>> {
        match graph.node_index(start) {
            Some(idx) => cycles_from(graph, idx, max_len),
            None => vec![],
        }
    }

    /// Price a cycle from its best edges and scale it to `amount_in`
    ///
    /// Returns `None` when a hop has no usable edge or the output ratio does
    /// not clear `min_profit_bps`.
    pub fn replay(
        &self,
        graph: &PairGraph,
        cycle: &[Address],
        amount_in: U256,
        gas_price: U256,
    ) -> Option<Route> {
        if cycle.len() < 4 || cycle.first() != cycle.last() {
            return None;
        }

        let input = u256_to_f64(amount_in);
        let mut ratio = 1.0;
        let mut steps = Vec::with_capacity(cycle.len() - 1);
        let mut step_in = amount_in;

        for hop in cycle.windows(2) {
            let Some(edge) = graph.best_edge(hop[0], hop[1]) else {
                debug!("Cycle edge {} -> {} missing, discarding", hop[0], hop[1]);
                return None;
            };
            ratio *= edge.effective_rate();
            let step_out = f64_to_u256(input * ratio);

            let mut step = Step::new(
                edge.exchange.clone(),
                hop[0],
                hop[1],
                step_in,
                step_out,
                self.config.gas_per_hop,
            )
            .with_liquidity(edge.liquidity);
            if let Some(pool) = edge.pool_address {
                step = step.with_pool(pool);
            }
            steps.push(step);
            step_in = step_out;
        }

        let threshold = 1.0 + self.config.min_profit_bps / 10_000.0;
        if !(ratio > threshold) {
            return None;
        }

        Route::from_steps(cycle[0], amount_in, gas_price, steps).ok()
    }

    /// Profitable cycles through `start`, best first
    pub fn scan(&self, graph: &PairGraph, start: Address, amount_in: U256, gas_price: U256) -> Vec<Route> {
        let cycles = self.find_cycles_from(graph, start, self.config.max_cycle_length);
        let mut routes: Vec<Route> = cycles
            .par_iter()
            .filter_map(|cycle| self.replay(graph, cycle, amount_in, gas_price))
            .filter(|route| route.is_profitable(I256::ZERO))
            .collect();

        routes.sort_by(|a, b| b.net_profit().cmp(&a.net_profit()));
        debug!(
            "Cycle scan from {}: {} cycles, {} profitable",
            start,
            cycles.len(),
            routes.len()
        );
        routes
    }
}

impl Default for CycleFinder {
    fn default() -> Self {
        Self::new(CycleConfig::default())
    }
}

fn cycles_from(graph: &PairGraph, start: NodeIndex<u32>, max_len: usize) -> Vec<Vec<Address>> {
    let mut out = Vec::new();
    let mut path = vec![start];
    dfs(graph, start, start, &mut path, max_len, &mut out);
    out
}

fn dfs(
    graph: &PairGraph,
    start: NodeIndex<u32>,
    current: NodeIndex<u32>,
    path: &mut Vec<NodeIndex<u32>>,
    max_len: usize,
    out: &mut Vec<Vec<Address>>,
) {
    for next in graph.neighbors(current) {
        if next == start {
            // Two tokens is just a round trip through one pair
            if path.len() > 2 {
                let mut cycle: Vec<Address> = path.iter().map(|idx| graph.token(*idx)).collect();
                cycle.push(graph.token(start));
                out.push(cycle);
            }
            continue;
        }
        if path.contains(&next) || path.len() >= max_len {
            continue;
        }
        path.push(next);
        dfs(graph, start, next, path, max_len, out);
        path.pop();
    }
}
