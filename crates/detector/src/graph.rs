//! Token/pair multigraph built from a market snapshot

use alloy_primitives::Address;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

use dexarb_core::PairQuote;

/// Directed multigraph: tokens are nodes, each priced pool direction is an edge
///
/// Nodes and edges live in petgraph's index arenas; the graph is rebuilt
/// wholesale for every snapshot.
#[derive(Debug, Clone, Default)]
pub struct PairGraph {
    graph: DiGraph<Address, PairQuote, u32>,
    index: HashMap<Address, NodeIndex<u32>>,
}

impl PairGraph {
    /// Each pair contributes its own direction and the inverse-priced one
    pub fn build(pairs: &[PairQuote]) -> Self {
        let mut graph = Self::default();
        for pair in pairs {
            if pair.token_in == pair.token_out {
                continue;
            }
            let Some(inverse) = pair.inverse() else {
                continue;
            };
            graph.add_edge(pair.clone());
            graph.add_edge(inverse);
        }
        graph
    }

    fn add_edge(&mut self, pair: PairQuote) {
        let from = self.node(pair.token_in);
        let to = self.node(pair.token_out);
        self.graph.add_edge(from, to, pair);
    }

    fn node(&mut self, token: Address) -> NodeIndex<u32> {
        if let Some(idx) = self.index.get(&token) {
            return *idx;
        }
        let idx = self.graph.add_node(token);
        self.index.insert(token, idx);
        idx
    }

    pub fn token_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node_indices(&self) -> Vec<NodeIndex<u32>> {
        self.graph.node_indices().collect()
    }

    pub fn node_index(&self, token: Address) -> Option<NodeIndex<u32>> {
        self.index.get(&token).copied()
    }

    pub fn token(&self, idx: NodeIndex<u32>) -> Address {
        self.graph[idx]
    }

    /// Distinct tokens reachable in one hop, in a stable order
    pub fn neighbors(&self, idx: NodeIndex<u32>) -> Vec<NodeIndex<u32>> {
        let mut out: Vec<NodeIndex<u32>> =
            self.graph.neighbors_directed(idx, Direction::Outgoing).collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Parallel edges from `from` to `to`, one per exchange pool
    pub fn edges_between(&self, from: Address, to: Address) -> Vec<&PairQuote> {
        let (Some(a), Some(b)) = (self.node_index(from), self.node_index(to)) else {
            return vec![];
        };
        self.graph
            .edges(a)
            .filter(|e| e.target() == b)
            .map(|e| e.weight())
            .collect()
    }

    /// Edge with the best post-fee rate
    pub fn best_edge(&self, from: Address, to: Address) -> Option<&PairQuote> {
        self.edges_between(from, to)
            .into_iter()
            .filter(|p| p.effective_rate().is_finite() && p.effective_rate() > 0.0)
            .max_by(|a, b| {
                a.effective_rate()
                    .partial_cmp(&b.effective_rate())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}
