//! Arbitrage route discovery
//!
//! Features:
//! - Token/pair multigraph over a market snapshot
//! - Parallel cycle enumeration with rayon
//! - Live-quote recursive search across exchange adapters
//! - Opportunity scoring and viability filtering

pub mod graph;
pub mod cycles;
pub mod visited;
pub mod path_finder;
pub mod evaluator;

pub use graph::PairGraph;
pub use cycles::CycleFinder;
pub use visited::VisitedSet;
pub use path_finder::{PathFinder, SearchRequest, SearchStats};
pub use evaluator::{MarketConditions, OpportunityEvaluator, PriceSnapshot};
