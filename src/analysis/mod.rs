//! Pure analyses over a closed flow sequence

pub mod auth;
pub mod chain;
pub mod graph;
pub mod lifeline;
pub mod scoring;
pub mod url;

pub use chain::{ChainAnalyzer, ChainNode, ChainOptions, ChainTree};
pub use graph::{DependencyGraph, Edge};
pub use lifeline::{build_lifelines, Lifeline, LifelineSort};
pub use scoring::{rank, score_candidate, RiskLevel, RiskScore};
