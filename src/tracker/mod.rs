//! Identifier extraction and origin/usage tracking

pub mod extractor;
pub mod flow;
pub mod ledger;
pub mod matcher;
pub mod scope;

pub use extractor::OccurrenceExtractor;
pub use flow::FlowAssembler;
pub use ledger::{IdLedger, LedgerSnapshot};
pub use matcher::PatternMatcher;
pub use scope::Scope;
