//! Capture session: the single owner of the ledger and the flow sequence

use crate::config::TrackerConfig;
use crate::error::Result;
use crate::models::{Exchange, FlowRecord};
use crate::report::Report;
use crate::tracker::{FlowAssembler, IdLedger, LedgerSnapshot};
use tracing::{debug, info};

/// Accumulates flows in arrival order and feeds them to the ledger
#[derive(Debug)]
pub struct CaptureSession {
    config: TrackerConfig,
    assembler: FlowAssembler,
    ledger: IdLedger,
    flows: Vec<FlowRecord>,
    filtered: usize,
}

impl CaptureSession {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        let assembler = FlowAssembler::new(&config)?;
        Ok(Self {
            config,
            assembler,
            ledger: IdLedger::new(),
            flows: Vec::new(),
            filtered: 0,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn flows(&self) -> &[FlowRecord] {
        &self.flows
    }

    pub fn ledger(&self) -> &IdLedger {
        &self.ledger
    }

    /// Number of exchanges dropped by domain or extension filters
    pub fn filtered_count(&self) -> usize {
        self.filtered
    }

    /// Assembles and records one exchange.
    ///
    /// Returns the new flow, or `None` when the exchange was filtered out and
    /// filtered flows are not kept.
    pub fn ingest(&mut self, exchange: &Exchange) -> Option<&FlowRecord> {
        if !self.assembler.in_scope(exchange) {
            self.filtered += 1;
            if !self.config.keep_filtered_flows {
                debug!("Skipping out-of-scope {}", exchange.request.url);
                return None;
            }
        }

        // filtered exchanges yield no occurrences, only the bare flow
        let flow = self.assembler.assemble(exchange);
        self.ledger.observe(&flow);
        self.flows.push(flow);
        self.flows.last()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.finalize()
    }

    /// Builds the persisted report from the current state
    pub fn report(&self) -> Report {
        let snapshot = self.snapshot();
        info!(
            "Session closed: {} flows, {} unique IDs, {} potential IDOR",
            self.flows.len(),
            snapshot.tracked.len(),
            snapshot.potential_idor.len()
        );
        Report::build(&self.flows, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HttpRequest, HttpResponse};

    #[test]
    fn test_filtered_exchange_dropped_by_default() {
        let config = TrackerConfig {
            target_domains: vec!["api.example.com".to_string()],
            ..TrackerConfig::default()
        };
        let mut session = CaptureSession::new(config).expect("session");
        assert!(session
            .ingest(&Exchange::new(HttpRequest::new("GET", "https://cdn.other.net/x/1001")))
            .is_none());
        assert!(session
            .ingest(&Exchange::new(HttpRequest::new("GET", "https://api.example.com/x/1001")))
            .is_some());
        assert_eq!(session.flows().len(), 1);
        assert_eq!(session.filtered_count(), 1);
    }

    #[test]
    fn test_keep_filtered_flows_records_bare_flow() {
        let config = TrackerConfig {
            keep_filtered_flows: true,
            ..TrackerConfig::default()
        };
        let mut session = CaptureSession::new(config).expect("session");
        let flow = session
            .ingest(
                &Exchange::new(HttpRequest::new("GET", "https://example.com/logo/1001.png"))
                    .with_response(HttpResponse::new(200)),
            )
            .expect("kept");
        assert!(flow.request_occurrences.is_empty());
        assert_eq!(session.ledger().len(), 0);
    }
}
