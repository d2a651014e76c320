//! Origin/usage ledger keyed by identifier value and type
//!
//! The ledger is fed one flow at a time. Response occurrences establish an
//! identifier's origin (the first one only), request occurrences accumulate as
//! usages. An identifier that is used but never originated is an IDOR
//! candidate.

use crate::models::{Direction, FlowRecord, IdKey, IdOccurrence, IdorCandidate, TrackedId};
use std::collections::HashMap;
use tracing::debug;

/// Result of [`IdLedger::finalize`]
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    /// Every tracked identifier in first-seen order
    pub tracked: Vec<TrackedId>,
    pub potential_idor: Vec<IdorCandidate>,
}

impl LedgerSnapshot {
    pub fn ids_with_origin(&self) -> usize {
        self.tracked.iter().filter(|t| t.origin.is_some()).count()
    }

    pub fn ids_with_usage(&self) -> usize {
        self.tracked.iter().filter(|t| !t.usages.is_empty()).count()
    }

    pub fn get(&self, value: &str, id_type: &str) -> Option<&TrackedId> {
        self.tracked
            .iter()
            .find(|t| t.value == value && t.id_type.as_str() == id_type)
    }
}

/// Per-session identifier ledger
#[derive(Debug, Default)]
pub struct IdLedger {
    tracked: Vec<TrackedId>,
    index: HashMap<IdKey, usize>,
}

impl IdLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays a closed flow sequence
    pub fn from_flows<'a>(flows: impl IntoIterator<Item = &'a FlowRecord>) -> Self {
        let mut ledger = Self::new();
        for flow in flows {
            ledger.observe(flow);
        }
        ledger
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Records a flow: request side first, then response side
    pub fn observe(&mut self, flow: &FlowRecord) {
        for occurrence in &flow.request_occurrences {
            self.record(occurrence);
        }
        for occurrence in &flow.response_occurrences {
            self.record(occurrence);
        }
    }

    /// Records a single occurrence
    pub fn record(&mut self, occurrence: &IdOccurrence) {
        let key = occurrence.key();
        let slot = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                self.tracked.push(TrackedId::new(
                    occurrence.value.clone(),
                    occurrence.id_type.clone(),
                    occurrence.timestamp,
                ));
                self.index.insert(key, self.tracked.len() - 1);
                self.tracked.len() - 1
            }
        };
        let tracked = &mut self.tracked[slot];

        match occurrence.direction {
            Direction::Response => {
                if tracked.origin.is_none() {
                    debug!(
                        "Origin of {} ({}) at {} {}",
                        tracked.value, tracked.id_type, occurrence.method, occurrence.url
                    );
                    tracked.origin = Some(occurrence.clone());
                }
            }
            Direction::Request => {
                debug!(
                    "Usage of {} ({}) at {} {}",
                    tracked.value, tracked.id_type, occurrence.method, occurrence.url
                );
                tracked.usages.push(occurrence.clone());
            }
        }
    }

    pub fn get(&self, key: &IdKey) -> Option<&TrackedId> {
        self.index.get(key).map(|&i| &self.tracked[i])
    }

    /// Classifies candidates; does not consume or alter the ledger
    pub fn finalize(&self) -> LedgerSnapshot {
        let potential_idor = self
            .tracked
            .iter()
            .filter(|t| t.is_candidate())
            .map(IdorCandidate::from_tracked)
            .collect();

        LedgerSnapshot {
            tracked: self.tracked.clone(),
            potential_idor,
        }
    }
}
