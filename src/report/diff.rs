//! Report-to-report comparison

use crate::report::{CandidateEntry, Report};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// Before/after counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountDelta {
    pub before: usize,
    pub after: usize,
    pub delta: i64,
}

impl CountDelta {
    fn new(before: usize, after: usize) -> Self {
        Self {
            before,
            after,
            delta: after as i64 - before as i64,
        }
    }
}

/// Differences between a baseline report and a newer one
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportDiff {
    pub new_idor: Vec<CandidateEntry>,
    pub removed_idor: Vec<CandidateEntry>,
    pub unchanged_idor: Vec<CandidateEntry>,
    pub new_ids: Vec<String>,
    pub removed_ids: Vec<String>,
    pub flows: CountDelta,
    pub ids: CountDelta,
}

impl ReportDiff {
    pub fn has_changes(&self) -> bool {
        !self.new_idor.is_empty()
            || !self.removed_idor.is_empty()
            || !self.new_ids.is_empty()
            || !self.removed_ids.is_empty()
            || self.flows.delta != 0
    }
}

/// Compares candidates by value and tracked identifiers by key
pub fn diff_reports(before: &Report, after: &Report) -> ReportDiff {
    let values_before: HashSet<&str> = before
        .potential_idor
        .iter()
        .map(|c| c.id_value.as_str())
        .collect();
    let values_after: HashSet<&str> = after
        .potential_idor
        .iter()
        .map(|c| c.id_value.as_str())
        .collect();

    let (unchanged_idor, new_idor): (Vec<_>, Vec<_>) = after
        .potential_idor
        .iter()
        .cloned()
        .partition(|c| values_before.contains(c.id_value.as_str()));
    let removed_idor = before
        .potential_idor
        .iter()
        .filter(|c| !values_after.contains(c.id_value.as_str()))
        .cloned()
        .collect();

    let keys_before: BTreeSet<&str> = before.tracked_ids.keys().collect();
    let keys_after: BTreeSet<&str> = after.tracked_ids.keys().collect();

    ReportDiff {
        new_idor,
        removed_idor,
        unchanged_idor,
        new_ids: keys_after
            .difference(&keys_before)
            .map(|k| k.to_string())
            .collect(),
        removed_ids: keys_before
            .difference(&keys_after)
            .map(|k| k.to_string())
            .collect(),
        flows: CountDelta::new(before.summary.total_flows, after.summary.total_flows),
        ids: CountDelta::new(
            before.summary.total_unique_ids,
            after.summary.total_unique_ids,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, FlowRecord, IdOccurrence, IdType, Location};
    use crate::tracker::IdLedger;
    use chrono::Utc;

    fn report(used: &[&str], issued: &[&str]) -> Report {
        let mut flow = FlowRecord::bare("f", "GET", "https://a.com/x", Utc::now());
        let occ = |v: &&str, direction| IdOccurrence {
            value: v.to_string(),
            id_type: IdType::Numeric,
            location: Location::Query,
            field: None,
            url: "https://a.com/x".to_string(),
            method: "GET".to_string(),
            timestamp: Utc::now(),
            direction,
            flow_id: "f".to_string(),
        };
        flow.request_occurrences = used.iter().map(|v| occ(v, Direction::Request)).collect();
        flow.response_occurrences = issued.iter().map(|v| occ(v, Direction::Response)).collect();
        let flows = vec![flow];
        Report::build(&flows, &IdLedger::from_flows(&flows).finalize())
    }

    #[test]
    fn test_diff_candidates_and_ids() {
        let before = report(&["1001", "2002"], &[]);
        let after = report(&["2002", "3003"], &["1001"]);
        let diff = diff_reports(&before, &after);

        let ids = |c: &[CandidateEntry]| c.iter().map(|e| e.id_value.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&diff.new_idor), vec!["3003"]);
        assert_eq!(ids(&diff.removed_idor), vec!["1001"]);
        assert_eq!(ids(&diff.unchanged_idor), vec!["2002"]);
        assert_eq!(diff.new_ids, vec!["3003"]);
        assert!(diff.removed_ids.is_empty());
        assert_eq!(diff.ids.delta, 1);
        assert!(diff.has_changes());
    }

    #[test]
    fn test_identical_reports_have_no_changes() {
        let a = report(&["1001"], &[]);
        let diff = diff_reports(&a, &a.clone());
        assert!(!diff.has_changes());
        assert_eq!(diff.unchanged_idor.len(), 1);
    }
}
