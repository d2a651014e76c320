//! Persisted report model
//!
//! A report carries the flow sequence (the only artifact every analysis needs)
//! plus the finalized ledger view: tracked identifiers and IDOR candidates.
//! Loaded reports convert back into [`FlowRecord`]s so the ledger, graph and
//! chains can be rebuilt without the original traffic.

pub mod csv;
pub mod diff;
pub mod json;
pub mod sarif;

use crate::models::{
    AuthContext, Direction, FlowRecord, IdOccurrence, IdType, IdorCandidate, Location, TrackedId,
};
use crate::tracker::LedgerSnapshot;
use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total_unique_ids: usize,
    pub ids_with_origin: usize,
    pub ids_with_usage: usize,
    pub total_flows: usize,
}

/// Identifier as listed on a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdRef {
    pub value: String,
    #[serde(rename = "type")]
    pub id_type: IdType,
    pub location: Location,
    #[serde(default)]
    pub field: Option<String>,
}

impl From<&IdOccurrence> for IdRef {
    fn from(occurrence: &IdOccurrence) -> Self {
        Self {
            value: occurrence.value.clone(),
            id_type: occurrence.id_type.clone(),
            location: occurrence.location,
            field: occurrence.field.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEntry {
    pub flow_id: String,
    pub method: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub request_ids: Vec<IdRef>,
    #[serde(default)]
    pub response_ids: Vec<IdRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_context: Option<AuthContext>,
}

impl FlowEntry {
    pub fn from_flow(flow: &FlowRecord) -> Self {
        Self {
            flow_id: flow.flow_id.clone(),
            method: flow.method.clone(),
            url: flow.url.clone(),
            timestamp: flow.timestamp,
            request_ids: flow.request_occurrences.iter().map(IdRef::from).collect(),
            response_ids: flow.response_occurrences.iter().map(IdRef::from).collect(),
            status_code: flow.status_code,
            request_headers: flow.request_headers.clone(),
            request_body: flow.request_body.clone(),
            response_headers: flow.response_headers.clone(),
            response_body: flow.response_body.clone(),
            auth_context: flow.auth_context.clone(),
        }
    }

    /// Rebuilds the flow; occurrences inherit the flow's URL, method and time
    pub fn to_flow(&self) -> FlowRecord {
        let occurrence = |id: &IdRef, direction| IdOccurrence {
            value: id.value.clone(),
            id_type: id.id_type.clone(),
            location: id.location,
            field: id.field.clone(),
            url: self.url.clone(),
            method: self.method.clone(),
            timestamp: self.timestamp,
            direction,
            flow_id: self.flow_id.clone(),
        };

        let mut flow = FlowRecord::bare(
            self.flow_id.clone(),
            self.method.clone(),
            self.url.clone(),
            self.timestamp,
        );
        flow.request_occurrences = self
            .request_ids
            .iter()
            .map(|id| occurrence(id, Direction::Request))
            .collect();
        flow.response_occurrences = self
            .response_ids
            .iter()
            .map(|id| occurrence(id, Direction::Response))
            .collect();
        flow.status_code = self.status_code;
        flow.request_headers = self.request_headers.clone();
        flow.request_body = self.request_body.clone();
        flow.response_headers = self.response_headers.clone();
        flow.response_body = self.response_body.clone();
        flow.auth_context = self.auth_context.clone();
        flow
    }
}

/// Origin or usage as persisted under a tracked identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccurrenceEntry {
    pub url: String,
    pub method: String,
    pub location: Location,
    #[serde(default)]
    pub field_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
}

impl OccurrenceEntry {
    pub fn to_occurrence(
        &self,
        value: &str,
        id_type: &IdType,
        direction: Direction,
    ) -> IdOccurrence {
        IdOccurrence {
            value: value.to_string(),
            id_type: id_type.clone(),
            location: self.location,
            field: self.field_name.clone(),
            url: self.url.clone(),
            method: self.method.clone(),
            timestamp: self.timestamp,
            direction,
            flow_id: self.flow_id.clone().unwrap_or_default(),
        }
    }
}

impl From<&IdOccurrence> for OccurrenceEntry {
    fn from(occurrence: &IdOccurrence) -> Self {
        Self {
            url: occurrence.url.clone(),
            method: occurrence.method.clone(),
            location: occurrence.location,
            field_name: occurrence.field.clone(),
            timestamp: occurrence.timestamp,
            flow_id: Some(occurrence.flow_id.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntry {
    pub value: String,
    #[serde(rename = "type")]
    pub id_type: IdType,
    pub first_seen: DateTime<Utc>,
    pub origin: Option<OccurrenceEntry>,
    pub usage_count: usize,
    #[serde(default)]
    pub usages: Vec<OccurrenceEntry>,
}

impl TrackedEntry {
    pub fn from_tracked(tracked: &TrackedId) -> Self {
        Self {
            value: tracked.value.clone(),
            id_type: tracked.id_type.clone(),
            first_seen: tracked.first_seen,
            origin: tracked.origin.as_ref().map(OccurrenceEntry::from),
            usage_count: tracked.usages.len(),
            usages: tracked.usages.iter().map(OccurrenceEntry::from).collect(),
        }
    }

    pub fn is_candidate(&self) -> bool {
        !self.usages.is_empty() && self.origin.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEntry {
    pub id_value: String,
    pub id_type: IdType,
    pub usages: Vec<OccurrenceEntry>,
    pub reason: String,
}

impl CandidateEntry {
    pub fn from_candidate(candidate: &IdorCandidate) -> Self {
        Self {
            id_value: candidate.id_value.clone(),
            id_type: candidate.id_type.clone(),
            usages: candidate.usages.iter().map(OccurrenceEntry::from).collect(),
            reason: candidate.reason.clone(),
        }
    }

    pub fn to_candidate(&self) -> IdorCandidate {
        IdorCandidate {
            id_value: self.id_value.clone(),
            id_type: self.id_type.clone(),
            usages: self
                .usages
                .iter()
                .map(|u| u.to_occurrence(&self.id_value, &self.id_type, Direction::Request))
                .collect(),
            reason: self.reason.clone(),
        }
    }
}

/// Tracked identifiers keyed by value, kept in first-seen order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackedIds(pub Vec<(String, TrackedEntry)>);

impl TrackedIds {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = &TrackedEntry> {
        self.0.iter().map(|(_, e)| e)
    }

    pub fn get(&self, key: &str) -> Option<&TrackedEntry> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, e)| e)
    }
}

impl Serialize for TrackedIds {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, entry) in &self.0 {
            map.serialize_entry(key, entry)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TrackedIds {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct TrackedVisitor;

        impl<'de> Visitor<'de> for TrackedVisitor {
            type Value = TrackedIds;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of identifier key to tracked entry")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<TrackedIds, A::Error> {
                let mut entries = Vec::new();
                while let Some((key, entry)) = map.next_entry::<String, TrackedEntry>()? {
                    entries.push((key, entry));
                }
                Ok(TrackedIds(entries))
            }
        }

        deserializer.deserialize_map(TrackedVisitor)
    }
}

/// Complete persisted report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub summary: Summary,
    pub flows: Vec<FlowEntry>,
    pub tracked_ids: TrackedIds,
    pub potential_idor: Vec<CandidateEntry>,
}

impl Report {
    /// Builds a report from a closed flow sequence and its ledger snapshot
    pub fn build(flows: &[FlowRecord], snapshot: &LedgerSnapshot) -> Self {
        let mut used_keys: HashSet<String> = HashSet::new();
        let mut tracked = Vec::with_capacity(snapshot.tracked.len());
        for t in &snapshot.tracked {
            let key = if used_keys.contains(&t.value) {
                format!("{}:{}", t.id_type, t.value)
            } else {
                t.value.clone()
            };
            used_keys.insert(key.clone());
            tracked.push((key, TrackedEntry::from_tracked(t)));
        }

        Self {
            summary: Summary {
                total_unique_ids: snapshot.tracked.len(),
                ids_with_origin: snapshot.ids_with_origin(),
                ids_with_usage: snapshot.ids_with_usage(),
                total_flows: flows.len(),
            },
            flows: flows.iter().map(FlowEntry::from_flow).collect(),
            tracked_ids: TrackedIds(tracked),
            potential_idor: snapshot
                .potential_idor
                .iter()
                .map(CandidateEntry::from_candidate)
                .collect(),
        }
    }

    /// Flow records in report order
    pub fn to_flows(&self) -> Vec<FlowRecord> {
        self.flows.iter().map(FlowEntry::to_flow).collect()
    }

    /// Candidate list as persisted
    pub fn candidates(&self) -> Vec<IdorCandidate> {
        self.potential_idor
            .iter()
            .map(CandidateEntry::to_candidate)
            .collect()
    }

    /// Rebuilds the candidate list from `tracked_ids` alone
    pub fn reconstruct_candidates(&self) -> Vec<CandidateEntry> {
        self.tracked_ids
            .entries()
            .filter(|e| e.is_candidate())
            .map(|e| CandidateEntry {
                id_value: e.value.clone(),
                id_type: e.id_type.clone(),
                usages: e.usages.clone(),
                reason: crate::models::IDOR_REASON.to_string(),
            })
            .collect()
    }

    /// Internal consistency problems (empty = consistent)
    pub fn consistency_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.summary.total_flows != self.flows.len() {
            errors.push(format!(
                "summary.total_flows is {} but {} flows are present",
                self.summary.total_flows,
                self.flows.len()
            ));
        }
        if self.summary.total_unique_ids != self.tracked_ids.len() {
            errors.push(format!(
                "summary.total_unique_ids is {} but {} ids are tracked",
                self.summary.total_unique_ids,
                self.tracked_ids.len()
            ));
        }
        let with_origin = self.tracked_ids.entries().filter(|e| e.origin.is_some()).count();
        if self.summary.ids_with_origin != with_origin {
            errors.push(format!(
                "summary.ids_with_origin is {} but {with_origin} ids have an origin",
                self.summary.ids_with_origin
            ));
        }
        let with_usage = self.tracked_ids.entries().filter(|e| !e.usages.is_empty()).count();
        if self.summary.ids_with_usage != with_usage {
            errors.push(format!(
                "summary.ids_with_usage is {} but {with_usage} ids have usages",
                self.summary.ids_with_usage
            ));
        }

        for (key, entry) in &self.tracked_ids.0 {
            if entry.usage_count != entry.usages.len() {
                errors.push(format!(
                    "tracked_ids[{key}].usage_count is {} but {} usages are listed",
                    entry.usage_count,
                    entry.usages.len()
                ));
            }
            let typed_key = format!("{}:{}", entry.id_type, entry.value);
            if key != &entry.value && key != &typed_key {
                errors.push(format!("tracked_ids key {key} does not match value {}", entry.value));
            }
        }

        if self.reconstruct_candidates() != self.potential_idor {
            errors.push("potential_idor does not match tracked_ids".to_string());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::IdLedger;

    fn flow(id: &str, path: &str, req: &[(&str, IdType)], resp: &[(&str, IdType)]) -> FlowRecord {
        let url = format!("https://api.example.com{path}");
        let ts = Utc::now();
        let mut f = FlowRecord::bare(id, "GET", url.clone(), ts);
        let occ = |(value, id_type): &(&str, IdType), direction| IdOccurrence {
            value: value.to_string(),
            id_type: id_type.clone(),
            location: Location::Body,
            field: Some("id".to_string()),
            url: url.clone(),
            method: "GET".to_string(),
            timestamp: ts,
            direction,
            flow_id: id.to_string(),
        };
        f.request_occurrences = req.iter().map(|o| occ(o, Direction::Request)).collect();
        f.response_occurrences = resp.iter().map(|o| occ(o, Direction::Response)).collect();
        f
    }

    #[test]
    fn test_colliding_values_get_typed_keys() {
        let custom = IdType::Custom("account".to_string());
        let flows = vec![
            flow("a", "/x", &[], &[("12345", IdType::Numeric)]),
            flow("b", "/y", &[("12345", custom.clone())], &[]),
        ];
        let report = Report::build(&flows, &IdLedger::from_flows(&flows).finalize());
        let keys: Vec<&str> = report.tracked_ids.keys().collect();
        assert_eq!(keys, vec!["12345", "account:12345"]);
        assert!(report.consistency_errors().is_empty());
    }

    #[test]
    fn test_flows_round_trip_through_entries() {
        let flows = vec![flow(
            "a",
            "/x",
            &[("1001", IdType::Numeric)],
            &[("2002", IdType::Uuid)],
        )];
        let report = Report::build(&flows, &IdLedger::from_flows(&flows).finalize());
        let rebuilt = report.to_flows();
        assert_eq!(rebuilt[0].request_occurrences, flows[0].request_occurrences);
        assert_eq!(rebuilt[0].response_occurrences[0].value, "2002");
    }

    #[test]
    fn test_consistency_errors_detect_tampering() {
        let flows = vec![flow("a", "/x", &[("9999", IdType::Numeric)], &[])];
        let mut report = Report::build(&flows, &IdLedger::from_flows(&flows).finalize());
        assert!(report.consistency_errors().is_empty());

        report.potential_idor.clear();
        report.summary.total_flows = 5;
        let errors = report.consistency_errors();
        assert_eq!(errors.len(), 2);
    }
}
