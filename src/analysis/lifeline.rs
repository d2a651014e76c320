//! Identifier lifelines
//!
//! Follows each identifier value across the flow sequence: the first and last
//! flow it appears in, every response that carried it and every request that
//! sent it. Long-lived values tend to be business entities (accounts, tenants);
//! short-lived ones are transient (CSRF tokens, temporary ids).

use crate::models::{Direction, FlowRecord, IdType};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// One appearance of a value in a flow
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifelineEvent {
    pub flow: usize,
    pub direction: Direction,
    pub method: String,
    pub path: String,
    /// JSON field path, else the location name
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lifeline {
    pub value: String,
    pub id_type: IdType,
    pub first: usize,
    pub last: usize,
    /// Number of request occurrences
    pub use_count: usize,
    pub events: Vec<LifelineEvent>,
}

impl Lifeline {
    /// Flows covered from first to last appearance, inclusive
    pub fn span(&self) -> usize {
        self.last - self.first + 1
    }

    pub fn span_percent(&self, total_flows: usize) -> f64 {
        if total_flows == 0 {
            return 0.0;
        }
        self.span() as f64 * 100.0 / total_flows as f64
    }

    /// One character per cell: `○` issued, `●` sent, `◆` both, `─` alive
    pub fn timeline(&self, total_flows: usize, width: usize) -> String {
        let cells = width.min(total_flows);
        (0..cells)
            .map(|cell| {
                let flow = cell * total_flows / cells;
                if flow < self.first || flow > self.last {
                    return ' ';
                }
                let mut issued = false;
                let mut sent = false;
                for event in self.events.iter().filter(|e| e.flow * cells / total_flows == cell) {
                    match event.direction {
                        Direction::Response => issued = true,
                        Direction::Request => sent = true,
                    }
                }
                match (issued, sent) {
                    (true, true) => '◆',
                    (true, false) => '○',
                    (false, true) => '●',
                    (false, false) => '─',
                }
            })
            .collect()
    }
}

/// Lifeline ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifelineSort {
    /// Longest span first
    #[default]
    Lifespan,
    /// Most request uses first
    Uses,
    /// Earliest appearance first
    First,
}

impl FromStr for LifelineSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lifespan" => Ok(LifelineSort::Lifespan),
            "uses" => Ok(LifelineSort::Uses),
            "first" => Ok(LifelineSort::First),
            other => Err(format!(
                "unknown sort '{other}' (expected lifespan, uses or first)"
            )),
        }
    }
}

impl fmt::Display for LifelineSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifelineSort::Lifespan => write!(f, "lifespan"),
            LifelineSort::Uses => write!(f, "uses"),
            LifelineSort::First => write!(f, "first"),
        }
    }
}

/// Lifelines for every value, in first-appearance order.
///
/// Within a flow, response occurrences are recorded before request ones.
pub fn build_lifelines(flows: &[FlowRecord]) -> Vec<Lifeline> {
    let mut lifelines: Vec<Lifeline> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (i, flow) in flows.iter().enumerate() {
        let path = flow.path();
        let occurrences = flow
            .response_occurrences
            .iter()
            .chain(flow.request_occurrences.iter());

        for occ in occurrences.filter(|o| !o.value.is_empty()) {
            let slot = *index.entry(occ.value.clone()).or_insert_with(|| {
                lifelines.push(Lifeline {
                    value: occ.value.clone(),
                    id_type: occ.id_type.clone(),
                    first: i,
                    last: i,
                    use_count: 0,
                    events: Vec::new(),
                });
                lifelines.len() - 1
            });

            let lifeline = &mut lifelines[slot];
            lifeline.last = i;
            if occ.direction == Direction::Request {
                lifeline.use_count += 1;
            }
            lifeline.events.push(LifelineEvent {
                flow: i,
                direction: occ.direction,
                method: flow.method.clone(),
                path: path.clone(),
                field: occ
                    .field
                    .clone()
                    .unwrap_or_else(|| occ.location.to_string()),
            });
        }
    }
    lifelines
}

/// Keeps lifelines with at least `min_uses` request uses, ordered by `sort`
pub fn select(mut lifelines: Vec<Lifeline>, min_uses: usize, sort: LifelineSort) -> Vec<Lifeline> {
    lifelines.retain(|l| l.use_count >= min_uses);
    match sort {
        LifelineSort::Lifespan => lifelines.sort_by(|a, b| b.span().cmp(&a.span())),
        LifelineSort::Uses => lifelines.sort_by(|a, b| b.use_count.cmp(&a.use_count)),
        LifelineSort::First => lifelines.sort_by_key(|l| l.first),
    }
    lifelines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IdOccurrence, Location};
    use chrono::Utc;

    fn flow(id: &str, method: &str, path: &str, req: &[&str], resp: &[&str]) -> FlowRecord {
        let url = format!("https://api.example.com{path}");
        let occ = |value: &str, direction| IdOccurrence {
            value: value.to_string(),
            id_type: IdType::Numeric,
            location: Location::UrlPath,
            field: (direction == Direction::Response).then(|| "id".to_string()),
            url: url.clone(),
            method: method.to_string(),
            timestamp: Utc::now(),
            direction,
            flow_id: id.to_string(),
        };
        let mut f = FlowRecord::bare(id, method, url.clone(), Utc::now());
        f.request_occurrences = req.iter().map(|v| occ(v, Direction::Request)).collect();
        f.response_occurrences = resp.iter().map(|v| occ(v, Direction::Response)).collect();
        f
    }

    fn sample() -> Vec<FlowRecord> {
        vec![
            flow("a", "POST", "/login", &[], &["1001"]),
            flow("b", "GET", "/csrf", &[], &["5555"]),
            flow("c", "POST", "/form/5555", &["5555"], &[]),
            flow("d", "GET", "/users/1001", &["1001"], &["1001"]),
            flow("e", "GET", "/orders/9999", &["9999"], &[]),
            flow("f", "DELETE", "/users/1001", &["1001"], &[]),
        ]
    }

    #[test]
    fn test_lifeline_bounds_and_events() {
        let lifelines = build_lifelines(&sample());
        let values: Vec<&str> = lifelines.iter().map(|l| l.value.as_str()).collect();
        assert_eq!(values, vec!["1001", "5555", "9999"]);

        let user = &lifelines[0];
        assert_eq!((user.first, user.last), (0, 5));
        assert_eq!(user.span(), 6);
        assert_eq!(user.use_count, 2);

        let directions: Vec<(usize, Direction)> =
            user.events.iter().map(|e| (e.flow, e.direction)).collect();
        assert_eq!(
            directions,
            vec![
                (0, Direction::Response),
                (3, Direction::Response),
                (3, Direction::Request),
                (5, Direction::Request),
            ]
        );
        assert_eq!(user.events[0].path, "/login");
        assert_eq!(user.events[0].field, "id");
        assert_eq!(user.events[2].field, "url_path");
    }

    #[test]
    fn test_select_filters_and_sorts() {
        let lifelines = build_lifelines(&sample());

        let by_span = select(lifelines.clone(), 1, LifelineSort::Lifespan);
        let values: Vec<&str> = by_span.iter().map(|l| l.value.as_str()).collect();
        assert_eq!(values, vec!["1001", "5555", "9999"]);

        let by_uses = select(lifelines.clone(), 2, LifelineSort::Uses);
        assert_eq!(by_uses.len(), 1);
        assert_eq!(by_uses[0].value, "1001");

        let issued_only = vec![flow("a", "GET", "/x", &[], &["4444"])];
        assert!(select(build_lifelines(&issued_only), 1, LifelineSort::First).is_empty());
        assert_eq!(select(build_lifelines(&issued_only), 0, LifelineSort::First).len(), 1);
    }

    #[test]
    fn test_timeline_marks() {
        let lifelines = build_lifelines(&sample());
        assert_eq!(lifelines[0].timeline(6, 60), "○──◆─●");
        assert_eq!(lifelines[1].timeline(6, 60), " ○●   ");
        assert!((lifelines[1].span_percent(6) - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_sort_parsing() {
        assert_eq!("USES".parse::<LifelineSort>(), Ok(LifelineSort::Uses));
        assert!("oldest".parse::<LifelineSort>().is_err());
        assert_eq!(LifelineSort::default().to_string(), "lifespan");
    }
}
