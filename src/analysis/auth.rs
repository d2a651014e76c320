//! Cross-user access detection from auth fingerprints
//!
//! When the same identifier hits the same API pattern under more than one
//! credential fingerprint, different users are reaching the same object. That
//! is the strongest signal available without replaying requests.

use crate::analysis::url::api_pattern;
use crate::models::FlowRecord;
use std::collections::{BTreeMap, BTreeSet};

/// One identifier/endpoint pair requested by several auth contexts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossUserAccess {
    pub id_value: String,
    /// `METHOD /normalized/path`
    pub api_pattern: String,
    /// Distinct token fingerprints, sorted
    pub auth_tokens: Vec<String>,
    /// Indices of the flows involved, in order
    pub flows: Vec<usize>,
}

#[derive(Default)]
struct Access {
    tokens: BTreeSet<String>,
    flows: Vec<usize>,
}

/// Finds (value, API pattern) pairs used under more than one fingerprint
pub fn detect_cross_user_access(flows: &[FlowRecord]) -> Vec<CrossUserAccess> {
    let mut access: BTreeMap<(String, String), Access> = BTreeMap::new();

    for (i, flow) in flows.iter().enumerate() {
        let Some(auth) = flow.auth_context.as_ref().filter(|a| !a.token_hash.is_empty()) else {
            continue;
        };
        let pattern = api_pattern(&flow.method, &flow.url);

        for occurrence in &flow.request_occurrences {
            let entry = access
                .entry((occurrence.value.clone(), pattern.clone()))
                .or_default();
            entry.tokens.insert(auth.token_hash.clone());
            if entry.flows.last() != Some(&i) {
                entry.flows.push(i);
            }
        }
    }

    access
        .into_iter()
        .filter(|(_, a)| a.tokens.len() > 1)
        .map(|((id_value, api_pattern), a)| CrossUserAccess {
            id_value,
            api_pattern,
            auth_tokens: a.tokens.into_iter().collect(),
            flows: a.flows,
        })
        .collect()
}

/// Fingerprints that accessed `id_value` across users, merged over endpoints
pub fn cross_user_tokens(id_value: &str, accesses: &[CrossUserAccess]) -> Option<Vec<String>> {
    let tokens: BTreeSet<&String> = accesses
        .iter()
        .filter(|a| a.id_value == id_value)
        .flat_map(|a| a.auth_tokens.iter())
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.into_iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthContext, Direction, IdOccurrence, IdType, Location};
    use chrono::Utc;

    fn flow(i: usize, url: &str, token: Option<&str>, ids: &[&str]) -> FlowRecord {
        let id = format!("f{i}");
        let mut f = FlowRecord::bare(id.clone(), "GET", url, Utc::now());
        f.auth_context = token.map(|t| AuthContext {
            auth_type: "Bearer".to_string(),
            token_hash: t.to_string(),
        });
        f.request_occurrences = ids
            .iter()
            .map(|v| IdOccurrence {
                value: v.to_string(),
                id_type: IdType::Numeric,
                location: Location::UrlPath,
                field: None,
                url: url.to_string(),
                method: "GET".to_string(),
                timestamp: Utc::now(),
                direction: Direction::Request,
                flow_id: id.clone(),
            })
            .collect();
        f
    }

    #[test]
    fn test_detects_two_users_on_same_object() {
        let flows = vec![
            flow(0, "https://a.com/orders/1001", Some("aaaa1111"), &["1001"]),
            flow(1, "https://a.com/orders/1001", Some("bbbb2222"), &["1001"]),
            flow(2, "https://a.com/orders/2002", Some("aaaa1111"), &["2002"]),
            flow(3, "https://a.com/orders/2002", None, &["2002"]),
        ];
        let found = detect_cross_user_access(&flows);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id_value, "1001");
        assert_eq!(found[0].api_pattern, "GET /orders/{id}");
        assert_eq!(found[0].auth_tokens, vec!["aaaa1111", "bbbb2222"]);
        assert_eq!(found[0].flows, vec![0, 1]);

        assert_eq!(
            cross_user_tokens("1001", &found),
            Some(vec!["aaaa1111".to_string(), "bbbb2222".to_string()])
        );
        assert_eq!(cross_user_tokens("2002", &found), None);
    }

    #[test]
    fn test_same_user_repeated_is_not_cross_user() {
        let flows = vec![
            flow(0, "https://a.com/orders/1001", Some("aaaa1111"), &["1001"]),
            flow(1, "https://a.com/orders/1001", Some("aaaa1111"), &["1001"]),
        ];
        assert!(detect_cross_user_access(&flows).is_empty());
    }
}
