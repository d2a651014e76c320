//! SARIF v2.1.0 export
//!
//! One result per scored IDOR candidate, every usage listed as a location.
//! Compatible with GitHub Code Scanning and other CI/CD tools.

use crate::analysis::{RiskLevel, RiskScore};
use crate::error::Result;
use crate::models::IDOR_REASON;
use serde_json::{json, Value};
use std::path::Path;
use tracing::info;

const SARIF_SCHEMA: &str =
    "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/main/sarif-2.1/schema/sarif-schema-2.1.0.json";

const RULE_ID: &str = "IDOR001";

/// Maps risk level to SARIF level
fn level_to_sarif(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Critical | RiskLevel::High => "error",
        RiskLevel::Medium => "warning",
        RiskLevel::Low => "note",
    }
}

/// Maps risk level to a SARIF security-severity score (CVSS-like 0.0-10.0)
fn level_to_score(level: RiskLevel) -> f64 {
    match level {
        RiskLevel::Critical => 9.5,
        RiskLevel::High => 7.5,
        RiskLevel::Medium => 5.5,
        RiskLevel::Low => 3.0,
    }
}

fn build_result(s: &RiskScore) -> Value {
    let mut locations: Vec<Value> = s
        .candidate
        .usages
        .iter()
        .map(|u| {
            json!({
                "physicalLocation": {
                    "artifactLocation": { "uri": u.url }
                },
                "properties": {
                    "method": u.method,
                    "location": u.location.to_string(),
                    "field": u.field.clone().unwrap_or_default()
                }
            })
        })
        .collect();
    if locations.is_empty() {
        locations.push(json!({
            "physicalLocation": { "artifactLocation": { "uri": "unknown" } }
        }));
    }

    json!({
        "ruleId": RULE_ID,
        "ruleIndex": 0,
        "level": level_to_sarif(s.level),
        "message": {
            "text": format!(
                "Potential IDOR: {} ID '{}' - {}",
                s.id_type, s.id_value, s.candidate.reason
            )
        },
        "locations": locations,
        "fingerprints": {
            "idtrace/v1": format!("{}:{}", s.id_type, s.id_value)
        },
        "properties": {
            "id_value": s.id_value,
            "id_type": s.id_type.as_str(),
            "usage_count": s.usage_count,
            "risk_score": s.score,
            "risk_level": s.level.to_string(),
            "risk_factors": s.factors,
            "security-severity": level_to_score(s.level).to_string()
        }
    })
}

/// Builds the SARIF document
pub fn to_sarif(scored: &[RiskScore]) -> Value {
    let results: Vec<Value> = scored.iter().map(build_result).collect();

    json!({
        "$schema": SARIF_SCHEMA,
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "idtrace",
                    "version": env!("CARGO_PKG_VERSION"),
                    "rules": [{
                        "id": RULE_ID,
                        "name": "IdUsedWithoutOrigin",
                        "shortDescription": { "text": IDOR_REASON },
                        "helpUri": "https://owasp.org/Top10/A01_2021-Broken_Access_Control/",
                        "defaultConfiguration": { "level": "warning" },
                        "properties": { "tags": ["security", "CWE-639"] }
                    }]
                }
            },
            "results": results
        }]
    })
}

/// Exports scored candidates in SARIF v2.1.0 format
pub fn export(scored: &[RiskScore], output_path: &Path) -> Result<()> {
    let json_str = serde_json::to_string_pretty(&to_sarif(scored))?;
    std::fs::write(output_path, json_str)?;
    info!("SARIF report saved to {}", output_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::rank;
    use crate::models::{IdType, IdorCandidate};

    #[test]
    fn test_candidate_without_usages_gets_placeholder_location() {
        let scored = rank(&[IdorCandidate {
            id_value: "abc".to_string(),
            id_type: IdType::Token,
            usages: vec![],
            reason: IDOR_REASON.to_string(),
        }]);
        let sarif = to_sarif(&scored);
        let result = &sarif["runs"][0]["results"][0];
        assert_eq!(result["ruleId"], "IDOR001");
        assert_eq!(result["level"], "note");
        assert_eq!(
            result["locations"][0]["physicalLocation"]["artifactLocation"]["uri"],
            "unknown"
        );
        assert_eq!(sarif["version"], "2.1.0");
    }
}
