//! Risk scoring for IDOR candidates

use crate::models::{IdType, IdorCandidate, Location};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Discrete risk level derived from the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s >= 80 => RiskLevel::Critical,
            60..=79 => RiskLevel::High,
            40..=59 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Critical => write!(f, "critical"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::Low => write!(f, "low"),
        }
    }
}

/// Scored candidate
#[derive(Debug, Clone, PartialEq)]
pub struct RiskScore {
    pub id_value: String,
    pub id_type: IdType,
    pub score: u32,
    pub level: RiskLevel,
    /// `name=value(+points)` per contributing factor
    pub factors: Vec<String>,
    pub usage_count: usize,
    pub candidate: IdorCandidate,
}

fn method_weight(method: &str) -> u32 {
    match method.to_uppercase().as_str() {
        "DELETE" | "PUT" => 30,
        "POST" => 20,
        "PATCH" => 15,
        _ => 5,
    }
}

fn location_weight(location: Location) -> u32 {
    match location {
        Location::UrlPath => 25,
        Location::Query => 20,
        Location::Body => 15,
        Location::Header => 5,
    }
}

fn type_weight(id_type: &IdType) -> u32 {
    match id_type {
        IdType::Numeric => 20,
        IdType::Uuid => 10,
        IdType::Token => 5,
        IdType::Custom(_) => 10,
    }
}

/// Scores one candidate from its usages
pub fn score_candidate(candidate: &IdorCandidate) -> RiskScore {
    let usages = &candidate.usages;
    let mut score = 0;
    let mut factors = Vec::new();

    // first usage wins ties so the factor string is stable
    let mut best_method: Option<(&str, u32)> = None;
    for usage in usages {
        let weight = method_weight(&usage.method);
        if best_method.map_or(true, |(_, w)| weight > w) {
            best_method = Some((usage.method.as_str(), weight));
        }
    }
    if let Some((method, weight)) = best_method {
        score += weight;
        factors.push(format!("method={}(+{weight})", method.to_uppercase()));
    }

    let best_location = usages
        .iter()
        .map(|u| u.location)
        .max_by_key(|l| location_weight(*l));
    if let Some(location) = best_location {
        let weight = location_weight(location);
        score += weight;
        factors.push(format!("location={location}(+{weight})"));
    }

    let weight = type_weight(&candidate.id_type);
    score += weight;
    factors.push(format!("type={}(+{weight})", candidate.id_type));

    let count = usages.len();
    let usage_points = (5 * count as u32).min(20);
    score += usage_points;
    factors.push(format!("usages={count}(+{usage_points})"));

    let endpoints: HashSet<&str> = usages.iter().map(|u| u.url.as_str()).collect();
    if endpoints.len() > 1 {
        let points = (3 * endpoints.len() as u32).min(15);
        score += points;
        factors.push(format!("endpoints={}(+{points})", endpoints.len()));
    }

    let score = score.min(100);
    RiskScore {
        id_value: candidate.id_value.clone(),
        id_type: candidate.id_type.clone(),
        score,
        level: RiskLevel::from_score(score),
        factors,
        usage_count: count,
        candidate: candidate.clone(),
    }
}

/// Scores and orders candidates: score, usage count, value, type
pub fn rank(candidates: &[IdorCandidate]) -> Vec<RiskScore> {
    let mut scored: Vec<RiskScore> = candidates.iter().map(score_candidate).collect();
    scored.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| b.usage_count.cmp(&a.usage_count))
            .then_with(|| a.id_value.cmp(&b.id_value))
            .then_with(|| a.id_type.as_str().cmp(b.id_type.as_str()))
    });
    scored
}
