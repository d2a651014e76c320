//! Core data models for idtrace

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Reason attached to every IDOR candidate
pub const IDOR_REASON: &str = "ID used in request but never seen in response";

/// Classification of an identifier, named after the detection rule that matched it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IdType {
    Numeric,
    Uuid,
    Token,
    /// User-defined detection rule (e.g. `order_id`)
    Custom(String),
}

impl IdType {
    /// Maps a detection rule name to its type
    pub fn from_rule_name(name: &str) -> Self {
        match name {
            "numeric" => IdType::Numeric,
            "uuid" => IdType::Uuid,
            "token" => IdType::Token,
            other => IdType::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            IdType::Numeric => "numeric",
            IdType::Uuid => "uuid",
            IdType::Token => "token",
            IdType::Custom(name) => name,
        }
    }
}

impl From<String> for IdType {
    fn from(value: String) -> Self {
        IdType::from_rule_name(&value)
    }
}

impl From<IdType> for String {
    fn from(value: IdType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where in an HTTP message an identifier was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    UrlPath,
    Query,
    Body,
    Header,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::UrlPath => write!(f, "url_path"),
            Location::Query => write!(f, "query"),
            Location::Body => write!(f, "body"),
            Location::Header => write!(f, "header"),
        }
    }
}

/// Whether an occurrence came from the client or the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Request,
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Request => write!(f, "request"),
            Direction::Response => write!(f, "response"),
        }
    }
}

/// One sighting of a candidate identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdOccurrence {
    pub value: String,
    #[serde(rename = "type")]
    pub id_type: IdType,
    pub location: Location,
    /// Field path for structured bodies, parameter name for query values
    pub field: Option<String>,
    pub url: String,
    pub method: String,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    /// Flow this occurrence belongs to
    pub flow_id: String,
}

/// Identity of a tracked identifier: the same literal with different types is tracked twice
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdKey {
    pub value: String,
    pub id_type: String,
}

impl IdOccurrence {
    pub fn key(&self) -> IdKey {
        IdKey {
            value: self.value.clone(),
            id_type: self.id_type.as_str().to_string(),
        }
    }
}

/// Authentication context fingerprint of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    /// Authorization scheme (`Bearer`, `Basic`, ...) or `Cookie`
    pub auth_type: String,
    /// First 8 hex characters of the SHA-256 of the credential
    pub token_hash: String,
}

/// Captured HTTP request, normalized across capture sources
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Adds a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the request body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Captured HTTP response
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Adds a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the response body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets a JSON body along with its content type
    pub fn with_json(self, body: impl Into<String>) -> Self {
        self.with_header("Content-Type", "application/json")
            .with_body(body)
    }
}

/// One completed request/response exchange as delivered by a capture source
#[derive(Debug, Clone)]
pub struct Exchange {
    pub request: HttpRequest,
    pub response: Option<HttpResponse>,
    /// Completion time of the exchange
    pub timestamp: DateTime<Utc>,
}

impl Exchange {
    pub fn new(request: HttpRequest) -> Self {
        Self {
            request,
            response: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_response(mut self, response: HttpResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Looks up a header value by case-insensitive name
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// One request/response pair with the identifiers found on both sides
#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub flow_id: String,
    pub url: String,
    pub method: String,
    pub timestamp: DateTime<Utc>,
    pub request_occurrences: Vec<IdOccurrence>,
    pub response_occurrences: Vec<IdOccurrence>,
    pub status_code: Option<u16>,
    pub request_headers: Vec<(String, String)>,
    pub request_body: Option<String>,
    pub response_headers: Vec<(String, String)>,
    pub response_body: Option<String>,
    pub auth_context: Option<AuthContext>,
}

impl FlowRecord {
    /// Creates a flow with no occurrences and no captured metadata
    pub fn bare(
        flow_id: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            flow_id: flow_id.into(),
            url: url.into(),
            method: method.into(),
            timestamp,
            request_occurrences: Vec::new(),
            response_occurrences: Vec::new(),
            status_code: None,
            request_headers: Vec::new(),
            request_body: None,
            response_headers: Vec::new(),
            response_body: None,
            auth_context: None,
        }
    }

    /// Lower-cased host of the flow URL, without port
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
    }

    /// URL path, `/` when the URL cannot be parsed
    pub fn path(&self) -> String {
        Url::parse(&self.url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/".to_string())
    }
}

/// Aggregated origin/usage state for one distinct identifier
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedId {
    pub value: String,
    pub id_type: IdType,
    pub first_seen: DateTime<Utc>,
    /// First response occurrence; never overwritten once set
    pub origin: Option<IdOccurrence>,
    /// Request occurrences in arrival order, duplicates retained
    pub usages: Vec<IdOccurrence>,
}

impl TrackedId {
    pub fn new(value: impl Into<String>, id_type: IdType, first_seen: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            id_type,
            first_seen,
            origin: None,
            usages: Vec::new(),
        }
    }

    pub fn key(&self) -> IdKey {
        IdKey {
            value: self.value.clone(),
            id_type: self.id_type.as_str().to_string(),
        }
    }

    /// Used by the client without ever being issued by the server
    pub fn is_candidate(&self) -> bool {
        !self.usages.is_empty() && self.origin.is_none()
    }
}

/// Identifier used in requests with no known origin
#[derive(Debug, Clone, PartialEq)]
pub struct IdorCandidate {
    pub id_value: String,
    pub id_type: IdType,
    pub usages: Vec<IdOccurrence>,
    pub reason: String,
}

impl IdorCandidate {
    pub fn from_tracked(tracked: &TrackedId) -> Self {
        Self {
            id_value: tracked.value.clone(),
            id_type: tracked.id_type.clone(),
            usages: tracked.usages.clone(),
            reason: IDOR_REASON.to_string(),
        }
    }
}
