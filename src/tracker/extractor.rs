//! Identifier extraction from HTTP messages
//!
//! Walks the URL path, query string, headers and body of one message and
//! yields every accepted identifier with its structural location. JSON bodies
//! are walked recursively and keep a field path (`items[0].id`); form, HTML
//! and plain-text bodies are scanned as flat text.

use crate::config::TrackerConfig;
use crate::error::Result;
use crate::models::{header_value, Direction, IdOccurrence, IdType, Location};
use crate::tracker::matcher::PatternMatcher;
use crate::tracker::scope::Scope;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Nesting limit for JSON body traversal
const MAX_JSON_DEPTH: usize = 50;

/// Flow-level attributes stamped onto every occurrence
#[derive(Debug, Clone, Copy)]
pub struct Stamp<'a> {
    pub flow_id: &'a str,
    pub method: &'a str,
    pub url: &'a str,
    pub timestamp: DateTime<Utc>,
}

/// One side of an exchange as seen by the extractor
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    pub headers: &'a [(String, String)],
    pub body: Option<&'a str>,
    pub direction: Direction,
}

/// Occurrences found in one message
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub occurrences: Vec<IdOccurrence>,
    /// Body declared as JSON but failed to parse
    pub body_malformed: bool,
}

/// An identifier found before flow attributes are attached
#[derive(Debug, Clone)]
struct Found {
    value: String,
    id_type: IdType,
    location: Location,
    field: Option<String>,
}

enum BodyScan {
    Skipped,
    Malformed,
    Scanned(Vec<Found>),
}

/// Turns HTTP messages into identifier occurrences
#[derive(Debug, Clone)]
pub struct OccurrenceExtractor {
    matcher: PatternMatcher,
    scope: Scope,
    min_numeric: u64,
    trackable_content_types: Vec<String>,
    ignore_headers: Vec<String>,
}

impl OccurrenceExtractor {
    pub fn new(config: &TrackerConfig) -> Result<Self> {
        Ok(Self {
            matcher: PatternMatcher::from_config(config)?,
            scope: Scope::from_config(config),
            min_numeric: config.min_numeric,
            trackable_content_types: config
                .trackable_content_types
                .iter()
                .map(|ct| ct.to_lowercase())
                .collect(),
            ignore_headers: config.all_ignore_headers(),
        })
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Extracts identifiers from one message.
    ///
    /// Requests also contribute their URL path segments and query values.
    /// Out-of-scope URLs yield an empty extraction.
    pub fn extract(&self, message: Message<'_>, stamp: Stamp<'_>) -> Extraction {
        if !self.scope.should_track_url(stamp.url) {
            return Extraction::default();
        }

        let mut found = Vec::new();
        if message.direction == Direction::Request {
            found.extend(self.scan_url(stamp.url));
        }
        found.extend(self.scan_headers(message.headers));

        let mut body_malformed = false;
        if let Some(body) = message.body.filter(|b| !b.is_empty()) {
            let content_type = header_value(message.headers, "content-type").unwrap_or("");
            match self.scan_body(body, content_type) {
                BodyScan::Scanned(ids) => found.extend(ids),
                BodyScan::Malformed => {
                    debug!("Malformed {} body for {}", message.direction, stamp.url);
                    body_malformed = true;
                }
                BodyScan::Skipped => {}
            }
        }

        let occurrences = found
            .into_iter()
            .map(|f| IdOccurrence {
                value: f.value,
                id_type: f.id_type,
                location: f.location,
                field: f.field,
                url: stamp.url.to_string(),
                method: stamp.method.to_string(),
                timestamp: stamp.timestamp,
                direction: message.direction,
                flow_id: stamp.flow_id.to_string(),
            })
            .collect();

        Extraction {
            occurrences,
            body_malformed,
        }
    }

    /// Runs the matcher and drops numeric values under the minimum
    fn scan_text(&self, text: &str) -> Vec<(String, IdType)> {
        self.matcher
            .scan(text)
            .into_iter()
            .filter(|m| match m.id_type {
                IdType::Numeric => m
                    .value
                    .parse::<u64>()
                    .map(|n| n >= self.min_numeric)
                    .unwrap_or(false),
                _ => true,
            })
            .map(|m| (m.value, m.id_type))
            .collect()
    }

    fn push_text(&self, out: &mut Vec<Found>, text: &str, location: Location, field: Option<&str>) {
        for (value, id_type) in self.scan_text(text) {
            out.push(Found {
                value,
                id_type,
                location,
                field: field.map(|f| f.to_string()),
            });
        }
    }

    fn scan_url(&self, url: &str) -> Vec<Found> {
        let mut found = Vec::new();
        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(_) => return found,
        };

        for segment in parsed.path().split('/').filter(|s| !s.is_empty()) {
            self.push_text(&mut found, segment, Location::UrlPath, None);
        }
        for (name, value) in parsed.query_pairs() {
            self.push_text(&mut found, &value, Location::Query, Some(&name));
        }
        found
    }

    fn is_ignored_header(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.ignore_headers.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => lower.starts_with(prefix),
            None => &lower == pattern,
        })
    }

    fn scan_headers(&self, headers: &[(String, String)]) -> Vec<Found> {
        let mut found = Vec::new();

        for (name, value) in headers {
            if self.is_ignored_header(name) {
                continue;
            }
            match name.to_lowercase().as_str() {
                "cookie" => {
                    for pair in value.split(';') {
                        if let Some((_, cookie_value)) = pair.trim().split_once('=') {
                            self.push_text(&mut found, cookie_value, Location::Header, None);
                        }
                    }
                }
                "set-cookie" => {
                    let first = value.split(';').next().unwrap_or("");
                    if let Some((_, cookie_value)) = first.split_once('=') {
                        self.push_text(&mut found, cookie_value, Location::Header, None);
                    }
                }
                "authorization" => {
                    let credential = value.split_once(' ').map(|(_, c)| c).unwrap_or(value);
                    self.push_text(&mut found, credential, Location::Header, None);
                }
                _ => self.push_text(&mut found, value, Location::Header, None),
            }
        }
        found
    }

    fn is_trackable(&self, content_type: &str) -> bool {
        let lower = content_type.to_lowercase();
        self.trackable_content_types
            .iter()
            .any(|ct| lower.contains(ct.as_str()))
    }

    fn scan_body(&self, body: &str, content_type: &str) -> BodyScan {
        if !self.is_trackable(content_type) {
            return BodyScan::Skipped;
        }

        let mut found = Vec::new();
        if content_type.to_lowercase().contains("json") {
            match serde_json::from_str::<Value>(body) {
                Ok(value) => self.walk_json(&value, "", 0, &mut found),
                Err(_) => return BodyScan::Malformed,
            }
        } else {
            self.push_text(&mut found, body, Location::Body, None);
        }
        BodyScan::Scanned(found)
    }

    /// Object keys are visited in document order; only containers count
    /// towards the depth limit
    fn walk_json(&self, value: &Value, path: &str, depth: usize, out: &mut Vec<Found>) {
        let field = (!path.is_empty()).then_some(path);

        match value {
            Value::Object(_) | Value::Array(_) if depth >= MAX_JSON_DEPTH => {}
            Value::Object(map) => {
                for (key, child) in map {
                    let child_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    self.walk_json(child, &child_path, depth + 1, out);
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.walk_json(item, &format!("{path}[{i}]"), depth + 1, out);
                }
            }
            Value::String(s) => self.push_text(out, s, Location::Body, field),
            Value::Number(n) if n.is_u64() || n.is_i64() => {
                self.push_text(out, &n.to_string(), Location::Body, field)
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> OccurrenceExtractor {
        OccurrenceExtractor::new(&TrackerConfig::default()).expect("default config")
    }

    fn stamp(url: &str) -> Stamp<'_> {
        Stamp {
            flow_id: "f1",
            method: "GET",
            url,
            timestamp: Utc::now(),
        }
    }

    fn values(ex: &Extraction) -> Vec<(&str, Location, Option<&str>)> {
        ex.occurrences
            .iter()
            .map(|o| (o.value.as_str(), o.location, o.field.as_deref()))
            .collect()
    }

    #[test]
    fn test_path_and_query() {
        let ex = extractor().extract(
            Message {
                headers: &[],
                body: None,
                direction: Direction::Request,
            },
            stamp("https://api.example.com/users/1001/orders?order=5502&page=2"),
        );
        assert_eq!(
            values(&ex),
            vec![
                ("1001", Location::UrlPath, None),
                ("5502", Location::Query, Some("order")),
            ]
        );
        assert_eq!(ex.occurrences[0].direction, Direction::Request);
        assert_eq!(ex.occurrences[0].flow_id, "f1");
    }

    #[test]
    fn test_json_field_paths() {
        let headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        let body = r#"{"items":[{"id":4821},{"id":"4822","owner":{"uid":"9911"}}],"count":3}"#;
        let ex = extractor().extract(
            Message {
                headers: &headers,
                body: Some(body),
                direction: Direction::Response,
            },
            stamp("https://api.example.com/items"),
        );
        let found = values(&ex);
        assert!(found.contains(&("4821", Location::Body, Some("items[0].id"))));
        assert!(found.contains(&("4822", Location::Body, Some("items[1].id"))));
        assert!(found.contains(&("9911", Location::Body, Some("items[1].owner.uid"))));
        // below min_numeric
        assert!(!found.iter().any(|(v, _, _)| *v == "3"));
        // responses do not rescan their URL
        assert!(!found.iter().any(|(_, l, _)| *l == Location::UrlPath));
    }

    #[test]
    fn test_json_keys_in_document_order() {
        let headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        let ex = extractor().extract(
            Message {
                headers: &headers,
                body: Some(r#"{"user_id":"1001","author":{"id":"1001"},"b":"2002","a":"3003"}"#),
                direction: Direction::Response,
            },
            stamp("https://api.example.com/me"),
        );
        assert_eq!(
            values(&ex),
            vec![
                ("1001", Location::Body, Some("user_id")),
                ("1001", Location::Body, Some("author.id")),
                ("2002", Location::Body, Some("b")),
                ("3003", Location::Body, Some("a")),
            ]
        );
    }

    #[test]
    fn test_json_depth_limit_applies_to_containers() {
        let nested = |levels: usize| {
            let mut body = r#"{"id":"1001"}"#.to_string();
            for _ in 0..levels {
                body = format!(r#"{{"a":{body}}}"#);
            }
            body
        };
        let headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        let scan = |body: &str| {
            extractor()
                .extract(
                    Message {
                        headers: &headers,
                        body: Some(body),
                        direction: Direction::Response,
                    },
                    stamp("https://api.example.com/deep"),
                )
                .occurrences
                .len()
        };

        // innermost object at depth 49 still has its scalars scanned
        assert_eq!(scan(&nested(MAX_JSON_DEPTH - 1)), 1);
        assert_eq!(scan(&nested(MAX_JSON_DEPTH)), 0);
    }

    #[test]
    fn test_root_array_paths() {
        let headers = vec![("content-type".to_string(), "application/json; charset=utf-8".to_string())];
        let ex = extractor().extract(
            Message {
                headers: &headers,
                body: Some(r#"[{"id":7001}]"#),
                direction: Direction::Response,
            },
            stamp("https://api.example.com/list"),
        );
        assert_eq!(values(&ex), vec![("7001", Location::Body, Some("[0].id"))]);
    }

    #[test]
    fn test_malformed_json_yields_nothing() {
        let headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        let ex = extractor().extract(
            Message {
                headers: &headers,
                body: Some(r#"{"id": 1001,"#),
                direction: Direction::Response,
            },
            stamp("https://api.example.com/x"),
        );
        assert!(ex.body_malformed);
        assert!(ex.occurrences.is_empty());
    }

    #[test]
    fn test_unsupported_content_type_skipped() {
        let headers = vec![("Content-Type".to_string(), "application/octet-stream".to_string())];
        let ex = extractor().extract(
            Message {
                headers: &headers,
                body: Some("1001 2002"),
                direction: Direction::Response,
            },
            stamp("https://api.example.com/blob"),
        );
        assert!(ex.occurrences.is_empty());
        assert!(!ex.body_malformed);
    }

    #[test]
    fn test_form_body_scanned_flat() {
        let headers = vec![(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        )];
        let ex = extractor().extract(
            Message {
                headers: &headers,
                body: Some("account=3344&note=hi"),
                direction: Direction::Request,
            },
            Stamp {
                method: "POST",
                ..stamp("https://api.example.com/transfer")
            },
        );
        assert_eq!(values(&ex), vec![("3344", Location::Body, None)]);
    }

    #[test]
    fn test_headers_ignore_set_and_cookies() {
        let headers = vec![
            ("Sec-Fetch-Site".to_string(), "same-origin 12345".to_string()),
            ("Content-Length".to_string(), "4096".to_string()),
            ("X-Account-Id".to_string(), "778899".to_string()),
            ("Cookie".to_string(), "theme=dark; uid=556677".to_string()),
            ("Authorization".to_string(), "Bearer abcdefghijklmnopqrstuvwxyz".to_string()),
        ];
        let ex = extractor().extract(
            Message {
                headers: &headers,
                body: None,
                direction: Direction::Request,
            },
            stamp("https://api.example.com/me"),
        );
        assert_eq!(
            values(&ex),
            vec![
                ("778899", Location::Header, None),
                ("556677", Location::Header, None),
                ("abcdefghijklmnopqrstuvwxyz", Location::Header, None),
            ]
        );

        // Set-Cookie contributes only its leading name=value pair
        let headers = vec![(
            "Set-Cookie".to_string(),
            "account=443322; Max-Age=86400; Path=/; Domain=881122".to_string(),
        )];
        let ex = extractor().extract(
            Message {
                headers: &headers,
                body: None,
                direction: Direction::Response,
            },
            stamp("https://api.example.com/login"),
        );
        assert_eq!(values(&ex), vec![("443322", Location::Header, None)]);
    }

    #[test]
    fn test_filtered_url_yields_nothing() {
        let config = TrackerConfig {
            exclude_domains: vec!["*.tracking.com".to_string()],
            ..TrackerConfig::default()
        };
        let ex = OccurrenceExtractor::new(&config).expect("config").extract(
            Message {
                headers: &[],
                body: None,
                direction: Direction::Request,
            },
            stamp("https://px.tracking.com/hit/99887"),
        );
        assert!(ex.occurrences.is_empty());

        let ex = extractor().extract(
            Message {
                headers: &[],
                body: None,
                direction: Direction::Request,
            },
            stamp("https://api.example.com/assets/77881.png"),
        );
        assert!(ex.occurrences.is_empty());
    }
}
