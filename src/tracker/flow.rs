//! Pairs a captured exchange into one [`FlowRecord`]

use crate::config::TrackerConfig;
use crate::error::Result;
use crate::models::{header_value, AuthContext, Direction, Exchange, FlowRecord};
use crate::tracker::extractor::{Message, OccurrenceExtractor, Stamp};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Cookie names treated as session credentials
const SESSION_COOKIES: &[&str] = &[
    "session",
    "sessionid",
    "sid",
    "session_id",
    "jsessionid",
    "phpsessid",
];

fn fingerprint(credential: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(credential.as_bytes()));
    digest[..8].to_string()
}

/// Derives the auth fingerprint of a request.
///
/// The `Authorization` header wins; otherwise the first well-known session
/// cookie is used.
pub fn auth_context(headers: &[(String, String)]) -> Option<AuthContext> {
    if let Some(auth) = header_value(headers, "authorization").filter(|v| !v.is_empty()) {
        let (scheme, credential) = auth.split_once(' ').unwrap_or(("Unknown", auth));
        return Some(AuthContext {
            auth_type: scheme.to_string(),
            token_hash: fingerprint(credential),
        });
    }

    let cookies = header_value(headers, "cookie")?;
    cookies
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| SESSION_COOKIES.contains(&name.trim().to_lowercase().as_str()))
        .map(|(_, value)| AuthContext {
            auth_type: "Cookie".to_string(),
            token_hash: fingerprint(value),
        })
}

/// Caps a stored body at `max` bytes on a character boundary (0 = unlimited)
pub fn truncate_body(body: &str, max: usize) -> String {
    if max == 0 || body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/// Builds flow records from exchanges
#[derive(Debug, Clone)]
pub struct FlowAssembler {
    extractor: OccurrenceExtractor,
    max_body_size: usize,
}

impl FlowAssembler {
    pub fn new(config: &TrackerConfig) -> Result<Self> {
        Ok(Self {
            extractor: OccurrenceExtractor::new(config)?,
            max_body_size: config.max_body_size,
        })
    }

    /// Domain and static-asset decision for the exchange's URL
    pub fn in_scope(&self, exchange: &Exchange) -> bool {
        self.extractor.scope().should_track_url(&exchange.request.url)
    }

    /// Runs extraction over both sides and produces one flow
    pub fn assemble(&self, exchange: &Exchange) -> FlowRecord {
        let flow_id = uuid::Uuid::new_v4().to_string();
        let request = &exchange.request;
        let stamp = Stamp {
            flow_id: &flow_id,
            method: &request.method,
            url: &request.url,
            timestamp: exchange.timestamp,
        };

        let mut flow = FlowRecord::bare(
            flow_id.clone(),
            request.method.clone(),
            request.url.clone(),
            exchange.timestamp,
        );

        let extracted = self.extractor.extract(
            Message {
                headers: &request.headers,
                body: request.body.as_deref(),
                direction: Direction::Request,
            },
            stamp,
        );
        flow.request_occurrences = extracted.occurrences;
        flow.request_headers = request.headers.clone();
        flow.request_body = self.stored_body(request.body.as_deref(), extracted.body_malformed);
        flow.auth_context = auth_context(&request.headers);

        if let Some(response) = &exchange.response {
            let extracted = self.extractor.extract(
                Message {
                    headers: &response.headers,
                    body: response.body.as_deref(),
                    direction: Direction::Response,
                },
                stamp,
            );
            flow.response_occurrences = extracted.occurrences;
            flow.status_code = Some(response.status);
            flow.response_headers = response.headers.clone();
            flow.response_body =
                self.stored_body(response.body.as_deref(), extracted.body_malformed);
        }

        debug!(
            "Flow {} {} {}: {} request ids, {} response ids",
            flow.flow_id,
            flow.method,
            flow.url,
            flow.request_occurrences.len(),
            flow.response_occurrences.len()
        );
        flow
    }

    fn stored_body(&self, body: Option<&str>, malformed: bool) -> Option<String> {
        if malformed {
            return None;
        }
        body.filter(|b| !b.is_empty())
            .map(|b| truncate_body(b, self.max_body_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HttpRequest, HttpResponse};

    #[test]
    fn test_bearer_fingerprint() {
        let headers = vec![("Authorization".to_string(), "Bearer abc".to_string())];
        let ctx = auth_context(&headers).expect("auth context");
        assert_eq!(ctx.auth_type, "Bearer");
        // sha256("abc") = ba7816bf...
        assert_eq!(ctx.token_hash, "ba7816bf");
    }

    #[test]
    fn test_session_cookie_fingerprint() {
        let headers = vec![(
            "Cookie".to_string(),
            "theme=dark; PHPSESSID=abc".to_string(),
        )];
        let ctx = auth_context(&headers).expect("auth context");
        assert_eq!(ctx.auth_type, "Cookie");
        assert_eq!(ctx.token_hash, "ba7816bf");

        let headers = vec![("Cookie".to_string(), "theme=dark".to_string())];
        assert!(auth_context(&headers).is_none());
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate_body("héllo", 2), "h");
        assert_eq!(truncate_body("hello", 0), "hello");
        assert_eq!(truncate_body("hello", 3), "hel");
    }

    #[test]
    fn test_assemble_pairs_both_sides() {
        let assembler = FlowAssembler::new(&TrackerConfig::default()).expect("config");
        let exchange = Exchange::new(HttpRequest::new("GET", "https://api.example.com/users/1001"))
            .with_response(HttpResponse::new(200).with_json(r#"{"owner":"2002"}"#));
        let flow = assembler.assemble(&exchange);

        assert_eq!(flow.status_code, Some(200));
        assert_eq!(flow.request_occurrences.len(), 1);
        assert_eq!(flow.request_occurrences[0].value, "1001");
        assert_eq!(flow.response_occurrences.len(), 1);
        assert_eq!(flow.response_occurrences[0].field.as_deref(), Some("owner"));
        assert!(flow
            .request_occurrences
            .iter()
            .chain(flow.response_occurrences.iter())
            .all(|o| o.flow_id == flow.flow_id));
    }

    #[test]
    fn test_malformed_body_recorded_absent() {
        let assembler = FlowAssembler::new(&TrackerConfig::default()).expect("config");
        let exchange = Exchange::new(HttpRequest::new("GET", "https://api.example.com/users/1001"))
            .with_response(HttpResponse::new(200).with_json("{broken"));
        let flow = assembler.assemble(&exchange);

        assert!(flow.response_body.is_none());
        assert!(flow.response_occurrences.is_empty());
        assert_eq!(flow.request_occurrences.len(), 1);
    }

    #[test]
    fn test_body_truncated_to_limit() {
        let config = TrackerConfig {
            max_body_size: 4,
            ..TrackerConfig::default()
        };
        let assembler = FlowAssembler::new(&config).expect("config");
        let exchange = Exchange::new(HttpRequest::new("GET", "https://api.example.com/x"))
            .with_response(HttpResponse::new(200).with_body("plain text body"));
        let flow = assembler.assemble(&exchange);
        assert_eq!(flow.response_body.as_deref(), Some("plai"));
    }
}
