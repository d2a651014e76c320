//! HAR 1.2 import and export
//!
//! Imported archives go through the same capture session as live proxy
//! traffic, so a browser-recorded HAR produces the same report as proxying the
//! browser would have. Export writes a session's flows back out for Chrome
//! DevTools, Firefox HAR Viewer and similar tools.

use crate::config::TrackerConfig;
use crate::error::{IdtraceError, Result};
use crate::models::{header_value, Exchange, FlowRecord, HttpRequest, HttpResponse};
use crate::report::Report;
use crate::session::CaptureSession;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// HAR 1.2 root structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Har {
    pub log: HarLog,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HarLog {
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<HarCreator>,
    #[serde(default)]
    pub entries: Vec<HarEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HarCreator {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    #[serde(default)]
    pub started_date_time: String,
    #[serde(default)]
    pub time: f64,
    pub request: HarRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HarResponse>,
    #[serde(default)]
    pub cache: HarCache,
    #[serde(default)]
    pub timings: HarTimings,
}

fn unknown_size() -> i64 {
    -1
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub http_version: String,
    #[serde(default)]
    pub headers: Vec<HarHeader>,
    #[serde(default)]
    pub query_string: Vec<HarQueryParam>,
    #[serde(default = "unknown_size")]
    pub body_size: i64,
    #[serde(default = "unknown_size")]
    pub headers_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<HarPostData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub http_version: String,
    #[serde(default)]
    pub headers: Vec<HarHeader>,
    #[serde(default)]
    pub content: HarContent,
    #[serde(default, rename = "redirectURL")]
    pub redirect_url: String,
    #[serde(default = "unknown_size")]
    pub body_size: i64,
    #[serde(default = "unknown_size")]
    pub headers_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HarQueryParam {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPostData {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HarCache {}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HarTimings {
    #[serde(default)]
    pub send: f64,
    #[serde(default)]
    pub wait: f64,
    #[serde(default)]
    pub receive: f64,
}

fn to_pairs(headers: &[HarHeader]) -> Vec<(String, String)> {
    headers
        .iter()
        // HTTP/2 pseudo-headers carry no identifiers of their own
        .filter(|h| !h.name.starts_with(':'))
        .map(|h| (h.name.clone(), h.value.clone()))
        .collect()
}

/// Adds the archive's declared MIME type when the headers lack one
fn ensure_content_type(headers: &mut Vec<(String, String)>, mime_type: &str) {
    if !mime_type.is_empty() && header_value(headers, "content-type").is_none() {
        headers.push(("Content-Type".to_string(), mime_type.to_string()));
    }
}

fn entry_to_exchange(entry: &HarEntry, timestamp: DateTime<Utc>) -> Exchange {
    let mut request = HttpRequest::new(entry.request.method.clone(), entry.request.url.clone());
    request.headers = to_pairs(&entry.request.headers);
    if let Some(post) = entry.request.post_data.as_ref().filter(|p| !p.text.is_empty()) {
        ensure_content_type(&mut request.headers, &post.mime_type);
        request.body = Some(post.text.clone());
    }

    let mut exchange = Exchange::new(request).at(timestamp);

    // status 0 marks an aborted or blocked request in browser exports
    if let Some(resp) = entry.response.as_ref().filter(|r| r.status != 0) {
        let mut response = HttpResponse::new(resp.status);
        response.headers = to_pairs(&resp.headers);
        let content = &resp.content;
        match (&content.text, content.encoding.as_deref()) {
            (Some(text), None) if !text.is_empty() => {
                ensure_content_type(&mut response.headers, &content.mime_type);
                response.body = Some(text.clone());
            }
            (Some(_), Some(encoding)) => {
                debug!("Skipping {}-encoded body of {}", encoding, entry.request.url);
            }
            _ => {}
        }
        exchange = exchange.with_response(response);
    }
    exchange
}

/// Parses a HAR document into exchanges ordered by start time.
///
/// The sort is stable, so entries sharing a timestamp keep archive order.
pub fn parse_har(content: &str) -> Result<Vec<Exchange>> {
    let har: Har = serde_json::from_str(content)
        .map_err(|e| IdtraceError::ReportError(format!("invalid HAR document: {}", e)))?;

    // entries without a usable start time inherit the previous one
    let mut last_time = DateTime::<Utc>::default();
    let mut exchanges = Vec::with_capacity(har.log.entries.len());
    for (i, entry) in har.log.entries.iter().enumerate() {
        let timestamp = match DateTime::parse_from_rfc3339(&entry.started_date_time) {
            Ok(t) => t.with_timezone(&Utc),
            Err(_) => {
                warn!(
                    "HAR entry {} has invalid startedDateTime {:?}",
                    i, entry.started_date_time
                );
                last_time
            }
        };
        last_time = timestamp;
        exchanges.push(entry_to_exchange(entry, timestamp));
    }

    exchanges.sort_by_key(|e| e.timestamp);
    Ok(exchanges)
}

/// Reads a HAR file into exchanges
pub fn load_exchanges(path: &Path) -> Result<Vec<Exchange>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        IdtraceError::ReportError(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_har(&content)
}

/// Imports a HAR file through a fresh capture session
pub fn import_har(path: &Path, config: &TrackerConfig) -> Result<Report> {
    let exchanges = load_exchanges(path)?;
    let mut session = CaptureSession::new(config.clone())?;
    for exchange in &exchanges {
        session.ingest(exchange);
    }
    info!(
        "Imported {} of {} HAR entries from {}",
        session.flows().len(),
        exchanges.len(),
        path.display()
    );
    Ok(session.report())
}

/// Builds a HAR document from flows
pub fn to_har(flows: &[FlowRecord]) -> Har {
    Har {
        log: HarLog {
            version: "1.2".to_string(),
            creator: Some(HarCreator {
                name: "idtrace".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            }),
            entries: flows.iter().map(flow_to_har_entry).collect(),
        },
    }
}

/// Export flows to HAR 1.2 format
pub fn export_har(flows: &[FlowRecord], output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&to_har(flows))?;
    std::fs::write(output_path, json)?;
    info!("HAR archive saved to {}", output_path.display());
    Ok(())
}

fn from_pairs(headers: &[(String, String)]) -> Vec<HarHeader> {
    headers
        .iter()
        .map(|(k, v)| HarHeader {
            name: k.clone(),
            value: v.clone(),
        })
        .collect()
}

fn flow_to_har_entry(flow: &FlowRecord) -> HarEntry {
    let query_string = url::Url::parse(&flow.url)
        .map(|u| {
            u.query_pairs()
                .map(|(name, value)| HarQueryParam {
                    name: name.to_string(),
                    value: value.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let post_data = flow.request_body.as_ref().map(|body| HarPostData {
        mime_type: header_value(&flow.request_headers, "content-type")
            .unwrap_or("application/x-www-form-urlencoded")
            .to_string(),
        text: body.clone(),
    });

    let response_size = flow
        .response_body
        .as_ref()
        .map(|b| b.len() as i64)
        .unwrap_or(0);
    let status = flow.status_code.unwrap_or(0);

    HarEntry {
        started_date_time: flow.timestamp.to_rfc3339(),
        time: 0.0,
        request: HarRequest {
            method: flow.method.clone(),
            url: flow.url.clone(),
            http_version: "HTTP/1.1".to_string(),
            headers: from_pairs(&flow.request_headers),
            query_string,
            body_size: flow
                .request_body
                .as_ref()
                .map(|b| b.len() as i64)
                .unwrap_or(-1),
            headers_size: -1,
            post_data,
        },
        response: Some(HarResponse {
            status,
            status_text: status_to_text(status),
            http_version: "HTTP/1.1".to_string(),
            headers: from_pairs(&flow.response_headers),
            content: HarContent {
                size: response_size,
                mime_type: header_value(&flow.response_headers, "content-type")
                    .unwrap_or("application/octet-stream")
                    .to_string(),
                text: flow.response_body.clone(),
                encoding: None,
            },
            redirect_url: String::new(),
            body_size: response_size,
            headers_size: -1,
        }),
        cache: HarCache {},
        timings: HarTimings::default(),
    }
}

fn status_to_text(status: u16) -> String {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        0 => "No Response",
        _ => "Unknown",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
      "log": {
        "version": "1.2",
        "entries": [
          {
            "startedDateTime": "2024-05-01T10:00:02.000Z",
            "request": {"method": "GET", "url": "https://api.example.com/users/1001", "headers": []},
            "response": {"status": 200, "headers": [], "content": {"mimeType": "application/json", "text": "{\"id\":1001}"}}
          },
          {
            "startedDateTime": "2024-05-01T10:00:01.000Z",
            "request": {
              "method": "POST",
              "url": "https://api.example.com/login",
              "headers": [{"name": ":authority", "value": "api.example.com"}],
              "postData": {"mimeType": "application/json", "text": "{\"user\":\"bob\"}"}
            },
            "response": {"status": 200, "headers": [], "content": {"mimeType": "image/png", "text": "iVBORw0KGgo=", "encoding": "base64"}}
          },
          {
            "startedDateTime": "2024-05-01T10:00:02.000Z",
            "request": {"method": "GET", "url": "https://api.example.com/blocked"},
            "response": {"status": 0, "content": {}}
          }
        ]
      }
    }"#;

    #[test]
    fn test_parse_sorts_stably_by_start_time() {
        let exchanges = parse_har(SAMPLE).expect("parse");
        let urls: Vec<&str> = exchanges.iter().map(|e| e.request.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://api.example.com/login",
                "https://api.example.com/users/1001",
                "https://api.example.com/blocked",
            ]
        );
    }

    #[test]
    fn test_entry_conversion() {
        let exchanges = parse_har(SAMPLE).expect("parse");

        let login = &exchanges[0];
        assert!(login.request.headers.iter().all(|(k, _)| !k.starts_with(':')));
        assert_eq!(
            header_value(&login.request.headers, "content-type"),
            Some("application/json")
        );
        // base64 bodies are not decoded
        assert!(login.response.as_ref().expect("response").body.is_none());

        let user = &exchanges[1];
        let response = user.response.as_ref().expect("response");
        assert_eq!(response.body.as_deref(), Some("{\"id\":1001}"));
        assert_eq!(
            header_value(&response.headers, "content-type"),
            Some("application/json")
        );

        assert!(exchanges[2].response.is_none());
    }

    #[test]
    fn test_invalid_document_is_error() {
        assert!(matches!(
            parse_har("{\"nope\": 1}"),
            Err(IdtraceError::ReportError(_))
        ));
    }

    #[test]
    fn test_export_round_trips_through_parse() {
        let mut flow = FlowRecord::bare("f1", "GET", "https://api.example.com/a?id=1001", Utc::now());
        flow.status_code = Some(200);
        flow.response_headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        flow.response_body = Some("{\"id\":2002}".to_string());

        let json = serde_json::to_string(&to_har(&[flow])).expect("serialize");
        let exchanges = parse_har(&json).expect("parse");
        assert_eq!(exchanges.len(), 1);
        assert_eq!(exchanges[0].request.url, "https://api.example.com/a?id=1001");
        assert_eq!(
            exchanges[0].response.as_ref().and_then(|r| r.body.as_deref()),
            Some("{\"id\":2002}")
        );
    }
}
