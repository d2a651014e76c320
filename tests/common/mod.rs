//! Common test utilities
#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use idtrace::config::TrackerConfig;
use idtrace::models::{Exchange, HttpRequest, HttpResponse};
use idtrace::session::CaptureSession;

pub const API: &str = "https://api.example.com";

/// Fixed base time so report timestamps are reproducible
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

/// Request against the test API host
pub fn request(method: &str, path: &str) -> HttpRequest {
    HttpRequest::new(method, format!("{API}{path}"))
}

/// Exchange completed `offset` seconds after the base time
pub fn exchange(request: HttpRequest, response: Option<HttpResponse>, offset: i64) -> Exchange {
    let exchange = Exchange::new(request).at(base_time() + Duration::seconds(offset));
    match response {
        Some(response) => exchange.with_response(response),
        None => exchange,
    }
}

pub fn json_response(body: &str) -> HttpResponse {
    HttpResponse::new(200).with_json(body)
}

/// Runs exchanges through a fresh session
pub fn capture(config: TrackerConfig, exchanges: &[Exchange]) -> CaptureSession {
    let mut session = CaptureSession::new(config).expect("valid config");
    for exchange in exchanges {
        session.ingest(exchange);
    }
    session
}

/// List users, fetch one of them, then fetch an order nobody handed out
pub fn users_scenario() -> Vec<Exchange> {
    vec![
        exchange(
            request("GET", "/users"),
            Some(json_response(r#"{"id":"1001"}"#)),
            0,
        ),
        exchange(
            request("GET", "/users/1001"),
            Some(json_response(r#"{"name":"alice"}"#)),
            1,
        ),
        exchange(request("GET", "/orders/9999"), Some(HttpResponse::new(404)), 2),
    ]
}
