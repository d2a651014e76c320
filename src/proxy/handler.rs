//! Per-request proxy logic
//!
//! Plain HTTP requests are forwarded upstream and captured as exchanges.
//! CONNECT requests are tunneled blind and never recorded.

use crate::models::{Exchange, HttpRequest, HttpResponse};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::HOST;
use hyper::{HeaderMap, Method, Request, Response};
use tokio::net::TcpStream;
use tracing::{debug, error, warn};

use super::traffic::ExchangeQueue;

type ProxyResponse = std::result::Result<Response<Full<Bytes>>, hyper::Error>;

/// Headers scoped to a single client/proxy hop
const HOP_HEADERS: &[&str] = &[
    "host",
    "proxy-connection",
    "proxy-authorization",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

fn is_hop_header(name: &str) -> bool {
    HOP_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Client headers not replayed upstream; the proxy client negotiates its own
/// encodings so response bodies are captured decoded
fn is_upstream_skipped(name: &str) -> bool {
    is_hop_header(name) || name.eq_ignore_ascii_case("accept-encoding")
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect()
}

/// Absolute URL of a proxied request; origin-form targets are resolved via Host
fn absolute_url<B>(req: &Request<B>) -> String {
    let uri = req.uri().to_string();
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return uri;
    }
    let host = req
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}{uri}")
}

fn text_body(bytes: &[u8]) -> Option<String> {
    (!bytes.is_empty()).then(|| String::from_utf8_lossy(bytes).into_owned())
}

fn plain_response(status: u16, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let body = Full::new(body.into());
    let mut response = Response::new(body);
    if let Ok(status) = hyper::StatusCode::from_u16(status) {
        *response.status_mut() = status;
    }
    response
}

fn enqueue(queue: &ExchangeQueue, exchange: Exchange) {
    let url = exchange.request.url.clone();
    if let Err(e) = queue.send(exchange) {
        warn!("Dropping exchange for {}: {}", url, e);
    }
}

/// Entry point for every request arriving at the proxy
pub async fn handle_request(
    req: Request<Incoming>,
    queue: ExchangeQueue,
    client: reqwest::Client,
) -> ProxyResponse {
    if req.method() == Method::CONNECT {
        Ok(tunnel(req))
    } else {
        Ok(forward(req, &queue, &client).await)
    }
}

/// Forwards a plain HTTP request and records the completed exchange
async fn forward(
    req: Request<Incoming>,
    queue: &ExchangeQueue,
    client: &reqwest::Client,
) -> Response<Full<Bytes>> {
    let url = absolute_url(&req);
    let method = req.method().clone();
    let headers = header_pairs(req.headers());

    let body = match req.into_body().collect().await {
        Ok(collected) => text_body(&collected.to_bytes()),
        Err(e) => {
            error!("Failed to read request body for {}: {}", url, e);
            None
        }
    };

    let mut request = HttpRequest::new(method.as_str(), url.clone());
    request.headers = headers;
    request.body = body;

    let upstream_method =
        reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET);
    let mut upstream = client.request(upstream_method, &url);
    for (name, value) in request.headers.iter().filter(|(k, _)| !is_upstream_skipped(k)) {
        upstream = upstream.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
        upstream = upstream.body(body.clone());
    }

    let upstream_response = match upstream.send().await {
        Ok(resp) => resp,
        Err(e) => {
            error!("Upstream request to {} failed: {}", url, e);
            enqueue(queue, Exchange::new(request));
            return plain_response(502, format!("Bad Gateway: {e}"));
        }
    };

    let status = upstream_response.status().as_u16();
    let response_headers = header_pairs(upstream_response.headers());
    let payload = upstream_response.bytes().await.unwrap_or_default();

    // reqwest drops Content-Encoding and Content-Length once it has decoded
    let mut captured = HttpResponse::new(status);
    captured.headers = response_headers;
    captured.body = text_body(&payload);

    let mut client_response = plain_response(status, payload);
    for (name, value) in &captured.headers {
        // hyper recomputes the length for the buffered body
        if is_hop_header(name) || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            hyper::header::HeaderName::from_bytes(name.as_bytes()),
            hyper::header::HeaderValue::from_str(value),
        ) {
            client_response.headers_mut().append(name, value);
        }
    }

    debug!("{} {} -> {}", method, url, status);
    enqueue(queue, Exchange::new(request).with_response(captured));
    client_response
}

/// Answers CONNECT and relays bytes between client and target uninspected
fn tunnel(req: Request<Incoming>) -> Response<Full<Bytes>> {
    let target = req
        .uri()
        .authority()
        .map(|a| a.to_string())
        .unwrap_or_default();
    debug!("CONNECT tunnel to {} (not inspected)", target);

    tokio::task::spawn(async move {
        let mut upstream = match TcpStream::connect(&target).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to connect to {}: {}", target, e);
                return;
            }
        };
        let upgraded = match hyper::upgrade::on(req).await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                error!("CONNECT upgrade failed: {}", e);
                return;
            }
        };
        let mut client_side = hyper_util::rt::TokioIo::new(upgraded);
        if let Err(e) = tokio::io::copy_bidirectional(&mut client_side, &mut upstream).await {
            debug!("Tunnel to {} closed: {}", target, e);
        }
    });

    plain_response(200, Bytes::new())
}
