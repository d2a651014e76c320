//! API pattern normalization

use url::Url;

fn is_uuid(segment: &str) -> bool {
    segment.len() == 36
        && segment.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}

fn is_token(segment: &str) -> bool {
    segment.len() >= 20
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Path of a URL, or the input itself (minus any query) when it is not a URL
fn url_path(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => {
            let path = url.split(['?', '#']).next().unwrap_or("");
            if path.is_empty() {
                "/".to_string()
            } else {
                path.to_string()
            }
        }
    }
}

/// Replaces identifier-like path segments with placeholders.
///
/// `/users/123/orders/456` becomes `/users/{id}/orders/{id}`; UUID segments
/// become `{uuid}` and long token-like segments `{token}`.
pub fn normalize_api_path(url: &str) -> String {
    url_path(url)
        .split('/')
        .map(|segment| {
            if segment.is_empty() {
                segment
            } else if segment.chars().all(|c| c.is_ascii_digit()) {
                "{id}"
            } else if is_uuid(segment) {
                "{uuid}"
            } else if is_token(segment) {
                "{token}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// `METHOD /normalized/path`, the identity used for cycle detection
pub fn api_pattern(method: &str, url: &str) -> String {
    format!("{} {}", method.to_uppercase(), normalize_api_path(url))
}
