//! Domain and static-asset filtering applied before extraction

use crate::config::TrackerConfig;
use url::Url;

/// Matches a host against a domain glob.
///
/// `*.example.com` matches any subdomain but not `example.com` itself; any
/// other pattern must match exactly. Comparison is case-insensitive.
pub fn match_domain(host: &str, pattern: &str) -> bool {
    let host = host.to_lowercase();
    let pattern = pattern.trim().to_lowercase();

    match pattern.strip_prefix("*.") {
        Some(apex) => host.ends_with(&format!(".{apex}")),
        None => host == pattern,
    }
}

/// True when the host matches any of the globs
pub fn matches_any(host: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| match_domain(host, p))
}

/// Which flows are eligible for identifier extraction
#[derive(Debug, Clone, Default)]
pub struct Scope {
    target_domains: Vec<String>,
    exclude_domains: Vec<String>,
    exclude_extensions: Vec<String>,
}

impl Scope {
    pub fn new(
        target_domains: Vec<String>,
        exclude_domains: Vec<String>,
        exclude_extensions: Vec<String>,
    ) -> Self {
        Self {
            target_domains,
            exclude_domains,
            exclude_extensions: exclude_extensions
                .into_iter()
                .map(|e| e.to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(
            config.target_domains.clone(),
            config.exclude_domains.clone(),
            config.exclude_extensions.clone(),
        )
    }

    /// Block-list first, then the allow-list when one is configured
    pub fn should_track_domain(&self, host: &str) -> bool {
        if matches_any(host, &self.exclude_domains) {
            return false;
        }
        self.target_domains.is_empty() || matches_any(host, &self.target_domains)
    }

    /// False for paths ending in a static asset extension
    pub fn should_track_path(&self, path: &str) -> bool {
        let lower = path.to_lowercase();
        !self.exclude_extensions.iter().any(|ext| lower.ends_with(ext))
    }

    /// Combined domain and extension decision for a full URL
    pub fn should_track_url(&self, url: &str) -> bool {
        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(_) => return false,
        };
        let host = parsed.host_str().unwrap_or("");
        self.should_track_domain(host) && self.should_track_path(parsed.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_domain() {
        assert!(match_domain("api.example.com", "api.example.com"));
        assert!(match_domain("API.Example.com", "api.example.com"));
        assert!(match_domain("api.example.com", "*.example.com"));
        assert!(match_domain("sub.api.example.com", "*.example.com"));
        assert!(!match_domain("example.com", "*.example.com"));
        assert!(!match_domain("badexample.com", "*.example.com"));
    }

    #[test]
    fn test_exclude_takes_precedence() {
        let scope = Scope::new(
            vec!["*.example.com".to_string()],
            vec!["analytics.example.com".to_string()],
            vec![],
        );
        assert!(scope.should_track_domain("api.example.com"));
        assert!(!scope.should_track_domain("analytics.example.com"));
        assert!(!scope.should_track_domain("other.org"));
    }

    #[test]
    fn test_static_assets_skipped() {
        let scope = Scope::from_config(&TrackerConfig::default());
        assert!(!scope.should_track_url("https://example.com/static/app.JS"));
        assert!(!scope.should_track_url("https://example.com/img/logo.png?v=12345"));
        assert!(scope.should_track_url("https://example.com/api/users/1001"));
    }

    #[test]
    fn test_port_is_ignored_for_domain_match() {
        let scope = Scope::new(vec!["localhost".to_string()], vec![], vec![]);
        assert!(scope.should_track_url("http://localhost:8080/api/items"));
    }
}
