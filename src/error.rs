//! Error types for idtrace

use thiserror::Error;

/// Main error type for idtrace operations
#[derive(Debug, Error)]
pub enum IdtraceError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid regex in {name}: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("Report error: {0}")]
    ReportError(String),

    #[error("Proxy error: {0}")]
    ProxyError(String),
}

/// Result type alias for idtrace operations
pub type Result<T> = std::result::Result<T, IdtraceError>;
