//! Configuration management for idtrace
//!
//! Configuration is read from YAML (optionally nested under an `idtrace:` key)
//! or TOML, merged over the defaults and validated eagerly: every detection and
//! exclusion pattern is compiled at load time so a bad regex is reported before
//! any traffic is processed.

use crate::error::{IdtraceError, Result};
use crate::tracker::matcher::PatternMatcher;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File names searched for in the working directory when no path is given
pub const CONFIG_SEARCH_PATHS: &[&str] = &[
    "idtrace.yaml",
    "idtrace.yml",
    ".idtrace.yaml",
    ".idtrace.yml",
    "idtrace.toml",
];

/// Default detection rules, in evaluation order
pub const DEFAULT_PATTERNS: &[(&str, &str)] = &[
    (
        "uuid",
        r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
    ),
    ("numeric", r"\b[1-9][0-9]{2,10}\b"),
    ("token", r"\b[A-Za-z0-9_-]{20,}\b"),
];

/// Values that look like identifiers but are not
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    r"^\d{10,13}$",      // Unix timestamps
    r"^\d+\.\d+\.\d+$", // version strings
];

pub const DEFAULT_CONTENT_TYPES: &[&str] = &[
    "application/json",
    "application/x-www-form-urlencoded",
    "text/html",
    "text/plain",
];

/// Metadata, cache and CORS headers never scanned for identifiers
pub const DEFAULT_IGNORE_HEADERS: &[&str] = &[
    "content-type",
    "content-length",
    "content-encoding",
    "accept",
    "accept-encoding",
    "accept-language",
    "accept-charset",
    "user-agent",
    "host",
    "connection",
    "origin",
    "referer",
    "cache-control",
    "pragma",
    "etag",
    "last-modified",
    "expires",
    "if-none-match",
    "if-modified-since",
    "access-control-*",
    "date",
    "server",
    "vary",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "sec-ch-ua*",
    "sec-fetch-*",
    "dnt",
    "upgrade-insecure-requests",
];

/// Keys whose `config set` value is a comma-separated list
const LIST_KEYS: &[&str] = &[
    "exclude_patterns",
    "trackable_content_types",
    "ignore_headers",
    "extra_ignore_headers",
    "target_domains",
    "exclude_domains",
    "exclude_extensions",
];

pub const DEFAULT_EXCLUDE_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".map", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".webp", ".bmp",
    ".woff", ".woff2", ".ttf", ".eot", ".otf", ".mp3", ".mp4", ".webm", ".ogg", ".wav", ".pdf",
    ".zip", ".gz",
];

/// Resolved tracker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Report output path
    pub output: String,
    /// Numeric identifiers below this value are ignored
    pub min_numeric: u64,
    /// Detection rules (name, regex) in evaluation order
    pub patterns: Vec<(String, String)>,
    /// Regexes that veto a detected value when they match it entirely
    pub exclude_patterns: Vec<String>,
    /// Content types whose bodies are scanned
    pub trackable_content_types: Vec<String>,
    /// Headers never scanned (supports `*` suffix wildcards)
    pub ignore_headers: Vec<String>,
    /// Additional ignored headers appended to `ignore_headers`
    pub extra_ignore_headers: Vec<String>,
    /// Host allow-list (empty = every host)
    pub target_domains: Vec<String>,
    /// Host block-list, takes precedence over the allow-list
    pub exclude_domains: Vec<String>,
    /// Static asset extensions skipped entirely
    pub exclude_extensions: Vec<String>,
    /// Maximum stored body size in bytes (0 = unlimited)
    pub max_body_size: usize,
    /// Record filtered exchanges as flows without occurrences
    pub keep_filtered_flows: bool,
}

fn yaml_key(name: &str) -> Value {
    Value::String(name.to_string())
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            output: "idtrace_report.json".to_string(),
            min_numeric: 100,
            patterns: DEFAULT_PATTERNS
                .iter()
                .map(|(name, re)| (name.to_string(), re.to_string()))
                .collect(),
            exclude_patterns: to_strings(DEFAULT_EXCLUDE_PATTERNS),
            trackable_content_types: to_strings(DEFAULT_CONTENT_TYPES),
            ignore_headers: to_strings(DEFAULT_IGNORE_HEADERS),
            extra_ignore_headers: Vec::new(),
            target_domains: Vec::new(),
            exclude_domains: Vec::new(),
            exclude_extensions: to_strings(DEFAULT_EXCLUDE_EXTENSIONS),
            max_body_size: 51200,
            keep_filtered_flows: false,
        }
    }
}

impl TrackerConfig {
    /// All ignored header names, lower-cased
    pub fn all_ignore_headers(&self) -> Vec<String> {
        self.ignore_headers
            .iter()
            .chain(self.extra_ignore_headers.iter())
            .map(|h| h.trim().to_lowercase())
            .collect()
    }

    /// Compiles every pattern and fails on the first invalid one
    pub fn validate(&self) -> Result<()> {
        PatternMatcher::from_config(self).map(|_| ())
    }

    /// Compiles every pattern individually and reports each failure
    pub fn pattern_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (name, pattern) in &self.patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(format!("Invalid regex in patterns.{name}: {e}"));
            }
        }
        for (i, pattern) in self.exclude_patterns.iter().enumerate() {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(format!("Invalid regex in exclude_patterns[{i}]: {e}"));
            }
        }
        errors
    }

    /// Effective configuration as a YAML mapping, patterns in evaluation order
    pub fn to_yaml(&self) -> Value {
        let list = |items: &[String]| Value::Sequence(items.iter().cloned().map(Value::String).collect());

        let mut patterns = Mapping::new();
        for (name, pattern) in &self.patterns {
            patterns.insert(yaml_key(name), Value::String(pattern.clone()));
        }

        let mut root = Mapping::new();
        root.insert(yaml_key("output"), Value::String(self.output.clone()));
        root.insert(yaml_key("min_numeric"), Value::Number(self.min_numeric.into()));
        root.insert(yaml_key("patterns"), Value::Mapping(patterns));
        root.insert(yaml_key("exclude_patterns"), list(&self.exclude_patterns));
        root.insert(
            yaml_key("trackable_content_types"),
            list(&self.trackable_content_types),
        );
        root.insert(yaml_key("ignore_headers"), list(&self.ignore_headers));
        root.insert(yaml_key("extra_ignore_headers"), list(&self.extra_ignore_headers));
        root.insert(yaml_key("target_domains"), list(&self.target_domains));
        root.insert(yaml_key("exclude_domains"), list(&self.exclude_domains));
        root.insert(yaml_key("exclude_extensions"), list(&self.exclude_extensions));
        root.insert(
            yaml_key("max_body_size"),
            Value::Number((self.max_body_size as u64).into()),
        );
        root.insert(
            yaml_key("keep_filtered_flows"),
            Value::Bool(self.keep_filtered_flows),
        );
        Value::Mapping(root)
    }

    /// Looks up a dotted key such as `min_numeric` or `patterns.uuid`
    pub fn get_value(&self, key: &str) -> Option<Value> {
        let root = self.to_yaml();
        let mut current = &root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current.clone())
    }

    /// Places user rules first; defaults the user did not redefine follow
    fn merge_patterns(&mut self, user: Vec<(String, String)>) {
        let defaults = std::mem::take(&mut self.patterns);
        let mut merged = user;
        for (name, pattern) in defaults {
            if !merged.iter().any(|(n, _)| n == &name) {
                merged.push((name, pattern));
            }
        }
        self.patterns = merged;
    }
}

/// Detection rules in document order
#[derive(Debug, Default)]
struct PatternList(Vec<(String, String)>);

impl<'de> Deserialize<'de> for PatternList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct PatternVisitor;

        impl<'de> Visitor<'de> for PatternVisitor {
            type Value = PatternList;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of pattern name to regex")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<PatternList, A::Error> {
                let mut entries = Vec::new();
                while let Some((name, pattern)) = map.next_entry::<String, String>()? {
                    entries.push((name, pattern));
                }
                Ok(PatternList(entries))
            }
        }

        deserializer.deserialize_map(PatternVisitor)
    }
}

/// File-based configuration structure
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    output: Option<String>,
    min_numeric: Option<u64>,
    patterns: Option<PatternList>,
    exclude_patterns: Option<Vec<String>>,
    trackable_content_types: Option<Vec<String>>,
    ignore_headers: Option<Vec<String>>,
    extra_ignore_headers: Option<Vec<String>>,
    target_domains: Option<Vec<String>>,
    exclude_domains: Option<Vec<String>>,
    exclude_extensions: Option<Vec<String>>,
    max_body_size: Option<usize>,
    keep_filtered_flows: Option<bool>,
}

impl FileConfig {
    fn apply(self, config: &mut TrackerConfig) {
        if let Some(output) = self.output {
            config.output = output;
        }
        if let Some(min) = self.min_numeric {
            config.min_numeric = min;
        }
        if let Some(patterns) = self.patterns {
            config.merge_patterns(patterns.0);
        }
        if let Some(excludes) = self.exclude_patterns {
            config.exclude_patterns = excludes;
        }
        if let Some(types) = self.trackable_content_types {
            config.trackable_content_types = types;
        }
        if let Some(headers) = self.ignore_headers {
            config.ignore_headers = headers;
        }
        if let Some(headers) = self.extra_ignore_headers {
            config.extra_ignore_headers = headers;
        }
        if let Some(domains) = self.target_domains {
            config.target_domains = domains;
        }
        if let Some(domains) = self.exclude_domains {
            config.exclude_domains = domains;
        }
        if let Some(exts) = self.exclude_extensions {
            config.exclude_extensions = exts;
        }
        if let Some(size) = self.max_body_size {
            config.max_body_size = size;
        }
        if let Some(keep) = self.keep_filtered_flows {
            config.keep_filtered_flows = keep;
        }
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false)
}

/// Parses configuration text without validating patterns
pub fn parse_config(content: &str, toml_format: bool) -> Result<TrackerConfig> {
    let file_config: FileConfig = if toml_format {
        toml::from_str(content)?
    } else {
        let mut value: serde_yaml::Value = serde_yaml::from_str(content)?;
        if let Some(section) = value.get("idtrace") {
            value = section.clone();
        }
        match value {
            serde_yaml::Value::Null => FileConfig::default(),
            serde_yaml::Value::Mapping(_) => serde_yaml::from_value(value)?,
            _ => {
                return Err(IdtraceError::ConfigError(
                    "configuration must be a mapping".to_string(),
                ))
            }
        }
    };

    let mut config = TrackerConfig::default();
    file_config.apply(&mut config);
    Ok(config)
}

/// Loads configuration from a file and merges it with the defaults
pub fn load_config_file(path: &Path) -> Result<TrackerConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        IdtraceError::ConfigError(format!("cannot read {}: {}", path.display(), e))
    })?;
    let config = parse_config(&content, is_toml(path))?;
    config.validate()?;
    debug!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Returns the first config file present in the working directory
pub fn find_config_path() -> Option<PathBuf> {
    CONFIG_SEARCH_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

/// Loads the explicit config file, else a discovered one, else the defaults
pub fn load_config(path: Option<&Path>) -> Result<TrackerConfig> {
    match path {
        Some(path) => load_config_file(path),
        None => match find_config_path() {
            Some(found) => load_config_file(&found),
            None => Ok(TrackerConfig::default()),
        },
    }
}

/// Checks a config file and returns every problem found (empty = valid)
pub fn validate_config(path: &Path) -> Vec<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => return vec![format!("Cannot read file: {e}")],
    };
    match parse_config(&content, is_toml(path)) {
        Ok(config) => config.pattern_errors(),
        Err(e) => vec![e.to_string()],
    }
}

/// Typed YAML value for a `config set` argument
fn parse_setting(key: &str, raw: &str) -> Value {
    if LIST_KEYS.contains(&key) {
        return Value::Sequence(
            raw.split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| Value::String(v.to_string()))
                .collect(),
        );
    }
    if let Ok(n) = raw.parse::<u64>() {
        return Value::Number(n.into());
    }
    match raw.to_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

/// Sets one dotted key in a YAML config file and rewrites it.
///
/// The edited document must still load with valid patterns, otherwise the
/// file is left untouched. Comments are not carried over.
pub fn set_config_value(path: &Path, key: &str, raw: &str) -> Result<()> {
    if is_toml(path) {
        return Err(IdtraceError::ConfigError(
            "config set only edits YAML files".to_string(),
        ));
    }
    let parts: Vec<&str> = key.split('.').collect();
    let Some((last, parents)) = parts.split_last().filter(|_| parts.iter().all(|p| !p.is_empty()))
    else {
        return Err(IdtraceError::ConfigError(format!("invalid key '{key}'")));
    };

    let content = std::fs::read_to_string(path).map_err(|e| {
        IdtraceError::ConfigError(format!("cannot read {}: {}", path.display(), e))
    })?;
    let mut document: Value = serde_yaml::from_str(&content)?;
    if document.is_null() {
        document = Value::Mapping(Mapping::new());
    }

    let nested = document.get("idtrace").map(Value::is_mapping).unwrap_or(false);
    let mut target = if nested {
        document.get_mut("idtrace")
    } else {
        Some(&mut document)
    }
    .ok_or_else(|| IdtraceError::ConfigError("configuration must be a mapping".to_string()))?;

    for part in parents {
        let map = target.as_mapping_mut().ok_or_else(|| {
            IdtraceError::ConfigError(format!("cannot set '{key}': parent is not a mapping"))
        })?;
        if !map.get(*part).map(Value::is_mapping).unwrap_or(false) {
            map.insert(yaml_key(part), Value::Mapping(Mapping::new()));
        }
        target = map.get_mut(*part).ok_or_else(|| {
            IdtraceError::ConfigError(format!("cannot set '{key}': missing '{part}'"))
        })?;
    }

    let value = if parts[0] == "patterns" {
        Value::String(raw.to_string())
    } else {
        parse_setting(last, raw)
    };
    target
        .as_mapping_mut()
        .ok_or_else(|| IdtraceError::ConfigError("configuration must be a mapping".to_string()))?
        .insert(yaml_key(last), value);

    let updated = serde_yaml::to_string(&document)?;
    let config = parse_config(&updated, false)?;
    if let Some(error) = config.pattern_errors().into_iter().next() {
        return Err(IdtraceError::ConfigError(error));
    }
    std::fs::write(path, updated)?;
    debug!("Set {} in {}", key, path.display());
    Ok(())
}

/// Merges CLI arguments into an existing config
pub fn merge_cli_args(
    config: &mut TrackerConfig,
    output: Option<String>,
    min_numeric: Option<u64>,
    target_domains: Option<Vec<String>>,
) {
    if let Some(o) = output {
        config.output = o;
    }
    if let Some(m) = min_numeric {
        config.min_numeric = m;
    }
    if let Some(d) = target_domains {
        config.target_domains = d;
    }
}

/// Commented YAML template written by `idtrace config init`
pub fn default_config_yaml() -> &'static str {
    r#"# idtrace configuration
idtrace:
  # Report output path
  output: idtrace_report.json

  # Numeric IDs below this value are ignored
  min_numeric: 100

  # Detection rules (name: regex), evaluated in order before the built-in
  # uuid, numeric and token rules. The first rule to claim a substring wins.
  patterns: {}
    # order_id: 'ORD-[A-Z]{2}-\d{8}'

  # Values matching one of these entirely are never IDs
  exclude_patterns:
    - '^\d{10,13}$'
    - '^\d+\.\d+\.\d+$'

  trackable_content_types:
    - application/json
    - application/x-www-form-urlencoded
    - text/html
    - text/plain

  # Added to the built-in ignore list; '*' suffix wildcards are supported
  extra_ignore_headers: []

  # Host allow-list (empty = all hosts); '*.example.com' matches subdomains
  target_domains: []

  # Host block-list, wins over target_domains
  exclude_domains: []

  # Stored body size cap in bytes (0 = unlimited)
  max_body_size: 51200
"#
}
