//! Configuration management for the event sink
//!
//! [`SinkConfig`] is the partial, user-facing configuration. It can be loaded
//! from a JSON file and from the environment, layered with [`SinkConfig::merge`],
//! and finally resolved against the defaults into immutable [`Settings`].

use crate::errors::{Result, SinkError};
use crate::filter::EventFilter;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_THRESHOLD: usize = 20;
pub const DEFAULT_SCHEMA: &str = "good-http";
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Serialization format of the envelope, forced on every request.
pub const CONTENT_TYPE: &str = "application/json";

/// How many consecutive flush failures are tolerated before a batch is
/// dropped and the failure reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorThreshold {
    Bounded(u32),
    /// Failures are dropped silently and never reported.
    Unbounded,
}

impl Default for ErrorThreshold {
    fn default() -> Self {
        ErrorThreshold::Bounded(0)
    }
}

impl fmt::Display for ErrorThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorThreshold::Bounded(n) => write!(f, "{}", n),
            ErrorThreshold::Unbounded => write!(f, "unbounded"),
        }
    }
}

impl FromStr for ErrorThreshold {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unbounded" | "infinity" | "inf" => Ok(ErrorThreshold::Unbounded),
            other => other
                .parse::<u32>()
                .map(ErrorThreshold::Bounded)
                .map_err(|_| format!("invalid error threshold: {}", s)),
        }
    }
}

impl Serialize for ErrorThreshold {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ErrorThreshold::Bounded(n) => serializer.serialize_u32(*n),
            ErrorThreshold::Unbounded => serializer.serialize_str("unbounded"),
        }
    }
}

impl<'de> Deserialize<'de> for ErrorThreshold {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(u32),
            Keyword(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Count(n) => Ok(ErrorThreshold::Bounded(n)),
            Raw::Keyword(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Transport options as supplied by the user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Partial sink configuration. Unset fields fall back to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkConfig {
    /// Collector URL the envelopes are POSTed to
    pub endpoint: Option<String>,

    /// Host identity written into every envelope
    pub host: Option<String>,

    /// Batch size that triggers a flush
    pub threshold: Option<usize>,

    pub error_threshold: Option<ErrorThreshold>,

    /// Schema tag written into every envelope
    pub schema: Option<String>,

    /// Group events by type and order them by timestamp
    #[serde(alias = "mapEvents")]
    pub group_events: Option<bool>,

    #[serde(default)]
    pub transport: TransportConfig,

    /// Event subscription applied by the line collector
    #[serde(default)]
    pub events: EventFilter,
}

impl SinkConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Values that fail to parse are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = SinkConfig::default();

        if let Some(endpoint) = lookup("GOOD_HTTP_ENDPOINT") {
            config.endpoint = Some(endpoint);
        }

        if let Some(host) = lookup("GOOD_HTTP_HOST") {
            config.host = Some(host);
        }

        if let Some(threshold) = lookup("GOOD_HTTP_THRESHOLD") {
            if let Ok(threshold) = threshold.parse() {
                config.threshold = Some(threshold);
            }
        }

        if let Some(error_threshold) = lookup("GOOD_HTTP_ERROR_THRESHOLD") {
            if let Ok(error_threshold) = error_threshold.parse() {
                config.error_threshold = Some(error_threshold);
            }
        }

        if let Some(schema) = lookup("GOOD_HTTP_SCHEMA") {
            config.schema = Some(schema);
        }

        if let Some(group_events) = lookup("GOOD_HTTP_GROUP_EVENTS") {
            config.group_events = Some(group_events.to_lowercase() == "true");
        }

        if let Some(timeout) = lookup("GOOD_HTTP_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                config.transport.timeout_ms = Some(ms);
            }
        }

        config
    }

    /// Overlay `other` on top of `self`. Fields set in `other` win; headers
    /// (compared case-insensitively) and event subscriptions are merged key
    /// by key.
    pub fn merge(mut self, other: SinkConfig) -> Self {
        self.endpoint = other.endpoint.or(self.endpoint);
        self.host = other.host.or(self.host);
        self.threshold = other.threshold.or(self.threshold);
        self.error_threshold = other.error_threshold.or(self.error_threshold);
        self.schema = other.schema.or(self.schema);
        self.group_events = other.group_events.or(self.group_events);
        self.transport.timeout_ms = other.transport.timeout_ms.or(self.transport.timeout_ms);
        let mut headers = lowercase_names(self.transport.headers);
        headers.extend(lowercase_names(other.transport.headers));
        self.transport.headers = headers;
        self.events = self.events.merge(other.events);
        self
    }
}

/// Resolved transport options
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSettings {
    pub timeout: Duration,

    /// Lowercased header names; always contains `content-type`
    pub headers: BTreeMap<String, String>,
}

/// Immutable, fully resolved sink settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub endpoint: Url,
    pub host: String,
    pub threshold: usize,
    pub error_threshold: ErrorThreshold,
    pub schema: String,
    pub group_events: bool,
    pub transport: TransportSettings,
}

impl Settings {
    /// Overlay the user configuration onto the defaults
    pub fn resolve(config: SinkConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .ok_or_else(|| SinkError::Config("endpoint must be set".to_string()))?;

        let endpoint = Url::parse(endpoint).map_err(|e| {
            SinkError::Config(format!("endpoint {} is not a valid URL: {}", endpoint, e))
        })?;

        let mut headers = lowercase_names(config.transport.headers);

        // The envelope is always JSON, whatever the user asked for
        headers.insert("content-type".to_string(), CONTENT_TYPE.to_string());

        Ok(Self {
            endpoint,
            host: config.host.unwrap_or_else(hostname),
            threshold: config.threshold.unwrap_or(DEFAULT_THRESHOLD),
            error_threshold: config.error_threshold.unwrap_or_default(),
            schema: config.schema.unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            group_events: config.group_events.unwrap_or(false),
            transport: TransportSettings {
                timeout: Duration::from_millis(
                    config.transport.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
                ),
                headers,
            },
        })
    }
}

fn lowercase_names(headers: BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .into_iter()
        .map(|(name, value)| (name.to_lowercase(), value))
        .collect()
}

/// Host identity: `HOSTNAME`, then the system hostname, then `unknown`.
pub fn hostname() -> String {
    if let Ok(hostname) = env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }

    if let Some(hostname) = system_hostname() {
        return hostname;
    }

    tracing::warn!("Could not determine hostname, using 'unknown'");
    "unknown".to_string()
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    match nix::unistd::gethostname() {
        Ok(hostname) => hostname
            .to_str()
            .filter(|hostname| !hostname.is_empty())
            .map(str::to_string),
        Err(e) => {
            tracing::warn!("Failed to get system hostname: {}", e);
            None
        }
    }
}

#[cfg(not(unix))]
fn system_hostname() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn with_endpoint() -> SinkConfig {
        SinkConfig {
            endpoint: Some("http://localhost:31337/ingest".to_string()),
            host: Some("test-host".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::resolve(with_endpoint()).unwrap();

        assert_eq!(settings.endpoint.as_str(), "http://localhost:31337/ingest");
        assert_eq!(settings.host, "test-host");
        assert_eq!(settings.threshold, 20);
        assert_eq!(settings.error_threshold, ErrorThreshold::Bounded(0));
        assert_eq!(settings.schema, "good-http");
        assert!(!settings.group_events);
        assert_eq!(settings.transport.timeout, Duration::from_secs(60));
        assert_eq!(settings.transport.headers.len(), 1);
        assert_eq!(settings.transport.headers["content-type"], "application/json");
    }

    #[test]
    fn test_missing_endpoint() {
        assert!(matches!(
            Settings::resolve(SinkConfig::default()),
            Err(SinkError::Config(_))
        ));

        let blank = SinkConfig {
            endpoint: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(matches!(Settings::resolve(blank), Err(SinkError::Config(_))));
    }

    #[test]
    fn test_invalid_endpoint() {
        let config = SinkConfig {
            endpoint: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(matches!(Settings::resolve(config), Err(SinkError::Config(_))));
    }

    #[test]
    fn test_content_type_is_forced() {
        let mut config = with_endpoint();
        config
            .transport
            .headers
            .insert("Content-Type".to_string(), "text/plain".to_string());
        config
            .transport
            .headers
            .insert("X-Api-Key".to_string(), "12345".to_string());

        let settings = Settings::resolve(config).unwrap();
        let headers = &settings.transport.headers;

        assert_eq!(headers.len(), 2);
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["x-api-key"], "12345");
    }

    #[test]
    fn test_error_threshold_parsing() {
        assert_eq!("3".parse::<ErrorThreshold>(), Ok(ErrorThreshold::Bounded(3)));
        assert_eq!("Unbounded".parse::<ErrorThreshold>(), Ok(ErrorThreshold::Unbounded));
        assert_eq!("inf".parse::<ErrorThreshold>(), Ok(ErrorThreshold::Unbounded));
        assert!("-1".parse::<ErrorThreshold>().is_err());
        assert!("lots".parse::<ErrorThreshold>().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("GOOD_HTTP_ENDPOINT", "http://collector:8080"),
            ("GOOD_HTTP_THRESHOLD", "5"),
            ("GOOD_HTTP_ERROR_THRESHOLD", "unbounded"),
            ("GOOD_HTTP_GROUP_EVENTS", "TRUE"),
            ("GOOD_HTTP_TIMEOUT_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = SinkConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.endpoint.as_deref(), Some("http://collector:8080"));
        assert_eq!(config.threshold, Some(5));
        assert_eq!(config.error_threshold, Some(ErrorThreshold::Unbounded));
        assert_eq!(config.group_events, Some(true));
        assert_eq!(config.transport.timeout_ms, None);
        assert_eq!(config.schema, None);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "endpoint": "http://collector:8080/events",
                "threshold": 5,
                "errorThreshold": "unbounded",
                "mapEvents": true,
                "transport": {{ "timeoutMs": 1000, "headers": {{ "x-api-key": "12345" }} }},
                "events": {{ "log": "*", "request": ["api"] }}
            }}"#
        )
        .unwrap();

        let config = SinkConfig::from_file(file.path()).unwrap();

        assert_eq!(config.threshold, Some(5));
        assert_eq!(config.error_threshold, Some(ErrorThreshold::Unbounded));
        assert_eq!(config.group_events, Some(true));
        assert_eq!(config.transport.timeout_ms, Some(1000));
        assert_eq!(config.transport.headers["x-api-key"], "12345");
        assert!(!config.events.is_empty());
    }

    #[test]
    fn test_from_file_rejects_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        assert!(matches!(
            SinkConfig::from_file(file.path()),
            Err(SinkError::Json(_))
        ));
    }

    #[test]
    fn test_merge_precedence() {
        let mut base = with_endpoint();
        base.threshold = Some(10);
        base.schema = Some("base".to_string());
        base.transport
            .headers
            .insert("x-a".to_string(), "1".to_string());

        let mut overlay = SinkConfig {
            threshold: Some(3),
            ..Default::default()
        };
        overlay
            .transport
            .headers
            .insert("x-b".to_string(), "2".to_string());

        let merged = base.merge(overlay);

        assert_eq!(merged.threshold, Some(3));
        assert_eq!(merged.schema.as_deref(), Some("base"));
        assert_eq!(merged.endpoint.as_deref(), Some("http://localhost:31337/ingest"));
        assert_eq!(merged.transport.headers.len(), 2);
    }

    #[test]
    fn test_merge_headers_ignore_case() {
        let mut file = with_endpoint();
        file.transport
            .headers
            .insert("x-api-key".to_string(), "from-file".to_string());

        let mut flags = SinkConfig::default();
        flags
            .transport
            .headers
            .insert("X-Api-Key".to_string(), "from-flags".to_string());

        let settings = Settings::resolve(file.merge(flags)).unwrap();

        assert_eq!(settings.transport.headers.len(), 2);
        assert_eq!(settings.transport.headers["x-api-key"], "from-flags");
    }
}
