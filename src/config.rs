//! Configuration file parser and feed profile validation.
//!
//! The config file is optional: a missing file yields `Config::default()`,
//! which serves no feeds. Unknown keys are silently ignored by serde (with
//! `deny_unknown_fields` off), though we log a warning when the file contains
//! potential typos.
//!
//! Feed definitions are compiled into [`FeedProfile`]s before the server
//! starts taking requests: a feed with a broken filter rule or source URL
//! fails startup instead of failing on the request path.
use crate::feed::transform::DEFAULT_DISCLOSURE_TEMPLATE;
use crate::feed::{FilterError, FilterRule};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds the maximum allowed size.
    #[error("config file too large: {0}")]
    TooLarge(String),

    /// A global setting has a value outside its supported range.
    #[error("invalid setting: {0}")]
    Setting(String),

    /// A feed definition failed validation.
    #[error("feed `{feed}`: {problem}")]
    Feed { feed: String, problem: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All sections use `#[serde(default)]` so any subset of keys can be
/// specified. Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSettings,
    pub network: NetworkSettings,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,

    /// Feed definitions keyed by the identifier used in `/feeds/{id}` URLs.
    pub feeds: HashMap<String, FeedSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            network: NetworkSettings::default(),
            cache: CacheSettings::default(),
            rate_limit: RateLimitSettings::default(),
            feeds: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Upstream request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Maximum accepted upstream payload, in megabytes.
    pub max_payload_mb: usize,

    /// Contact string embedded in the default `User-Agent`, so upstream
    /// operators can reach whoever runs this instance.
    pub contact_info: String,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
            max_payload_mb: 50,
            contact_info: "an-impolite-user@example.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// How long a fetched feed counts as fresh, in seconds.
    pub max_age_seconds: u64,

    /// Maximum number of upstream feeds kept in memory.
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_age_seconds: 86_400,
            max_entries: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Tokens in a full bucket; also the allowed burst size.
    pub capacity: u32,

    /// Seconds for one token to accrue.
    pub refill_seconds: f64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        // 100 requests of burst, sustained 100 requests per hour.
        Self {
            capacity: 100,
            refill_seconds: 36.0,
        }
    }
}

/// One `[feeds.<id>]` table. Only `source_url` is required; filter fields
/// are validated in [`Config::profiles`].
#[derive(Debug, Clone, Deserialize)]
pub struct FeedSettings {
    /// Upstream feed URL.
    pub source_url: String,

    /// Keywords an item must carry to be kept.
    #[serde(default)]
    pub include: Vec<String>,

    /// Keywords that remove an item even when an include matched.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Regex alternative to the keyword lists; mutually exclusive with them.
    #[serde(default)]
    pub regex: Option<String>,

    /// Per-feed freshness override, in seconds.
    #[serde(default)]
    pub max_age_seconds: Option<u64>,

    #[serde(default)]
    pub rate_capacity: Option<u32>,

    #[serde(default)]
    pub rate_refill_seconds: Option<f64>,

    /// Per-feed `User-Agent` override.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Disclosure line template; `{source}` expands to the source URL.
    #[serde(default)]
    pub disclosure_template: Option<String>,
}

/// A validated, ready-to-serve feed definition with all defaults resolved.
#[derive(Debug, Clone)]
pub struct FeedProfile {
    pub source_url: String,
    pub rule: FilterRule,
    pub ttl: Duration,
    pub rate_capacity: u32,
    pub refill_interval: Duration,
    pub user_agent: String,
    pub disclosure_template: String,
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Largest accepted `max_payload_mb` (10 GiB). Anything beyond this is
    /// a typo, not a feed.
    const MAX_PAYLOAD_MB: usize = 10_240;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged
    ///   as a warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to avoid pulling a corrupted or
        // runaway file into memory.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "no config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race: file deleted between metadata and read.
                tracing::warn!(path = %path.display(), "config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse as a raw table first to flag likely typos at the top level.
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = ["server", "network", "cache", "rate_limit", "feeds"];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            "loaded configuration"
        );
        Ok(config)
    }

    /// Default `User-Agent` sent upstream when a feed does not override it.
    pub fn default_user_agent(&self) -> String {
        format!(
            "podsieve/{} ({})",
            env!("CARGO_PKG_VERSION"),
            self.network.contact_info
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.network.request_timeout_seconds)
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.network.max_payload_mb.saturating_mul(1024 * 1024)
    }

    /// Compile every feed definition into a ready-to-serve profile.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Setting`] for an out-of-range global limit,
    /// and [`ConfigError::Feed`] for the first feed with an invalid source
    /// URL, a missing or contradictory filter rule, a bad regex, a
    /// nonsensical rate limit, or a disclosure template that never names
    /// its source.
    pub fn profiles(&self) -> Result<HashMap<String, FeedProfile>, ConfigError> {
        if self.network.max_payload_mb > Self::MAX_PAYLOAD_MB {
            return Err(ConfigError::Setting(format!(
                "max_payload_mb must be at most {}",
                Self::MAX_PAYLOAD_MB
            )));
        }

        let mut profiles = HashMap::with_capacity(self.feeds.len());
        for (id, feed) in &self.feeds {
            profiles.insert(id.clone(), self.profile_for(id, feed)?);
        }
        Ok(profiles)
    }

    fn profile_for(&self, id: &str, feed: &FeedSettings) -> Result<FeedProfile, ConfigError> {
        let url = Url::parse(&feed.source_url).map_err(|e| ConfigError::Feed {
            feed: id.to_string(),
            problem: format!("invalid source_url: {e}"),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Feed {
                feed: id.to_string(),
                problem: format!("source_url must be http or https, got `{}`", url.scheme()),
            });
        }

        let rule = if let Some(pattern) = &feed.regex {
            if !feed.include.is_empty() || !feed.exclude.is_empty() {
                return Err(ConfigError::Feed {
                    feed: id.to_string(),
                    problem: "regex cannot be combined with include/exclude lists".to_string(),
                });
            }
            FilterRule::regex(pattern).map_err(|e| rule_error(id, e))?
        } else {
            FilterRule::keywords(&feed.include, &feed.exclude).map_err(|e| rule_error(id, e))?
        };

        let refill_seconds = feed
            .rate_refill_seconds
            .unwrap_or(self.rate_limit.refill_seconds);
        if !refill_seconds.is_finite() || refill_seconds < 0.0 {
            return Err(ConfigError::Feed {
                feed: id.to_string(),
                problem: "rate_refill_seconds must be a non-negative number".to_string(),
            });
        }
        // Finite and non-negative can still overflow a Duration.
        let refill_interval =
            Duration::try_from_secs_f64(refill_seconds).map_err(|_| ConfigError::Feed {
                feed: id.to_string(),
                problem: "rate_refill_seconds is too large".to_string(),
            })?;

        let rate_capacity = feed.rate_capacity.unwrap_or(self.rate_limit.capacity);
        if rate_capacity == 0 {
            return Err(ConfigError::Feed {
                feed: id.to_string(),
                problem: "rate_capacity must be at least 1".to_string(),
            });
        }

        if let Some(template) = &feed.disclosure_template {
            if !template.contains("{source}") {
                return Err(ConfigError::Feed {
                    feed: id.to_string(),
                    problem: "disclosure_template must contain the {source} placeholder"
                        .to_string(),
                });
            }
        }

        Ok(FeedProfile {
            source_url: feed.source_url.clone(),
            rule,
            ttl: Duration::from_secs(feed.max_age_seconds.unwrap_or(self.cache.max_age_seconds)),
            rate_capacity,
            refill_interval,
            user_agent: feed
                .user_agent
                .clone()
                .unwrap_or_else(|| self.default_user_agent()),
            disclosure_template: feed
                .disclosure_template
                .clone()
                .unwrap_or_else(|| DEFAULT_DISCLOSURE_TEMPLATE.to_string()),
        })
    }
}

fn rule_error(feed: &str, err: FilterError) -> ConfigError {
    ConfigError::Feed {
        feed: feed.to_string(),
        problem: err.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir_name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("podsieve.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.network.request_timeout_seconds, 30);
        assert_eq!(config.network.max_payload_mb, 50);
        assert_eq!(config.cache.max_age_seconds, 86_400);
        assert_eq!(config.cache.max_entries, 64);
        assert_eq!(config.rate_limit.capacity, 100);
        assert!(config.feeds.is_empty());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/podsieve_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert!(config.feeds.is_empty());
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_empty_file_returns_default() {
        let path = write_config("podsieve_config_test_empty", "   \n  \n");
        let config = Config::load(&path).unwrap();
        assert!(config.feeds.is_empty());
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let path = write_config("podsieve_config_test_partial", "[server]\nport = 9100\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "127.0.0.1"); // default
        assert_eq!(config.cache.max_age_seconds, 86_400); // default
    }

    #[test]
    fn test_full_config_compiles_profiles() {
        let content = r#"
[server]
host = "0.0.0.0"
port = 8080

[network]
request_timeout_seconds = 10
max_payload_mb = 5
contact_info = "ops@example.com"

[cache]
max_age_seconds = 600
max_entries = 16

[rate_limit]
capacity = 10
refill_seconds = 6.0

[feeds.news]
source_url = "https://example.com/feed.xml"
include = ["tech", "rust"]

[feeds.interviews]
source_url = "https://example.com/other.xml"
regex = "interview"
"#;
        let path = write_config("podsieve_config_test_full", content);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.max_payload_bytes(), 5 * 1024 * 1024);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert!(config.default_user_agent().contains("ops@example.com"));

        let profiles = config.profiles().unwrap();
        let news = &profiles["news"];
        assert_eq!(news.source_url, "https://example.com/feed.xml");
        assert_eq!(news.ttl, Duration::from_secs(600));
        assert_eq!(news.rate_capacity, 10);
        assert_eq!(news.refill_interval, Duration::from_secs(6));
        assert!(matches!(news.rule, FilterRule::Keywords { .. }));
        assert!(matches!(profiles["interviews"].rule, FilterRule::Regex(_)));
    }

    #[test]
    fn test_per_feed_overrides() {
        let content = r#"
[feeds.slow]
source_url = "https://example.com/slow.xml"
exclude = ["ads"]
max_age_seconds = 60
rate_capacity = 2
rate_refill_seconds = 30.0
user_agent = "custom-agent/1.0"
disclosure_template = "Filtered from {source}. "
"#;
        let path = write_config("podsieve_config_test_overrides", content);
        let config = Config::load(&path).unwrap();
        let profiles = config.profiles().unwrap();
        let slow = &profiles["slow"];
        assert_eq!(slow.ttl, Duration::from_secs(60));
        assert_eq!(slow.rate_capacity, 2);
        assert_eq!(slow.refill_interval, Duration::from_secs(30));
        assert_eq!(slow.user_agent, "custom-agent/1.0");
        assert_eq!(slow.disclosure_template, "Filtered from {source}. ");
    }

    #[test]
    fn test_feed_without_rule_is_rejected() {
        let content = r#"
[feeds.bare]
source_url = "https://example.com/feed.xml"
"#;
        let path = write_config("podsieve_config_test_no_rule", content);
        let config = Config::load(&path).unwrap();
        let err = config.profiles().unwrap_err();
        assert!(matches!(err, ConfigError::Feed { ref feed, .. } if feed == "bare"));
    }

    #[test]
    fn test_regex_conflicts_with_keyword_lists() {
        let content = r#"
[feeds.mixed]
source_url = "https://example.com/feed.xml"
include = ["tech"]
regex = "tech"
"#;
        let path = write_config("podsieve_config_test_mixed_rule", content);
        let config = Config::load(&path).unwrap();
        let err = config.profiles().unwrap_err();
        assert!(err.to_string().contains("regex cannot be combined"));
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let content = r#"
[feeds.broken]
source_url = "https://example.com/feed.xml"
regex = "["
"#;
        let path = write_config("podsieve_config_test_bad_regex", content);
        let config = Config::load(&path).unwrap();
        assert!(config.profiles().is_err());
    }

    #[test]
    fn test_invalid_source_url_is_rejected() {
        let content = r#"
[feeds.relative]
source_url = "not a url"
include = ["tech"]
"#;
        let path = write_config("podsieve_config_test_bad_url", content);
        let config = Config::load(&path).unwrap();
        assert!(config.profiles().is_err());
    }

    #[test]
    fn test_non_http_scheme_is_rejected() {
        let content = r#"
[feeds.file]
source_url = "file:///etc/passwd"
include = ["tech"]
"#;
        let path = write_config("podsieve_config_test_bad_scheme", content);
        let config = Config::load(&path).unwrap();
        let err = config.profiles().unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn test_missing_source_url_fails_to_parse() {
        let content = r#"
[feeds.no_url]
include = ["tech"]
"#;
        let path = write_config("podsieve_config_test_no_url", content);
        let result = Config::load(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let path = write_config("podsieve_config_test_invalid", "this is not [valid toml");
        let result = Config::load(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = "totally_fake_key = \"should not fail\"\n";
        let path = write_config("podsieve_config_test_unknown", content);
        let config = Config::load(&path).unwrap();
        assert!(config.feeds.is_empty());
    }

    #[test]
    fn test_too_large_file_rejected() {
        let content = "a".repeat(1_048_577);
        let path = write_config("podsieve_config_test_too_large", &content);
        let result = Config::load(&path);
        assert!(matches!(result, Err(ConfigError::TooLarge(_))));
    }

    #[test]
    fn test_negative_refill_is_rejected() {
        let content = r#"
[feeds.broken]
source_url = "https://example.com/feed.xml"
include = ["tech"]
rate_refill_seconds = -5.0
"#;
        let path = write_config("podsieve_config_test_negative_refill", content);
        let config = Config::load(&path).unwrap();
        let err = config.profiles().unwrap_err();
        assert!(err.to_string().contains("non-negative"));
    }

    #[test]
    fn test_disclosure_template_without_source_is_rejected() {
        let content = r#"
[feeds.anon]
source_url = "https://example.com/feed.xml"
include = ["tech"]
disclosure_template = "This feed was filtered. "
"#;
        let path = write_config("podsieve_config_test_bad_template", content);
        let config = Config::load(&path).unwrap();
        let err = config.profiles().unwrap_err();
        assert!(err.to_string().contains("{source}"));
    }

    #[test]
    fn test_overflowing_refill_is_rejected() {
        // Finite, non-negative, but beyond what a Duration can hold; must be
        // a config error, not a panic.
        let content = r#"
[feeds.broken]
source_url = "https://example.com/feed.xml"
include = ["tech"]
rate_refill_seconds = 1.0e20
"#;
        let path = write_config("podsieve_config_test_overflow_refill", content);
        let config = Config::load(&path).unwrap();
        let err = config.profiles().unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_zero_rate_capacity_is_rejected() {
        let content = r#"
[feeds.frozen]
source_url = "https://example.com/feed.xml"
include = ["tech"]
rate_capacity = 0
"#;
        let path = write_config("podsieve_config_test_zero_capacity", content);
        let config = Config::load(&path).unwrap();
        let err = config.profiles().unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_absurd_payload_limit_is_rejected() {
        let content = "[network]\nmax_payload_mb = 9000000000000\n";
        let path = write_config("podsieve_config_test_huge_payload", content);
        let config = Config::load(&path).unwrap();
        let err = config.profiles().unwrap_err();
        assert!(err.to_string().contains("max_payload_mb"));
    }

    #[test]
    fn test_payload_cap_saturates_instead_of_overflowing() {
        let mut config = Config::default();
        config.network.max_payload_mb = usize::MAX;
        assert_eq!(config.max_payload_bytes(), usize::MAX);
    }
}
