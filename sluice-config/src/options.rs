//! Client options shared by the orchestrator, the response cache and the
//! transport.
//!
//! Every knob has a default, so `ClientOptionsBuilder::default().build()`
//! always yields a usable value. Options can also be read from a YAML
//! section with [`ClientOptions::from_config`]:
//!
//! ```yaml
//! http:
//!   connect_timeout_ms: 2000
//!   request_timeout_ms: 10000
//!   max_request_retry: 2
//!   follow_redirect: true
//!   cache_expire_after_write_secs: 5
//!   cache_maximum_size: 500
//!   retry_backoff:
//!     initial_interval_ms: 50
//!     max_interval_ms: 1000
//! ```
use crate::config::ConfigError;
use derive_builder::Builder;
use serde::Serialize;
use serde_yaml::Value;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = concat!("sluice/", env!("CARGO_PKG_VERSION"));

/// Exponential delay inserted between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RetryBackoff {
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Builder, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[builder(
    public,
    default,
    setter(into),
    build_fn(validate = "Self::validate", error = "ConfigError")
)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub request_timeout: Duration,
    /// Global cap on concurrent connections, `None` means unbounded.
    #[builder(setter(into, strip_option))]
    pub max_connections: Option<usize>,
    #[builder(setter(into, strip_option))]
    pub max_connections_per_host: Option<usize>,
    pub pooled_connection_idle_timeout: Duration,
    #[builder(setter(into, strip_option))]
    pub connection_ttl: Option<Duration>,
    pub max_redirects: usize,
    pub follow_redirect: bool,
    /// Bound on re-attempts after IO-level failures.
    pub max_request_retry: u32,
    pub compression_enforced: bool,
    pub accept_any_certificate: bool,
    pub allow_pooling_connections: bool,
    pub allow_pooling_ssl_connections: bool,
    pub user_agent: String,
    /// Size of the shared worker pool used for retries and cache loads.
    pub max_workers: usize,
    pub cache_expire_after_write: Duration,
    pub cache_maximum_size: u64,
    pub cache_cleanup_interval: Duration,
    #[builder(setter(into, strip_option))]
    pub retry_backoff: Option<RetryBackoff>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(60),
            max_connections: None,
            max_connections_per_host: None,
            pooled_connection_idle_timeout: Duration::from_secs(60),
            connection_ttl: None,
            max_redirects: 5,
            follow_redirect: false,
            max_request_retry: 5,
            compression_enforced: false,
            accept_any_certificate: false,
            allow_pooling_connections: true,
            allow_pooling_ssl_connections: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_workers: 16,
            cache_expire_after_write: Duration::from_secs(2),
            cache_maximum_size: 10_000,
            cache_cleanup_interval: Duration::from_secs(1),
            retry_backoff: None,
        }
    }
}

impl ClientOptions {
    /// Check invariants the transport and worker pool rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_max_workers(self.max_workers)?;
        check_limit("max_connections", self.max_connections)?;
        check_limit("max_connections_per_host", self.max_connections_per_host)?;
        check_cleanup_interval(self.cache_cleanup_interval)?;
        check_user_agent(&self.user_agent)
    }

    /// Build options from a YAML mapping. Missing keys keep their defaults,
    /// unknown keys are ignored.
    pub fn from_config(section: &Value) -> Result<Self, ConfigError> {
        if !section.is_mapping() {
            return Err(ConfigError::invalid("<section>", "expected a mapping"));
        }

        let mut builder = ClientOptionsBuilder::default();

        if let Some(ms) = read_u64(section, "connect_timeout_ms")? {
            builder.connect_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = read_u64(section, "read_timeout_ms")? {
            builder.read_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = read_u64(section, "request_timeout_ms")? {
            builder.request_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = read_u64(section, "pooled_connection_idle_timeout_ms")? {
            builder.pooled_connection_idle_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = read_u64(section, "connection_ttl_ms")? {
            builder.connection_ttl(Duration::from_millis(ms));
        }
        if let Some(n) = read_usize(section, "max_connections")? {
            builder.max_connections(n);
        }
        if let Some(n) = read_usize(section, "max_connections_per_host")? {
            builder.max_connections_per_host(n);
        }
        if let Some(n) = read_usize(section, "max_redirects")? {
            builder.max_redirects(n);
        }
        if let Some(n) = read_u64(section, "max_request_retry")? {
            let n = u32::try_from(n).map_err(|_| {
                ConfigError::invalid("max_request_retry", "value out of range")
            })?;
            builder.max_request_retry(n);
        }
        if let Some(flag) = read_bool(section, "follow_redirect")? {
            builder.follow_redirect(flag);
        }
        if let Some(flag) = read_bool(section, "compression_enforced")? {
            builder.compression_enforced(flag);
        }
        if let Some(flag) = read_bool(section, "accept_any_certificate")? {
            builder.accept_any_certificate(flag);
        }
        if let Some(flag) = read_bool(section, "allow_pooling_connections")? {
            builder.allow_pooling_connections(flag);
        }
        if let Some(flag) = read_bool(section, "allow_pooling_ssl_connections")? {
            builder.allow_pooling_ssl_connections(flag);
        }
        if let Some(agent) = read_str(section, "user_agent")? {
            builder.user_agent(agent);
        }
        if let Some(n) = read_usize(section, "max_workers")? {
            builder.max_workers(n);
        }
        if let Some(secs) = read_u64(section, "cache_expire_after_write_secs")? {
            builder.cache_expire_after_write(Duration::from_secs(secs));
        }
        if let Some(n) = read_u64(section, "cache_maximum_size")? {
            builder.cache_maximum_size(n);
        }
        if let Some(ms) = read_u64(section, "cache_cleanup_interval_ms")? {
            builder.cache_cleanup_interval(Duration::from_millis(ms));
        }
        if let Some(backoff) = section.get("retry_backoff") {
            let defaults = RetryBackoff::default();
            let initial = read_u64(backoff, "initial_interval_ms")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_interval);
            let max = read_u64(backoff, "max_interval_ms")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_interval);
            builder.retry_backoff(RetryBackoff {
                initial_interval: initial,
                max_interval: max,
            });
        }

        let options = builder.build()?;
        tracing::debug!(?options, "client options loaded from config");
        Ok(options)
    }
}

impl ClientOptionsBuilder {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(workers) = self.max_workers {
            check_max_workers(workers)?;
        }
        if let Some(limit) = self.max_connections {
            check_limit("max_connections", limit)?;
        }
        if let Some(limit) = self.max_connections_per_host {
            check_limit("max_connections_per_host", limit)?;
        }
        if let Some(interval) = self.cache_cleanup_interval {
            check_cleanup_interval(interval)?;
        }
        if let Some(agent) = &self.user_agent {
            check_user_agent(agent)?;
        }
        Ok(())
    }
}

fn check_max_workers(workers: usize) -> Result<(), ConfigError> {
    if workers == 0 {
        return Err(ConfigError::invalid("max_workers", "must be at least 1"));
    }
    Ok(())
}

fn check_limit(key: &str, limit: Option<usize>) -> Result<(), ConfigError> {
    if limit == Some(0) {
        return Err(ConfigError::invalid(key, "must be at least 1 when set"));
    }
    Ok(())
}

fn check_cleanup_interval(interval: Duration) -> Result<(), ConfigError> {
    if interval.is_zero() {
        return Err(ConfigError::invalid(
            "cache_cleanup_interval",
            "must be greater than zero",
        ));
    }
    Ok(())
}

fn check_user_agent(agent: &str) -> Result<(), ConfigError> {
    if agent.is_empty() || agent.chars().any(char::is_control) {
        return Err(ConfigError::invalid(
            "user_agent",
            "must be non-empty and free of control characters",
        ));
    }
    Ok(())
}

fn read_u64(section: &Value, key: &str) -> Result<Option<u64>, ConfigError> {
    match section.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            ConfigError::invalid(key, "expected a non-negative integer")
        }),
    }
}

fn read_usize(section: &Value, key: &str) -> Result<Option<usize>, ConfigError> {
    read_u64(section, key)?
        .map(|n| {
            usize::try_from(n)
                .map_err(|_| ConfigError::invalid(key, "value out of range"))
        })
        .transpose()
}

fn read_bool(section: &Value, key: &str) -> Result<Option<bool>, ConfigError> {
    match section.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_bool()
            .map(Some)
            .ok_or_else(|| ConfigError::invalid(key, "expected a boolean")),
    }
}

fn read_str<'a>(
    section: &'a Value,
    key: &str,
) -> Result<Option<&'a str>, ConfigError> {
    match section.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or_else(|| ConfigError::invalid(key, "expected a string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML_FULL: &str = r#"
    http:
      connect_timeout_ms: 1500
      read_timeout_ms: 20000
      request_timeout_ms: 30000
      pooled_connection_idle_timeout_ms: 45000
      connection_ttl_ms: 120000
      max_connections: 64
      max_connections_per_host: 8
      max_redirects: 3
      max_request_retry: 2
      follow_redirect: true
      compression_enforced: true
      accept_any_certificate: false
      allow_pooling_connections: false
      allow_pooling_ssl_connections: false
      user_agent: crawler/2.0
      max_workers: 4
      cache_expire_after_write_secs: 10
      cache_maximum_size: 500
      cache_cleanup_interval_ms: 250
      retry_backoff:
        initial_interval_ms: 50
    "#;

    fn section(yaml: &str) -> Value {
        let doc: Value = serde_yaml::from_str(yaml).unwrap();
        doc["http"].clone()
    }

    #[test]
    fn builder_defaults() {
        let options = ClientOptionsBuilder::default().build().unwrap();
        assert_eq!(options, ClientOptions::default());
        assert_eq!(options.cache_expire_after_write, Duration::from_secs(2));
        assert_eq!(options.cache_maximum_size, 10_000);
        assert_eq!(options.max_request_retry, 5);
        assert_eq!(options.max_connections, None);
        assert!(options.allow_pooling_connections);
        assert!(!options.follow_redirect);
        assert_eq!(options.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn builder_setters_strip_options() {
        let options = ClientOptionsBuilder::default()
            .max_connections(10usize)
            .connection_ttl(Duration::from_secs(30))
            .user_agent("bot/1.0")
            .build()
            .unwrap();
        assert_eq!(options.max_connections, Some(10));
        assert_eq!(options.connection_ttl, Some(Duration::from_secs(30)));
        assert_eq!(options.user_agent, "bot/1.0");
    }

    #[test]
    fn builder_rejects_zero_workers() {
        let result = ClientOptionsBuilder::default().max_workers(0usize).build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "max_workers"
        ));
    }

    #[test]
    fn builder_rejects_bad_user_agent() {
        let result = ClientOptionsBuilder::default()
            .user_agent("bad\nagent")
            .build();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        let result = ClientOptionsBuilder::default().user_agent("").build();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn validate_catches_direct_edits() {
        let options = ClientOptions {
            max_connections_per_host: Some(0),
            ..ClientOptions::default()
        };
        assert!(options.validate().is_err());
        assert!(ClientOptions::default().validate().is_ok());
    }

    #[test]
    fn from_config_reads_every_key() {
        let options = ClientOptions::from_config(&section(YAML_FULL)).unwrap();

        assert_eq!(options.connect_timeout, Duration::from_millis(1500));
        assert_eq!(options.read_timeout, Duration::from_secs(20));
        assert_eq!(options.request_timeout, Duration::from_secs(30));
        assert_eq!(options.pooled_connection_idle_timeout, Duration::from_secs(45));
        assert_eq!(options.connection_ttl, Some(Duration::from_secs(120)));
        assert_eq!(options.max_connections, Some(64));
        assert_eq!(options.max_connections_per_host, Some(8));
        assert_eq!(options.max_redirects, 3);
        assert_eq!(options.max_request_retry, 2);
        assert!(options.follow_redirect);
        assert!(options.compression_enforced);
        assert!(!options.accept_any_certificate);
        assert!(!options.allow_pooling_connections);
        assert!(!options.allow_pooling_ssl_connections);
        assert_eq!(options.user_agent, "crawler/2.0");
        assert_eq!(options.max_workers, 4);
        assert_eq!(options.cache_expire_after_write, Duration::from_secs(10));
        assert_eq!(options.cache_maximum_size, 500);
        assert_eq!(options.cache_cleanup_interval, Duration::from_millis(250));

        let backoff = options.retry_backoff.unwrap();
        assert_eq!(backoff.initial_interval, Duration::from_millis(50));
        assert_eq!(backoff.max_interval, RetryBackoff::default().max_interval);
    }

    #[test]
    fn from_config_keeps_defaults_for_missing_keys() {
        let options =
            ClientOptions::from_config(&section("http:\n  max_workers: 2\n"))
                .unwrap();
        assert_eq!(options.max_workers, 2);
        assert_eq!(
            ClientOptions {
                max_workers: 16,
                ..options
            },
            ClientOptions::default()
        );
    }

    #[test]
    fn from_config_reports_wrong_types() {
        let result =
            ClientOptions::from_config(&section("http:\n  follow_redirect: maybe\n"));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "follow_redirect"
        ));

        let result =
            ClientOptions::from_config(&section("http:\n  max_workers: -1\n"));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "max_workers"
        ));
    }

    #[test]
    fn from_config_rejects_non_mapping() {
        let value = Value::String("nope".into());
        assert!(ClientOptions::from_config(&value).is_err());
    }

    #[test]
    fn equality_is_field_by_field() {
        let a = ClientOptions::default();
        let mut b = a.clone();
        assert_eq!(a, b);
        b.follow_redirect = true;
        assert_ne!(a, b);
    }
}
