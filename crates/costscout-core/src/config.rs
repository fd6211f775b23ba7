//! Per-source tuning.
//!
//! A [`SourceConfig`] is built once at startup (usually deserialised from a
//! site definition file) and shared read-only by the source's rate limiter,
//! jitter, retry policy and HTTP client. Unset fields fall back to the
//! `DEFAULT_*` values through the `effective_*` accessors.

use std::collections::BTreeMap;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(1500);
pub const DEFAULT_RATE_LIMIT: f64 = 1.0;

/// Desktop browser user agent used when a source configures none.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Immutable per-source request tuning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Candidate user agents; one is picked per request.
    pub user_agents: Vec<String>,

    /// Requests per second. Non-positive means "use the default".
    pub rate_limit: f64,

    /// Whole-request timeout.
    #[serde(with = "opt_secs", rename = "timeout_secs")]
    pub timeout: Option<Duration>,

    /// Total fetch attempts per URL. Zero means "use the default".
    pub max_retries: u32,

    /// Base of the exponential backoff.
    #[serde(with = "opt_millis", rename = "retry_base_delay_ms")]
    pub retry_base_delay: Option<Duration>,

    /// Lower jitter bound before each request.
    #[serde(with = "millis", rename = "min_delay_ms")]
    pub min_delay: Duration,

    /// Upper jitter bound before each request.
    #[serde(with = "millis", rename = "max_delay_ms")]
    pub max_delay: Duration,

    pub extra_headers: BTreeMap<String, String>,

    /// Optional proxy URL (http, https or socks5).
    pub proxy: Option<String>,
}

impl SourceConfig {
    pub fn effective_timeout(&self) -> Duration {
        match self.timeout {
            Some(t) if !t.is_zero() => t,
            _ => DEFAULT_TIMEOUT,
        }
    }

    pub fn effective_max_retries(&self) -> u32 {
        if self.max_retries == 0 {
            DEFAULT_MAX_RETRIES
        } else {
            self.max_retries
        }
    }

    pub fn effective_retry_base_delay(&self) -> Duration {
        self.retry_base_delay.unwrap_or(DEFAULT_RETRY_BASE_DELAY)
    }

    pub fn effective_rate_limit(&self) -> f64 {
        if self.rate_limit.is_finite() && self.rate_limit > 0.0 {
            self.rate_limit
        } else {
            DEFAULT_RATE_LIMIT
        }
    }

    /// Pick one of the configured user agents at random.
    pub fn effective_user_agent(&self) -> &str {
        match self.user_agents.len() {
            0 => DEFAULT_USER_AGENT,
            1 => &self.user_agents[0],
            n => &self.user_agents[rand::rng().random_range(0..n)],
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        let config = SourceConfig::default();
        assert_eq!(config.effective_timeout(), Duration::from_secs(30));
        assert_eq!(config.effective_max_retries(), 3);
        assert_eq!(config.effective_retry_base_delay(), Duration::from_millis(1500));
        assert_eq!(config.effective_rate_limit(), 1.0);
        assert_eq!(config.effective_user_agent(), DEFAULT_USER_AGENT);
    }

    #[test]
    fn explicit_values_win() {
        let config = SourceConfig {
            timeout: Some(Duration::from_secs(5)),
            max_retries: 7,
            retry_base_delay: Some(Duration::from_millis(10)),
            rate_limit: 0.5,
            user_agents: vec!["TestAgent/1.0".into()],
            ..Default::default()
        };
        assert_eq!(config.effective_timeout(), Duration::from_secs(5));
        assert_eq!(config.effective_max_retries(), 7);
        assert_eq!(config.effective_retry_base_delay(), Duration::from_millis(10));
        assert_eq!(config.effective_rate_limit(), 0.5);
        assert_eq!(config.effective_user_agent(), "TestAgent/1.0");
    }

    #[test]
    fn invalid_rate_limit_falls_back() {
        for bad in [0.0, -2.0, f64::NAN, f64::INFINITY] {
            let config = SourceConfig {
                rate_limit: bad,
                ..Default::default()
            };
            assert_eq!(config.effective_rate_limit(), DEFAULT_RATE_LIMIT);
        }
    }

    #[test]
    fn user_agent_is_picked_from_the_list() {
        let agents = vec!["A/1".to_string(), "B/1".to_string(), "C/1".to_string()];
        let config = SourceConfig {
            user_agents: agents.clone(),
            ..Default::default()
        };
        for _ in 0..20 {
            assert!(agents.iter().any(|a| a == config.effective_user_agent()));
        }
    }

    #[test]
    fn deserializes_from_json_with_units() {
        let config: SourceConfig = serde_json::from_value(serde_json::json!({
            "rate_limit": 2.0,
            "timeout_secs": 10,
            "max_retries": 4,
            "retry_base_delay_ms": 250,
            "min_delay_ms": 100,
            "max_delay_ms": 400,
            "extra_headers": {"Accept-Language": "en-US"},
            "proxy": "socks5://127.0.0.1:9050"
        }))
        .unwrap();

        assert_eq!(config.timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.retry_base_delay, Some(Duration::from_millis(250)));
        assert_eq!(config.min_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_millis(400));
        assert_eq!(config.extra_headers["Accept-Language"], "en-US");
        assert_eq!(config.proxy.as_deref(), Some("socks5://127.0.0.1:9050"));
    }

    #[test]
    fn deserializes_empty_object_to_defaults() {
        let config: SourceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SourceConfig::default());
    }
}
