//! Configuration for the racer.

use crate::policy::{StatusRule, ValidityPolicy};
use crate::proxy::ProxyKind;

use std::time::Duration;

/// Configuration for the racer and its proxy pool.
#[derive(Debug, Clone)]
pub struct RacerConfig {
    /// Number of attempts kept in flight during a race.
    pub pool_size: usize,
    /// Responses accepted as a race winner.
    pub valid_codes: ValidityPolicy,
    /// Overall deadline of a race; no attempt is spawned after it.
    pub timeout: Duration,
    /// Seed proxies added to the pool on construction.
    pub proxies: Vec<String>,
    /// Replenish the pool when it holds fewer proxies than this.
    pub min_proxies: usize,
    /// Replenishment tops the pool up to this many proxies.
    pub max_proxies: usize,
    /// Uses a proxy needs before it can be reaped.
    pub proxy_sample_threshold: u64,
    /// Failure rate above which a sampled proxy is reaped.
    pub proxy_rate_threshold: f64,
    /// Timeout of a single attempt through one proxy.
    pub attempt_timeout: Duration,
    /// How long replenishment waits on the proxy source.
    pub replenish_timeout: Duration,
    /// Proxy protocols requested from the source.
    pub proxy_kinds: Vec<ProxyKind>,
    /// Proxy list URLs or file paths used to replenish the pool.
    pub sources: Vec<String>,
    /// User agent sent by the default transport.
    pub user_agent: Option<String>,
}

impl RacerConfig {
    /// Create a new configuration builder.
    pub fn builder() -> RacerConfigBuilder {
        RacerConfigBuilder::new()
    }

    /// Per-race options taken from this configuration.
    pub fn race_options(&self) -> RaceOptions {
        RaceOptions {
            policy: self.valid_codes.clone(),
            pool_size: self.pool_size,
            timeout: self.timeout,
        }
    }
}

impl Default for RacerConfig {
    fn default() -> Self {
        RacerConfigBuilder::new().build()
    }
}

/// Options of a single race.
#[derive(Debug, Clone)]
pub struct RaceOptions {
    pub policy: ValidityPolicy,
    pub pool_size: usize,
    pub timeout: Duration,
}

/// Builder for `RacerConfig`.
#[derive(Default)]
pub struct RacerConfigBuilder {
    pool_size: Option<usize>,
    valid_codes: Option<ValidityPolicy>,
    timeout: Option<Duration>,
    proxies: Vec<String>,
    min_proxies: Option<usize>,
    max_proxies: Option<usize>,
    proxy_sample_threshold: Option<u64>,
    proxy_rate_threshold: Option<f64>,
    attempt_timeout: Option<Duration>,
    replenish_timeout: Option<Duration>,
    proxy_kinds: Option<Vec<ProxyKind>>,
    sources: Vec<String>,
    user_agent: Option<String>,
}

impl RacerConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of concurrent attempts per race.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Set the status codes or ranges accepted as a winning response.
    pub fn valid_codes(mut self, rules: impl IntoIterator<Item = impl Into<StatusRule>>) -> Self {
        self.valid_codes = Some(ValidityPolicy::new(rules));
        self
    }

    /// Set the overall deadline of a race.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the seed proxies.
    pub fn proxies(mut self, proxies: Vec<impl Into<String>>) -> Self {
        self.proxies = proxies.into_iter().map(Into::into).collect();
        self
    }

    /// Set the pool size below which replenishment kicks in.
    pub fn min_proxies(mut self, count: usize) -> Self {
        self.min_proxies = Some(count);
        self
    }

    /// Set the pool size replenishment aims for.
    pub fn max_proxies(mut self, count: usize) -> Self {
        self.max_proxies = Some(count);
        self
    }

    /// Set the number of uses before a proxy may be reaped.
    pub fn proxy_sample_threshold(mut self, uses: u64) -> Self {
        self.proxy_sample_threshold = Some(uses);
        self
    }

    /// Set the failure rate above which a sampled proxy is reaped.
    pub fn proxy_rate_threshold(mut self, rate: f64) -> Self {
        self.proxy_rate_threshold = Some(rate);
        self
    }

    /// Set the timeout of a single attempt.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Set how long replenishment waits for the proxy source.
    pub fn replenish_timeout(mut self, timeout: Duration) -> Self {
        self.replenish_timeout = Some(timeout);
        self
    }

    /// Set the proxy protocols requested from the source.
    pub fn proxy_kinds(mut self, kinds: Vec<ProxyKind>) -> Self {
        self.proxy_kinds = Some(kinds);
        self
    }

    /// Set the source URLs or files to fetch proxy lists from.
    pub fn sources(mut self, sources: Vec<impl Into<String>>) -> Self {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Set the user agent of the default transport.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RacerConfig {
        let min_proxies = self.min_proxies.unwrap_or(8);
        RacerConfig {
            pool_size: self.pool_size.unwrap_or(8).max(1),
            valid_codes: self.valid_codes.unwrap_or_default(),
            timeout: self.timeout.unwrap_or(Duration::from_secs(900)),
            proxies: self.proxies,
            min_proxies,
            max_proxies: self.max_proxies.unwrap_or(12).max(min_proxies),
            proxy_sample_threshold: self.proxy_sample_threshold.unwrap_or(8),
            proxy_rate_threshold: self.proxy_rate_threshold.unwrap_or(0.5),
            attempt_timeout: self.attempt_timeout.unwrap_or(Duration::from_secs(30)),
            replenish_timeout: self.replenish_timeout.unwrap_or(Duration::from_secs(60)),
            proxy_kinds: self.proxy_kinds.unwrap_or_else(|| vec![ProxyKind::Http]),
            sources: self.sources,
            user_agent: self.user_agent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RacerConfig::default();
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.valid_codes, ValidityPolicy::new([StatusRule::Range(200..=300)]));
        assert_eq!(config.timeout, Duration::from_secs(900));
        assert_eq!(config.min_proxies, 8);
        assert_eq!(config.max_proxies, 12);
        assert_eq!(config.proxy_sample_threshold, 8);
        assert_eq!(config.proxy_rate_threshold, 0.5);
        assert_eq!(config.proxy_kinds, vec![ProxyKind::Http]);
        assert!(config.proxies.is_empty());
        assert!(config.sources.is_empty());
    }

    #[test]
    fn builder_overrides_and_clamps() {
        let config = RacerConfig::builder()
            .pool_size(0)
            .valid_codes([StatusRule::Exact(200), StatusRule::Range(301..=302)])
            .min_proxies(20)
            .max_proxies(5)
            .proxies(vec!["1.2.3.4:80"])
            .build();

        assert_eq!(config.pool_size, 1);
        assert!(config.valid_codes.accepts(302));
        assert!(!config.valid_codes.accepts(204));
        assert_eq!(config.max_proxies, 20);
        assert_eq!(config.proxies, vec!["1.2.3.4:80".to_string()]);

        let options = config.race_options();
        assert_eq!(options.pool_size, 1);
        assert_eq!(options.policy, config.valid_codes);
    }
}
