//! Configuration for the client and the proxy pool.

use crate::error::{Error, Result};

use http::header::{HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, USER_AGENT};
use http::HeaderMap;
use std::time::Duration;

/// Smallest accepted per-operation timeout.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(5);

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0";
const DEFAULT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US;q=0.7,en;q=0.3";

/// Options applied when a pool is constructed.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// How long `acquire` sleeps before looking for a free proxy again.
    pub poll_interval: Duration,
    /// Per-proxy request rate limit, if any.
    pub max_requests_per_second: Option<f64>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            max_requests_per_second: None,
        }
    }
}

/// Configuration for [`ProxyClient`](crate::ProxyClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout for every connect, handshake step, send and receive.
    pub timeout: Duration,
    /// Optional deadline for one whole attempt on one proxy.
    pub attempt_timeout: Option<Duration>,
    /// Tries on the same proxy for connection-level failures.
    pub attempts_per_proxy: usize,
    /// Attempts for one logical request; `None` means pool size + 1.
    pub attempts_per_request: Option<usize>,
    /// Text every accepted page has to contain. Empty accepts everything.
    pub required_string: String,
    /// Follow 301/302 responses.
    pub allow_auto_redirect: bool,
    /// Refuse redirects that leave the original host.
    pub refuse_cross_domain_redirect: bool,
    /// Let the SOCKS5 proxy resolve target host names.
    pub resolve_dns_on_proxy: bool,
    /// Validate TLS certificates of target servers.
    pub validate_certificates: bool,
    /// Only use proxies that hide the caller's real IP.
    pub anonymous_only: bool,
    /// Headers sent with every request unless the request overrides them.
    pub headers: HeaderMap,
}

impl ClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Headers a browser would send, used when no overlay is configured.
    pub fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        headers
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            attempt_timeout: None,
            attempts_per_proxy: 1,
            attempts_per_request: None,
            required_string: String::new(),
            allow_auto_redirect: true,
            refuse_cross_domain_redirect: false,
            resolve_dns_on_proxy: true,
            validate_certificates: true,
            anonymous_only: false,
            headers: Self::default_headers(),
        }
    }
}

/// Builder for `ClientConfig`.
pub struct ClientConfigBuilder {
    config: ClientConfig,
    invalid_header: Option<String>,
}

impl ClientConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            invalid_header: None,
        }
    }

    /// Set the per-operation socket timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set a deadline for each whole attempt.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.config.attempt_timeout = Some(timeout);
        self
    }

    /// Set how many times one proxy is tried before moving on.
    pub fn attempts_per_proxy(mut self, count: usize) -> Self {
        self.config.attempts_per_proxy = count;
        self
    }

    /// Set how many attempts one request may use.
    pub fn attempts_per_request(mut self, count: usize) -> Self {
        self.config.attempts_per_request = Some(count);
        self
    }

    /// Set the text a page must contain to be accepted.
    pub fn required_string(mut self, required: impl Into<String>) -> Self {
        self.config.required_string = required.into();
        self
    }

    /// Enable or disable following redirects.
    pub fn allow_auto_redirect(mut self, allow: bool) -> Self {
        self.config.allow_auto_redirect = allow;
        self
    }

    /// Refuse redirects to another host.
    pub fn refuse_cross_domain_redirect(mut self, refuse: bool) -> Self {
        self.config.refuse_cross_domain_redirect = refuse;
        self
    }

    /// Resolve target host names on the SOCKS5 proxy instead of locally.
    pub fn resolve_dns_on_proxy(mut self, remote: bool) -> Self {
        self.config.resolve_dns_on_proxy = remote;
        self
    }

    /// Enable or disable TLS certificate validation.
    pub fn validate_certificates(mut self, validate: bool) -> Self {
        self.config.validate_certificates = validate;
        self
    }

    /// Only route requests through proxies that passed the anonymity check.
    pub fn anonymous_only(mut self, anonymous: bool) -> Self {
        self.config.anonymous_only = anonymous;
        self
    }

    /// Replace the header overlay.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.config.headers = headers;
        self
    }

    /// Set one header of the overlay.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.config.headers.insert(name, value);
            }
            _ => self.invalid_header = Some(name.to_string()),
        }
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<ClientConfig> {
        let config = self.config;

        if let Some(name) = self.invalid_header {
            return Err(Error::InvalidConfig(format!("invalid header {name:?}")));
        }
        if config.timeout < MIN_TIMEOUT {
            return Err(Error::InvalidConfig(format!(
                "timeout has to be at least {}ms",
                MIN_TIMEOUT.as_millis()
            )));
        }
        if matches!(config.attempt_timeout, Some(t) if t < MIN_TIMEOUT) {
            return Err(Error::InvalidConfig(format!(
                "attempt timeout has to be at least {}ms",
                MIN_TIMEOUT.as_millis()
            )));
        }
        if config.attempts_per_proxy < 1 {
            return Err(Error::InvalidConfig(
                "attempts per proxy has to be at least 1".into(),
            ));
        }
        if config.attempts_per_request == Some(0) {
            return Err(Error::InvalidConfig(
                "attempts per request has to be at least 1".into(),
            ));
        }

        Ok(config)
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::builder().build().unwrap();
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.attempts_per_proxy, 1);
        assert_eq!(config.attempts_per_request, None);
        assert!(config.required_string.is_empty());
        assert!(config.allow_auto_redirect);
        assert!(!config.refuse_cross_domain_redirect);
        assert!(config.resolve_dns_on_proxy);
        assert!(config.validate_certificates);
        assert_eq!(config.headers.get(ACCEPT_ENCODING).unwrap(), "gzip");
    }

    #[test]
    fn test_timeout_floor() {
        let err = ClientConfig::builder()
            .timeout(Duration::from_millis(4))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        assert!(ClientConfig::builder()
            .timeout(Duration::from_millis(5))
            .build()
            .is_ok());
    }

    #[test]
    fn test_attempt_counts_validated() {
        assert!(ClientConfig::builder().attempts_per_proxy(0).build().is_err());
        assert!(ClientConfig::builder()
            .attempts_per_request(0)
            .build()
            .is_err());
        let config = ClientConfig::builder()
            .attempts_per_request(3)
            .build()
            .unwrap();
        assert_eq!(config.attempts_per_request, Some(3));
    }

    #[test]
    fn test_header_overlay() {
        let config = ClientConfig::builder()
            .header("Referer", "https://example.com/")
            .build()
            .unwrap();
        assert_eq!(config.headers.get("referer").unwrap(), "https://example.com/");

        let err = ClientConfig::builder()
            .header("bad header", "x")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
