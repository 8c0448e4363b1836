//! Request execution with proxy rotation and retries.

use crate::checker::{AnonymityChecker, ProxyJudge};
use crate::config::ClientConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::pool::{ProxyLease, ProxyPool};
use crate::proxy::{Anonymity, ProxyType};
use crate::request::{check_target, RequestSpec};
use crate::response::Response;
use crate::transport::Transports;
use crate::utils::with_timeout;

use log::{debug, info, warn};
use std::sync::Arc;
use url::Url;

/// Per-call bookkeeping, dropped when `execute` returns.
struct RequestContext {
    url: Url,
    attempt: usize,
    max_attempts: usize,
    last_error: Option<Error>,
}

impl RequestContext {
    fn exhausted(self) -> Error {
        warn!(
            "All proxies exhausted for {} after {} attempts",
            self.url, self.attempt
        );
        Error::AllProxiesExhausted {
            attempts: self.attempt,
            source: self.last_error.map(Box::new),
        }
    }
}

/// HTTP client that sends each request through proxies taken from a pool.
///
/// Every logical request gets a budget of attempts (pool size + 1 unless
/// configured). Each attempt leases a proxy, sends the request through the
/// transport matching the proxy type and validates the page. Proxies that fail
/// or serve an unexpected page are taken offline; a 404 ends the call at once.
#[derive(Clone)]
pub struct ProxyClient {
    pool: Arc<ProxyPool>,
    config: Arc<ClientConfig>,
    transports: Transports,
    checker: Option<Arc<AnonymityChecker>>,
}

impl ProxyClient {
    /// Create a client using the built-in transports.
    pub fn new(pool: Arc<ProxyPool>, config: ClientConfig) -> Self {
        let config = Arc::new(config);
        let transports = Transports::new(Arc::clone(&config));
        Self::build(pool, config, transports)
    }

    /// Create a client dispatching to custom transports.
    pub fn with_transports(
        pool: Arc<ProxyPool>,
        config: ClientConfig,
        transports: Transports,
    ) -> Self {
        Self::build(pool, Arc::new(config), transports)
    }

    fn build(pool: Arc<ProxyPool>, config: Arc<ClientConfig>, transports: Transports) -> Self {
        let checker = config.anonymous_only.then(|| {
            Arc::new(AnonymityChecker::new(
                Arc::new(ProxyJudge::new()),
                transports.clone(),
            ))
        });
        Self {
            pool,
            config,
            transports,
            checker,
        }
    }

    /// Use `checker` for anonymity checks instead of the default proxyjudge one.
    pub fn with_checker(mut self, checker: Arc<AnonymityChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetch `url` with a GET request.
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.execute(RequestSpec::get(url)?).await
    }

    /// Execute `request`, rotating proxies until one returns an acceptable page.
    pub async fn execute(&self, request: RequestSpec) -> Result<Response> {
        check_target(&request.url)?;
        let request = request.with_default_headers(&self.config.headers);

        let mut ctx = RequestContext {
            url: request.url.clone(),
            attempt: 0,
            max_attempts: self
                .config
                .attempts_per_request
                .unwrap_or_else(|| self.pool.len() + 1),
            last_error: None,
        };

        while ctx.attempt < ctx.max_attempts {
            ctx.attempt += 1;

            let mut lease = match self.pool.acquire().await {
                Ok(lease) => lease,
                Err(e) => {
                    debug!("No proxy for attempt {}: {}", ctx.attempt, e);
                    if ctx.last_error.is_none() {
                        ctx.last_error = Some(e);
                    }
                    return Err(ctx.exhausted());
                }
            };

            if self.config.anonymous_only && !self.ensure_anonymous(&mut lease).await? {
                continue;
            }

            info!(
                "Requesting {} via {} (attempt {}/{})",
                ctx.url,
                lease.proxy(),
                ctx.attempt,
                ctx.max_attempts
            );

            match self.send_through(&lease, &request).await {
                Ok(response) => {
                    let required = self.config.required_string.as_str();
                    if !required.is_empty() && !response.text().contains(required) {
                        warn!(
                            "Page from {} via {} lacks required text",
                            ctx.url,
                            lease.proxy()
                        );
                        lease.report_failure();
                        lease.mark_offline();
                        ctx.last_error = Some(Error::ValidationFailed);
                        continue;
                    }
                    lease.report_success();
                    return Ok(response);
                }
                Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::Config) => {
                    return Err(e);
                }
                Err(e) => {
                    warn!("Request via {} failed: {}", lease.proxy(), e);
                    lease.report_failure();
                    lease.mark_offline();
                    ctx.last_error = Some(e);
                }
            }
        }

        Err(ctx.exhausted())
    }

    /// Returns `false` when the leased proxy turned out transparent.
    async fn ensure_anonymous(&self, lease: &mut ProxyLease) -> Result<bool> {
        let Some(checker) = &self.checker else {
            return Err(Error::InvalidConfig(
                "anonymous-only mode without an anonymity checker".into(),
            ));
        };

        if checker.check(lease).await? == Anonymity::Anonymous {
            return Ok(true);
        }
        if lease.proxy().is_online() {
            lease.mark_offline();
        }
        Ok(false)
    }

    /// Try one proxy, repeating only connection-level failures.
    ///
    /// An `Unknown` proxy gets one extra try and alternates between HTTP and
    /// SOCKS, starting with a random protocol.
    async fn send_through(&self, lease: &ProxyLease, request: &RequestSpec) -> Result<Response> {
        let proxy = lease.proxy();
        let tries =
            self.config.attempts_per_proxy + usize::from(proxy.kind() == ProxyType::Unknown);
        let first = if rand::random::<bool>() {
            ProxyType::Http
        } else {
            ProxyType::Socks
        };

        let mut last_error = None;
        for attempt in 0..tries {
            let kind = proxy.kind().probe(attempt, first);
            if let Some(limiter) = proxy.limiter() {
                limiter.until_ready().await;
            }

            let probed = proxy.probed_as(kind);
            let transport = self.transports.select(kind);
            let result = match self.config.attempt_timeout {
                Some(deadline) => {
                    with_timeout(deadline, "attempt", transport.send(&probed, request))
                        .await
                        .and_then(|sent| sent)
                }
                None => transport.send(&probed, request).await,
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connection_level() => {
                    debug!("Try {} via {} as {:?} failed: {}", attempt + 1, proxy, kind, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(Error::NoProxyAvailable))
    }
}
