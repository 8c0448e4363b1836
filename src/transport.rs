//! Transports that carry one request through one proxy.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::proxy::{Proxy, ProxyType};
use crate::request::RequestSpec;
use crate::response::Response;
use crate::tunnel::{TunnelClient, TunnelOptions, MAX_REDIRECTS};

use async_trait::async_trait;
use http::header::{CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use std::sync::Arc;

/// Capability to send a request through a proxy of a known type.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` through `proxy` and return a 2xx response.
    ///
    /// Non-success statuses are errors; 404 is [`Error::NotFound`].
    async fn send(&self, proxy: &Proxy, request: &RequestSpec) -> Result<Response>;
}

/// The pair of transports a client dispatches between.
#[derive(Clone)]
pub struct Transports {
    /// Used for direct connections and HTTP proxies.
    pub native: Arc<dyn Transport>,
    /// Used for SOCKS5 proxies.
    pub socks: Arc<dyn Transport>,
}

impl Transports {
    /// The built-in transports for `config`.
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            native: Arc::new(NativeTransport::new(Arc::clone(&config))),
            socks: Arc::new(SocksTransport::new(config)),
        }
    }

    /// Transport for a resolved proxy type. `Unknown` must be probed first.
    pub fn select(&self, kind: ProxyType) -> &Arc<dyn Transport> {
        match kind {
            ProxyType::Socks => &self.socks,
            ProxyType::None | ProxyType::Http | ProxyType::Unknown => &self.native,
        }
    }
}

/// Sends requests with `reqwest`, directly or through an HTTP proxy.
pub struct NativeTransport {
    config: Arc<ClientConfig>,
}

impl NativeTransport {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self { config }
    }

    fn redirect_policy(&self, request: &RequestSpec) -> Policy {
        if !self.config.allow_auto_redirect {
            return Policy::none();
        }
        if !self.config.refuse_cross_domain_redirect {
            return Policy::limited(MAX_REDIRECTS);
        }

        let origin_host = request.url.host_str().map(str::to_ascii_lowercase);
        Policy::custom(move |attempt| {
            if attempt.previous().len() > MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if attempt.url().host_str().map(str::to_ascii_lowercase) != origin_host {
                attempt.stop()
            } else {
                attempt.follow()
            }
        })
    }
}

#[async_trait]
impl Transport for NativeTransport {
    async fn send(&self, proxy: &Proxy, request: &RequestSpec) -> Result<Response> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.config.timeout)
            .timeout(self.config.timeout)
            .redirect(self.redirect_policy(request))
            .danger_accept_invalid_certs(!self.config.validate_certificates);

        builder = match proxy.kind() {
            ProxyType::None => builder.no_proxy(),
            _ => builder.proxy(reqwest::Proxy::all(proxy.http_url())?),
        };
        let client = builder.build()?;

        let mut outgoing = client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(content_type) = &request.content_type {
            outgoing = outgoing.header(CONTENT_TYPE, content_type.as_str());
        }
        if let Some(body) = &request.body {
            outgoing = outgoing.body(body.clone());
        }

        let response = outgoing.send().await.map_err(|e| {
            if e.is_redirect() {
                Error::TooManyRedirects(MAX_REDIRECTS)
            } else {
                Error::Native(e)
            }
        })?;

        let status = response.status();
        let url = response.url().clone();

        if status.is_redirection() {
            // The redirect policy stopped here.
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or(Error::MissingRedirectLocation)?;
            let target = url
                .join(location)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| location.to_string());
            return Err(Error::RedirectRefused(target));
        }
        if !status.is_success() {
            let line = format!(
                "{:?} {} {}",
                response.version(),
                status.as_u16(),
                status.canonical_reason().unwrap_or_default()
            );
            return Err(Error::from_status(status.as_u16(), line.trim_end(), &url));
        }

        let version = response.version();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(Response {
            status,
            version,
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            url,
        })
    }
}

/// Sends requests through a raw SOCKS5 tunnel.
pub struct SocksTransport {
    config: Arc<ClientConfig>,
}

impl SocksTransport {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for SocksTransport {
    async fn send(&self, proxy: &Proxy, request: &RequestSpec) -> Result<Response> {
        let client = TunnelClient::new(
            proxy.host(),
            proxy.port(),
            TunnelOptions::from(self.config.as_ref()),
        );
        client.send(request).await
    }
}
