//! Middleware implementation for reqwest.

use crate::client::ProxyClient;
use crate::request::RequestSpec;

use anyhow::anyhow;
use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use log::{info, warn};
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::sync::Arc;

/// Middleware that sends `reqwest` requests through a [`ProxyClient`].
///
/// The wrapped client is never used for I/O; requests are executed by the
/// proxy client and the result is converted back into a `reqwest::Response`.
#[derive(Clone)]
pub struct ProxyPoolMiddleware {
    client: Arc<ProxyClient>,
}

impl ProxyPoolMiddleware {
    /// Create a new middleware executing requests with `client`.
    pub fn new(client: ProxyClient) -> Self {
        let (total, online) = client.pool().stats();
        info!("Proxy pool middleware using {}/{} online proxies", online, total);

        if online == 0 {
            warn!("No online proxies available in pool");
        }

        Self {
            client: Arc::new(client),
        }
    }

    fn to_spec(req: &reqwest::Request) -> Result<RequestSpec> {
        let mut spec = RequestSpec::new(req.method().clone(), req.url().clone());
        spec.headers = req.headers().clone();

        if let Some(body) = req.body() {
            let bytes = body.as_bytes().ok_or_else(|| {
                Error::Middleware(anyhow!(
                    "Request object is not cloneable. Are you passing a streaming body?"
                        .to_string()
                ))
            })?;
            spec.content_type = spec
                .headers
                .remove(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok().map(str::to_string))
                .or_else(|| Some("application/octet-stream".to_string()));
            spec.body = Some(bytes::Bytes::copy_from_slice(bytes));
        }

        Ok(spec)
    }
}

#[async_trait]
impl Middleware for ProxyPoolMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        _extensions: &mut http::Extensions,
        _next: Next<'_>,
    ) -> Result<reqwest::Response> {
        let spec = Self::to_spec(&req)?;

        match self.client.execute(spec).await {
            Ok(response) => Ok(reqwest::Response::from(response.into_http())),
            Err(e) => {
                let (total, online) = self.client.pool().stats();
                warn!("Request failed. Total: {}, Online: {}: {}", total, online, e);
                Err(Error::Middleware(anyhow::Error::new(e)))
            }
        }
    }
}
