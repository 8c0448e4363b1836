//! One HTTP exchange through a SOCKS5 proxy over a bare TCP socket.
//!
//! Each exchange opens a fresh tunnel, optionally wraps it in TLS, writes a
//! raw request and reads until the peer closes. Redirects re-tunnel against the
//! new URL; a server that rejects HTTP/1.1 gets one retry with HTTP/1.0.

use crate::codec;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::request::RequestSpec;
use crate::response::Response;
use crate::socks::{self, TargetAddr};
use crate::utils::with_timeout;

use bytes::Bytes;
use http::header::LOCATION;
use http::{Method, StatusCode};
use log::debug;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use url::{Host, Url};

/// Maximum number of redirects followed for one exchange.
pub const MAX_REDIRECTS: usize = 10;

/// Largest raw response, head included, read from one tunnel.
pub const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// Settings for a tunnel exchange, taken from [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    pub timeout: Duration,
    pub resolve_dns_on_proxy: bool,
    pub validate_certificates: bool,
    pub allow_auto_redirect: bool,
    pub refuse_cross_domain_redirect: bool,
    /// Responses growing past this many bytes fail as malformed.
    pub max_response_bytes: usize,
}

impl From<&ClientConfig> for TunnelOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            timeout: config.timeout,
            resolve_dns_on_proxy: config.resolve_dns_on_proxy,
            validate_certificates: config.validate_certificates,
            allow_auto_redirect: config.allow_auto_redirect,
            refuse_cross_domain_redirect: config.refuse_cross_domain_redirect,
            max_response_bytes: MAX_RESPONSE_BYTES,
        }
    }
}

/// State of one exchange, never shared between requests.
struct TunnelSession {
    url: Url,
    method: Method,
    content_type: Option<String>,
    body: Option<Bytes>,
    minor: u8,
    redirects: usize,
}

/// HTTP client speaking through one SOCKS5 proxy.
pub struct TunnelClient {
    proxy_host: String,
    proxy_port: u16,
    options: TunnelOptions,
}

impl TunnelClient {
    pub fn new(proxy_host: impl Into<String>, proxy_port: u16, options: TunnelOptions) -> Self {
        Self {
            proxy_host: proxy_host.into(),
            proxy_port,
            options,
        }
    }

    /// Run one request to completion.
    ///
    /// Returns the first 2xx response. 301/302 are followed (up to
    /// [`MAX_REDIRECTS`]); any other status fails.
    pub async fn send(&self, request: &RequestSpec) -> Result<Response> {
        let origin_host = request.url.host_str().map(str::to_ascii_lowercase);
        let mut session = TunnelSession {
            url: request.url.clone(),
            method: request.method.clone(),
            content_type: request.content_type.clone(),
            body: request.body.clone(),
            minor: 1,
            redirects: 0,
        };

        loop {
            let message = codec::build_request(
                &session.method,
                &session.url,
                &request.headers,
                session.content_type.as_deref(),
                session.body.as_deref(),
                session.minor,
            );
            let raw = self.exchange(&session.url, &message).await?;
            let response = codec::decode_response(&raw, session.url.clone())?;
            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or(Error::MissingRedirectLocation)?;
                let next = session.url.join(location).map_err(|e| {
                    Error::MalformedResponse(format!("bad redirect location {location:?}: {e}"))
                })?;

                if !self.options.allow_auto_redirect {
                    return Err(Error::RedirectRefused(next.to_string()));
                }
                if self.options.refuse_cross_domain_redirect
                    && next.host_str().map(str::to_ascii_lowercase) != origin_host
                {
                    return Err(Error::RedirectRefused(next.to_string()));
                }
                if session.redirects >= MAX_REDIRECTS {
                    return Err(Error::TooManyRedirects(MAX_REDIRECTS));
                }

                debug!("Following {} redirect to {}", status.as_u16(), next);
                session.redirects += 1;
                session.url = next;
                if session.method == Method::POST {
                    session.method = Method::GET;
                    session.content_type = None;
                    session.body = None;
                }
                continue;
            }

            if status == StatusCode::BAD_REQUEST
                && session.minor == 1
                && response.body().starts_with(b"HTTP/1.0")
            {
                debug!("Server rejected HTTP/1.1, retrying {} with HTTP/1.0", session.url);
                session.minor = 0;
                continue;
            }

            return Err(Error::from_status(
                status.as_u16(),
                status_line(&response),
                &session.url,
            ));
        }
    }

    /// Open a tunnel to `url`, send `message` and read the raw response.
    async fn exchange(&self, url: &Url, message: &[u8]) -> Result<Vec<u8>> {
        let timeout = self.options.timeout;
        let limit = self.options.max_response_bytes;
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidUrl(format!("missing host in {url}")))?;
        let port = url.port_or_known_default().unwrap_or(80);
        let target = self.target_addr(url, port).await?;

        let mut stream = with_timeout(
            timeout,
            "connect to proxy",
            TcpStream::connect((self.proxy_host.as_str(), self.proxy_port)),
        )
        .await??;
        with_timeout(timeout, "SOCKS5 auth", socks::negotiate_auth(&mut stream)).await??;
        with_timeout(timeout, "SOCKS5 connect", socks::connect(&mut stream, &target, port))
            .await??;

        if url.scheme() == "https" {
            let connector = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(!self.options.validate_certificates)
                .danger_accept_invalid_hostnames(!self.options.validate_certificates)
                .build()?;
            let connector = tokio_native_tls::TlsConnector::from(connector);
            let host = host.trim_matches(|c| c == '[' || c == ']');
            let mut tls = with_timeout(timeout, "TLS handshake", connector.connect(host, stream))
                .await??;
            round_trip(&mut tls, message, timeout, limit).await
        } else {
            round_trip(&mut stream, message, timeout, limit).await
        }
    }

    async fn target_addr(&self, url: &Url, port: u16) -> Result<TargetAddr> {
        match url.host() {
            Some(Host::Ipv4(ip)) => Ok(TargetAddr::Ip(ip.into())),
            Some(Host::Ipv6(ip)) => Ok(TargetAddr::Ip(ip.into())),
            Some(Host::Domain(domain)) if self.options.resolve_dns_on_proxy => {
                Ok(TargetAddr::Domain(domain.to_string()))
            }
            Some(Host::Domain(domain)) => {
                let mut addrs = with_timeout(
                    self.options.timeout,
                    "resolve target",
                    tokio::net::lookup_host((domain, port)),
                )
                .await??;
                addrs
                    .next()
                    .map(|addr| TargetAddr::Ip(addr.ip()))
                    .ok_or_else(|| {
                        Error::Io(io::Error::new(
                            io::ErrorKind::NotFound,
                            format!("no address for {domain}"),
                        ))
                    })
            }
            None => Err(Error::InvalidUrl(format!("missing host in {url}"))),
        }
    }
}

/// Write the request and read until the peer closes, at most `limit` bytes.
async fn round_trip<S>(
    stream: &mut S,
    message: &[u8],
    timeout: Duration,
    limit: usize,
) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    with_timeout(timeout, "send request", stream.write_all(message)).await??;
    with_timeout(timeout, "send request", stream.flush()).await??;

    let mut response = Vec::new();
    let mut buffer = [0u8; 8192];
    loop {
        match with_timeout(timeout, "read response", stream.read(&mut buffer)).await? {
            Ok(0) => break,
            Ok(n) if response.len() + n > limit => {
                return Err(Error::MalformedResponse(format!(
                    "response exceeds {limit} bytes"
                )));
            }
            Ok(n) => response.extend_from_slice(&buffer[..n]),
            // Servers often drop TLS sessions without close_notify.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && !response.is_empty() => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(response)
}

fn status_line(response: &Response) -> String {
    let version = match response.version() {
        http::Version::HTTP_10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    };
    format!("{} {} {}", version, response.status().as_u16(), response.reason())
        .trim_end()
        .to_string()
}
