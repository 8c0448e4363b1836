//! Proxy representation and status.

use crate::error::{Error, Result};

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use url::Url;

/// Rate limiter attached to a single proxy.
pub type ProxyLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Protocol spoken by a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyType {
    /// No proxy, connect directly.
    None,
    /// HTTP proxy, used through the native client.
    Http,
    /// SOCKS5 proxy, used through the raw tunnel.
    Socks,
    /// Not known yet; probed as both `Http` and `Socks`.
    Unknown,
}

impl ProxyType {
    /// Protocol to try on the given try index when `self` may be `Unknown`.
    ///
    /// Known types map to themselves. An unknown proxy starts with `first` and
    /// alternates, so any two consecutive tries cover both protocols.
    pub fn probe(self, attempt: usize, first: ProxyType) -> ProxyType {
        match self {
            ProxyType::Unknown => {
                if attempt % 2 == 0 {
                    first
                } else {
                    first.other()
                }
            }
            known => known,
        }
    }

    fn other(self) -> ProxyType {
        match self {
            ProxyType::Socks => ProxyType::Http,
            _ => ProxyType::Socks,
        }
    }
}

/// Result of the anonymity check, cached on the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anonymity {
    /// Not checked yet.
    Unchecked,
    /// The proxy hides the caller's IP.
    Anonymous,
    /// The proxy leaks the caller's IP, or could not be checked.
    Transparent,
}

/// Representation of a proxy server.
#[derive(Debug, Clone)]
pub struct Proxy {
    host: String,
    port: u16,
    kind: ProxyType,
    pub(crate) online: bool,
    pub(crate) busy: bool,
    pub(crate) anonymity: Anonymity,
    /// Number of successful requests made through this proxy.
    pub success_count: usize,
    /// Number of failed requests made through this proxy.
    pub failure_count: usize,
    limiter: Option<Arc<ProxyLimiter>>,
}

impl Proxy {
    /// Create a proxy of a known type.
    pub fn new(host: impl Into<String>, port: u16, kind: ProxyType) -> Self {
        Self {
            host: host.into(),
            port,
            kind,
            online: true,
            busy: false,
            anonymity: Anonymity::Unchecked,
            success_count: 0,
            failure_count: 0,
            limiter: None,
        }
    }

    /// A pseudo proxy that connects directly.
    pub fn direct() -> Self {
        Self::new("", 0, ProxyType::None)
    }

    /// Parse `host:port` or `scheme://host:port`.
    ///
    /// Bare entries have type `Unknown`; `http`/`https` give `Http`,
    /// `socks`/`socks5`/`socks5h` give `Socks`.
    pub fn parse(entry: &str) -> Result<Self> {
        let entry = entry.trim();
        let invalid = || Error::InvalidUrl(format!("invalid proxy address {entry:?}"));

        let (url, kind) = match entry.split_once("://") {
            Some((scheme, _)) => {
                let kind = match scheme.to_ascii_lowercase().as_str() {
                    "http" | "https" => ProxyType::Http,
                    "socks" | "socks5" | "socks5h" => ProxyType::Socks,
                    _ => return Err(invalid()),
                };
                // Re-parse under a special scheme so host and port are normalised.
                let rest = &entry[scheme.len() + 3..];
                (Url::parse(&format!("http://{rest}")).map_err(|_| invalid())?, kind)
            }
            None => {
                if !entry.contains(':') {
                    return Err(invalid());
                }
                (
                    Url::parse(&format!("http://{entry}")).map_err(|_| invalid())?,
                    ProxyType::Unknown,
                )
            }
        };

        let host = url.host_str().ok_or_else(invalid)?;
        let port = url.port_or_known_default().ok_or_else(invalid)?;
        if url.path() != "/" || url.query().is_some() {
            return Err(invalid());
        }
        Ok(Self::new(host.trim_matches(|c| c == '[' || c == ']'), port, kind))
    }

    /// Attach a rate limiter allowing `max_rps` requests per second.
    pub fn with_rate_limit(mut self, max_rps: f64) -> Self {
        let per_second = NonZeroU32::new(max_rps.ceil() as u32).unwrap_or(NonZeroU32::MIN);
        self.limiter = Some(Arc::new(RateLimiter::direct(Quota::per_second(per_second))));
        self
    }

    /// A copy of this proxy that speaks `kind`.
    pub(crate) fn probed_as(&self, kind: ProxyType) -> Self {
        let mut proxy = self.clone();
        proxy.kind = kind;
        proxy
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn kind(&self) -> ProxyType {
        self.kind
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn anonymity(&self) -> Anonymity {
        self.anonymity
    }

    pub fn limiter(&self) -> Option<&Arc<ProxyLimiter>> {
        self.limiter.as_ref()
    }

    /// Whether `other` points at the same endpoint.
    pub fn same_endpoint(&self, other: &Proxy) -> bool {
        self.host.eq_ignore_ascii_case(&other.host) && self.port == other.port
    }

    /// URL understood by `reqwest::Proxy`.
    pub fn http_url(&self) -> String {
        if self.host.contains(':') {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }

    /// Calculate the success rate of this proxy.
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 0.0;
        }
        self.success_count as f64 / total as f64
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ProxyType::None => write!(f, "direct"),
            ProxyType::Http => write!(f, "http://{}:{}", self.host, self.port),
            ProxyType::Socks => write!(f, "socks5://{}:{}", self.host, self.port),
            ProxyType::Unknown => write!(f, "{}:{}", self.host, self.port),
        }
    }
}
