//! Proxy anonymity checking against an IP echo service.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::pool::{ProxyLease, ProxyPool};
use crate::proxy::{Anonymity, Proxy, ProxyType};
use crate::request::RequestSpec;
use crate::transport::Transports;

use futures::future;
use http::Method;
use log::{debug, info, warn};
use regex::Regex;
use std::sync::Arc;
use tokio::sync::OnceCell;
use url::Url;

/// A page that echoes the caller's IP address.
pub trait EchoService: Send + Sync {
    /// Page to fetch, directly and through proxies.
    fn url(&self) -> &Url;

    /// Extract the echoed IP from a page.
    fn extract_ip(&self, page: &str) -> Option<String>;

    /// Whether `page` really comes from this service and not, say, a captive portal.
    fn recognizes(&self, _page: &str) -> bool {
        true
    }
}

/// proxyjudge.info, which prints the request environment.
pub struct ProxyJudge {
    url: Url,
    marker: Regex,
}

impl ProxyJudge {
    pub fn new() -> Self {
        Self::with_url(Url::parse("http://proxyjudge.info/").expect("static URL is valid"))
    }

    /// Use a mirror serving the same page format.
    pub fn with_url(url: Url) -> Self {
        Self {
            url,
            marker: Regex::new(r"REMOTE_ADDR = (.*?)\n").expect("marker regex is valid"),
        }
    }
}

impl Default for ProxyJudge {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoService for ProxyJudge {
    fn url(&self) -> &Url {
        &self.url
    }

    fn extract_ip(&self, page: &str) -> Option<String> {
        self.marker
            .captures(page)
            .map(|c| c[1].trim().to_string())
            .filter(|ip| !ip.is_empty())
    }

    fn recognizes(&self, page: &str) -> bool {
        page.contains("<title>Proxyjudge.info</title>")
    }
}

/// request.urih.com
pub struct Urih {
    url: Url,
    marker: Regex,
}

impl Urih {
    pub fn new() -> Self {
        Self {
            url: Url::parse("http://request.urih.com/").expect("static URL is valid"),
            marker: Regex::new(r#"Whois\?</a></h5><div>IP: (.*?) <a title="My IP details"#)
                .expect("marker regex is valid"),
        }
    }
}

impl Default for Urih {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoService for Urih {
    fn url(&self) -> &Url {
        &self.url
    }

    fn extract_ip(&self, page: &str) -> Option<String> {
        self.marker.captures(page).map(|c| c[1].trim().to_string())
    }
}

/// Classifies proxies as anonymous or transparent.
///
/// The caller's real IP is fetched directly once and cached for the lifetime
/// of the checker. Results are cached on each proxy and never re-checked.
pub struct AnonymityChecker {
    service: Arc<dyn EchoService>,
    transports: Transports,
    real_ip: OnceCell<String>,
}

impl AnonymityChecker {
    pub fn new(service: Arc<dyn EchoService>, transports: Transports) -> Self {
        Self {
            service,
            transports,
            real_ip: OnceCell::new(),
        }
    }

    fn echo_request(&self) -> RequestSpec {
        RequestSpec::new(Method::GET, self.service.url().clone())
            .with_default_headers(&ClientConfig::default_headers())
    }

    /// The caller's IP as seen without a proxy. Computed at most once.
    pub async fn real_ip(&self) -> Result<&str> {
        let ip = self
            .real_ip
            .get_or_try_init(|| async {
                let url = self.service.url().to_string();
                let page = self
                    .transports
                    .native
                    .send(&Proxy::direct(), &self.echo_request())
                    .await
                    .map_err(|e| Error::RealIpUnavailable(format!("{url} ({e})")))?;
                let ip = self
                    .service
                    .extract_ip(&page.text())
                    .ok_or(Error::RealIpUnavailable(url))?;
                info!("Real IP address is {}", ip);
                Ok::<_, Error>(ip)
            })
            .await?;
        Ok(ip.as_str())
    }

    /// Check the leased proxy unless it was checked before.
    ///
    /// A proxy that cannot be reached is marked offline and classified
    /// transparent. Only a missing real IP is returned as an error.
    pub async fn check(&self, lease: &mut ProxyLease) -> Result<Anonymity> {
        let cached = lease.proxy().anonymity();
        if cached != Anonymity::Unchecked {
            return Ok(cached);
        }

        let real_ip = self.real_ip().await?.to_string();
        let anonymity = match self.fetch_through(lease.proxy()).await {
            Ok(page) if self.service.recognizes(&page) && !page.contains(&real_ip) => {
                Anonymity::Anonymous
            }
            Ok(_) => Anonymity::Transparent,
            Err(e) => {
                warn!("Anonymity check through {} failed: {}", lease.proxy(), e);
                lease.mark_offline();
                Anonymity::Transparent
            }
        };

        debug!("Proxy {} is {:?}", lease.proxy(), anonymity);
        lease.set_anonymity(anonymity);
        Ok(anonymity)
    }

    async fn fetch_through(&self, proxy: &Proxy) -> Result<String> {
        let request = self.echo_request();
        let probes: &[ProxyType] = match proxy.kind() {
            ProxyType::Unknown => &[ProxyType::Http, ProxyType::Socks],
            ProxyType::Http => &[ProxyType::Http],
            ProxyType::Socks => &[ProxyType::Socks],
            ProxyType::None => &[ProxyType::None],
        };

        let mut last_error = None;
        for kind in probes {
            let probed = proxy.probed_as(*kind);
            match self.transports.select(*kind).send(&probed, &request).await {
                Ok(response) => return Ok(response.text().into_owned()),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or(Error::NoProxyAvailable))
    }

    /// Check every free, online, unchecked proxy in `pool` concurrently.
    ///
    /// Returns the number found anonymous.
    pub async fn check_pool(&self, pool: &Arc<ProxyPool>) -> Result<usize> {
        // Surface a missing real IP before taking proxies out of rotation.
        self.real_ip().await?;

        let mut leases = Vec::new();
        loop {
            match pool.try_acquire_where(|p| p.anonymity() == Anonymity::Unchecked) {
                Ok(Some(lease)) => leases.push(lease),
                Ok(None) | Err(Error::NoProxyAvailable) => break,
                Err(e) => return Err(e),
            }
        }
        info!("Checking anonymity of {} proxies", leases.len());

        let results = future::join_all(leases.iter_mut().map(|lease| self.check(lease))).await;

        let mut anonymous = 0;
        for result in results {
            if result? == Anonymity::Anonymous {
                anonymous += 1;
            }
        }
        info!("Anonymity check completed: {} anonymous", anonymous);
        Ok(anonymous)
    }

    #[cfg(test)]
    pub(crate) fn reset_real_ip(&mut self) {
        self.real_ip = OnceCell::new();
    }
}
