//! Core proxy pool implementation.

use crate::config::PoolOptions;
use crate::error::{Error, Result};
use crate::proxy::{Anonymity, Proxy};
use crate::utils;

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// A pool of proxies shared by concurrent requests.
///
/// The list is the unit of mutual exclusion: membership and every `busy`/`online`
/// flag are only touched while holding its lock.
pub struct ProxyPool {
    /// All proxies in the pool. Entries are never removed.
    proxies: Mutex<Vec<Proxy>>,
    /// Sleep between two looks for a free proxy.
    poll_interval: Duration,
}

impl ProxyPool {
    /// Create a pool from explicit proxy objects.
    pub fn new(proxies: Vec<Proxy>) -> Arc<Self> {
        Self::with_options(proxies, PoolOptions::default())
    }

    /// Create a pool with the given options.
    pub fn with_options(proxies: Vec<Proxy>, options: PoolOptions) -> Arc<Self> {
        let proxies: Vec<Proxy> = proxies
            .into_iter()
            .map(|proxy| match options.max_requests_per_second {
                Some(rps) => proxy.with_rate_limit(rps),
                None => proxy,
            })
            .collect();

        info!("Proxy pool created with {} proxies", proxies.len());

        Arc::new(Self {
            proxies: Mutex::new(proxies),
            poll_interval: options.poll_interval,
        })
    }

    /// Create a pool from `host:port` or URL entries, skipping malformed ones.
    pub fn from_list<I, S>(entries: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let proxies = entries
            .into_iter()
            .filter_map(|entry| match Proxy::parse(entry.as_ref()) {
                Ok(proxy) => Some(proxy),
                Err(e) => {
                    warn!("Skipping proxy entry: {}", e);
                    None
                }
            })
            .collect();
        Self::new(proxies)
    }

    /// Create a pool by reading proxy lists from files or `http(s)` URLs.
    pub async fn from_sources(sources: &[String], options: PoolOptions) -> Arc<Self> {
        info!("Initializing proxy pool from {} sources", sources.len());

        let mut all_proxies: Vec<Proxy> = Vec::new();
        for source in sources {
            match utils::fetch_proxies_from_source(source).await {
                Ok(source_proxies) => {
                    info!("Fetched {} proxies from {}", source_proxies.len(), source);
                    for proxy in source_proxies {
                        if !all_proxies.iter().any(|p| p.same_endpoint(&proxy)) {
                            all_proxies.push(proxy);
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to fetch proxies from {}: {}", source, e);
                }
            }
        }

        Self::with_options(all_proxies, options)
    }

    /// Take the first online, free proxy in pool order.
    ///
    /// Waits by polling while every online proxy is busy. Fails with
    /// [`Error::NoProxyAvailable`] as soon as no proxy is online.
    pub async fn acquire(self: &Arc<Self>) -> Result<ProxyLease> {
        loop {
            if let Some(lease) = self.try_acquire_where(|_| true)? {
                return Ok(lease);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Take the first online, free proxy matching `filter` without waiting.
    ///
    /// Returns `Ok(None)` when every matching proxy is busy.
    pub fn try_acquire_where<F>(self: &Arc<Self>, filter: F) -> Result<Option<ProxyLease>>
    where
        F: Fn(&Proxy) -> bool,
    {
        let mut proxies = self.proxies.lock();

        if !proxies.iter().any(|p| p.online) {
            return Err(Error::NoProxyAvailable);
        }

        let selected = proxies
            .iter_mut()
            .enumerate()
            .find(|(_, p)| p.online && !p.busy && filter(p));

        Ok(selected.map(|(index, proxy)| {
            proxy.busy = true;
            debug!("Acquired proxy {}", proxy);
            ProxyLease {
                pool: Arc::clone(self),
                index,
                proxy: proxy.clone(),
            }
        }))
    }

    fn release(&self, index: usize) {
        let mut proxies = self.proxies.lock();
        if let Some(proxy) = proxies.get_mut(index) {
            proxy.busy = false;
        }
    }

    fn update<F: FnOnce(&mut Proxy)>(&self, index: usize, f: F) {
        let mut proxies = self.proxies.lock();
        if let Some(proxy) = proxies.get_mut(index) {
            f(proxy);
        }
    }

    /// Mark every proxy pointing at the same endpoint as `proxy` offline.
    pub fn mark_offline(&self, proxy: &Proxy) {
        let mut proxies = self.proxies.lock();
        for p in proxies.iter_mut().filter(|p| p.same_endpoint(proxy)) {
            p.online = false;
        }
    }

    /// Put every proxy back online, e.g. after a transient outage.
    pub fn reset_all_online(&self) {
        let mut proxies = self.proxies.lock();
        for proxy in proxies.iter_mut() {
            proxy.online = true;
        }
        info!("All {} proxies reset to online", proxies.len());
    }

    /// Independent copy of all proxy records.
    pub fn snapshot(&self) -> Vec<Proxy> {
        self.proxies.lock().clone()
    }

    /// Number of proxies in the pool.
    pub fn len(&self) -> usize {
        self.proxies.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get statistics about the proxy pool as `(total, online)`.
    pub fn stats(&self) -> (usize, usize) {
        let proxies = self.proxies.lock();
        let total = proxies.len();
        let online = proxies.iter().filter(|p| p.online).count();

        (total, online)
    }
}

/// Exclusive use of one proxy; releases it when dropped.
pub struct ProxyLease {
    pool: Arc<ProxyPool>,
    index: usize,
    proxy: Proxy,
}

impl ProxyLease {
    /// The proxy as it was when acquired, plus changes made through this lease.
    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// Take this proxy out of rotation.
    pub fn mark_offline(&mut self) {
        self.proxy.online = false;
        self.pool.update(self.index, |p| p.online = false);
        warn!("Proxy {} marked offline", self.proxy);
    }

    /// Cache the anonymity result on the pooled record.
    pub fn set_anonymity(&mut self, anonymity: Anonymity) {
        self.proxy.anonymity = anonymity;
        self.pool.update(self.index, |p| p.anonymity = anonymity);
    }

    /// Report a successful request through this proxy.
    pub fn report_success(&mut self) {
        self.proxy.success_count += 1;
        self.pool.update(self.index, |p| p.success_count += 1);
    }

    /// Report a failed request through this proxy.
    pub fn report_failure(&mut self) {
        self.proxy.failure_count += 1;
        self.pool.update(self.index, |p| p.failure_count += 1);
    }
}

impl Drop for ProxyLease {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}
