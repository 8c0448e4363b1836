//! Utility functions for proxy lists and timeouts.

use crate::error::{Error, Result};
use crate::proxy::Proxy;

use log::warn;
use reqwest::Client;
use std::future::Future;
use std::time::Duration;

/// Fetch and parse a list of proxies from a URL or file path.
pub(crate) async fn fetch_proxies_from_source(source: &str) -> Result<Vec<Proxy>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let client = Client::new();
        let response = client.get(source).send().await?.error_for_status()?;
        let content = response.text().await?;
        Ok(parse_proxy_list(&content))
    } else {
        let content = tokio::fs::read_to_string(source).await?;
        Ok(parse_proxy_list(&content))
    }
}

/// Parse one proxy per line. Blank lines and `#` comments are ignored,
/// malformed entries are skipped.
pub fn parse_proxy_list(content: &str) -> Vec<Proxy> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match Proxy::parse(line) {
            Ok(proxy) => Some(proxy),
            Err(e) => {
                warn!("Skipping proxy entry: {}", e);
                None
            }
        })
        .collect()
}

/// Run `future` with a deadline, naming the operation on expiry.
pub(crate) async fn with_timeout<F, T>(
    duration: Duration,
    what: &'static str,
    future: F,
) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| Error::Timeout(what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyType;

    #[test]
    fn test_parse_proxy_list() {
        let content = "\
# free list
1.2.3.4:8080

socks5://5.6.7.8:1080
not a proxy
http://9.9.9.9:3128
";
        let proxies = parse_proxy_list(content);
        assert_eq!(proxies.len(), 3);
        assert_eq!(proxies[0].kind(), ProxyType::Unknown);
        assert_eq!(proxies[1].kind(), ProxyType::Socks);
        assert_eq!(proxies[2].kind(), ProxyType::Http);
    }

    #[tokio::test]
    async fn test_fetch_from_missing_file_fails() {
        let result = fetch_proxies_from_source("/definitely/not/here.txt").await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_with_timeout() {
        let ok = with_timeout(Duration::from_secs(1), "noop", async { 7 }).await;
        assert_eq!(ok.unwrap(), 7);

        let slow = with_timeout(
            Duration::from_millis(5),
            "sleep",
            tokio::time::sleep(Duration::from_secs(5)),
        )
        .await;
        assert!(matches!(slow, Err(Error::Timeout("sleep"))));
    }
}
