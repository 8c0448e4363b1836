//! Simple example of using anon-proxy-client.

use anon_proxy_client::{ClientConfig, PoolOptions, ProxyClient, ProxyPool, ProxyPoolMiddleware};
use reqwest_middleware::ClientBuilder;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Initializing proxy pool...");

    let pool = ProxyPool::from_sources(
        &[
            // free socks5 proxy lists, one `host:port` per line
            "https://cdn.jsdelivr.net/gh/dpangestuw/Free-Proxy@main/socks5_proxies.txt".to_string(),
            "https://cdn.jsdelivr.net/gh/proxifly/free-proxy-list@main/proxies/protocols/socks5/data.txt"
                .to_string(),
        ],
        PoolOptions {
            // rate limit for each proxy, lower performance but avoid banned
            max_requests_per_second: Some(3.0),
            ..PoolOptions::default()
        },
    )
    .await;

    let config = ClientConfig::builder()
        .timeout(Duration::from_secs(5))
        .attempts_per_request(10)
        .required_string("origin")
        .build()?;
    let client = ProxyClient::new(pool, config);

    println!("Sending request...");
    let response = client.get("https://httpbin.org/ip").await?;
    println!("Status: {}", response.status());
    println!("Response: {}", response.text());

    // The same client as reqwest middleware.
    let middleware_client = ClientBuilder::new(reqwest::Client::new())
        .with(ProxyPoolMiddleware::new(client))
        .build();
    let response = middleware_client.get("https://httpbin.org/ip").send().await?;
    println!("Via middleware: {}", response.text().await?);

    Ok(())
}
