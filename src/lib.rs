//! # anon-proxy-client
//!
//! An HTTP client that rotates requests through a pool of HTTP and SOCKS5 proxies.
//!
//! HTTP proxies (and direct connections) go through `reqwest`. SOCKS5 proxies
//! are spoken to over a raw TCP tunnel with a hand-built HTTP/1.x codec, so
//! the client controls DNS resolution, TLS validation and redirect handling
//! exactly. Failing proxies are taken offline, pages can be validated against
//! a required string, and proxies can be checked for anonymity before use.
//!
//! ```no_run
//! use anon_proxy_client::{ClientConfig, ProxyClient, ProxyPool};
//!
//! # async fn run() -> anon_proxy_client::Result<()> {
//! let pool = ProxyPool::from_list(["socks5://127.0.0.1:9050", "10.0.0.2:3128"]);
//! let config = ClientConfig::builder().required_string("</html>").build()?;
//! let client = ProxyClient::new(pool, config);
//! let page = client.get("https://example.com/").await?;
//! println!("{}", page.text());
//! # Ok(())
//! # }
//! ```

pub mod checker;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod middleware;
pub mod pool;
pub mod proxy;
pub mod request;
pub mod response;
pub mod socks;
pub mod transport;
pub mod tunnel;
mod utils;

pub use checker::{AnonymityChecker, EchoService, ProxyJudge, Urih};
pub use client::ProxyClient;
pub use config::{ClientConfig, ClientConfigBuilder, PoolOptions};
pub use error::{Error, ErrorKind, ReplyError, Result, SocksError};
pub use middleware::ProxyPoolMiddleware;
pub use pool::{ProxyLease, ProxyPool};
pub use proxy::{Anonymity, Proxy, ProxyType};
pub use request::RequestSpec;
pub use response::Response;
pub use transport::{NativeTransport, SocksTransport, Transport, Transports};
pub use utils::parse_proxy_list;
