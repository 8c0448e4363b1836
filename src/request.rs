//! Description of one logical HTTP request.

use crate::error::{Error, Result};

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use url::Url;

/// What to send, independent of the proxy it goes through.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub content_type: Option<String>,
    pub body: Option<Bytes>,
}

impl RequestSpec {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            content_type: None,
            body: None,
        }
    }

    /// A GET request for `url`.
    pub fn get(url: &str) -> Result<Self> {
        Ok(Self::new(Method::GET, parse_target(url)?))
    }

    /// A POST request for `url` carrying `body`.
    pub fn post(url: &str, content_type: &str, body: impl Into<Bytes>) -> Result<Self> {
        let mut spec = Self::new(Method::POST, parse_target(url)?);
        spec.content_type = Some(content_type.to_string());
        spec.body = Some(body.into());
        Ok(spec)
    }

    /// Add a header, replacing any previous value.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::InvalidConfig(format!("invalid header name: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::InvalidConfig(format!("invalid header value: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Fill in `defaults` for headers this request does not set.
    pub fn with_default_headers(mut self, defaults: &HeaderMap) -> Self {
        for (name, value) in defaults {
            if !self.headers.contains_key(name) {
                self.headers.insert(name.clone(), value.clone());
            }
        }
        self
    }
}

/// Parse an absolute `http`/`https` URL.
pub(crate) fn parse_target(url: &str) -> Result<Url> {
    let url = Url::parse(url)?;
    check_target(&url)?;
    Ok(url)
}

pub(crate) fn check_target(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(()),
        _ => Err(Error::InvalidUrl(format!("unsupported target {url}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_and_post() {
        let get = RequestSpec::get("http://example.com/a?b=c").unwrap();
        assert_eq!(get.method, Method::GET);
        assert!(get.body.is_none());

        let post = RequestSpec::post("https://example.com/form", "text/plain", "hi").unwrap();
        assert_eq!(post.method, Method::POST);
        assert_eq!(post.content_type.as_deref(), Some("text/plain"));
        assert_eq!(post.body.as_deref(), Some(&b"hi"[..]));
    }

    #[test]
    fn test_rejects_non_http_targets() {
        assert!(matches!(RequestSpec::get("ftp://example.com/"), Err(Error::InvalidUrl(_))));
        assert!(matches!(RequestSpec::get("not a url"), Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_default_headers_do_not_override() {
        let mut defaults = HeaderMap::new();
        defaults.insert("user-agent", HeaderValue::from_static("default"));
        defaults.insert("accept", HeaderValue::from_static("*/*"));

        let spec = RequestSpec::get("http://example.com/")
            .unwrap()
            .header("User-Agent", "custom")
            .unwrap()
            .with_default_headers(&defaults);

        assert_eq!(spec.headers.get("user-agent").unwrap(), "custom");
        assert_eq!(spec.headers.get("accept").unwrap(), "*/*");
    }
}
