//! Decoded HTTP response.

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};
use reqwest::ResponseBuilderExt;
use std::borrow::Cow;
use url::Url;

/// A fully read response with de-chunked and decompressed body.
#[derive(Debug, Clone)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) version: Version,
    pub(crate) reason: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) url: Url,
}

impl Response {
    /// Build a response, e.g. from a custom [`Transport`](crate::transport::Transport).
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>, url: Url) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: body.into(),
            url,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Reason phrase from the status line.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Final URL after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Convert into an `http::Response`.
    ///
    /// The final URL travels as the extension `reqwest::Response::from` reads,
    /// so `reqwest::Response::url` reports where the page came from.
    pub fn into_http(self) -> http::Response<Bytes> {
        let mut response = http::Response::new(self.body);
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;
        *response.headers_mut() = self.headers;

        let mut url_carrier = http::Response::builder().url(self.url);
        if let Some(extensions) = url_carrier.extensions_mut() {
            response.extensions_mut().extend(std::mem::take(extensions));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;

    #[test]
    fn test_into_reqwest_keeps_url_and_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "text/html".parse().unwrap());
        let url = Url::parse("http://example.com/final?page=2").unwrap();
        let response = Response::new(StatusCode::CREATED, headers, "made", url.clone());

        let converted = reqwest::Response::from(response.into_http());
        assert_eq!(converted.url(), &url);
        assert_eq!(converted.status(), StatusCode::CREATED);
        assert_eq!(converted.headers().get(CONTENT_TYPE).unwrap(), "text/html");
    }
}
