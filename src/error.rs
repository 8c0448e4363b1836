//! Error types for the anon-proxy-client crate.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a SOCKS5 server in the CONNECT reply (RFC 1928, section 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReplyError {
    #[error("general SOCKS server failure")]
    GeneralFailure,
    #[error("connection not allowed by ruleset")]
    NotAllowed,
    #[error("network unreachable")]
    NetworkUnreachable,
    #[error("host unreachable")]
    HostUnreachable,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("TTL expired")]
    TtlExpired,
    #[error("command not supported")]
    CommandNotSupported,
    #[error("address type not supported")]
    AddressTypeNotSupported,
    #[error("unassigned reply code {0:#04x}")]
    Unknown(u8),
}

impl ReplyError {
    /// Map a non-zero REP byte to its failure reason.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => ReplyError::GeneralFailure,
            0x02 => ReplyError::NotAllowed,
            0x03 => ReplyError::NetworkUnreachable,
            0x04 => ReplyError::HostUnreachable,
            0x05 => ReplyError::ConnectionRefused,
            0x06 => ReplyError::TtlExpired,
            0x07 => ReplyError::CommandNotSupported,
            0x08 => ReplyError::AddressTypeNotSupported,
            other => ReplyError::Unknown(other),
        }
    }
}

/// Errors raised while negotiating a SOCKS5 tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocksError {
    #[error("invalid SOCKS version {0:#04x}")]
    InvalidVersion(u8),

    #[error("SOCKS server has no compatible auth method")]
    NoAcceptableAuth,

    #[error("SOCKS server chose unsupported auth method {0:#04x}")]
    UnsupportedAuth(u8),

    #[error("SOCKS CONNECT failed: {0}")]
    Reply(ReplyError),

    #[error("invalid bound address type {0:#04x}")]
    InvalidAddressType(u8),

    #[error("domain name too long for SOCKS5 ({0} bytes)")]
    DomainTooLong(usize),
}

/// Coarse classification of an [`Error`], used by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connect refused, timeout, socket read/write failure.
    Transport,
    /// Malformed handshake or a CONNECT failure reply.
    Socks,
    /// Malformed response, redirect problems, unexpected status, failed validation.
    Http,
    /// The target confirmed the resource does not exist.
    NotFound,
    /// No proxy left to serve the request.
    Exhausted,
    /// Invalid configuration or environment; never retried.
    Config,
}

/// Unified error type for the crate.
#[derive(Debug, Error)]
pub enum Error {
    // Transport errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out: {0}")]
    Timeout(&'static str),

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("HTTP client error: {0}")]
    Native(#[from] reqwest::Error),

    // SOCKS errors
    #[error(transparent)]
    Socks(#[from] SocksError),

    // HTTP semantic errors
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Redirect response without Location header")]
    MissingRedirectLocation,

    #[error("Too many redirects (limit {0})")]
    TooManyRedirects(usize),

    #[error("Redirect to {0} refused")]
    RedirectRefused(String),

    #[error("Unexpected response: {line}")]
    Status { code: u16, line: String },

    #[error("Response does not contain the required string")]
    ValidationFailed,

    // Resource errors
    #[error("Not found: {0}")]
    NotFound(String),

    // Pool errors
    #[error("No proxy available in pool")]
    NoProxyAvailable,

    #[error("All proxies exhausted after {attempts} attempts")]
    AllProxiesExhausted {
        attempts: usize,
        #[source]
        source: Option<Box<Error>>,
    },

    // Configuration errors
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Real IP marker not found in page from {0}")]
    RealIpUnavailable(String),
}

impl Error {
    /// Build the error for a non-success status line, turning 404 into [`Error::NotFound`].
    pub fn from_status(code: u16, line: impl Into<String>, url: &url::Url) -> Self {
        if code == 404 {
            Error::NotFound(url.to_string())
        } else {
            Error::Status {
                code,
                line: line.into(),
            }
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::Timeout(_) | Error::Tls(_) | Error::Native(_) => {
                ErrorKind::Transport
            }

            Error::Socks(_) => ErrorKind::Socks,

            Error::MalformedResponse(_)
            | Error::MissingRedirectLocation
            | Error::TooManyRedirects(_)
            | Error::RedirectRefused(_)
            | Error::Status { .. }
            | Error::ValidationFailed => ErrorKind::Http,

            Error::NotFound(_) => ErrorKind::NotFound,

            Error::NoProxyAvailable | Error::AllProxiesExhausted { .. } => ErrorKind::Exhausted,

            Error::InvalidUrl(_) | Error::InvalidConfig(_) | Error::RealIpUnavailable(_) => {
                ErrorKind::Config
            }
        }
    }

    /// Whether another proxy may still succeed where this attempt failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transport | ErrorKind::Socks | ErrorKind::Http
        )
    }

    /// Whether repeating the exchange on the *same* proxy may help.
    pub(crate) fn is_connection_level(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Socks)
    }

    /// Whether this is the pool-exhaustion condition.
    pub fn is_exhausted(&self) -> bool {
        self.kind() == ErrorKind::Exhausted
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_reply_codes_map_to_all_eight_reasons() {
        let expected = [
            (0x01, "general SOCKS server failure"),
            (0x02, "connection not allowed by ruleset"),
            (0x03, "network unreachable"),
            (0x04, "host unreachable"),
            (0x05, "connection refused"),
            (0x06, "TTL expired"),
            (0x07, "command not supported"),
            (0x08, "address type not supported"),
        ];
        for (code, message) in expected {
            assert_eq!(ReplyError::from_code(code).to_string(), message);
        }
        assert_eq!(ReplyError::from_code(0x42), ReplyError::Unknown(0x42));
    }

    #[test]
    fn test_error_kind_mapping() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(Error::from(io).kind(), ErrorKind::Transport);
        assert_eq!(
            Error::from(SocksError::Reply(ReplyError::NotAllowed)).kind(),
            ErrorKind::Socks
        );
        assert_eq!(Error::TooManyRedirects(10).kind(), ErrorKind::Http);
        assert_eq!(Error::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::NoProxyAvailable.kind(), ErrorKind::Exhausted);
        assert_eq!(Error::InvalidConfig("x".into()).kind(), ErrorKind::Config);
    }

    #[test]
    fn test_retryable_helpers() {
        assert!(Error::Timeout("read").is_retryable());
        assert!(Error::ValidationFailed.is_retryable());
        assert!(!Error::NotFound("x".into()).is_retryable());
        assert!(!Error::RealIpUnavailable("x".into()).is_retryable());
        assert!(Error::NoProxyAvailable.is_exhausted());
        assert!(!Error::ValidationFailed.is_connection_level());
    }

    #[test]
    fn test_from_status() {
        let url = url::Url::parse("http://example.com/missing").unwrap();
        assert!(matches!(
            Error::from_status(404, "HTTP/1.1 404 Not Found", &url),
            Error::NotFound(_)
        ));
        assert!(matches!(
            Error::from_status(500, "HTTP/1.1 500 Oops", &url),
            Error::Status { code: 500, .. }
        ));
    }

    #[test]
    fn test_exhausted_keeps_last_error_as_source() {
        let err = Error::AllProxiesExhausted {
            attempts: 3,
            source: Some(Box::new(Error::Timeout("read response"))),
        };
        assert_eq!(err.to_string(), "All proxies exhausted after 3 attempts");
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Operation timed out: read response"));
    }
}
