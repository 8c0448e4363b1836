//! Raw HTTP/1.x message building and parsing for the SOCKS path.
//!
//! Nothing here does I/O. Requests always carry `Connection: close`, so a
//! response is simply every byte read until the peer closes.

use crate::error::{Error, Result};
use crate::response::Response;

use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use http::header::{
    HeaderName, HeaderValue, CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HOST,
    TRANSFER_ENCODING,
};
use http::{HeaderMap, Method, StatusCode, Version};
use log::debug;
use regex::Regex;
use std::io::Read;
use std::sync::LazyLock;
use url::Url;

/// gzip member header written with default settings.
const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 8, 0, 0, 0, 0, 0, 4, 0];
/// gzip member header written at maximum compression.
const GZIP_BEST_HEADER: [u8; 10] = [0x1f, 0x8b, 8, 0, 0, 0, 0, 0, 2, 0];

static STATUS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^HTTP/(\d+)\.(\d+) +(\d{3})(?: +(.*))?$").expect("status line regex is valid")
});

/// Build a request using the origin-form request target (`path?query`).
///
/// `minor` selects `HTTP/1.1` (1) or `HTTP/1.0` (0).
pub fn build_request(
    method: &Method,
    url: &Url,
    headers: &HeaderMap,
    content_type: Option<&str>,
    body: Option<&[u8]>,
    minor: u8,
) -> Vec<u8> {
    let body = body.filter(|b| !b.is_empty());
    let mut message = Vec::with_capacity(256 + body.map_or(0, <[u8]>::len));

    message.extend_from_slice(
        format!(
            "{} {} HTTP/1.{}\r\nHost: {}\r\nConnection: close\r\n",
            method,
            request_target(url),
            minor,
            host_header(url)
        )
        .as_bytes(),
    );

    for (name, value) in headers {
        if value.is_empty() || is_managed_header(name, content_type.is_some()) {
            continue;
        }
        message.extend_from_slice(name.as_str().as_bytes());
        message.extend_from_slice(b": ");
        message.extend_from_slice(value.as_bytes());
        message.extend_from_slice(b"\r\n");
    }

    if let Some(body) = body {
        if let Some(content_type) = content_type {
            message.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        message.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }

    message.extend_from_slice(b"\r\n");
    if let Some(body) = body {
        message.extend_from_slice(body);
    }
    message
}

fn is_managed_header(name: &HeaderName, explicit_content_type: bool) -> bool {
    *name == HOST
        || *name == CONNECTION
        || *name == CONTENT_LENGTH
        || *name == TRANSFER_ENCODING
        || (explicit_content_type && *name == CONTENT_TYPE)
}

fn request_target(url: &Url) -> String {
    let mut target = url.path().to_string();
    if target.is_empty() {
        target.push('/');
    }
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    target
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Parse a complete raw response and decode its body.
pub fn decode_response(raw: &[u8], url: Url) -> Result<Response> {
    let (head, body) = match find_subsequence(raw, b"\r\n\r\n") {
        Some(end) => (&raw[..end], &raw[end + 4..]),
        None => (&raw[..0], &raw[..0]),
    };

    let head = String::from_utf8_lossy(head);
    let mut lines = head.lines();
    let status_line = lines.next().unwrap_or_default();
    let captures = STATUS_LINE
        .captures(status_line)
        .ok_or_else(|| Error::MalformedResponse(format!("bad status line {status_line:?}")))?;

    let version = match (&captures[1], &captures[2]) {
        ("1", "0") => Version::HTTP_10,
        ("2", _) => Version::HTTP_2,
        ("0", "9") => Version::HTTP_09,
        _ => Version::HTTP_11,
    };
    let status = captures[3]
        .parse::<u16>()
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| Error::MalformedResponse(format!("bad status code in {status_line:?}")))?;
    let reason = captures
        .get(4)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    let mut headers = HeaderMap::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            debug!("Ignoring header line without colon: {:?}", line);
            continue;
        };
        match (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!("Ignoring invalid header {:?}", line),
        }
    }

    let mut body = body.to_vec();
    if header_contains(&headers, &TRANSFER_ENCODING, "chunked") {
        body = dechunk(&body)?;
    }
    headers.remove(TRANSFER_ENCODING);

    let encoding = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_ascii_lowercase);
    if let Some(decoded) = try_decompress(&body, encoding.as_deref()) {
        body = decoded;
        headers.remove(CONTENT_ENCODING);
    }
    // The header map describes the decoded body from here on.
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

    Ok(Response {
        status,
        version,
        reason,
        headers,
        body: Bytes::from(body),
        url,
    })
}

fn header_contains(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains(token))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Reassemble a chunked body.
///
/// Stops at the zero-length chunk (trailers and anything after it are ignored)
/// or at the end of the data. Blank lines before a size line are skipped and
/// chunk extensions after `;` are ignored.
pub fn dechunk(data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len());
    let mut pos = 0;

    loop {
        let mut size_line = Vec::new();
        while pos < data.len() {
            let b = data[pos];
            pos += 1;
            match b {
                b'\r' => continue,
                b'\n' if size_line.is_empty() => continue,
                b'\n' => break,
                _ => size_line.push(b),
            }
        }
        if size_line.is_empty() {
            break;
        }

        let size_line = String::from_utf8_lossy(&size_line);
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| Error::MalformedResponse(format!("bad chunk size {size_hex:?}")))?;
        if size == 0 {
            break;
        }

        let end = pos.saturating_add(size).min(data.len());
        output.extend_from_slice(&data[pos..end]);
        pos = end;
    }

    Ok(output)
}

/// Whether `data` starts with one of the recognised gzip member headers.
pub fn is_gzip_magic(data: &[u8]) -> bool {
    data.len() > GZIP_HEADER.len()
        && (data.starts_with(&GZIP_HEADER) || data.starts_with(&GZIP_BEST_HEADER))
}

/// Decode a gzip or deflate body. Any decoding failure returns the input unchanged.
pub fn decompress(body: Vec<u8>, content_encoding: Option<&str>) -> Vec<u8> {
    try_decompress(&body, content_encoding).unwrap_or(body)
}

/// `None` when the body is not compressed or does not decode.
fn try_decompress(body: &[u8], content_encoding: Option<&str>) -> Option<Vec<u8>> {
    let encoding = content_encoding.unwrap_or_default();

    if encoding.contains("gzip") || is_gzip_magic(body) {
        return read_all(GzDecoder::new(body));
    }
    if encoding.contains("deflate") {
        return read_all(ZlibDecoder::new(body)).or_else(|| read_all(DeflateDecoder::new(body)));
    }
    None
}

fn read_all<R: Read>(mut decoder: R) -> Option<Vec<u8>> {
    let mut output = Vec::new();
    match decoder.read_to_end(&mut output) {
        Ok(_) => Some(output),
        Err(e) => {
            debug!("Body decompression failed, keeping raw bytes: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::{Compression, GzBuilder};
    use std::io::Write;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_build_request_uses_origin_form() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("test-agent"));
        headers.insert("referer", HeaderValue::from_static(""));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));

        let request = build_request(
            &Method::GET,
            &url("http://example.com/path/page?q=1"),
            &headers,
            None,
            None,
            1,
        );
        let text = String::from_utf8(request).unwrap();

        assert!(text.starts_with(
            "GET /path/page?q=1 HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n"
        ));
        assert!(text.contains("user-agent: test-agent\r\n"));
        assert!(!text.contains("referer"));
        assert!(!text.contains("keep-alive"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_build_request_with_body_and_http10() {
        let request = build_request(
            &Method::POST,
            &url("https://example.com:8443/submit"),
            &HeaderMap::new(),
            Some("application/x-www-form-urlencoded"),
            Some(b"a=1&b=2"),
            0,
        );
        let text = String::from_utf8(request).unwrap();

        assert!(text.starts_with("POST /submit HTTP/1.0\r\nHost: example.com:8443\r\n"));
        assert!(text.contains("Content-Type: application/x-www-form-urlencoded\r\n"));
        assert!(text.ends_with("Content-Length: 7\r\n\r\na=1&b=2"));
    }

    #[test]
    fn test_decode_simple_response() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nX-Value: a:b\r\n\r\nhello";
        let response = decode_response(raw, url("http://example.com/")).unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.version(), Version::HTTP_11);
        assert_eq!(response.reason(), "OK");
        assert_eq!(response.headers().get("x-value").unwrap(), "a:b");
        assert_eq!(response.text(), "hello");
    }

    #[test]
    fn test_decode_rejects_malformed_status_line() {
        let err = decode_response(b"SSH-2.0-OpenSSH\r\n\r\n", url("http://x/")).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[test]
    fn test_decode_without_header_terminator_is_malformed() {
        let err = decode_response(b"HTTP/1.1 200 OK\r\nno end", url("http://x/")).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
        assert!(decode_response(b"", url("http://x/")).is_err());
    }

    #[test]
    fn test_dechunk_concatenates_and_stops_at_zero() {
        let data = b"4\r\nWiki\r\n5;ext=1\r\npedia\r\nE\r\n in\r\n\r\nchunks.\r\n0\r\n\r\nGARBAGE 5\r\nxxxxx";
        assert_eq!(dechunk(data).unwrap(), b"Wikipedia in\r\n\r\nchunks.".to_vec());
    }

    #[test]
    fn test_dechunk_skips_leading_blank_lines_and_truncation() {
        assert_eq!(dechunk(b"\r\n\r\n3\r\nabc\r\n0\r\n").unwrap(), b"abc".to_vec());
        assert_eq!(dechunk(b"a\r\nshort").unwrap(), b"short".to_vec());
        assert!(dechunk(b"zz\r\nabc").is_err());
    }

    #[test]
    fn test_decode_chunked_gzip_body() {
        let compressed = gzip(b"<html>compressed page</html>");
        let mut chunked = Vec::new();
        for part in compressed.chunks(7) {
            chunked.extend_from_slice(format!("{:x}\r\n", part.len()).as_bytes());
            chunked.extend_from_slice(part);
            chunked.extend_from_slice(b"\r\n");
        }
        chunked.extend_from_slice(b"0\r\n\r\n");

        let mut raw =
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Encoding: gzip\r\n\r\n"
                .to_vec();
        raw.extend_from_slice(&chunked);

        let response = decode_response(&raw, url("http://example.com/")).unwrap();
        assert_eq!(response.text(), "<html>compressed page</html>");

        let headers = response.headers();
        assert!(headers.get(TRANSFER_ENCODING).is_none());
        assert!(headers.get(CONTENT_ENCODING).is_none());
        assert_eq!(headers.get(CONTENT_LENGTH).unwrap(), "28");
    }

    #[test]
    fn test_undecodable_body_keeps_content_encoding() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: 99\r\n\r\nplain";
        let response = decode_response(raw, url("http://example.com/")).unwrap();

        assert_eq!(response.text(), "plain");
        assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(response.headers().get(CONTENT_LENGTH).unwrap(), "5");
    }

    #[test]
    fn test_gzip_detected_by_magic_without_header() {
        let mut builder_output = GzBuilder::new().write(Vec::new(), Compression::fast());
        builder_output.write_all(b"magic only").unwrap();
        let mut compressed = builder_output.finish().unwrap();
        // MTIME, XFL and OS are not covered by the trailer CRC.
        compressed[4..10].copy_from_slice(&[0, 0, 0, 0, 4, 0]);

        assert!(is_gzip_magic(&compressed));
        assert_eq!(decompress(compressed, None), b"magic only".to_vec());
    }

    #[test]
    fn test_decompress_never_fails() {
        let mut broken = GZIP_BEST_HEADER.to_vec();
        broken.extend_from_slice(b"not really deflate data");
        assert!(is_gzip_magic(&broken));
        assert_eq!(decompress(broken.clone(), None), broken);

        assert_eq!(decompress(b"plain".to_vec(), Some("gzip")), b"plain".to_vec());
        assert_eq!(decompress(b"plain".to_vec(), None), b"plain".to_vec());
        assert!(!is_gzip_magic(&GZIP_HEADER));
    }

    #[test]
    fn test_deflate_body() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"deflated").unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(decompress(compressed, Some("deflate")), b"deflated".to_vec());
    }
}
