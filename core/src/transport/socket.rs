//! Plain-TCP HTTP/1.x connector.
//!
//! Sends one request with `Connection: close` and reads until the server
//! closes the socket, then parses the status line, headers and body
//! (decoding `Transfer-Encoding: chunked`). No TLS, so only `http` URLs.

use std::io::{Read, Write};
use std::net::TcpStream;

use crate::error::DispatchError;
use crate::http::{HttpRequest, HttpResponse};

use super::Connector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    fn as_str(self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SocketConnector {
    version: HttpVersion,
}

impl SocketConnector {
    pub fn new(version: HttpVersion) -> Self {
        Self { version }
    }

    fn encode(&self, request: &HttpRequest) -> Result<Vec<u8>, DispatchError> {
        let url = &request.url;
        let host = url.host_str().ok_or_else(|| DispatchError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        })?;
        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }
        let host_header = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let mut head = format!("{} {target} {}\r\n", request.method, self.version.as_str());
        head.push_str(&format!("Host: {host_header}\r\n"));
        for (name, value) in &request.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        if let Some(body) = &request.body {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        } else if request.method.allows_body() {
            head.push_str("Content-Length: 0\r\n");
        }
        head.push_str("Connection: close\r\n\r\n");

        let mut bytes = head.into_bytes();
        if let Some(body) = &request.body {
            bytes.extend_from_slice(body.as_bytes());
        }
        Ok(bytes)
    }
}

impl Connector for SocketConnector {
    fn supports_scheme(&self, scheme: &str) -> bool {
        scheme == "http"
    }

    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, DispatchError> {
        let payload = self.encode(request)?;
        let addrs = request
            .url
            .socket_addrs(|| Some(80))
            .map_err(|e| DispatchError::Network(format!("failed to resolve {}: {e}", request.url)))?;
        let mut stream = TcpStream::connect(&*addrs)
            .map_err(|e| DispatchError::Network(format!("failed to connect to {}: {e}", request.url)))?;

        stream
            .write_all(&payload)
            .map_err(|e| DispatchError::Network(format!("failed to send request: {e}")))?;

        let mut received = Vec::new();
        stream
            .read_to_end(&mut received)
            .map_err(|e| DispatchError::Network(format!("failed to read response: {e}")))?;

        parse_response(&received)
    }
}

/// Parse a complete HTTP/1.x response read to EOF. Interim 1xx heads
/// (other than 101) are skipped.
pub(crate) fn parse_response(mut raw: &[u8]) -> Result<HttpResponse, DispatchError> {
    let (status, headers, rest) = loop {
        let (status, headers, rest) = parse_head(raw)?;
        if (100..200).contains(&status) && status != 101 {
            raw = rest;
            continue;
        }
        break (status, headers, rest);
    };

    let chunked = headers.iter().any(|(k, v)| {
        k.eq_ignore_ascii_case("transfer-encoding") && v.to_ascii_lowercase().contains("chunked")
    });
    let body = if chunked {
        decode_chunked(rest)?
    } else {
        let length = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.parse::<usize>().ok());
        match length {
            Some(n) if n <= rest.len() => rest[..n].to_vec(),
            _ => rest.to_vec(),
        }
    };

    Ok(HttpResponse {
        status,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

type Head<'a> = (u16, Vec<(String, String)>, &'a [u8]);

/// Status line and headers, plus whatever follows the blank line.
fn parse_head(raw: &[u8]) -> Result<Head<'_>, DispatchError> {
    let split = find(raw, b"\r\n\r\n")
        .ok_or_else(|| DispatchError::Network("truncated response head".to_string()))?;
    let head = std::str::from_utf8(&raw[..split])
        .map_err(|e| DispatchError::Network(format!("invalid response head: {e}")))?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(DispatchError::Network(format!("bad status line `{status_line}`")));
    }
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| DispatchError::Network(format!("bad status line `{status_line}`")))?;

    let mut headers = Vec::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            return Err(DispatchError::Network(format!("bad header line `{line}`")));
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok((status, headers, &raw[split + 4..]))
}

fn decode_chunked(mut raw: &[u8]) -> Result<Vec<u8>, DispatchError> {
    let mut body = Vec::new();
    loop {
        let line_end = find(raw, b"\r\n")
            .ok_or_else(|| DispatchError::Network("truncated chunk size".to_string()))?;
        let size_line = std::str::from_utf8(&raw[..line_end])
            .map_err(|e| DispatchError::Network(format!("invalid chunk size: {e}")))?;
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| DispatchError::Network(format!("invalid chunk size `{size_hex}`")))?;
        raw = &raw[line_end + 2..];
        if size == 0 {
            return Ok(body);
        }
        if raw.len() < size {
            return Err(DispatchError::Network("truncated chunk".to_string()));
        }
        body.extend_from_slice(&raw[..size]);
        raw = raw.get(size + 2..).unwrap_or_default();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
