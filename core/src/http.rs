//! HTTP data types shared by the dispatcher and its transports.
//!
//! # Design
//! Requests and responses are plain owned data so a `Connector` can perform
//! the exchange on any thread and the FFI layer can copy them across the C
//! boundary without lifetime concerns.

use std::fmt;
use std::str::FromStr;

use crate::error::DispatchError;

/// HTTP method for a request. Parsing is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    /// Any other valid token, stored upper-cased.
    Extension(String),
}

impl HttpMethod {
    /// Resolve an optional, possibly empty verb. Empty means `GET`.
    pub fn resolve(method: Option<&str>) -> Result<Self, DispatchError> {
        match method.map(str::trim) {
            None | Some("") => Ok(HttpMethod::Get),
            Some(m) => m.parse(),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Extension(m) => m,
        }
    }

    /// `GET` and `HEAD` never carry a request body.
    pub fn allows_body(&self) -> bool {
        !matches!(self, HttpMethod::Get | HttpMethod::Head)
    }

    /// Methods a transport must refuse to open.
    pub fn is_forbidden(&self) -> bool {
        matches!(self.as_str(), "CONNECT" | "TRACE" | "TRACK")
    }
}

impl FromStr for HttpMethod {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(is_token_byte) {
            return Err(DispatchError::InvalidMethod(s.to_string()));
        }
        let upper = s.to_ascii_uppercase();
        Ok(match upper.as_str() {
            "GET" => HttpMethod::Get,
            "HEAD" => HttpMethod::Head,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "PATCH" => HttpMethod::Patch,
            "DELETE" => HttpMethod::Delete,
            "OPTIONS" => HttpMethod::Options,
            _ => HttpMethod::Extension(upper),
        })
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RFC 7230 `tchar`.
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Lifecycle of one request, as reported to state listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    Created = 0,
    Opened = 1,
    Sent = 2,
    Loading = 3,
    Done = 4,
}

/// An HTTP request described as plain data, handed to a `Connector`.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: url::Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    /// Case-insensitive header lookup; first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Success is exactly the 2xx range.
pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}
