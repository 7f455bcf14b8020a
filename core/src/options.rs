//! Per-call request options and the completion value callbacks receive.
//!
//! # Design
//! Every field of `RequestOptions` is independently optional. Callbacks are
//! `FnOnce` because at most one of them runs, at most once. Dispatcher-wide
//! fallback hooks are shared `Fn` values instead, since one hook serves many
//! requests.

use std::fmt;
use std::sync::Arc;

use crate::error::DispatchError;
use crate::http::{is_success, HttpResponse};

/// One-shot per-call callback.
pub type Callback = Box<dyn FnOnce(&Completion) + Send>;

/// Dispatcher-wide fallback for an omitted per-call callback.
pub type Hook = Arc<dyn Fn(&Completion) + Send + Sync>;

/// Receives construction/open/send errors in the reporting variant.
pub type ErrorHook = Arc<dyn Fn(&DispatchError) + Send + Sync>;

/// Final state of a request, delivered once the transport reports `Done`.
///
/// A request that never produced a response (aborted, connection refused)
/// completes with status 0 and an empty body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Completion {
    pub fn is_success(&self) -> bool {
        is_success(self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl From<HttpResponse> for Completion {
    fn from(response: HttpResponse) -> Self {
        Completion {
            status: response.status,
            headers: response.headers,
            body: response.body,
        }
    }
}

/// Caller-supplied options for a single request.
#[derive(Default)]
pub struct RequestOptions {
    /// Payload; dropped by the transport for `GET` and `HEAD`.
    pub body: Option<String>,
    /// Runs when the final status is 2xx.
    pub on_success: Option<Callback>,
    /// Runs for any other final status, including 0.
    pub on_failure: Option<Callback>,
    /// Overrides the dispatcher's default async mode for this call only.
    pub async_mode: Option<bool>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&Completion) + Send + 'static,
    {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_failure<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&Completion) + Send + 'static,
    {
        self.on_failure = Some(Box::new(f));
        self
    }

    pub fn async_mode(mut self, async_mode: bool) -> Self {
        self.async_mode = Some(async_mode);
        self
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("body", &self.body)
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .field("async_mode", &self.async_mode)
            .finish()
    }
}
