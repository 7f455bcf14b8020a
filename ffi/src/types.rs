//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Each type mirrors a core type with a C-compatible representation:
//! `*mut c_char` instead of `String`, explicit discriminants instead of Rust
//! enums, and opaque boxes for the dispatcher and request handle. Conversion
//! functions live here to keep `lib.rs` focused on the `extern "C"` surface.

use std::cell::RefCell;
use std::ffi::{c_void, CString};
use std::os::raw::c_char;

use dispatch_core::{Completion, DispatchError, Dispatcher, ReadyState, RequestHandle};

/// Opaque handle to a `Dispatcher`.
pub struct FfiDispatcher {
    pub(crate) inner: Dispatcher,
}

/// Opaque handle to one in-flight or finished request. `inner` is taken by
/// `dispatch_handle_wait`.
pub struct FfiRequestHandle {
    pub(crate) inner: Option<RequestHandle>,
}

/// Success/failure callback. `body` is only valid for the duration of the
/// call. May run on a worker thread for async requests.
pub type FfiCallback = Option<extern "C" fn(status: u16, body: *const c_char, user_data: *mut c_void)>;

/// Caller-owned context passed back to callbacks untouched.
#[derive(Clone, Copy)]
pub(crate) struct UserData(pub(crate) *mut c_void);

// The C caller guarantees `user_data` may be used from the worker thread.
unsafe impl Send for UserData {}

impl UserData {
    pub(crate) fn invoke(self, callback: extern "C" fn(u16, *const c_char, *mut c_void), completion: &Completion) {
        let body = c_body(&completion.body);
        callback(completion.status, body.as_ptr(), self.0);
    }
}

/// Request lifecycle as a C enum.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiReadyState {
    Created = 0,
    Opened = 1,
    Sent = 2,
    Loading = 3,
    Done = 4,
}

impl From<ReadyState> for FfiReadyState {
    fn from(state: ReadyState) -> Self {
        match state {
            ReadyState::Created => FfiReadyState::Created,
            ReadyState::Opened => FfiReadyState::Opened,
            ReadyState::Sent => FfiReadyState::Sent,
            ReadyState::Loading => FfiReadyState::Loading,
            ReadyState::Done => FfiReadyState::Done,
        }
    }
}

/// Error category of the most recent failure on this thread.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    Construction = 1,
    InvalidMethod = 2,
    InvalidUrl = 3,
    UnsupportedScheme = 4,
    InvalidState = 5,
    Network = 6,
    Config = 7,
    NullArg = 8,
    Panic = 9,
}

impl From<&DispatchError> for FfiErrorCode {
    fn from(e: &DispatchError) -> Self {
        match e {
            DispatchError::Construction { .. }
            | DispatchError::Unavailable { .. }
            | DispatchError::UnknownTransport(_) => FfiErrorCode::Construction,
            DispatchError::InvalidMethod(_) | DispatchError::ForbiddenMethod(_) => FfiErrorCode::InvalidMethod,
            DispatchError::InvalidUrl { .. } => FfiErrorCode::InvalidUrl,
            DispatchError::UnsupportedScheme { .. } => FfiErrorCode::UnsupportedScheme,
            DispatchError::InvalidState(_) => FfiErrorCode::InvalidState,
            DispatchError::Network(_) => FfiErrorCode::Network,
            DispatchError::Config(_) => FfiErrorCode::Config,
        }
    }
}

/// Final status and body returned by `dispatch_handle_wait`.
/// Free with `dispatch_free_completion`.
#[repr(C)]
pub struct FfiCompletion {
    pub status: u16,
    pub body: *mut c_char,
}

impl FfiCompletion {
    pub(crate) fn from_core(completion: Completion) -> *mut Self {
        let body = c_body(&completion.body).into_raw();
        Box::into_raw(Box::new(FfiCompletion {
            status: completion.status,
            body,
        }))
    }
}

/// C view of a response body. C strings end at the first NUL, so the body is
/// cut there rather than lost.
pub(crate) fn c_body(body: &str) -> CString {
    let end = body.find('\0').unwrap_or(body.len());
    if end < body.len() {
        log::debug!("response body truncated at NUL byte {end} of {}", body.len());
    }
    CString::new(&body[..end]).unwrap_or_default()
}

thread_local! {
    static LAST_ERROR: RefCell<Option<(FfiErrorCode, String)>> = const { RefCell::new(None) };
}

pub(crate) fn set_last_error(code: FfiErrorCode, message: impl Into<String>) {
    let message = message.into();
    log::debug!("ffi error {code:?}: {message}");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some((code, message)));
}

pub(crate) fn set_dispatch_error(e: &DispatchError) {
    set_last_error(FfiErrorCode::from(e), e.to_string());
}

pub(crate) fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

pub(crate) fn last_error() -> Option<(FfiErrorCode, String)> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}
