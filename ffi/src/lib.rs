//! C-ABI wrapper around `dispatch-core`.
//!
//! # Overview
//! Exposes the request dispatcher through `extern "C"` functions so any
//! language with a C FFI can issue requests with success/failure callbacks
//! and keep the returned handle for `abort`, status reads or a blocking wait.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Failures return null (or `false`) and record a code and message in a
//!   thread-local slot read with `dispatch_last_error_code` /
//!   `dispatch_last_error`.
//! - Callbacks are plain function pointers plus an opaque `user_data`; for
//!   async requests they run on the worker thread.
//! - The C caller owns all returned pointers and must call the matching
//!   `dispatch_*_free` function to release them.

pub mod types;

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

use dispatch_core::{Dispatcher, DispatcherConfig, RequestOptions};

use types::*;

/// Borrow a C string argument, recording `NullArg` when it is null or not
/// UTF-8.
fn str_arg<'a>(ptr: *const c_char, name: &str) -> Option<&'a str> {
    if ptr.is_null() {
        set_last_error(FfiErrorCode::NullArg, format!("`{name}` is null"));
        return None;
    }
    match unsafe { CStr::from_ptr(ptr) }.to_str() {
        Ok(s) => Some(s),
        Err(_) => {
            set_last_error(FfiErrorCode::NullArg, format!("`{name}` is not valid UTF-8"));
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher lifecycle
// ---------------------------------------------------------------------------

/// Create a dispatcher with the default transport chain.
///
/// The caller must free the returned pointer with `dispatch_dispatcher_free`.
#[unsafe(no_mangle)]
pub extern "C" fn dispatch_dispatcher_new(default_async: bool) -> *mut FfiDispatcher {
    catch_unwind(|| {
        let config = DispatcherConfig {
            default_async,
            ..DispatcherConfig::default()
        };
        Box::into_raw(Box::new(FfiDispatcher {
            inner: Dispatcher::new(config),
        }))
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Create a dispatcher configured from `DISPATCH_*` environment variables.
///
/// Returns null if a variable holds an invalid value.
#[unsafe(no_mangle)]
pub extern "C" fn dispatch_dispatcher_from_env() -> *mut FfiDispatcher {
    catch_unwind(|| match DispatcherConfig::from_env() {
        Ok(config) => Box::into_raw(Box::new(FfiDispatcher {
            inner: Dispatcher::new(config),
        })),
        Err(e) => {
            set_dispatch_error(&e);
            std::ptr::null_mut()
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a dispatcher. Safe to call with null. Handles it created stay valid.
#[unsafe(no_mangle)]
pub extern "C" fn dispatch_dispatcher_free(dispatcher: *mut FfiDispatcher) {
    if !dispatcher.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(dispatcher) });
        }));
    }
}

/// Change the async mode used when `dispatch_request` gets `async_mode = -1`.
#[unsafe(no_mangle)]
pub extern "C" fn dispatch_set_default_async(dispatcher: *mut FfiDispatcher, default_async: bool) -> bool {
    if dispatcher.is_null() {
        set_last_error(FfiErrorCode::NullArg, "`dispatcher` is null");
        return false;
    }
    catch_unwind(AssertUnwindSafe(|| {
        unsafe { &mut *dispatcher }.inner.set_default_async(default_async);
        true
    }))
    .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Dispatch a request.
///
/// `method` may be null or empty (means GET). `body` may be null; it is
/// dropped for GET and HEAD. `async_mode` is tri-state: -1 = dispatcher
/// default, 0 = blocking, 1 = async. Either callback may be null.
///
/// Returns null on construction, open or send failure; see
/// `dispatch_last_error`. The caller must free the returned handle with
/// `dispatch_handle_free`.
#[unsafe(no_mangle)]
pub extern "C" fn dispatch_request(
    dispatcher: *const FfiDispatcher,
    method: *const c_char,
    url: *const c_char,
    body: *const c_char,
    async_mode: i32,
    on_success: FfiCallback,
    on_failure: FfiCallback,
    user_data: *mut c_void,
) -> *mut FfiRequestHandle {
    let user_data = UserData(user_data);
    catch_unwind(AssertUnwindSafe(|| {
        clear_last_error();
        if dispatcher.is_null() {
            set_last_error(FfiErrorCode::NullArg, "`dispatcher` is null");
            return std::ptr::null_mut();
        }
        let dispatcher = unsafe { &*dispatcher };
        let Some(url) = str_arg(url, "url") else {
            return std::ptr::null_mut();
        };
        let method = if method.is_null() {
            ""
        } else {
            match str_arg(method, "method") {
                Some(m) => m,
                None => return std::ptr::null_mut(),
            }
        };

        let mut options = RequestOptions::new();
        if !body.is_null() {
            match str_arg(body, "body") {
                Some(b) => options = options.body(b),
                None => return std::ptr::null_mut(),
            }
        }
        match async_mode {
            0 => options = options.async_mode(false),
            1 => options = options.async_mode(true),
            _ => {}
        }
        if let Some(callback) = on_success {
            options = options.on_success(move |c| user_data.invoke(callback, c));
        }
        if let Some(callback) = on_failure {
            options = options.on_failure(move |c| user_data.invoke(callback, c));
        }

        match dispatcher.inner.request(method, url, options) {
            Ok(handle) => Box::into_raw(Box::new(FfiRequestHandle { inner: Some(handle) })),
            Err(e) => {
                set_dispatch_error(&e);
                std::ptr::null_mut()
            }
        }
    }))
    .unwrap_or_else(|_| {
        set_last_error(FfiErrorCode::Panic, "panic in dispatch_request");
        std::ptr::null_mut()
    })
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Current state. Null or waited-on handles report `Done`.
#[unsafe(no_mangle)]
pub extern "C" fn dispatch_handle_ready_state(handle: *const FfiRequestHandle) -> FfiReadyState {
    if handle.is_null() {
        return FfiReadyState::Done;
    }
    catch_unwind(AssertUnwindSafe(|| match &unsafe { &*handle }.inner {
        Some(h) => h.ready_state().into(),
        None => FfiReadyState::Done,
    }))
    .unwrap_or(FfiReadyState::Done)
}

/// Final status, or 0 before headers arrive.
#[unsafe(no_mangle)]
pub extern "C" fn dispatch_handle_status(handle: *const FfiRequestHandle) -> u16 {
    if handle.is_null() {
        return 0;
    }
    catch_unwind(AssertUnwindSafe(|| {
        unsafe { &*handle }.inner.as_ref().map_or(0, |h| h.status())
    }))
    .unwrap_or(0)
}

/// Abort an in-flight request; its failure callback runs with status 0.
/// Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn dispatch_handle_abort(handle: *mut FfiRequestHandle) {
    if handle.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        if let Some(h) = unsafe { &mut *handle }.inner.as_mut() {
            h.abort();
        }
    }));
}

/// Block until the request completes. Can be called once per handle; the
/// handle must still be freed afterwards.
///
/// Waiting takes the request out of the handle, so it can no longer be
/// aborted: `dispatch_handle_abort` on a waited-on handle does nothing.
/// A handle must not be used from two threads at once. To keep abort
/// available, dispatch in async mode and wait on the callbacks instead.
///
/// Returns null on a second call or if the request ended without completing.
/// Free the result with `dispatch_free_completion`.
#[unsafe(no_mangle)]
pub extern "C" fn dispatch_handle_wait(handle: *mut FfiRequestHandle) -> *mut FfiCompletion {
    if handle.is_null() {
        set_last_error(FfiErrorCode::NullArg, "`handle` is null");
        return std::ptr::null_mut();
    }
    catch_unwind(AssertUnwindSafe(|| {
        let Some(inner) = unsafe { &mut *handle }.inner.take() else {
            set_last_error(FfiErrorCode::InvalidState, "handle already waited on");
            return std::ptr::null_mut();
        };
        match inner.wait() {
            Ok(completion) => FfiCompletion::from_core(completion),
            Err(e) => {
                set_dispatch_error(&e);
                std::ptr::null_mut()
            }
        }
    }))
    .unwrap_or_else(|_| {
        set_last_error(FfiErrorCode::Panic, "panic in dispatch_handle_wait");
        std::ptr::null_mut()
    })
}

/// Free a handle. Does not abort the request. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn dispatch_handle_free(handle: *mut FfiRequestHandle) {
    if !handle.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(handle) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Errors and free functions
// ---------------------------------------------------------------------------

/// Code of the last failure on this thread, `Ok` if none.
#[unsafe(no_mangle)]
pub extern "C" fn dispatch_last_error_code() -> FfiErrorCode {
    last_error().map_or(FfiErrorCode::Ok, |(code, _)| code)
}

/// Message of the last failure on this thread, or null if none.
/// Free with `dispatch_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn dispatch_last_error() -> *mut c_char {
    catch_unwind(|| match last_error() {
        Some((_, message)) => CString::new(message).unwrap_or_default().into_raw(),
        None => std::ptr::null_mut(),
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a completion returned by `dispatch_handle_wait`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn dispatch_free_completion(completion: *mut FfiCompletion) {
    if completion.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let completion = unsafe { Box::from_raw(completion) };
        if !completion.body.is_null() {
            drop(unsafe { CString::from_raw(completion.body) });
        }
    });
}

/// Free a string returned by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn dispatch_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { CString::from_raw(s) });
        });
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
