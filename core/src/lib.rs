//! Callback-driven HTTP request dispatcher.
//!
//! # Overview
//! `Dispatcher::request` constructs a transport through an ordered fallback
//! chain, opens and sends the request, and returns the live `RequestHandle`.
//! When the transport reaches `Done`, the final status picks exactly one of
//! the `on_success` (2xx) or `on_failure` callbacks, which runs once.
//!
//! # Design
//! - Defaults (async mode, fallback hooks) belong to one `Dispatcher`
//!   value instead of process-wide state.
//! - Transports are trait objects built by named, fallible factories
//!   (`TransportChain`); built-ins are `ureq` and raw-socket HTTP/1.x.
//! - Completion is also a single-resolution value on the handle, awaited
//!   with `wait` or `completion().await`.
//! - Non-2xx statuses are outcomes, not errors. `DispatchError` only covers
//!   construction, open and send failures.

pub mod chain;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod http;
pub mod options;
pub mod transport;

pub use chain::{TransportChain, TransportRegistry, TransportStrategy};
pub use config::DispatcherConfig;
pub use dispatcher::Dispatcher;
pub use error::{ConstructionAttempt, DispatchError};
pub use handle::RequestHandle;
pub use http::{HttpMethod, HttpRequest, HttpResponse, ReadyState};
pub use options::{Completion, RequestOptions};
pub use transport::{Connector, NativeTransport, StateListener, Transport};
