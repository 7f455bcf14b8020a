//! The transport capability the dispatcher drives.
//!
//! # Design
//! `Transport` is the live request object: listener registration, `open`,
//! `send`, `abort` and status reads. Built-in transports share one state
//! machine, `NativeTransport`, and differ only in the `Connector` that
//! performs the blocking exchange. Async mode runs the connector on a worker
//! thread; sync mode runs it inline inside `send`.
//!
//! The `Done` transition is decided under the exchange lock and clears the
//! `active` flag, so an abort racing the worker reports `Done` once.
//! Transitions are queued in the order they are applied and handed to the
//! listener with no transport lock held. Whichever thread finds the queue
//! idle drains it; others only enqueue. A callback may therefore read the
//! transport, or abort it, from any thread.

mod socket;
#[cfg(feature = "ureq")]
mod ureq_agent;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{debug, warn};

use crate::error::DispatchError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, ReadyState};

pub use socket::{HttpVersion, SocketConnector};
#[cfg(feature = "ureq")]
pub use ureq_agent::UreqConnector;

/// Notified on every state transition with the response known so far.
pub type StateListener = Box<dyn FnMut(ReadyState, &HttpResponse) + Send>;

/// A live, stateful HTTP request object.
pub trait Transport: Send {
    /// Strategy id this transport was constructed under.
    fn id(&self) -> &str;

    /// Replace the state listener. Must be called before `open`.
    fn set_state_listener(&mut self, listener: StateListener);

    /// Validate and stage the request. Fails on forbidden methods, malformed
    /// URLs and schemes the transport cannot reach.
    fn open(&mut self, method: HttpMethod, url: &str, async_mode: bool) -> Result<(), DispatchError>;

    /// Start the exchange. Blocks until `Done` when opened in sync mode.
    fn send(&mut self, body: Option<String>) -> Result<(), DispatchError>;

    /// Terminate an in-flight request; it completes with status 0.
    fn abort(&mut self);

    fn ready_state(&self) -> ReadyState;

    /// Final status, or 0 before headers arrive.
    fn status(&self) -> u16;

    fn response_text(&self) -> String;
}

/// Performs one blocking HTTP exchange.
pub trait Connector: Send + Sync + 'static {
    fn supports_scheme(&self, scheme: &str) -> bool;

    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, DispatchError>;
}

static WORKER_SEQ: AtomicU64 = AtomicU64::new(0);

struct Exchange {
    state: ReadyState,
    response: HttpResponse,
    request: Option<HttpRequest>,
    async_mode: bool,
    /// Set by `send`, cleared by the `Done` transition.
    active: bool,
    /// Bumped by `open` so a stale worker cannot touch a reopened exchange.
    generation: u64,
}

/// Notifications waiting for the listener.
struct Delivery {
    listener: Option<StateListener>,
    queue: VecDeque<(ReadyState, HttpResponse)>,
    draining: bool,
}

struct Shared {
    exchange: Mutex<Exchange>,
    delivery: Mutex<Delivery>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Apply a transition for the exchange of `generation` and notify the
    /// listener. Returns false if the exchange was finished or reopened.
    fn advance(&self, generation: u64, state: ReadyState, response: Option<HttpResponse>) -> bool {
        let drain = {
            let mut ex = lock(&self.exchange);
            if ex.generation != generation || !ex.active {
                return false;
            }
            ex.state = state;
            if let Some(response) = response {
                ex.response = response;
            }
            if state == ReadyState::Done {
                ex.active = false;
            }
            self.enqueue(state, ex.response.clone())
        };
        if drain {
            self.drain();
        }
        true
    }

    /// Queue a notification. Called with the exchange lock held so the queue
    /// follows application order. Returns true if the caller must drain.
    fn enqueue(&self, state: ReadyState, response: HttpResponse) -> bool {
        let mut delivery = lock(&self.delivery);
        delivery.queue.push_back((state, response));
        !std::mem::replace(&mut delivery.draining, true)
    }

    fn drain(&self) {
        loop {
            let ((state, response), mut listener) = {
                let mut delivery = lock(&self.delivery);
                match delivery.queue.pop_front() {
                    Some(next) => (next, delivery.listener.take()),
                    None => {
                        delivery.draining = false;
                        return;
                    }
                }
            };
            if let Some(listener) = listener.as_mut() {
                listener(state, &response);
            }
            let mut delivery = lock(&self.delivery);
            // A listener set while this one ran replaces it.
            if delivery.listener.is_none() {
                delivery.listener = listener;
            }
        }
    }

    fn run(&self, generation: u64, connector: &dyn Connector, request: &HttpRequest) {
        match connector.execute(request) {
            Ok(response) => {
                let head = HttpResponse {
                    status: response.status,
                    headers: response.headers.clone(),
                    body: String::new(),
                };
                if self.advance(generation, ReadyState::Loading, Some(head)) {
                    self.advance(generation, ReadyState::Done, Some(response));
                }
            }
            Err(e) => {
                warn!("{} {} failed: {e}", request.method, request.url);
                self.advance(generation, ReadyState::Done, Some(HttpResponse::default()));
            }
        }
    }
}

/// State machine shared by all built-in transports.
pub struct NativeTransport<C> {
    id: String,
    user_agent: String,
    connector: Arc<C>,
    shared: Arc<Shared>,
}

impl<C: Connector> NativeTransport<C> {
    pub fn new(id: impl Into<String>, user_agent: impl Into<String>, connector: C) -> Self {
        Self {
            id: id.into(),
            user_agent: user_agent.into(),
            connector: Arc::new(connector),
            shared: Arc::new(Shared {
                exchange: Mutex::new(Exchange {
                    state: ReadyState::Created,
                    response: HttpResponse::default(),
                    request: None,
                    async_mode: true,
                    active: false,
                    generation: 0,
                }),
                delivery: Mutex::new(Delivery {
                    listener: None,
                    queue: VecDeque::new(),
                    draining: false,
                }),
            }),
        }
    }
}

impl<C: Connector> Transport for NativeTransport<C> {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_state_listener(&mut self, listener: StateListener) {
        lock(&self.shared.delivery).listener = Some(listener);
    }

    fn open(&mut self, method: HttpMethod, url: &str, async_mode: bool) -> Result<(), DispatchError> {
        if method.is_forbidden() {
            return Err(DispatchError::ForbiddenMethod(method.to_string()));
        }
        let parsed = url::Url::parse(url).map_err(|e| DispatchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !self.connector.supports_scheme(parsed.scheme()) {
            return Err(DispatchError::UnsupportedScheme {
                scheme: parsed.scheme().to_string(),
                transport: self.id.clone(),
            });
        }

        let drain = {
            let mut ex = lock(&self.shared.exchange);
            if ex.active {
                return Err(DispatchError::InvalidState("request already in flight"));
            }
            ex.generation += 1;
            ex.state = ReadyState::Opened;
            ex.response = HttpResponse::default();
            ex.async_mode = async_mode;
            ex.request = Some(HttpRequest {
                method,
                url: parsed,
                headers: vec![("User-Agent".to_string(), self.user_agent.clone())],
                body: None,
            });
            self.shared.enqueue(ReadyState::Opened, ex.response.clone())
        };
        if drain {
            self.shared.drain();
        }
        Ok(())
    }

    fn send(&mut self, body: Option<String>) -> Result<(), DispatchError> {
        let (generation, async_mode, request) = {
            let mut ex = lock(&self.shared.exchange);
            if ex.state != ReadyState::Opened || ex.active {
                return Err(DispatchError::InvalidState("send requires an opened, idle request"));
            }
            let Some(mut request) = ex.request.clone() else {
                return Err(DispatchError::InvalidState("send before open"));
            };
            match body {
                Some(body) if request.method.allows_body() => {
                    request
                        .headers
                        .push(("Content-Type".to_string(), "text/plain;charset=UTF-8".to_string()));
                    request.body = Some(body);
                }
                Some(_) => debug!("dropping body of {} request", request.method),
                None => {}
            }
            ex.active = true;
            (ex.generation, ex.async_mode, request)
        };

        if !self.shared.advance(generation, ReadyState::Sent, None) {
            return Ok(());
        }

        if !async_mode {
            self.shared.run(generation, self.connector.as_ref(), &request);
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let connector = Arc::clone(&self.connector);
        let name = format!("dispatch-{}", WORKER_SEQ.fetch_add(1, Ordering::Relaxed));
        let spawned = thread::Builder::new()
            .name(name)
            .spawn(move || shared.run(generation, connector.as_ref(), &request));
        if let Err(e) = spawned {
            lock(&self.shared.exchange).active = false;
            return Err(DispatchError::Network(format!("failed to start worker: {e}")));
        }
        Ok(())
    }

    fn abort(&mut self) {
        let generation = {
            let ex = lock(&self.shared.exchange);
            if !ex.active {
                return;
            }
            ex.generation
        };
        if self.shared.advance(generation, ReadyState::Done, Some(HttpResponse::default())) {
            debug!("{}: request aborted", self.id);
        }
    }

    fn ready_state(&self) -> ReadyState {
        lock(&self.shared.exchange).state
    }

    fn status(&self) -> u16 {
        lock(&self.shared.exchange).response.status
    }

    fn response_text(&self) -> String {
        lock(&self.shared.exchange).response.body.clone()
    }
}
