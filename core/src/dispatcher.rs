//! The request dispatcher: `get`, `post` and `request`.
//!
//! # Design
//! A `Dispatcher` owns its configuration, transport chain and fallback hooks;
//! nothing is global. Each `request` constructs a fresh transport, installs a
//! one-shot listener that acts only on `Done`, opens and sends, then hands
//! the transport to the caller inside a `RequestHandle`.
//!
//! Two error contracts are offered. `request` (and `get`/`post`) returns
//! construction, open and send failures to the caller. `request_or_report`
//! never returns an error: it sends it to the `on_error` hook (or the log)
//! and still returns the handle when one was constructed.

use std::sync::Arc;

use log::{debug, error};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::chain::{TransportChain, TransportRegistry};
use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use crate::handle::RequestHandle;
use crate::http::{is_success, HttpMethod, HttpResponse, ReadyState};
use crate::options::{Callback, Completion, ErrorHook, Hook, RequestOptions};

/// Dispatcher-wide fallbacks for omitted per-call callbacks.
#[derive(Clone, Default)]
struct Hooks {
    on_success: Option<Hook>,
    on_failure: Option<Hook>,
    on_error: Option<ErrorHook>,
}

enum Notify {
    Once(Callback),
    Shared(Hook),
}

impl Notify {
    fn pick(per_call: Option<Callback>, fallback: Option<&Hook>) -> Option<Self> {
        per_call
            .map(Notify::Once)
            .or_else(|| fallback.map(|hook| Notify::Shared(Arc::clone(hook))))
    }

    fn call(self, completion: &Completion) {
        match self {
            Notify::Once(f) => f(completion),
            Notify::Shared(f) => f(completion),
        }
    }
}

/// Everything the `Done` transition needs, consumed exactly once.
struct Pending {
    on_success: Option<Notify>,
    on_failure: Option<Notify>,
    tx: oneshot::Sender<Completion>,
}

impl Pending {
    fn complete(self, id: Uuid, completion: Completion) {
        let branch = if is_success(completion.status) {
            self.on_success
        } else {
            self.on_failure
        };
        debug!(
            "request {id} done with status {} ({})",
            completion.status,
            if is_success(completion.status) { "success" } else { "failure" }
        );
        if let Some(notify) = branch {
            notify.call(&completion);
        }
        // The handle may already be gone.
        let _ = self.tx.send(completion);
    }
}

pub struct Dispatcher {
    config: DispatcherConfig,
    chain: TransportChain,
    hooks: Hooks,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

impl Dispatcher {
    /// Build the chain from `config.transports` against the built-in registry.
    pub fn new(config: DispatcherConfig) -> Self {
        let registry = TransportRegistry::builtin(&config.user_agent);
        let chain = TransportChain::from_ids(&config.transports, &registry);
        Self::with_chain(config, chain)
    }

    pub fn with_chain(config: DispatcherConfig, chain: TransportChain) -> Self {
        Self {
            config,
            chain,
            hooks: Hooks::default(),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn chain(&self) -> &TransportChain {
        &self.chain
    }

    pub fn default_async(&self) -> bool {
        self.config.default_async
    }

    pub fn set_default_async(&mut self, default_async: bool) {
        self.config.default_async = default_async;
    }

    pub fn set_on_success<F>(&mut self, f: F)
    where
        F: Fn(&Completion) + Send + Sync + 'static,
    {
        self.hooks.on_success = Some(Arc::new(f));
    }

    pub fn set_on_failure<F>(&mut self, f: F)
    where
        F: Fn(&Completion) + Send + Sync + 'static,
    {
        self.hooks.on_failure = Some(Arc::new(f));
    }

    pub fn set_on_error<F>(&mut self, f: F)
    where
        F: Fn(&DispatchError) + Send + Sync + 'static,
    {
        self.hooks.on_error = Some(Arc::new(f));
    }

    pub fn clear_hooks(&mut self) {
        self.hooks = Hooks::default();
    }

    pub fn get(&self, url: &str, options: impl Into<Option<RequestOptions>>) -> Result<RequestHandle, DispatchError> {
        self.request("GET", url, options)
    }

    pub fn post(&self, url: &str, options: impl Into<Option<RequestOptions>>) -> Result<RequestHandle, DispatchError> {
        self.request("POST", url, options)
    }

    /// Dispatch `method` (case-insensitive, empty means `GET`) to `url`.
    ///
    /// With effective async mode off, the callback has already run when this
    /// returns.
    pub fn request(
        &self,
        method: &str,
        url: &str,
        options: impl Into<Option<RequestOptions>>,
    ) -> Result<RequestHandle, DispatchError> {
        let options = options.into().unwrap_or_default();
        let (mut handle, launch) = self.prepare(options)?;
        launch.run(&mut handle, method, url)?;
        Ok(handle)
    }

    /// Like [`Dispatcher::request`], but errors go to the `on_error` hook.
    ///
    /// Returns `None` only when no transport could be constructed.
    pub fn request_or_report(
        &self,
        method: &str,
        url: &str,
        options: impl Into<Option<RequestOptions>>,
    ) -> Option<RequestHandle> {
        let options = options.into().unwrap_or_default();
        let (mut handle, launch) = match self.prepare(options) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.report(&e);
                return None;
            }
        };
        if let Err(e) = launch.run(&mut handle, method, url) {
            self.report(&e);
        }
        Some(handle)
    }

    fn report(&self, e: &DispatchError) {
        match &self.hooks.on_error {
            Some(hook) => hook(e),
            None => error!("request failed: {e}"),
        }
    }

    /// Steps 1-4: construct, install the one-shot listener, resolve async mode.
    fn prepare(&self, options: RequestOptions) -> Result<(RequestHandle, Launch), DispatchError> {
        let mut transport = self.chain.create_transport()?;
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        let mut pending = Some(Pending {
            on_success: Notify::pick(options.on_success, self.hooks.on_success.as_ref()),
            on_failure: Notify::pick(options.on_failure, self.hooks.on_failure.as_ref()),
            tx,
        });
        transport.set_state_listener(Box::new(move |state: ReadyState, response: &HttpResponse| {
            if state != ReadyState::Done {
                return;
            }
            if let Some(pending) = pending.take() {
                pending.complete(id, Completion::from(response.clone()));
            }
        }));

        let launch = Launch {
            async_mode: options.async_mode.unwrap_or(self.config.default_async),
            body: options.body,
        };
        Ok((RequestHandle::new(id, transport, rx), launch))
    }
}

/// Steps 5-6, deferred until the handle exists.
struct Launch {
    async_mode: bool,
    body: Option<String>,
}

impl Launch {
    fn run(self, handle: &mut RequestHandle, method: &str, url: &str) -> Result<(), DispatchError> {
        let method = HttpMethod::resolve(Some(method))?;
        debug!(
            "request {}: {method} {url} via `{}` (async={})",
            handle.id(),
            handle.transport_id(),
            self.async_mode
        );
        let transport = handle.transport_mut();
        transport.open(method, url, self.async_mode)?;
        transport.send(self.body)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::transport::{StateListener, Transport};

    /// What a scripted transport observed, plus a way to finish it later.
    #[derive(Default)]
    struct Probe {
        opened: Option<(HttpMethod, String, bool)>,
        sent: Option<Option<String>>,
        listener: Option<StateListener>,
        aborted: bool,
    }

    type SharedProbe = Arc<Mutex<Probe>>;

    fn finish(probe: &SharedProbe, status: u16) {
        let mut probe = probe.lock().unwrap();
        let response = HttpResponse { status, headers: Vec::new(), body: format!("body {status}") };
        let listener = probe.listener.as_mut().unwrap();
        listener(ReadyState::Loading, &response);
        listener(ReadyState::Loading, &response);
        listener(ReadyState::Done, &response);
        // A misbehaving transport reporting `Done` twice.
        listener(ReadyState::Done, &response);
    }

    /// Records calls; sync sends finish immediately with `status`.
    struct Scripted {
        probe: SharedProbe,
        status: u16,
    }

    impl Transport for Scripted {
        fn id(&self) -> &str {
            "scripted"
        }
        fn set_state_listener(&mut self, listener: StateListener) {
            self.probe.lock().unwrap().listener = Some(listener);
        }
        fn open(&mut self, method: HttpMethod, url: &str, async_mode: bool) -> Result<(), DispatchError> {
            if url.is_empty() {
                return Err(DispatchError::InvalidUrl { url: String::new(), reason: "empty".to_string() });
            }
            let mut probe = self.probe.lock().unwrap();
            probe.opened = Some((method, url.to_string(), async_mode));
            let listener = probe.listener.as_mut().unwrap();
            listener(ReadyState::Opened, &HttpResponse::default());
            Ok(())
        }
        fn send(&mut self, body: Option<String>) -> Result<(), DispatchError> {
            let async_mode = {
                let mut probe = self.probe.lock().unwrap();
                probe.sent = Some(body);
                let listener = probe.listener.as_mut().unwrap();
                listener(ReadyState::Sent, &HttpResponse::default());
                probe.opened.as_ref().unwrap().2
            };
            if !async_mode {
                finish(&self.probe, self.status);
            }
            Ok(())
        }
        fn abort(&mut self) {
            self.probe.lock().unwrap().aborted = true;
            finish(&self.probe, 0);
        }
        fn ready_state(&self) -> ReadyState {
            ReadyState::Sent
        }
        fn status(&self) -> u16 {
            self.status
        }
        fn response_text(&self) -> String {
            String::new()
        }
    }

    fn scripted(status: u16) -> (Dispatcher, SharedProbe) {
        let probe = SharedProbe::default();
        let shared = Arc::clone(&probe);
        let chain = TransportChain::new().with_strategy(crate::chain::TransportStrategy::new("scripted", move || {
            Ok(Box::new(Scripted { probe: Arc::clone(&shared), status }) as Box<dyn Transport>)
        }));
        (Dispatcher::with_chain(DispatcherConfig::default(), chain), probe)
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce(&Completion) + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_: &Completion| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn post_scenario_fires_success_once_on_201() {
        let (dispatcher, probe) = scripted(201);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = dispatcher
            .request(
                "post",
                "http://example.com/api/items",
                RequestOptions::new()
                    .body("myData")
                    .on_success(move |c| sink.lock().unwrap().push(c.status)),
            )
            .unwrap();

        {
            let p = probe.lock().unwrap();
            assert_eq!(
                p.opened,
                Some((HttpMethod::Post, "http://example.com/api/items".to_string(), true))
            );
            assert_eq!(p.sent, Some(Some("myData".to_string())));
        }
        assert!(seen.lock().unwrap().is_empty(), "async request completed early");

        finish(&probe, 201);
        assert_eq!(*seen.lock().unwrap(), vec![201]);
        assert_eq!(handle.wait().unwrap().status, 201);
    }

    #[test]
    fn get_scenario_fires_failure_once_on_404() {
        let (dispatcher, probe) = scripted(404);
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        let (successes, on_success) = counter();
        dispatcher
            .request(
                "get",
                "http://example.com/api/items",
                RequestOptions::new()
                    .on_failure(move |c| sink.lock().unwrap().push(c.status))
                    .on_success(on_success),
            )
            .unwrap();

        finish(&probe, 404);
        assert_eq!(*failures.lock().unwrap(), vec![404]);
        assert_eq!(successes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn classification_over_status_codes() {
        for status in [100, 199, 200, 201, 204, 250, 299, 300, 301, 304, 400, 404, 418, 500, 503, 599] {
            let (dispatcher, _) = scripted(status);
            let (successes, on_success) = counter();
            let (failures, on_failure) = counter();
            dispatcher
                .get(
                    "http://example.com/",
                    RequestOptions::new()
                        .async_mode(false)
                        .on_success(on_success)
                        .on_failure(on_failure),
                )
                .unwrap();
            let expect_success = (200..300).contains(&status);
            assert_eq!(successes.load(Ordering::SeqCst), usize::from(expect_success), "{status}");
            assert_eq!(failures.load(Ordering::SeqCst), usize::from(!expect_success), "{status}");
        }
    }

    #[test]
    fn intermediate_states_do_not_complete() {
        let (dispatcher, probe) = scripted(200);
        let (count, on_success) = counter();
        let mut handle = dispatcher
            .get("http://example.com/", RequestOptions::new().on_success(on_success))
            .unwrap();

        {
            let mut p = probe.lock().unwrap();
            let listener = p.listener.as_mut().unwrap();
            listener(ReadyState::Loading, &HttpResponse { status: 200, ..Default::default() });
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(handle.try_completion().is_none());

        finish(&probe, 200);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(handle.try_completion().unwrap().body, "body 200");
    }

    #[test]
    fn get_and_post_are_request_aliases() {
        let (dispatcher, probe) = scripted(200);
        dispatcher.get("http://example.com/a", None).unwrap();
        assert_eq!(probe.lock().unwrap().opened.as_ref().unwrap().0, HttpMethod::Get);
        dispatcher.post("http://example.com/a", None).unwrap();
        assert_eq!(probe.lock().unwrap().opened.as_ref().unwrap().0, HttpMethod::Post);
        dispatcher.request("", "http://example.com/a", None).unwrap();
        assert_eq!(probe.lock().unwrap().opened.as_ref().unwrap().0, HttpMethod::Get);
    }

    #[test]
    fn async_override_applies_to_one_call() {
        let (mut dispatcher, probe) = scripted(200);
        let opened_async = |p: &SharedProbe| p.lock().unwrap().opened.as_ref().unwrap().2;

        dispatcher.get("http://example.com/", RequestOptions::new().async_mode(false)).unwrap();
        assert!(!opened_async(&probe));
        dispatcher.get("http://example.com/", None).unwrap();
        assert!(opened_async(&probe));

        dispatcher.set_default_async(false);
        dispatcher.get("http://example.com/", None).unwrap();
        assert!(!opened_async(&probe));
        dispatcher.get("http://example.com/", RequestOptions::new().async_mode(true)).unwrap();
        assert!(opened_async(&probe));
    }

    #[test]
    fn dispatcher_hooks_fill_in_for_missing_callbacks() {
        let (mut dispatcher, _) = scripted(500);
        let hooked = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hooked);
        dispatcher.set_on_failure(move |c| {
            assert_eq!(c.status, 500);
            h.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.get("http://example.com/", RequestOptions::new().async_mode(false)).unwrap();
        assert_eq!(hooked.load(Ordering::SeqCst), 1);

        // A per-call callback takes precedence over the hook.
        let (own, on_failure) = counter();
        dispatcher
            .get("http://example.com/", RequestOptions::new().async_mode(false).on_failure(on_failure))
            .unwrap();
        assert_eq!(own.load(Ordering::SeqCst), 1);
        assert_eq!(hooked.load(Ordering::SeqCst), 1);

        dispatcher.clear_hooks();
        dispatcher.get("http://example.com/", RequestOptions::new().async_mode(false)).unwrap();
        assert_eq!(hooked.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn abort_goes_through_failure_branch() {
        let (dispatcher, probe) = scripted(200);
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        let mut handle = dispatcher
            .get("http://example.com/", RequestOptions::new().on_failure(move |c| sink.lock().unwrap().push(c.status)))
            .unwrap();
        handle.abort();
        assert!(probe.lock().unwrap().aborted);
        assert_eq!(*failures.lock().unwrap(), vec![0]);
    }

    #[test]
    fn strict_variant_propagates_errors() {
        let (dispatcher, _) = scripted(200);
        let err = dispatcher.request("GE T", "http://example.com/", None).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidMethod(_)));
        let err = dispatcher.get("", None).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidUrl { .. }));

        let empty = Dispatcher::with_chain(DispatcherConfig::default(), TransportChain::new());
        assert!(matches!(empty.get("http://example.com/", None), Err(DispatchError::Construction { .. })));
    }

    #[test]
    fn reporting_variant_hooks_errors() {
        let errors = Arc::new(Mutex::new(Vec::new()));

        let mut empty = Dispatcher::with_chain(DispatcherConfig::default(), TransportChain::new());
        let sink = Arc::clone(&errors);
        empty.set_on_error(move |e| sink.lock().unwrap().push(e.to_string()));
        assert!(empty.request_or_report("GET", "http://example.com/", None).is_none());

        let (mut dispatcher, _) = scripted(200);
        let sink = Arc::clone(&errors);
        dispatcher.set_on_error(move |e| sink.lock().unwrap().push(e.to_string()));
        let handle = dispatcher.request_or_report("GET", "", None);
        assert!(handle.is_some());

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("no transport could be constructed"));
        assert!(errors[1].starts_with("invalid URL"));
    }

    #[test]
    fn reporting_variant_without_hook_still_returns() {
        let empty = Dispatcher::with_chain(DispatcherConfig::default(), TransportChain::new());
        assert!(empty.request_or_report("GET", "http://example.com/", None).is_none());
    }
}
