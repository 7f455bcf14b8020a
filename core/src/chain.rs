//! Ordered fallback chain of transport constructors.
//!
//! # Design
//! Each strategy is a named, fallible factory. `create_transport` tries them
//! in order and stops at the first that constructs; it falls through only on
//! construction failure, never on network failure (nothing is sent here).
//! Which transports exist is decided by trying to build them, not by
//! inspecting the host.
//!
//! A `TransportRegistry` resolves string ids to factories. Ids nobody
//! registered still produce a strategy; it just always fails.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::error::{ConstructionAttempt, DispatchError};
use crate::transport::{HttpVersion, NativeTransport, SocketConnector, Transport};

pub type TransportFactory = Arc<dyn Fn() -> Result<Box<dyn Transport>, DispatchError> + Send + Sync>;

#[derive(Clone)]
pub struct TransportStrategy {
    id: String,
    factory: TransportFactory,
}

impl TransportStrategy {
    pub fn new<F>(id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Transport>, DispatchError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            factory: Arc::new(factory),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn construct(&self) -> Result<Box<dyn Transport>, DispatchError> {
        (self.factory)()
    }
}

impl fmt::Debug for TransportStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TransportStrategy").field(&self.id).finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransportChain {
    strategies: Vec<TransportStrategy>,
}

impl TransportChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: TransportStrategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Resolve `ids` in order against `registry`.
    pub fn from_ids<S: AsRef<str>>(ids: &[S], registry: &TransportRegistry) -> Self {
        Self {
            strategies: ids.iter().map(|id| registry.strategy(id.as_ref())).collect(),
        }
    }

    pub fn ids(&self) -> Vec<&str> {
        self.strategies.iter().map(TransportStrategy::id).collect()
    }

    /// Construct a transport with the first strategy that succeeds.
    pub fn create_transport(&self) -> Result<Box<dyn Transport>, DispatchError> {
        let mut attempts = Vec::new();
        for strategy in &self.strategies {
            match strategy.construct() {
                Ok(transport) => {
                    debug!("constructed transport `{}`", strategy.id);
                    return Ok(transport);
                }
                Err(e) => {
                    debug!("transport `{}` failed to construct: {e}", strategy.id);
                    attempts.push(ConstructionAttempt {
                        id: strategy.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Err(DispatchError::Construction { attempts })
    }
}

/// Named transport factories.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    factories: HashMap<String, TransportFactory>,
}

impl TransportRegistry {
    /// An empty registry; every id fails to construct.
    pub fn new() -> Self {
        Self::default()
    }

    /// `ureq` (unavailable when built without the `ureq` feature),
    /// `socket/1.1` and `socket/1.0`.
    pub fn builtin(user_agent: &str) -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "ureq")]
        {
            let ua = user_agent.to_string();
            registry.register("ureq", move || {
                let connector = crate::transport::UreqConnector::new();
                Ok(Box::new(NativeTransport::new("ureq", ua.clone(), connector)) as Box<dyn Transport>)
            });
        }
        #[cfg(not(feature = "ureq"))]
        registry.register("ureq", || {
            Err(DispatchError::Unavailable {
                id: "ureq".to_string(),
                reason: "built without the `ureq` feature".to_string(),
            })
        });

        for (id, version) in [("socket/1.1", HttpVersion::Http11), ("socket/1.0", HttpVersion::Http10)] {
            let ua = user_agent.to_string();
            registry.register(id, move || {
                Ok(Box::new(NativeTransport::new(id, ua.clone(), SocketConnector::new(version))) as Box<dyn Transport>)
            });
        }
        registry
    }

    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Box<dyn Transport>, DispatchError> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    pub fn strategy(&self, id: &str) -> TransportStrategy {
        match self.factories.get(id) {
            Some(factory) => TransportStrategy {
                id: id.to_string(),
                factory: Arc::clone(factory),
            },
            None => {
                let missing = id.to_string();
                TransportStrategy::new(id, move || Err(DispatchError::UnknownTransport(missing.clone())))
            }
        }
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.factories.keys().collect();
        ids.sort();
        f.debug_struct("TransportRegistry").field("ids", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::http::{HttpMethod, ReadyState};
    use crate::transport::StateListener;

    struct Inert(&'static str);

    impl Transport for Inert {
        fn id(&self) -> &str {
            self.0
        }
        fn set_state_listener(&mut self, _: StateListener) {}
        fn open(&mut self, _: HttpMethod, _: &str, _: bool) -> Result<(), DispatchError> {
            Ok(())
        }
        fn send(&mut self, _: Option<String>) -> Result<(), DispatchError> {
            Ok(())
        }
        fn abort(&mut self) {}
        fn ready_state(&self) -> ReadyState {
            ReadyState::Created
        }
        fn status(&self) -> u16 {
            0
        }
        fn response_text(&self) -> String {
            String::new()
        }
    }

    fn failing(id: &'static str, calls: &Arc<AtomicUsize>) -> TransportStrategy {
        let calls = Arc::clone(calls);
        TransportStrategy::new(id, move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DispatchError::Unavailable { id: id.to_string(), reason: "not on this host".to_string() })
        })
    }

    fn working(id: &'static str, calls: &Arc<AtomicUsize>) -> TransportStrategy {
        let calls = Arc::clone(calls);
        TransportStrategy::new(id, move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Inert(id)) as Box<dyn Transport>)
        })
    }

    #[test]
    fn first_working_strategy_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = TransportChain::new()
            .with_strategy(working("standard", &calls))
            .with_strategy(working("legacy", &calls));
        assert_eq!(chain.create_transport().unwrap().id(), "standard");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn falls_through_each_failure_in_order() {
        for working_at in 0..4 {
            let calls = Arc::new(AtomicUsize::new(0));
            let ids = ["standard", "legacy", "legacy.v6", "legacy.v3"];
            let mut chain = TransportChain::new();
            for (i, id) in ids.iter().enumerate() {
                chain = chain.with_strategy(if i == working_at {
                    working(*id, &calls)
                } else {
                    failing(*id, &calls)
                });
            }
            let transport = chain.create_transport().unwrap();
            assert_eq!(transport.id(), ids[working_at]);
            assert_eq!(calls.load(Ordering::SeqCst), working_at + 1);
        }
    }

    #[test]
    fn all_four_failing_is_a_construction_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = TransportChain::new()
            .with_strategy(failing("standard", &calls))
            .with_strategy(failing("legacy", &calls))
            .with_strategy(failing("legacy.v6", &calls))
            .with_strategy(failing("legacy.v3", &calls));
        let err = chain.create_transport().err().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match &err {
            DispatchError::Construction { attempts } => {
                let ids: Vec<_> = attempts.iter().map(|a| a.id.as_str()).collect();
                assert_eq!(ids, ["standard", "legacy", "legacy.v6", "legacy.v3"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.last_attempt().unwrap().id, "legacy.v3");
    }

    #[test]
    fn empty_chain_fails() {
        let err = TransportChain::new().create_transport().err().unwrap();
        assert!(matches!(err, DispatchError::Construction { attempts } if attempts.is_empty()));
    }

    #[test]
    fn unknown_ids_fall_through() {
        let registry = TransportRegistry::builtin("ua/1");
        let chain = TransportChain::from_ids(&["msxml", "socket/1.0"], &registry);
        assert_eq!(chain.ids(), ["msxml", "socket/1.0"]);
        assert_eq!(chain.create_transport().unwrap().id(), "socket/1.0");

        let err = TransportChain::from_ids(&["msxml"], &TransportRegistry::new())
            .create_transport()
            .err()
            .unwrap();
        assert!(err.to_string().contains("no transport registered under `msxml`"));
    }

    #[test]
    fn builtin_registry_ids() {
        let registry = TransportRegistry::builtin("ua/1");
        assert!(registry.contains("ureq"));
        assert!(registry.contains("socket/1.1"));
        assert!(registry.contains("socket/1.0"));
        assert_eq!(
            format!("{registry:?}"),
            r#"TransportRegistry { ids: ["socket/1.0", "socket/1.1", "ureq"] }"#
        );
    }

    #[cfg(feature = "ureq")]
    #[test]
    fn default_chain_prefers_ureq() {
        let registry = TransportRegistry::builtin("ua/1");
        let chain = TransportChain::from_ids(&crate::config::DEFAULT_TRANSPORTS, &registry);
        assert_eq!(chain.create_transport().unwrap().id(), "ureq");
    }

    #[cfg(not(feature = "ureq"))]
    #[test]
    fn default_chain_skips_missing_ureq() {
        let registry = TransportRegistry::builtin("ua/1");
        let chain = TransportChain::from_ids(&crate::config::DEFAULT_TRANSPORTS, &registry);
        assert_eq!(chain.create_transport().unwrap().id(), "socket/1.1");
    }
}
