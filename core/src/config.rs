//! Dispatcher configuration.
//!
//! # Design
//! The former process-wide defaults live in one value owned by a
//! `Dispatcher`, so tests can run with independent configurations. Loading
//! from JSON or the environment only covers plain data; callback hooks are
//! installed on the dispatcher itself.

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

pub const DEFAULT_USER_AGENT: &str = concat!("dispatch-core/", env!("CARGO_PKG_VERSION"));

/// Strategy ids tried in order when constructing a transport.
pub const DEFAULT_TRANSPORTS: [&str; 3] = ["ureq", "socket/1.1", "socket/1.0"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Async mode used when a call does not set `RequestOptions::async_mode`.
    pub default_async: bool,
    /// Ordered transport strategy ids.
    pub transports: Vec<String>,
    pub user_agent: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_async: true,
            transports: DEFAULT_TRANSPORTS.iter().map(|s| s.to_string()).collect(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl DispatcherConfig {
    /// Parse a JSON document; absent fields keep their defaults.
    pub fn from_json(raw: &str) -> Result<Self, DispatchError> {
        serde_json::from_str(raw).map_err(|e| DispatchError::Config(e.to_string()))
    }

    /// Read `DISPATCH_DEFAULT_ASYNC`, `DISPATCH_TRANSPORTS` and
    /// `DISPATCH_USER_AGENT`, falling back to defaults for unset variables.
    pub fn from_env() -> Result<Self, DispatchError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DispatchError> {
        let mut config = Self::default();
        if let Some(raw) = lookup("DISPATCH_DEFAULT_ASYNC") {
            config.default_async = parse_bool(&raw).ok_or_else(|| {
                DispatchError::Config(format!("DISPATCH_DEFAULT_ASYNC: expected a boolean, got `{raw}`"))
            })?;
        }
        if let Some(raw) = lookup("DISPATCH_TRANSPORTS") {
            let ids: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if ids.is_empty() {
                return Err(DispatchError::Config("DISPATCH_TRANSPORTS is empty".to_string()));
            }
            config.transports = ids;
        }
        if let Some(ua) = lookup("DISPATCH_USER_AGENT") {
            config.user_agent = ua;
        }
        Ok(config)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_async_with_full_chain() {
        let config = DispatcherConfig::default();
        assert!(config.default_async);
        assert_eq!(config.transports, vec!["ureq", "socket/1.1", "socket/1.0"]);
        assert!(config.user_agent.starts_with("dispatch-core/"));
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = DispatcherConfig::from_json(r#"{"default_async":false}"#).unwrap();
        assert!(!config.default_async);
        assert_eq!(config.transports.len(), 3);
    }

    #[test]
    fn json_rejects_wrong_types() {
        let err = DispatcherConfig::from_json(r#"{"default_async":"sometimes"}"#).unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }

    #[test]
    fn env_overrides() {
        let config = DispatcherConfig::from_lookup(lookup(&[
            ("DISPATCH_DEFAULT_ASYNC", "off"),
            ("DISPATCH_TRANSPORTS", "socket/1.0, ureq"),
            ("DISPATCH_USER_AGENT", "tests/1"),
        ]))
        .unwrap();
        assert!(!config.default_async);
        assert_eq!(config.transports, vec!["socket/1.0", "ureq"]);
        assert_eq!(config.user_agent, "tests/1");
    }

    #[test]
    fn env_rejects_bad_values() {
        let err = DispatcherConfig::from_lookup(lookup(&[("DISPATCH_DEFAULT_ASYNC", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("maybe"));
        let err = DispatcherConfig::from_lookup(lookup(&[("DISPATCH_TRANSPORTS", " , ")])).unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }

    #[test]
    fn env_without_variables_is_default() {
        let config = DispatcherConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, DispatcherConfig::default());
    }
}
