//! Error types for the request dispatcher.
//!
//! # Design
//! Only environment-level failures are errors: a transport that cannot be
//! constructed, or a request the transport refuses to open or send. A non-2xx
//! status is a normal outcome and reaches the caller through the failure
//! callback, never through `DispatchError`.

use thiserror::Error;

/// One failed construction attempt recorded by the transport chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructionAttempt {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Every strategy in the transport chain failed to construct.
    #[error("no transport could be constructed ({})", format_attempts(.attempts))]
    Construction { attempts: Vec<ConstructionAttempt> },

    /// A single strategy is not available on this host or build.
    #[error("transport `{id}` unavailable: {reason}")]
    Unavailable { id: String, reason: String },

    #[error("no transport registered under `{0}`")]
    UnknownTransport(String),

    #[error("invalid HTTP method `{0}`")]
    InvalidMethod(String),

    #[error("HTTP method `{0}` is forbidden")]
    ForbiddenMethod(String),

    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported URL scheme `{scheme}` for transport `{transport}`")]
    UnsupportedScheme { scheme: String, transport: String },

    /// `open`/`send` called out of order, e.g. `send` before `open`.
    #[error("invalid transport state: {0}")]
    InvalidState(&'static str),

    #[error("network error: {0}")]
    Network(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DispatchError {
    /// The last recorded failure of a `Construction` error.
    pub fn last_attempt(&self) -> Option<&ConstructionAttempt> {
        match self {
            DispatchError::Construction { attempts } => attempts.last(),
            _ => None,
        }
    }
}

fn format_attempts(attempts: &[ConstructionAttempt]) -> String {
    if attempts.is_empty() {
        return "no strategies configured".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.id, a.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_error_lists_every_attempt() {
        let err = DispatchError::Construction {
            attempts: vec![
                ConstructionAttempt { id: "ureq".to_string(), reason: "disabled".to_string() },
                ConstructionAttempt { id: "socket/1.0".to_string(), reason: "boom".to_string() },
            ],
        };
        assert_eq!(
            err.to_string(),
            "no transport could be constructed (ureq: disabled; socket/1.0: boom)"
        );
        assert_eq!(err.last_attempt().unwrap().id, "socket/1.0");
    }

    #[test]
    fn empty_chain_message() {
        let err = DispatchError::Construction { attempts: Vec::new() };
        assert!(err.to_string().contains("no strategies configured"));
        assert!(err.last_attempt().is_none());
    }
}
