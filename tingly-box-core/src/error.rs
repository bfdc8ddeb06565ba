//! Error taxonomy for the request dispatch core.
//!
//! Each component returns its own typed error; the orchestrator composes
//! them into [`DispatchError`], the single type that crosses the boundary
//! into a caller-visible response. Nothing below the orchestrator maps to
//! an HTTP status or wire-shape error body.

use thiserror::Error;

/// Errors raised by the service/stats layer (4.A).
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("provider {0} does not resolve")]
    UnknownProvider(String),
}

/// Errors raised by the health monitor (4.B).
#[derive(Error, Debug)]
pub enum HealthError {
    #[error("no health record for service {0}")]
    UnknownService(String),
}

/// Errors raised by the rule resolver (4.C) and smart-routing evaluator (4.D).
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("no active rule for scenario={scenario} request_model={request_model}")]
    NoRule {
        scenario: String,
        request_model: String,
    },

    #[error("smart-routing op invalid at load time: position={position} operation={operation}")]
    InvalidSmartOp { position: String, operation: String },

    #[error("smart-routing op value does not parse as {expected}: {value}")]
    BadSmartOpValue { expected: &'static str, value: String },

    #[error("more than one active rule for scenario={scenario} request_model={request_model}")]
    AmbiguousRule {
        scenario: String,
        request_model: String,
    },
}

/// Errors raised by the load balancer (4.E).
#[derive(Error, Debug)]
pub enum BalancerError {
    #[error("no healthy service available among {candidates} candidates")]
    NoHealthyService { candidates: usize },
}

/// Errors raised by the protocol adapter (4.F).
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("unsupported shape translation: {from} -> {to}")]
    UnsupportedTranslation { from: String, to: String },

    #[error("malformed request body: {message}")]
    MalformedRequest { message: String },

    #[error("malformed upstream response: {message}")]
    MalformedResponse { message: String },
}

/// Errors raised by the upstream transport (4.G), pre-classification.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("oauth token refresh failed: {message}")]
    RefreshFailed { message: String },
}

/// The taxonomy in §7: the only errors the orchestrator surfaces to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthFailed,
    NoRule,
    NoHealthyService,
    BadUpstream,
    RateLimited,
    Transient,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Whether the orchestrator (4.H) may retry against a different service.
    pub fn retry_eligible(self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::Transient)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::AuthFailed => "auth_failed",
            ErrorKind::NoRule => "no_rule",
            ErrorKind::NoHealthyService => "no_healthy_service",
            ErrorKind::BadUpstream => "bad_upstream",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Transient => "transient",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Top-level dispatch error: what the orchestrator (4.H) returns.
///
/// Carries both the classified [`ErrorKind`] (used for HTTP-status / retry
/// decisions) and a human-readable message for the caller's error body.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct DispatchError {
    pub kind: ErrorKind,
    pub message: String,
}

impl DispatchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn no_rule(scenario: &str, request_model: &str) -> Self {
        Self::new(
            ErrorKind::NoRule,
            format!("no active rule for scenario={scenario} request_model={request_model}"),
        )
    }

    pub fn no_healthy_service() -> Self {
        Self::new(
            ErrorKind::NoHealthyService,
            "rule matched but every candidate service is unhealthy or disabled",
        )
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthFailed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<RuleError> for DispatchError {
    fn from(e: RuleError) -> Self {
        match &e {
            RuleError::NoRule {
                scenario,
                request_model,
            } => DispatchError::no_rule(scenario, request_model),
            RuleError::AmbiguousRule { .. } => {
                DispatchError::new(ErrorKind::Internal, e.to_string())
            }
            RuleError::InvalidSmartOp { .. } | RuleError::BadSmartOpValue { .. } => {
                DispatchError::new(ErrorKind::Internal, e.to_string())
            }
        }
    }
}

impl From<BalancerError> for DispatchError {
    fn from(_: BalancerError) -> Self {
        DispatchError::no_healthy_service()
    }
}

impl From<AdapterError> for DispatchError {
    fn from(e: AdapterError) -> Self {
        DispatchError::new(ErrorKind::Internal, e.to_string())
    }
}

/// Classify an upstream HTTP status / transport fault per §4.F "Error mapping".
pub fn classify_upstream_status(status: u16) -> ErrorKind {
    match status {
        400 | 422 => ErrorKind::BadUpstream,
        401 | 403 => ErrorKind::AuthFailed,
        429 => ErrorKind::RateLimited,
        500..=599 => ErrorKind::Transient,
        _ => ErrorKind::Internal,
    }
}

impl From<TransportError> for DispatchError {
    fn from(e: TransportError) -> Self {
        match &e {
            TransportError::Http(_) => DispatchError::new(ErrorKind::Transient, e.to_string()),
            TransportError::UpstreamStatus { status, .. } => {
                DispatchError::new(classify_upstream_status(*status), e.to_string())
            }
            TransportError::RefreshFailed { .. } => {
                DispatchError::new(ErrorKind::AuthFailed, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_eligibility_matches_taxonomy() {
        assert!(ErrorKind::RateLimited.retry_eligible());
        assert!(ErrorKind::Transient.retry_eligible());
        assert!(!ErrorKind::AuthFailed.retry_eligible());
        assert!(!ErrorKind::BadUpstream.retry_eligible());
    }

    #[test]
    fn classifies_upstream_statuses() {
        assert_eq!(classify_upstream_status(400), ErrorKind::BadUpstream);
        assert_eq!(classify_upstream_status(422), ErrorKind::BadUpstream);
        assert_eq!(classify_upstream_status(401), ErrorKind::AuthFailed);
        assert_eq!(classify_upstream_status(403), ErrorKind::AuthFailed);
        assert_eq!(classify_upstream_status(429), ErrorKind::RateLimited);
        assert_eq!(classify_upstream_status(500), ErrorKind::Transient);
        assert_eq!(classify_upstream_status(503), ErrorKind::Transient);
        assert_eq!(classify_upstream_status(418), ErrorKind::Internal);
    }
}
