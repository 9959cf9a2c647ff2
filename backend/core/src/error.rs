use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::TargetKind;

/// Sub-kind of an [`GatewayError::ExternalProcessFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessFailure {
    /// Required binary is not installed. Never retryable.
    MissingDependency,
    /// The OS refused to spawn the process.
    Spawn,
    /// The caller-supplied timeout elapsed; the child was terminated.
    Timeout,
    /// A supervised process exited when it was expected to keep running.
    Exited,
    /// A supervised process never reported readiness in time.
    StartupTimeout,
}

/// Top-level error type for the tollgate gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{kind} '{identifier}' is blocked: {reason}")]
    PolicyBlocked {
        /// "domain", "command" or "path".
        kind: String,
        identifier: String,
        reason: String,
    },

    #[error("cannot allow {kind} '{identifier}': it matches blocklist pattern '{pattern}'")]
    ApprovalDenied {
        kind: TargetKind,
        identifier: String,
        pattern: String,
    },

    #[error("rate limit exceeded for '{identifier}', retry after {retry_after_ms}ms")]
    RateLimited {
        identifier: String,
        retry_after_ms: u64,
    },

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("not found: {0}")]
    ResourceNotFound(String),

    #[error("{what} is {actual} bytes, limit is {limit} bytes")]
    ResourceTooLarge {
        what: String,
        actual: u64,
        limit: u64,
    },

    #[error("{message}")]
    ExternalProcessFailure {
        failure: ProcessFailure,
        message: String,
        output: Option<String>,
    },

    #[error("upstream request failed: {0}")]
    UpstreamFailure(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn process(failure: ProcessFailure, message: impl Into<String>) -> Self {
        GatewayError::ExternalProcessFailure {
            failure,
            message: message.into(),
            output: None,
        }
    }

    pub fn process_with_output(
        failure: ProcessFailure,
        message: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        GatewayError::ExternalProcessFailure {
            failure,
            message: message.into(),
            output: Some(output.into()),
        }
    }

    /// Stable snake_case discriminant for the outer transport.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::PolicyBlocked { .. } => "policy_blocked",
            GatewayError::ApprovalDenied { .. } => "approval_denied",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::ValidationFailed(_) => "validation_failed",
            GatewayError::ResourceNotFound(_) => "resource_not_found",
            GatewayError::ResourceTooLarge { .. } => "resource_too_large",
            GatewayError::ExternalProcessFailure { .. } => "external_process_failure",
            GatewayError::UpstreamFailure(_) => "upstream_failure",
            GatewayError::PersistenceFailure(_) => "persistence_failure",
            GatewayError::Other(_) => "internal",
        }
    }

    /// Whether the caller may retry the same request later and expect a different result.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::RateLimited { .. } | GatewayError::UpstreamFailure(_) => true,
            GatewayError::ExternalProcessFailure { failure, .. } => !matches!(
                failure,
                ProcessFailure::MissingDependency | ProcessFailure::Spawn
            ),
            _ => false,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let output = match self {
            GatewayError::ExternalProcessFailure { output, .. } => output.clone(),
            _ => None,
        };
        ErrorPayload {
            kind: self.kind().to_string(),
            message: self.to_string(),
            retryable: self.is_retryable(),
            retry_after_ms: self.retry_after_ms(),
            output,
        }
    }
}

/// Serializable error shape handed to the request dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub kind: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_message_names_identifier() {
        let err = GatewayError::PolicyBlocked {
            kind: TargetKind::Domain.to_string(),
            identifier: "169.254.169.254".to_string(),
            reason: "security blocklist".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("169.254.169.254"));
        assert!(msg.contains("security blocklist"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn rate_limited_payload_carries_retry_after() {
        let err = GatewayError::RateLimited {
            identifier: "example.com".to_string(),
            retry_after_ms: 420,
        };
        let payload = err.to_payload();
        assert_eq!(payload.kind, "rate_limited");
        assert_eq!(payload.retry_after_ms, Some(420));
        assert!(payload.retryable);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["retryAfterMs"], 420);
    }

    #[test]
    fn missing_dependency_is_not_retryable() {
        let err = GatewayError::process(ProcessFailure::MissingDependency, "cloudflared not found");
        assert_eq!(err.kind(), "external_process_failure");
        assert!(!err.is_retryable());
        assert!(GatewayError::process(ProcessFailure::Timeout, "slow").is_retryable());
    }
}
