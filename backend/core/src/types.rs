use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Which policy lists a target is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Domain,
    Command,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Domain => write!(f, "domain"),
            TargetKind::Command => write!(f, "command"),
        }
    }
}

/// Result of evaluating a target against the policy. Computed per request, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Blocked,
    Allowed,
    NeedsApproval,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalStatus::Blocked => write!(f, "BLOCKED"),
            ApprovalStatus::Allowed => write!(f, "ALLOWED"),
            ApprovalStatus::NeedsApproval => write!(f, "NEEDS_APPROVAL"),
        }
    }
}

/// Caller-supplied approval for a target that is not yet allowlisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalToken {
    /// Proceed for this single invocation only.
    Once,
    /// Persist the identifier to the allowlist, then proceed.
    Always,
}

impl FromStr for ApprovalToken {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" => Ok(ApprovalToken::Once),
            "always" => Ok(ApprovalToken::Always),
            other => Err(GatewayError::ValidationFailed(format!(
                "unknown approval token '{other}', expected 'once' or 'always'"
            ))),
        }
    }
}

/// Non-error outcome of a gated operation.
///
/// `NeedsApproval` is a workflow state, not a failure: the capability was not invoked and the
/// caller is expected to retry with an approval token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatedOutcome<T> {
    #[serde(rename_all = "camelCase")]
    NeedsApproval {
        normalized_identifier: String,
        message: String,
    },
    Success { result: T },
}

impl<T> GatedOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, GatedOutcome::Success { .. })
    }

    pub fn success(self) -> Option<T> {
        match self {
            GatedOutcome::Success { result } => Some(result),
            GatedOutcome::NeedsApproval { .. } => None,
        }
    }
}
