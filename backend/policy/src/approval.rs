//! Approval workflow: turns a classification plus an optional caller token into a go/no-go.

use tollgate_core::{ApprovalStatus, ApprovalToken, GatewayError, TargetKind};
use tollgate_logging::{AuditEvent, AuditLogger};
use tracing::info;

use crate::evaluator::classify;
use crate::store::PolicyStore;

/// Outcome of the policy gate for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clearance {
    /// The capability may run. `persisted` is true when an "always" approval was just saved.
    Proceed { identifier: String, persisted: bool },
    /// Halt without invoking the capability; the caller must retry with a token.
    NeedsApproval { identifier: String, message: String },
}

/// Run the policy gate for `raw` on behalf of `capability` (used for audit only).
///
/// BLOCKED targets fail with `PolicyBlocked`. An "always" token re-checks the blocklist at
/// write time, so a blocklist entry added after classification still wins (`ApprovalDenied`).
pub async fn resolve_approval(
    store: &PolicyStore,
    capability: &str,
    kind: TargetKind,
    raw: &str,
    token: Option<ApprovalToken>,
) -> Result<Clearance, GatewayError> {
    let classification = classify(store, kind, raw).await;
    AuditLogger::record(AuditEvent::Decision {
        capability: capability.to_string(),
        kind,
        identifier: classification.identifier.clone(),
        status: classification.status,
        target: raw.to_string(),
    });

    let identifier = classification.identifier;
    match classification.status {
        ApprovalStatus::Blocked => Err(GatewayError::PolicyBlocked {
            kind: kind.to_string(),
            identifier,
            reason: "security blocklist".to_string(),
        }),
        ApprovalStatus::Allowed => Ok(Clearance::Proceed {
            identifier,
            persisted: false,
        }),
        ApprovalStatus::NeedsApproval => match token {
            None => {
                let message = approval_message(kind, &identifier);
                Ok(Clearance::NeedsApproval {
                    identifier,
                    message,
                })
            }
            Some(ApprovalToken::Once) => {
                info!(kind = %kind, identifier = %identifier, "One-time approval");
                Ok(Clearance::Proceed {
                    identifier,
                    persisted: false,
                })
            }
            Some(ApprovalToken::Always) => persist_approval(store, kind, &identifier).await,
        },
    }
}

/// Save an "always" approval. A concurrent caller may have saved the same entry first, in
/// which case nothing is written and no persistence is recorded.
async fn persist_approval(
    store: &PolicyStore,
    kind: TargetKind,
    identifier: &str,
) -> Result<Clearance, GatewayError> {
    let (entry, changed) = store.allow_add(kind, identifier).await?;
    if changed {
        AuditLogger::record(AuditEvent::ApprovalPersisted {
            kind,
            identifier: entry.clone(),
        });
    }
    Ok(Clearance::Proceed {
        identifier: entry,
        persisted: changed,
    })
}

fn approval_message(kind: TargetKind, identifier: &str) -> String {
    format!(
        "The {kind} '{identifier}' is not on the allowlist. Ask the user, then retry with \
         approval \"once\" to allow only this request, or \"always\" to add '{identifier}' \
         to the allowlist."
    )
}
