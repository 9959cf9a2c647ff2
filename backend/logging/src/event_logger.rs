//! Gateway Audit Logger
//!
//! One structured event per gateway decision, emitted on the `tollgate_audit` target so it
//! can be filtered into its own sink.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tollgate_core::{ApprovalStatus, TargetKind};
use tracing::{info, warn};

use crate::redact::redact_sensitive_data;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    Decision {
        capability: String,
        kind: TargetKind,
        identifier: String,
        status: ApprovalStatus,
        /// The raw target (URL or command line) as the caller sent it.
        target: String,
    },
    ApprovalPersisted {
        kind: TargetKind,
        identifier: String,
    },
    AllowlistRemoved {
        kind: TargetKind,
        identifier: String,
    },
    RateLimited {
        identifier: String,
        retry_after_ms: u64,
    },
    FileExposed {
        id: String,
        filename: String,
        size_bytes: u64,
        expires_at: DateTime<Utc>,
    },
    FileRemoved {
        id: String,
        reason: String,
    },
    TunnelRestarted {
        attempt: u32,
        max_restarts: u32,
    },
    TunnelStopped {
        reason: String,
    },
}

#[derive(Debug, Serialize)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
}

pub struct AuditLogger;

impl AuditLogger {
    /// Record an audit event. Free-form target strings are redacted first.
    pub fn record(mut event: AuditEvent) {
        if let AuditEvent::Decision { target, .. } = &mut event {
            *target = redact_sensitive_data(target);
        }

        let denied = matches!(
            event,
            AuditEvent::Decision {
                status: ApprovalStatus::Blocked,
                ..
            } | AuditEvent::RateLimited { .. }
        );

        let entry = AuditLogEntry {
            timestamp: Utc::now(),
            event,
        };
        let payload = serde_json::to_string(&entry).unwrap_or_else(|_| format!("{entry:?}"));

        if denied {
            warn!(target: "tollgate_audit", audit = %payload, "Gateway denied request");
        } else {
            info!(target: "tollgate_audit", audit = %payload, "Gateway audit event");
        }
    }
}
