//! Structured logging for tollgate.
//!
//! Handles subscriber setup (console + rolling NDJSON file), secret redaction, and the audit
//! trail of gateway decisions.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{AuditEvent, AuditLogEntry, AuditLogger};
pub use logger::init_logger;
pub use redact::redact_sensitive_data;
