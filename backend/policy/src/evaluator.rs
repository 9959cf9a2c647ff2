//! Policy evaluation: BLOCKED / ALLOWED / NEEDS_APPROVAL for a raw target.

use serde::Serialize;
use tollgate_config::PolicyConfig;
use tollgate_core::{ApprovalStatus, TargetKind};
use tracing::debug;

use crate::normalize::normalize;
use crate::pattern::first_match;
use crate::store::{allowlist, blocklist, PolicyStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub kind: TargetKind,
    pub identifier: String,
    pub status: ApprovalStatus,
    /// The list pattern that decided the outcome (none for NEEDS_APPROVAL).
    pub matched_pattern: Option<String>,
}

/// Classify `raw` against a fixed set of lists.
///
/// The blocklist is checked first, so an identifier matching both lists is BLOCKED.
pub fn classify_with(config: &PolicyConfig, kind: TargetKind, raw: &str) -> Classification {
    let identifier = normalize(kind, raw);

    let (status, matched_pattern) =
        if let Some(p) = first_match(blocklist(config, kind), &identifier) {
            (ApprovalStatus::Blocked, Some(p.to_string()))
        } else if let Some(p) = first_match(allowlist(config, kind), &identifier) {
            (ApprovalStatus::Allowed, Some(p.to_string()))
        } else {
            (ApprovalStatus::NeedsApproval, None)
        };

    debug!(kind = %kind, identifier = %identifier, status = %status, "Classified target");
    Classification {
        kind,
        identifier,
        status,
        matched_pattern,
    }
}

/// Classify `raw` against the store's current lists.
pub async fn classify(store: &PolicyStore, kind: TargetKind, raw: &str) -> Classification {
    store.read(|config| classify_with(config, kind, raw)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_config::baseline_policy;

    fn policy_with_allow_all() -> PolicyConfig {
        let mut cfg = baseline_policy();
        cfg.allowed_domains.insert("*".to_string());
        cfg.allowed_commands.insert("*".to_string());
        cfg
    }

    #[test]
    fn baseline_blocks_win_over_any_allowlist() {
        let cfg = policy_with_allow_all();
        for host in ["127.0.0.1", "10.5.3.2", "localhost", "http://169.254.169.254/latest"] {
            let c = classify_with(&cfg, TargetKind::Domain, host);
            assert_eq!(c.status, ApprovalStatus::Blocked, "{host}");
        }
        for cmd in ["rm -rf /", "sudo ls", "/bin/bash"] {
            let c = classify_with(&cfg, TargetKind::Command, cmd);
            assert_eq!(c.status, ApprovalStatus::Blocked, "{cmd}");
        }
    }

    #[test]
    fn unknown_target_needs_approval() {
        let c = classify_with(&baseline_policy(), TargetKind::Domain, "https://example.com/a");
        assert_eq!(c.status, ApprovalStatus::NeedsApproval);
        assert_eq!(c.identifier, "example.com");
        assert!(c.matched_pattern.is_none());
    }

    #[test]
    fn allowlisted_wildcard_is_allowed() {
        let mut cfg = baseline_policy();
        cfg.allowed_domains.insert("*.github.com".to_string());
        let c = classify_with(&cfg, TargetKind::Domain, "https://api.github.com/repos");
        assert_eq!(c.status, ApprovalStatus::Allowed);
        assert_eq!(c.matched_pattern.as_deref(), Some("*.github.com"));
    }

    #[test]
    fn ipv6_literals_for_local_hosts_are_blocked() {
        let cfg = policy_with_allow_all();
        for url in [
            "http://[::1]:8080/",
            "http://[::]/",
            "http://[::ffff:127.0.0.1]/",
            "http://[::ffff:169.254.169.254]/latest",
            "http://[fd00::1]/",
        ] {
            let c = classify_with(&cfg, TargetKind::Domain, url);
            assert_eq!(c.status, ApprovalStatus::Blocked, "{url}");
        }
        assert_eq!(
            classify_with(&cfg, TargetKind::Domain, "http://[2606:4700::1111]/").status,
            ApprovalStatus::Allowed
        );
    }

    #[test]
    fn private_range_boundary() {
        let cfg = baseline_policy();
        assert_eq!(
            classify_with(&cfg, TargetKind::Domain, "172.16.0.5").status,
            ApprovalStatus::Blocked
        );
        assert_eq!(
            classify_with(&cfg, TargetKind::Domain, "172.160.0.5").status,
            ApprovalStatus::NeedsApproval
        );
    }
}
