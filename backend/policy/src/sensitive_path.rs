//! Sensitive-path blocklist shared by the file-read and file-expose capabilities.
//!
//! Paths are canonicalized before matching so `..` segments and symlinks cannot be used to
//! reach a blocked location under a harmless-looking name.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use tollgate_core::GatewayError;
use tracing::warn;

use crate::pattern::wildcard_matches;

/// Wildcard patterns matched against the canonical path (forward slashes, case-insensitive).
static SENSITIVE_PATTERNS: Lazy<Vec<String>> = Lazy::new(|| {
    [
        "*/.ssh",
        "*/.ssh/*",
        "*/.gnupg",
        "*/.gnupg/*",
        "*/.aws/*",
        "*/.azure/*",
        "*/.kube/*",
        "*/.docker/config.json",
        "*/.config/gcloud/*",
        "*/.netrc",
        "*/.npmrc",
        "*/.pypirc",
        "*/.git-credentials",
        "*/.env",
        "*/.env.*",
        "*/.tollgate",
        "*/.tollgate/*",
        "*/id_rsa*",
        "*/id_ed25519*",
        "*/id_ecdsa*",
        "*.pem",
        "*.key",
        "*.p12",
        "*.pfx",
        "*.keychain*",
        "/etc/shadow",
        "/etc/gshadow",
        "/etc/sudoers",
        "/etc/sudoers.d/*",
        "/etc/master.passwd",
        "/proc/*",
        "/sys/*",
        "/dev/*",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
});

/// Whether an already-canonical path falls under the sensitive-path blocklist.
pub fn is_sensitive_path(path: &Path) -> bool {
    let normalized = path.to_string_lossy().replace('\\', "/");
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| wildcard_matches(pattern, &normalized))
}

/// Expand `~`, canonicalize, and reject sensitive locations.
///
/// Returns the canonical path. A path that does not exist is `ResourceNotFound`; a
/// sensitive one is `PolicyBlocked` with reason "sensitive path".
pub async fn check_path(raw: &str) -> Result<PathBuf, GatewayError> {
    let expanded = expand_home(raw.trim());
    if expanded.as_os_str().is_empty() {
        return Err(GatewayError::ValidationFailed("path is empty".to_string()));
    }

    let canonical = tokio::fs::canonicalize(&expanded).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            GatewayError::ResourceNotFound(format!("file '{}' does not exist", expanded.display()))
        } else {
            GatewayError::ValidationFailed(format!(
                "cannot resolve path '{}': {e}",
                expanded.display()
            ))
        }
    })?;

    if is_sensitive_path(&canonical) {
        warn!(path = %canonical.display(), "Rejected access to sensitive path");
        return Err(GatewayError::PolicyBlocked {
            kind: "path".to_string(),
            identifier: canonical.display().to_string(),
            reason: "sensitive path".to_string(),
        });
    }

    Ok(canonical)
}

fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}
