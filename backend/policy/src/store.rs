//! Policy store: in-memory allow/block lists backed by `policy.json`.
//!
//! Mutations follow load → mutate a copy → atomic write → swap, all under one mutex, so
//! concurrent approvals never lose each other's updates and a failed write leaves the
//! in-memory lists untouched.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tollgate_config::{load_policy, write_policy, PolicyConfig, PolicyOrigin};
use tollgate_core::{GatewayError, TargetKind};
use tracing::{debug, info};

use crate::normalize::normalize;
use crate::pattern::first_match;

pub struct PolicyStore {
    path: PathBuf,
    config: Mutex<PolicyConfig>,
}

impl PolicyStore {
    /// Load (or create) the policy file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let loaded = load_policy(&path).await;
        if loaded.origin == PolicyOrigin::Fallback {
            debug!(path = %path.display(), "Policy store running on in-memory defaults");
        }
        Self {
            path,
            config: Mutex::new(loaded.config),
        }
    }

    /// Wrap an already-loaded config. Mutations are still persisted to `path`.
    pub fn with_config(path: impl AsRef<Path>, config: PolicyConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config: Mutex::new(tollgate_config::apply_baseline(config)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> PolicyConfig {
        self.config.lock().await.clone()
    }

    /// Run `f` against the current lists under the store lock.
    pub async fn read<R>(&self, f: impl FnOnce(&PolicyConfig) -> R) -> R {
        let config = self.config.lock().await;
        f(&config)
    }

    /// First blocklist pattern of `kind` matching the already-normalized `identifier`.
    pub async fn blocked_by(&self, kind: TargetKind, identifier: &str) -> Option<String> {
        let config = self.config.lock().await;
        first_match(blocklist(&config, kind), identifier).map(str::to_string)
    }

    /// Normalize `raw` and add it to the allowlist of `kind`.
    ///
    /// Fails with `ApprovalDenied` if the entry matches any blocklist pattern at write time,
    /// and with `PersistenceFailure` if the file cannot be written. In both cases nothing
    /// changes. Returns the normalized entry and whether it was newly inserted.
    pub async fn allow_add(&self, kind: TargetKind, raw: &str) -> Result<(String, bool), GatewayError> {
        let entry = normalize(kind, raw);
        if entry.is_empty() {
            return Err(GatewayError::ValidationFailed(format!(
                "cannot allowlist an empty {kind}"
            )));
        }

        let mut config = self.config.lock().await;

        if let Some(pattern) = first_match(blocklist(&config, kind), &entry) {
            return Err(GatewayError::ApprovalDenied {
                kind,
                identifier: entry,
                pattern: pattern.to_string(),
            });
        }

        if allowlist(&config, kind).contains(&entry) {
            return Ok((entry, false));
        }

        let mut next = config.clone();
        allowlist_mut(&mut next, kind).insert(entry.clone());
        self.persist(&next).await?;
        *config = next;

        info!(kind = %kind, entry = %entry, "Added allowlist entry");
        Ok((entry, true))
    }

    /// Normalize `raw` and remove it from the allowlist of `kind`. Returns whether an entry
    /// was removed. Blocklists are never touched.
    pub async fn allow_remove(&self, kind: TargetKind, raw: &str) -> Result<(String, bool), GatewayError> {
        let entry = normalize(kind, raw);
        let mut config = self.config.lock().await;

        if !allowlist(&config, kind).contains(&entry) {
            return Ok((entry, false));
        }

        let mut next = config.clone();
        allowlist_mut(&mut next, kind).remove(&entry);
        self.persist(&next).await?;
        *config = next;

        info!(kind = %kind, entry = %entry, "Removed allowlist entry");
        Ok((entry, true))
    }

    async fn persist(&self, config: &PolicyConfig) -> Result<(), GatewayError> {
        write_policy(config, &self.path)
            .await
            .map_err(|e| GatewayError::PersistenceFailure(format!("{e:#}")))
    }
}

pub(crate) fn blocklist(config: &PolicyConfig, kind: TargetKind) -> &BTreeSet<String> {
    match kind {
        TargetKind::Domain => &config.blocked_domains,
        TargetKind::Command => &config.blocked_commands,
    }
}

pub(crate) fn allowlist(config: &PolicyConfig, kind: TargetKind) -> &BTreeSet<String> {
    match kind {
        TargetKind::Domain => &config.allowed_domains,
        TargetKind::Command => &config.allowed_commands,
    }
}

fn allowlist_mut(
    config: &mut PolicyConfig,
    kind: TargetKind,
) -> &mut BTreeSet<String> {
    match kind {
        TargetKind::Domain => &mut config.allowed_domains,
        TargetKind::Command => &mut config.allowed_commands,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tollgate_config::policy_file_path;

    #[tokio::test]
    async fn allow_add_persists_to_disk() {
        let dir = TempDir::new().unwrap();
        let path = policy_file_path(dir.path());
        let store = PolicyStore::open(&path).await;

        let (entry, inserted) = store
            .allow_add(TargetKind::Domain, "https://Docs.rs/tokio")
            .await
            .unwrap();
        assert_eq!(entry, "docs.rs");
        assert!(inserted);

        let reopened = PolicyStore::open(&path).await;
        assert!(reopened.snapshot().await.allowed_domains.contains("docs.rs"));
    }

    #[tokio::test]
    async fn blocked_entry_is_rejected_and_not_persisted() {
        let dir = TempDir::new().unwrap();
        let path = policy_file_path(dir.path());
        let store = PolicyStore::open(&path).await;

        for raw in ["http://127.0.0.1:9000", "localhost", "10.5.3.2"] {
            let err = store.allow_add(TargetKind::Domain, raw).await.unwrap_err();
            assert!(matches!(err, GatewayError::ApprovalDenied { .. }), "{raw}");
        }
        let err = store.allow_add(TargetKind::Command, "/usr/bin/sudo").await.unwrap_err();
        assert!(matches!(err, GatewayError::ApprovalDenied { .. }));

        let snapshot = store.snapshot().await;
        assert!(snapshot.allowed_domains.is_empty());
        assert!(snapshot.allowed_commands.is_empty());
        let on_disk = PolicyStore::open(&path).await.snapshot().await;
        assert!(on_disk.allowed_domains.is_empty());
    }

    #[tokio::test]
    async fn remove_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = PolicyStore::open(policy_file_path(dir.path())).await;

        store.allow_add(TargetKind::Command, "ffmpeg").await.unwrap();
        let (_, removed) = store.allow_remove(TargetKind::Command, "FFMPEG").await.unwrap();
        assert!(removed);
        let (_, removed_again) = store.allow_remove(TargetKind::Command, "ffmpeg").await.unwrap();
        assert!(!removed_again);
    }

    #[tokio::test]
    async fn blocklist_entries_cannot_be_removed() {
        let dir = TempDir::new().unwrap();
        let store = PolicyStore::open(policy_file_path(dir.path())).await;
        let (_, removed) = store.allow_remove(TargetKind::Command, "rm").await.unwrap();
        assert!(!removed);
        assert!(store.blocked_by(TargetKind::Command, "rm").await.is_some());
    }

    #[tokio::test]
    async fn write_failure_propagates_and_keeps_memory_unchanged() {
        let dir = TempDir::new().unwrap();
        // Parent of the policy path is a regular file, so create_dir_all fails.
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let store = PolicyStore::with_config(blocker.join("policy.json"), PolicyConfig::default());

        let err = store.allow_add(TargetKind::Domain, "example.com").await.unwrap_err();
        assert!(matches!(err, GatewayError::PersistenceFailure(_)));
        assert!(store.snapshot().await.allowed_domains.is_empty());
    }

    #[tokio::test]
    async fn concurrent_adds_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let path = policy_file_path(dir.path());
        let store = Arc::new(PolicyStore::open(&path).await);

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .allow_add(TargetKind::Domain, &format!("host{i}.example.com"))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let on_disk = PolicyStore::open(&path).await.snapshot().await;
        assert_eq!(on_disk.allowed_domains.len(), 16);
    }
}
