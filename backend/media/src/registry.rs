//! File registry: isolated, time-limited copies of files exposed by opaque id.
//!
//! Every registration owns a copy under the serve directory named `<id>.<ext>`. The source
//! file is never served directly, so later edits or deletion of the original do not leak
//! through the exposure.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tollgate_core::{Clock, GatewayError};
use tollgate_logging::{AuditEvent, AuditLogger};
use tollgate_policy::check_path;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::mime_detect::detect_mime_type;

const FALLBACK_EXTENSION: &str = "bin";
const MAX_EXTENSION_LEN: usize = 16;

/// `<uuid>.<ext>`, the only names the registry ever writes into the serve directory.
pub(crate) static SERVED_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})\.([A-Za-z0-9]{1,16})$",
    )
    .expect("served name regex is valid")
});

/// One exposed file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRegistration {
    pub id: String,
    pub original_path: PathBuf,
    #[serde(skip)]
    pub served_path: PathBuf,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl FileRegistration {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Extension of the served copy, always present.
    pub fn extension(&self) -> &str {
        self.served_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(FALLBACK_EXTENSION)
    }

    /// `<id>.<ext>`, the last path segment of the exposure URL.
    pub fn served_name(&self) -> String {
        format!("{}.{}", self.id, self.extension())
    }
}

/// Caller-supplied overrides for a registration.
#[derive(Debug, Clone, Default)]
pub struct ExposeOptions {
    /// Display name used in Content-Disposition. Defaults to the source file name.
    pub filename: Option<String>,
    /// Defaults to detection by extension.
    pub content_type: Option<String>,
    /// Defaults to [`RegistryLimits::default_expiry_minutes`].
    pub expiry_minutes: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct RegistryLimits {
    pub default_expiry_minutes: u64,
    pub max_expiry_minutes: u64,
    pub max_file_bytes: u64,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            default_expiry_minutes: 60,
            max_expiry_minutes: 24 * 60,
            max_file_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

pub struct FileRegistry {
    serve_dir: PathBuf,
    limits: RegistryLimits,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, FileRegistration>>,
}

impl FileRegistry {
    /// Create the serve directory if needed and purge copies left by a previous process.
    ///
    /// The in-memory index does not survive a restart, so leftover `<id>.<ext>` copies are
    /// unreachable and are deleted. Other files in the directory are left alone.
    pub async fn open(
        serve_dir: impl Into<PathBuf>,
        limits: RegistryLimits,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GatewayError> {
        let serve_dir = serve_dir.into();
        tokio::fs::create_dir_all(&serve_dir).await.map_err(|e| {
            GatewayError::PersistenceFailure(format!(
                "cannot create serve directory {}: {e}",
                serve_dir.display()
            ))
        })?;

        let purged = purge_directory(&serve_dir).await;
        if purged > 0 {
            info!(count = purged, dir = %serve_dir.display(), "Purged stale exposed files");
        }

        Ok(Self {
            serve_dir,
            limits,
            clock,
            entries: RwLock::new(HashMap::new()),
        })
    }

    pub fn serve_dir(&self) -> &Path {
        &self.serve_dir
    }

    pub fn limits(&self) -> RegistryLimits {
        self.limits
    }

    /// Copy `source` into the serve directory and index it under a fresh id.
    pub async fn register(
        &self,
        source: &str,
        options: ExposeOptions,
    ) -> Result<FileRegistration, GatewayError> {
        let expiry_minutes = options
            .expiry_minutes
            .unwrap_or(self.limits.default_expiry_minutes);
        if expiry_minutes == 0 || expiry_minutes > self.limits.max_expiry_minutes {
            return Err(GatewayError::ValidationFailed(format!(
                "expiry must be between 1 and {} minutes, got {expiry_minutes}",
                self.limits.max_expiry_minutes
            )));
        }
        let created_at = self.clock.now();
        let expires_at = expiry_deadline(created_at, expiry_minutes).ok_or_else(|| {
            GatewayError::ValidationFailed(format!(
                "expiry of {expiry_minutes} minutes is out of range"
            ))
        })?;

        let original_path = check_path(source).await?;
        let metadata = tokio::fs::metadata(&original_path).await.map_err(|e| {
            GatewayError::ResourceNotFound(format!("{}: {e}", original_path.display()))
        })?;
        if !metadata.is_file() {
            return Err(GatewayError::ValidationFailed(format!(
                "'{}' is not a regular file",
                original_path.display()
            )));
        }
        if metadata.len() > self.limits.max_file_bytes {
            return Err(GatewayError::ResourceTooLarge {
                what: format!("file '{}'", original_path.display()),
                actual: metadata.len(),
                limit: self.limits.max_file_bytes,
            });
        }

        let id = Uuid::new_v4().to_string();
        let extension = served_extension(&original_path);
        let served_path = self.serve_dir.join(format!("{id}.{extension}"));

        let size_bytes =
            copy_capped(&original_path, &served_path, self.limits.max_file_bytes).await?;

        let filename = options
            .filename
            .filter(|name| !name.trim().is_empty())
            .or_else(|| {
                original_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| format!("{id}.{extension}"));
        let content_type = options
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| detect_mime_type(&served_path).to_string());

        let registration = FileRegistration {
            id: id.clone(),
            original_path,
            served_path,
            filename,
            content_type,
            size_bytes,
            created_at,
            expires_at,
        };

        self.entries
            .write()
            .await
            .insert(id.clone(), registration.clone());

        AuditLogger::record(AuditEvent::FileExposed {
            id,
            filename: registration.filename.clone(),
            size_bytes,
            expires_at,
        });
        Ok(registration)
    }

    /// Fetch a live registration. An expired entry is removed on the spot and reported absent.
    pub async fn lookup(&self, id: &str) -> Option<FileRegistration> {
        let registration = self.entries.read().await.get(id).cloned()?;
        if registration.is_expired(self.clock.now()) {
            self.remove_with_reason(id, "expired").await;
            return None;
        }
        Some(registration)
    }

    /// Drop a registration and its copy. Returns whether anything was removed.
    pub async fn remove(&self, id: &str) -> bool {
        self.remove_with_reason(id, "removed").await
    }

    async fn remove_with_reason(&self, id: &str, reason: &str) -> bool {
        let Some(registration) = self.entries.write().await.remove(id) else {
            return false;
        };
        delete_copy(&registration.served_path).await;
        AuditLogger::record(AuditEvent::FileRemoved {
            id: id.to_string(),
            reason: reason.to_string(),
        });
        true
    }

    /// Remove every expired registration. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<String> = self
            .entries
            .read()
            .await
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.id.clone())
            .collect();

        let mut removed = 0;
        for id in expired {
            if self.remove_with_reason(&id, "expired").await {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(count = removed, "Swept expired registrations");
        }
        removed
    }

    /// Remove every registration regardless of expiry.
    pub async fn clear_all(&self) -> usize {
        let drained: Vec<FileRegistration> =
            self.entries.write().await.drain().map(|(_, r)| r).collect();
        for registration in &drained {
            delete_copy(&registration.served_path).await;
            AuditLogger::record(AuditEvent::FileRemoved {
                id: registration.id.clone(),
                reason: "cleared".to_string(),
            });
        }
        drained.len()
    }

    /// Live registrations, oldest first.
    pub async fn list(&self) -> Vec<FileRegistration> {
        let now = self.clock.now();
        let mut live: Vec<FileRegistration> = self
            .entries
            .read()
            .await
            .values()
            .filter(|r| !r.is_expired(now))
            .cloned()
            .collect();
        live.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        live
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Periodic sweep on a background task. The first sweep runs one interval after spawning.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        })
    }
}

/// Copy `source` to `dest`, reading at most one byte past `limit`. The size is re-checked on
/// the bytes actually copied since the source may have grown after it was stat'ed.
async fn copy_capped(source: &Path, dest: &Path, limit: u64) -> Result<u64, GatewayError> {
    let persistence = |e: std::io::Error| {
        GatewayError::PersistenceFailure(format!(
            "cannot copy {} into serve directory: {e}",
            source.display()
        ))
    };

    let copied = async {
        let reader = tokio::fs::File::open(source).await?;
        let mut writer = tokio::fs::File::create(dest).await?;
        let n = tokio::io::copy(&mut reader.take(limit.saturating_add(1)), &mut writer).await?;
        writer.flush().await?;
        Ok::<u64, std::io::Error>(n)
    }
    .await;

    match copied {
        Ok(n) if n <= limit => Ok(n),
        Ok(n) => {
            delete_copy(dest).await;
            Err(GatewayError::ResourceTooLarge {
                what: format!("file '{}'", source.display()),
                actual: n,
                limit,
            })
        }
        Err(e) => {
            delete_copy(dest).await;
            Err(persistence(e))
        }
    }
}

fn expiry_deadline(created_at: DateTime<Utc>, minutes: u64) -> Option<DateTime<Utc>> {
    let minutes = i64::try_from(minutes).ok()?;
    created_at.checked_add_signed(chrono::Duration::try_minutes(minutes)?)
}

fn served_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| {
            !e.is_empty()
                && e.len() <= MAX_EXTENSION_LEN
                && e.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

async fn delete_copy(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete exposed copy"),
    }
}

async fn purge_directory(dir: &Path) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot list serve directory");
            return 0;
        }
    };

    let mut purged = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        let owned = entry
            .file_name()
            .to_str()
            .is_some_and(|name| SERVED_NAME_RE.is_match(name));
        if is_file && owned && tokio::fs::remove_file(entry.path()).await.is_ok() {
            purged += 1;
        }
    }
    purged
}
