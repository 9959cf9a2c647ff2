//! Config file read/write. Policy mutations are written atomically (temp file, then rename).

use crate::defaults::{apply_baseline, baseline_policy};
use crate::env::apply_env_overrides;
use crate::schema::{GatewaySettings, PolicyConfig};
use crate::validation::validate;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

const POLICY_FILE_NAME: &str = "policy.json";
const SETTINGS_FILE_NAME: &str = "settings.yaml";

/// Resolve the tollgate config directory.
/// Priority: `TOLLGATE_CONFIG_DIR` env > `~/.tollgate/`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TOLLGATE_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".tollgate");
    }
    PathBuf::from(".tollgate")
}

pub fn policy_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(POLICY_FILE_NAME)
}

pub fn settings_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(SETTINGS_FILE_NAME)
}

/// Where a loaded policy came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOrigin {
    /// Parsed from an existing file.
    File,
    /// No file existed; one was written with the baseline.
    Created,
    /// The file could not be read, parsed, or created; in-memory baseline only.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct LoadedPolicy {
    pub config: PolicyConfig,
    pub origin: PolicyOrigin,
}

/// Load the policy file, creating it with baseline defaults on first access.
///
/// Never fails: read or parse errors fall back to the in-memory baseline. The returned
/// blocklists are always a superset of the baseline.
pub async fn load_policy(path: &Path) -> LoadedPolicy {
    if !path.exists() {
        let config = baseline_policy();
        return match write_policy(&config, path).await {
            Ok(()) => {
                info!(path = %path.display(), "Created policy file with baseline defaults");
                LoadedPolicy {
                    config,
                    origin: PolicyOrigin::Created,
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not create policy file; using in-memory defaults");
                LoadedPolicy {
                    config,
                    origin: PolicyOrigin::Fallback,
                }
            }
        };
    }

    match read_policy(path).await {
        Ok(config) => {
            info!(
                path = %path.display(),
                allowed_domains = config.allowed_domains.len(),
                allowed_commands = config.allowed_commands.len(),
                "Loaded policy"
            );
            LoadedPolicy {
                config: apply_baseline(config),
                origin: PolicyOrigin::File,
            }
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to load policy; using in-memory defaults");
            LoadedPolicy {
                config: baseline_policy(),
                origin: PolicyOrigin::Fallback,
            }
        }
    }
}

async fn read_policy(path: &Path) -> Result<PolicyConfig> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read policy file: {}", path.display()))?;
    let config: PolicyConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse policy JSON at: {}", path.display()))?;
    Ok(config)
}

/// Write the policy to disk atomically (write to temp file, rename).
pub async fn write_policy(config: &PolicyConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create config directory: {}", parent.display())
        })?;
    }

    let json = serde_json::to_string_pretty(config).context("Failed to serialize policy")?;

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json.as_bytes())
        .await
        .with_context(|| format!("Failed to write temp policy: {}", tmp_path.display()))?;

    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to rename temp policy to: {}", path.display()))?;

    debug!(path = %path.display(), "Wrote policy");
    Ok(())
}

/// Load `settings.yaml` from `config_dir`, apply env overrides, fill directory defaults, and
/// validate.
///
/// A missing file yields defaults. Validation warnings are logged; errors fail the load.
pub async fn load_settings(config_dir: &Path) -> Result<GatewaySettings> {
    let path = settings_file_path(config_dir);
    let settings = if path.exists() {
        let raw = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        let parsed: GatewaySettings = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse settings YAML at: {}", path.display()))?;
        info!(path = %path.display(), "Loaded settings");
        parsed
    } else {
        debug!(path = %path.display(), "Settings file does not exist; using defaults");
        GatewaySettings::default()
    };

    let mut settings = apply_env_overrides(settings);
    if settings.exposure.serve_dir.is_none() {
        settings.exposure.serve_dir = Some(config_dir.join("served"));
    }
    if settings.logging.dir.is_none() {
        settings.logging.dir = Some(config_dir.join("logs"));
    }

    let report = validate(&settings);
    for warning in &report.warnings {
        warn!(path = %warning.path, message = %warning.message, "Settings warning");
    }
    if !report.is_valid() {
        for error in &report.errors {
            tracing::error!(path = %error.path, message = %error.message, "Settings error");
        }
        bail!(
            "Invalid settings in {}: {}",
            path.display(),
            report
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        );
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn first_access_creates_file_with_baseline() {
        let dir = TempDir::new().unwrap();
        let path = policy_file_path(dir.path());

        let loaded = load_policy(&path).await;
        assert_eq!(loaded.origin, PolicyOrigin::Created);
        assert!(path.exists());
        assert!(loaded.config.blocked_domains.contains("localhost"));
    }

    #[tokio::test]
    async fn loaded_blocklists_are_unioned_with_baseline() {
        let dir = TempDir::new().unwrap();
        let path = policy_file_path(dir.path());
        std::fs::write(
            &path,
            r#"{"allowedDomains":["github.com"],"blockedDomains":["evil.example"],"allowedCommands":[],"blockedCommands":[]}"#,
        )
        .unwrap();

        let loaded = load_policy(&path).await;
        assert_eq!(loaded.origin, PolicyOrigin::File);
        assert!(loaded.config.allowed_domains.contains("github.com"));
        assert!(loaded.config.blocked_domains.contains("evil.example"));
        assert!(loaded.config.blocked_domains.contains("127.*"));
        assert!(loaded.config.blocked_commands.contains("rm"));
    }

    #[tokio::test]
    async fn corrupt_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = policy_file_path(dir.path());
        std::fs::write(&path, "{ not json").unwrap();

        let loaded = load_policy(&path).await;
        assert_eq!(loaded.origin, PolicyOrigin::Fallback);
        assert!(loaded.config.allowed_domains.is_empty());
        assert!(loaded.config.blocked_commands.contains("sudo"));
    }

    #[tokio::test]
    async fn write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = policy_file_path(dir.path());
        let mut cfg = baseline_policy();
        cfg.allowed_commands.insert("ffmpeg".to_string());

        write_policy(&cfg, &path).await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let back = read_policy(&path).await.unwrap();
        assert_eq!(back, cfg);
    }

    #[tokio::test]
    async fn settings_default_dirs_under_config_dir() {
        let dir = TempDir::new().unwrap();
        let settings = load_settings(dir.path()).await.unwrap();
        assert_eq!(
            settings.exposure.serve_dir.as_deref(),
            Some(dir.path().join("served").as_path())
        );
        assert_eq!(
            settings.logging.dir.as_deref(),
            Some(dir.path().join("logs").as_path())
        );
    }

    #[tokio::test]
    async fn invalid_settings_fail_to_load() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            settings_file_path(dir.path()),
            "rateLimits:\n  exec:\n    maxRequests: 0\n    windowMs: 1000\n",
        )
        .unwrap();
        let err = load_settings(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("rateLimits.exec"));
    }
}
