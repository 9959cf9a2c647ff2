//! Configuration schema: the persisted policy file and the runtime settings file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Policy file
// ---------------------------------------------------------------------------

/// Allow/block lists as stored in `policy.json`.
///
/// Entries are wildcard patterns (`*` = zero or more characters), compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    #[serde(default)]
    pub allowed_domains: BTreeSet<String>,
    #[serde(default)]
    pub blocked_domains: BTreeSet<String>,
    #[serde(default)]
    pub allowed_commands: BTreeSet<String>,
    #[serde(default)]
    pub blocked_commands: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// Runtime settings
// ---------------------------------------------------------------------------

/// Root of `settings.yaml`. Every section is optional and falls back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    pub rate_limits: RateLimitSettings,
    pub fetch: FetchSettings,
    pub exec: ExecSettings,
    pub files: FileSettings,
    pub exposure: ExposureSettings,
    pub tunnel: TunnelSettings,
    pub logging: LoggingSettings,
}

/// One sliding-window admission rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRule {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl RateLimitRule {
    pub const fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitSettings {
    /// Applied per normalized domain.
    pub fetch: RateLimitRule,
    /// Applied per normalized executable name.
    pub exec: RateLimitRule,
    /// Applied to all expose requests together.
    pub expose: RateLimitRule,
    /// How often idle identifiers are garbage-collected.
    pub sweep_interval_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            fetch: RateLimitRule::new(30, 60_000),
            exec: RateLimitRule::new(10, 60_000),
            expose: RateLimitRule::new(10, 60_000),
            sweep_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchSettings {
    pub max_body_bytes: u64,
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_body_bytes: 10 * 1024 * 1024,
            default_timeout_ms: 30_000,
            max_timeout_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecSettings {
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    /// Time between SIGTERM and SIGKILL when a command times out.
    pub kill_grace_ms: u64,
    pub max_output_bytes: usize,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 60_000,
            max_timeout_ms: 600_000,
            kill_grace_ms: 5_000,
            max_output_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileSettings {
    pub max_read_bytes: u64,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            max_read_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExposureSettings {
    /// Directory holding the isolated copies. Defaults to `<config_dir>/served`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serve_dir: Option<PathBuf>,
    pub default_expiry_minutes: u64,
    pub max_expiry_minutes: u64,
    pub max_file_bytes: u64,
    pub sweep_interval_secs: u64,
    pub preferred_port: u16,
    pub max_port_attempts: u16,
}

impl Default for ExposureSettings {
    fn default() -> Self {
        Self {
            serve_dir: None,
            default_expiry_minutes: 60,
            max_expiry_minutes: 24 * 60,
            max_file_bytes: 2 * 1024 * 1024 * 1024,
            sweep_interval_secs: 300,
            preferred_port: 38_080,
            max_port_attempts: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TunnelSettings {
    pub enabled: bool,
    pub program: String,
    /// Arguments passed to `program`; `{url}` is replaced by the local server URL.
    pub args: Vec<String>,
    pub startup_timeout_ms: u64,
    pub stop_grace_ms: u64,
    pub max_restarts: u32,
    pub restart_delay_ms: u64,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "cloudflared".to_string(),
            args: vec![
                "tunnel".to_string(),
                "--no-autoupdate".to_string(),
                "--url".to_string(),
                "{url}".to_string(),
            ],
            startup_timeout_ms: 30_000,
            stop_grace_ms: 5_000,
            max_restarts: 3,
            restart_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    /// Defaults to `<config_dir>/logs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}
