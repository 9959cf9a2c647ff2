//! `tollgate-config`: persisted policy lists and runtime settings.
//!
//! Provides:
//! - `PolicyConfig` schema (the on-disk allow/block lists)
//! - Hard-coded baseline blocklists, merged into whatever is loaded
//! - Atomic JSON write (temp file + rename) for policy mutations
//! - YAML runtime settings with env overrides and validation

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use defaults::{
    apply_baseline, baseline_policy, DEFAULT_BLOCKED_COMMANDS, DEFAULT_BLOCKED_DOMAINS,
};
pub use env::{apply_env_overrides, apply_env_overrides_with};
pub use io::{
    config_dir, load_policy, load_settings, policy_file_path, settings_file_path, write_policy,
    LoadedPolicy, PolicyOrigin,
};
pub use schema::{
    ExecSettings, ExposureSettings, FetchSettings, FileSettings, GatewaySettings, LoggingSettings,
    PolicyConfig, RateLimitRule, RateLimitSettings, TunnelSettings,
};
pub use validation::{validate, ConfigValidationError, ValidationReport};
