//! Environment variable overrides for runtime settings.
//!
//! Applied after `settings.yaml` is parsed, so the environment always wins.

use crate::schema::GatewaySettings;
use std::collections::HashMap;
use tracing::{debug, warn};

pub const ENV_LOG_LEVEL: &str = "TOLLGATE_LOG_LEVEL";
pub const ENV_TUNNEL_PROGRAM: &str = "TOLLGATE_TUNNEL_PROGRAM";
pub const ENV_TUNNEL_DISABLED: &str = "TOLLGATE_TUNNEL_DISABLED";
pub const ENV_EXPOSE_PORT: &str = "TOLLGATE_EXPOSE_PORT";

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: GatewaySettings) -> GatewaySettings {
    apply_env_overrides_with(settings, &std::env::vars().collect())
}

/// Apply overrides from a provided map (useful for testing).
pub fn apply_env_overrides_with(
    mut settings: GatewaySettings,
    env: &HashMap<String, String>,
) -> GatewaySettings {
    if let Some(level) = non_empty(env, ENV_LOG_LEVEL) {
        debug!(var = ENV_LOG_LEVEL, "Overriding log level from env");
        settings.logging.level = level.to_string();
    }

    if let Some(program) = non_empty(env, ENV_TUNNEL_PROGRAM) {
        debug!(var = ENV_TUNNEL_PROGRAM, "Overriding tunnel program from env");
        settings.tunnel.program = program.to_string();
    }

    if let Some(flag) = non_empty(env, ENV_TUNNEL_DISABLED) {
        if matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes") {
            settings.tunnel.enabled = false;
        }
    }

    if let Some(port) = non_empty(env, ENV_EXPOSE_PORT) {
        match port.parse::<u16>() {
            Ok(p) => settings.exposure.preferred_port = p,
            Err(_) => warn!(var = ENV_EXPOSE_PORT, value = %port, "Ignoring non-numeric port"),
        }
    }

    settings
}

fn non_empty<'a>(env: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}
