//! Settings validation with field paths in the messages.

use crate::schema::{GatewaySettings, RateLimitRule};
use thiserror::Error;

/// One year. Longer exposures are almost certainly a misconfiguration.
pub const MAX_EXPIRY_MINUTES_CEILING: u64 = 365 * 24 * 60;

/// A settings validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the settings and return a report of all errors and warnings.
pub fn validate(settings: &GatewaySettings) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_rate_limits(settings, &mut report);
    validate_timeouts(settings, &mut report);
    validate_exposure(settings, &mut report);
    validate_tunnel(settings, &mut report);
    report
}

fn validate_rule(path: &str, rule: &RateLimitRule, report: &mut ValidationReport) {
    if rule.max_requests == 0 {
        report.error(path, "maxRequests must be at least 1");
    }
    if rule.window_ms == 0 {
        report.error(path, "windowMs must be greater than 0");
    }
}

fn validate_rate_limits(settings: &GatewaySettings, report: &mut ValidationReport) {
    let limits = &settings.rate_limits;
    validate_rule("rateLimits.fetch", &limits.fetch, report);
    validate_rule("rateLimits.exec", &limits.exec, report);
    validate_rule("rateLimits.expose", &limits.expose, report);
    if limits.sweep_interval_ms == 0 {
        report.error("rateLimits.sweepIntervalMs", "must be greater than 0");
    }
}

fn validate_timeouts(settings: &GatewaySettings, report: &mut ValidationReport) {
    if settings.fetch.default_timeout_ms > settings.fetch.max_timeout_ms {
        report.error("fetch.defaultTimeoutMs", "exceeds fetch.maxTimeoutMs");
    }
    if settings.exec.default_timeout_ms > settings.exec.max_timeout_ms {
        report.error("exec.defaultTimeoutMs", "exceeds exec.maxTimeoutMs");
    }
    if settings.fetch.max_body_bytes == 0 {
        report.error("fetch.maxBodyBytes", "must be greater than 0");
    }
    if settings.exec.kill_grace_ms == 0 {
        report.warn(
            "exec.killGraceMs",
            "0 means timed-out commands are killed without a graceful signal",
        );
    }
}

fn validate_exposure(settings: &GatewaySettings, report: &mut ValidationReport) {
    let exposure = &settings.exposure;
    if exposure.default_expiry_minutes == 0 {
        report.error("exposure.defaultExpiryMinutes", "must be at least 1");
    }
    if exposure.default_expiry_minutes > exposure.max_expiry_minutes {
        report.error(
            "exposure.defaultExpiryMinutes",
            "exceeds exposure.maxExpiryMinutes",
        );
    }
    if exposure.max_expiry_minutes == 0 {
        report.error("exposure.maxExpiryMinutes", "must be at least 1");
    }
    if exposure.max_expiry_minutes > MAX_EXPIRY_MINUTES_CEILING {
        report.error(
            "exposure.maxExpiryMinutes",
            format!("must not exceed {MAX_EXPIRY_MINUTES_CEILING} (one year)"),
        );
    }
    if exposure.sweep_interval_secs == 0 {
        report.error("exposure.sweepIntervalSecs", "must be greater than 0");
    }
    if exposure.max_port_attempts == 0 {
        report.error("exposure.maxPortAttempts", "must be at least 1");
    }
    if exposure.preferred_port < 1024 {
        report.warn(
            "exposure.preferredPort",
            "privileged port; binding will likely fail without elevated rights",
        );
    }
}

fn validate_tunnel(settings: &GatewaySettings, report: &mut ValidationReport) {
    let tunnel = &settings.tunnel;
    if !tunnel.enabled {
        return;
    }
    if tunnel.program.trim().is_empty() {
        report.error("tunnel.program", "cannot be empty when the tunnel is enabled");
    }
    if tunnel.startup_timeout_ms == 0 {
        report.error("tunnel.startupTimeoutMs", "must be greater than 0");
    }
    if !tunnel.args.iter().any(|a| a.contains("{url}")) {
        report.warn(
            "tunnel.args",
            "no '{url}' placeholder; the tunnel will not know the local server address",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let report = validate(&GatewaySettings::default());
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn zero_window_is_an_error() {
        let mut settings = GatewaySettings::default();
        settings.rate_limits.fetch.window_ms = 0;
        let report = validate(&settings);
        assert!(!report.is_valid());
        assert_eq!(report.errors[0].path, "rateLimits.fetch");
    }

    #[test]
    fn default_expiry_above_max_is_an_error() {
        let mut settings = GatewaySettings::default();
        settings.exposure.default_expiry_minutes = 2000;
        assert!(!validate(&settings).is_valid());
    }

    #[test]
    fn unbounded_max_expiry_is_an_error() {
        let mut settings = GatewaySettings::default();
        settings.exposure.max_expiry_minutes = u64::MAX;
        let report = validate(&settings);
        assert!(!report.is_valid());
        assert_eq!(report.errors[0].path, "exposure.maxExpiryMinutes");

        settings.exposure.max_expiry_minutes = MAX_EXPIRY_MINUTES_CEILING;
        assert!(validate(&settings).is_valid());
    }

    #[test]
    fn disabled_tunnel_skips_tunnel_checks() {
        let mut settings = GatewaySettings::default();
        settings.tunnel.enabled = false;
        settings.tunnel.program = String::new();
        assert!(validate(&settings).is_valid());
    }
}
