//! The gateway service: owns the policy store, rate limiter, file registry, local exposure
//! server and tunnel supervisor, and runs every gated capability through them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tollgate_config::{load_settings, policy_file_path, GatewaySettings, PolicyConfig, RateLimitRule};
use tollgate_core::{
    ApprovalToken, Clock, FetchRequest, FetchResponse, GatedOutcome, GatewayError, ProcessSpawner,
    SpawnOutput, SpawnRequest, SystemClock, TargetKind, UrlFetcher,
};
use tollgate_logging::{init_logger, AuditEvent, AuditLogger};
use tollgate_media::{
    ExposeOptions, FileRegistration, FileRegistry, LocalExposureServer, RegistryLimits,
    ServerBinding,
};
use tollgate_policy::{
    check_path, classify, resolve_approval, validate_exec_arguments, Classification, Clearance,
    PolicyStore,
};
use tollgate_supervisor::{TunnelConfig, TunnelSnapshot, TunnelSupervisor};
use tracing::{debug, info, warn};
use url::Url;

use crate::primitives::{ReqwestFetcher, TokioProcessSpawner};
use crate::rate_limit::SlidingWindowLimiter;

const ALLOWED_METHODS: &[&str] = &["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"];
const EXPOSE_IDENTIFIER: &str = "expose";

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchParams {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub approval: Option<ApprovalToken>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecParams {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub approval: Option<ApprovalToken>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposeParams {
    pub path: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub expiry_minutes: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposeResult {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub expires_at: DateTime<Utc>,
    pub local_url: String,
    pub public_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadFileResult {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowlistChange {
    pub kind: TargetKind,
    pub identifier: String,
    pub changed: bool,
}

/// Everything the gateway needs, for callers that build their own primitives.
pub struct GatewayParts {
    pub settings: GatewaySettings,
    pub policy: PolicyStore,
    pub fetcher: Arc<dyn UrlFetcher>,
    pub spawner: Arc<dyn ProcessSpawner>,
    pub clock: Arc<dyn Clock>,
}

pub struct Gateway {
    settings: GatewaySettings,
    policy: PolicyStore,
    limiter: SlidingWindowLimiter,
    fetcher: Arc<dyn UrlFetcher>,
    spawner: Arc<dyn ProcessSpawner>,
    registry: Arc<FileRegistry>,
    server: LocalExposureServer,
    tunnel: TunnelSupervisor,
    sweepers: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    /// Load settings and policy from `config_dir`, initialize logging, and build the default
    /// reqwest fetcher and process spawner.
    pub async fn open(config_dir: &Path) -> Result<Self, GatewayError> {
        let settings = load_settings(config_dir).await?;
        if let Some(dir) = &settings.logging.dir {
            init_logger(dir, &settings.logging.level);
        }

        let policy = PolicyStore::open(policy_file_path(config_dir)).await;
        let fetcher = ReqwestFetcher::new(settings.fetch.max_body_bytes)?;
        let spawner = TokioProcessSpawner::new(
            Duration::from_millis(settings.exec.kill_grace_ms),
            settings.exec.max_output_bytes,
        );

        info!(config_dir = %config_dir.display(), "Opening gateway");
        Self::from_parts(GatewayParts {
            settings,
            policy,
            fetcher: Arc::new(fetcher),
            spawner: Arc::new(spawner),
            clock: Arc::new(SystemClock),
        })
        .await
    }

    pub async fn from_parts(parts: GatewayParts) -> Result<Self, GatewayError> {
        let GatewayParts {
            settings,
            policy,
            fetcher,
            spawner,
            clock,
        } = parts;

        let serve_dir = settings.exposure.serve_dir.clone().ok_or_else(|| {
            GatewayError::ValidationFailed("exposure.serveDir is not set".to_string())
        })?;
        let limits = RegistryLimits {
            default_expiry_minutes: settings.exposure.default_expiry_minutes,
            max_expiry_minutes: settings.exposure.max_expiry_minutes,
            max_file_bytes: settings.exposure.max_file_bytes,
        };
        let registry = Arc::new(FileRegistry::open(serve_dir, limits, clock).await?);
        let server = LocalExposureServer::new(
            Arc::clone(&registry),
            ServerBinding {
                preferred_port: settings.exposure.preferred_port,
                max_port_attempts: settings.exposure.max_port_attempts,
                ..Default::default()
            },
        );
        let tunnel = TunnelSupervisor::new(TunnelConfig::from(&settings.tunnel));

        Ok(Self {
            settings,
            policy,
            limiter: SlidingWindowLimiter::new(),
            fetcher,
            spawner,
            registry,
            server,
            tunnel,
            sweepers: Mutex::new(Vec::new()),
        })
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Spawn the rate-limiter and registry sweepers. Calling twice is a no-op.
    pub fn start(&self) {
        let Ok(mut sweepers) = self.sweepers.lock() else {
            return;
        };
        if !sweepers.is_empty() {
            return;
        }
        sweepers.push(
            self.limiter
                .spawn_sweeper(Duration::from_millis(self.settings.rate_limits.sweep_interval_ms)),
        );
        sweepers.push(
            self.registry
                .spawn_sweeper(Duration::from_secs(self.settings.exposure.sweep_interval_secs)),
        );
        debug!("Background sweepers started");
    }

    /// Stop sweepers, the tunnel and the local server, and drop every exposure.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .sweepers
            .lock()
            .map(|mut s| s.drain(..).collect())
            .unwrap_or_default();
        for handle in handles {
            handle.abort();
        }
        self.tunnel.stop().await;
        self.server.stop().await;
        let cleared = self.registry.clear_all().await;
        info!(cleared, "Gateway shut down");
    }

    // ---------------------------------------------------------------------
    // Gated capabilities
    // ---------------------------------------------------------------------

    pub async fn fetch(&self, params: FetchParams) -> Result<GatedOutcome<FetchResponse>, GatewayError> {
        let url = Url::parse(params.url.trim())
            .map_err(|e| GatewayError::ValidationFailed(format!("invalid URL '{}': {e}", params.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(GatewayError::ValidationFailed(format!(
                "unsupported URL scheme '{}', only http and https are allowed",
                url.scheme()
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(GatewayError::ValidationFailed(format!(
                "URL '{}' has no host",
                params.url
            )));
        }
        let method = params.method.trim().to_ascii_uppercase();
        if !ALLOWED_METHODS.contains(&method.as_str()) {
            return Err(GatewayError::ValidationFailed(format!(
                "HTTP method '{method}' is not allowed"
            )));
        }

        let identifier = match resolve_approval(
            &self.policy,
            "fetch",
            TargetKind::Domain,
            url.as_str(),
            params.approval,
        )
        .await?
        {
            Clearance::Proceed { identifier, .. } => identifier,
            Clearance::NeedsApproval { identifier, message } => {
                return Ok(needs_approval(identifier, message))
            }
        };

        self.throttle("fetch", &identifier, self.settings.rate_limits.fetch)
            .await?;

        let timeout = clamp_timeout(
            params.timeout_ms,
            self.settings.fetch.default_timeout_ms,
            self.settings.fetch.max_timeout_ms,
        );
        let response = self
            .fetcher
            .fetch(FetchRequest {
                url: url.to_string(),
                method,
                headers: params.headers,
                body: params.body,
                timeout,
            })
            .await?;
        Ok(GatedOutcome::Success { result: response })
    }

    pub async fn exec(&self, params: ExecParams) -> Result<GatedOutcome<SpawnOutput>, GatewayError> {
        // Words after the first are leading arguments, so the program that is approved is
        // the program that runs.
        let mut words = params.command.split_whitespace();
        let Some(program) = words.next() else {
            return Err(GatewayError::ValidationFailed("command is empty".to_string()));
        };
        let args: Vec<String> = words.map(str::to_string).chain(params.args).collect();
        validate_exec_arguments(program, &args)?;

        let identifier = match resolve_approval(
            &self.policy,
            "exec",
            TargetKind::Command,
            program,
            params.approval,
        )
        .await?
        {
            Clearance::Proceed { identifier, .. } => identifier,
            Clearance::NeedsApproval { identifier, message } => {
                return Ok(needs_approval(identifier, message))
            }
        };

        self.throttle("exec", &identifier, self.settings.rate_limits.exec)
            .await?;

        let timeout = clamp_timeout(
            params.timeout_ms,
            self.settings.exec.default_timeout_ms,
            self.settings.exec.max_timeout_ms,
        );
        let output = self
            .spawner
            .spawn(SpawnRequest {
                command: program.to_string(),
                args,
                cwd: params.cwd,
                env: params.env,
                timeout,
            })
            .await?;
        Ok(GatedOutcome::Success { result: output })
    }

    /// Register a file, make sure the local server (and tunnel, when enabled) is up, and
    /// return its URLs. No approval token is involved; the gate is the sensitive-path
    /// blocklist plus the rate limiter.
    pub async fn expose_file(&self, params: ExposeParams) -> Result<GatedOutcome<ExposeResult>, GatewayError> {
        check_path(&params.path).await?;
        self.throttle(EXPOSE_IDENTIFIER, EXPOSE_IDENTIFIER, self.settings.rate_limits.expose)
            .await?;

        let registration = self
            .registry
            .register(
                &params.path,
                ExposeOptions {
                    filename: params.filename,
                    content_type: params.content_type,
                    expiry_minutes: params.expiry_minutes,
                },
            )
            .await?;

        match self.publish(&registration).await {
            Ok(result) => Ok(GatedOutcome::Success { result }),
            Err(e) => {
                warn!(id = %registration.id, error = %e, "Exposure could not be published, rolling back");
                self.registry.remove(&registration.id).await;
                Err(e)
            }
        }
    }

    async fn publish(&self, registration: &FileRegistration) -> Result<ExposeResult, GatewayError> {
        let port = self.server.start().await?;
        let origin = format!("http://127.0.0.1:{port}");
        let path = format!("/files/{}", registration.served_name());

        let public_url = if self.settings.tunnel.enabled {
            let base = self.tunnel.start(&origin).await?;
            Some(format!("{}{path}", base.trim_end_matches('/')))
        } else {
            None
        };

        Ok(ExposeResult {
            id: registration.id.clone(),
            filename: registration.filename.clone(),
            content_type: registration.content_type.clone(),
            size_bytes: registration.size_bytes,
            expires_at: registration.expires_at,
            local_url: format!("{origin}{path}"),
            public_url,
        })
    }

    /// Plain file read behind the sensitive-path blocklist.
    pub async fn read_file(&self, path: &str) -> Result<ReadFileResult, GatewayError> {
        let resolved = check_path(path).await?;
        let metadata = tokio::fs::metadata(&resolved)
            .await
            .map_err(|e| GatewayError::ResourceNotFound(format!("{}: {e}", resolved.display())))?;
        if !metadata.is_file() {
            return Err(GatewayError::ValidationFailed(format!(
                "'{}' is not a regular file",
                resolved.display()
            )));
        }

        let limit = self.settings.files.max_read_bytes;
        let too_large = |actual: u64| GatewayError::ResourceTooLarge {
            what: format!("file '{}'", resolved.display()),
            actual,
            limit,
        };
        if metadata.len() > limit {
            return Err(too_large(metadata.len()));
        }

        let bytes = tokio::fs::read(&resolved)
            .await
            .map_err(|e| GatewayError::Other(anyhow::anyhow!("cannot read {}: {e}", resolved.display())))?;
        // The file may have grown since the metadata check.
        if bytes.len() as u64 > limit {
            return Err(too_large(bytes.len() as u64));
        }

        Ok(ReadFileResult {
            size_bytes: bytes.len() as u64,
            content: String::from_utf8_lossy(&bytes).into_owned(),
            path: resolved,
        })
    }

    async fn throttle(&self, scope: &str, identifier: &str, rule: RateLimitRule) -> Result<(), GatewayError> {
        let key = format!("{scope}:{identifier}");
        let decision = self
            .limiter
            .admit(&key, rule.max_requests, Duration::from_millis(rule.window_ms))
            .await;
        if decision.allowed {
            return Ok(());
        }

        let retry_after_ms = decision.retry_after_ms.unwrap_or(rule.window_ms);
        AuditLogger::record(AuditEvent::RateLimited {
            identifier: identifier.to_string(),
            retry_after_ms,
        });
        Err(GatewayError::RateLimited {
            identifier: identifier.to_string(),
            retry_after_ms,
        })
    }

    // ---------------------------------------------------------------------
    // Policy management
    // ---------------------------------------------------------------------

    pub async fn allow_add(&self, kind: TargetKind, raw: &str) -> Result<AllowlistChange, GatewayError> {
        let (identifier, changed) = self.policy.allow_add(kind, raw).await?;
        if changed {
            AuditLogger::record(AuditEvent::ApprovalPersisted {
                kind,
                identifier: identifier.clone(),
            });
        }
        Ok(AllowlistChange {
            kind,
            identifier,
            changed,
        })
    }

    pub async fn allow_remove(&self, kind: TargetKind, raw: &str) -> Result<AllowlistChange, GatewayError> {
        let (identifier, changed) = self.policy.allow_remove(kind, raw).await?;
        if changed {
            AuditLogger::record(AuditEvent::AllowlistRemoved {
                kind,
                identifier: identifier.clone(),
            });
        }
        Ok(AllowlistChange {
            kind,
            identifier,
            changed,
        })
    }

    pub async fn policy_snapshot(&self) -> PolicyConfig {
        self.policy.snapshot().await
    }

    pub async fn classify(&self, kind: TargetKind, raw: &str) -> Classification {
        classify(&self.policy, kind, raw).await
    }

    // ---------------------------------------------------------------------
    // Exposure management
    // ---------------------------------------------------------------------

    pub async fn unexpose(&self, id: &str) -> bool {
        self.registry.remove(id).await
    }

    pub async fn list_exposed(&self) -> Vec<FileRegistration> {
        self.registry.list().await
    }

    pub async fn clear_exposed(&self) -> usize {
        self.registry.clear_all().await
    }

    pub fn tunnel_status(&self) -> TunnelSnapshot {
        self.tunnel.snapshot()
    }
}

fn needs_approval<T>(identifier: String, message: String) -> GatedOutcome<T> {
    GatedOutcome::NeedsApproval {
        normalized_identifier: identifier,
        message,
    }
}

fn clamp_timeout(requested_ms: Option<u64>, default_ms: u64, max_ms: u64) -> Duration {
    let ms = requested_ms.filter(|&ms| ms > 0).unwrap_or(default_ms);
    Duration::from_millis(ms.min(max_ms))
}
