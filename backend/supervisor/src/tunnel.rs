//! Ingress tunnel supervisor.
//!
//! Runs the external tunnel binary against the local exposure server and keeps it alive:
//! `Stopped -> Starting -> Running`, with `Running -> Starting` on an unexpected exit until
//! the restart budget of the current lifetime is spent. Only an intentional [`stop`] resets
//! the budget.
//!
//! [`stop`]: TunnelSupervisor::stop

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tollgate_config::TunnelSettings;
use tollgate_core::{GatewayError, ProcessFailure};
use tollgate_logging::{AuditEvent, AuditLogger};
use tracing::{debug, info, warn};

use crate::timeout_kill::terminate_gracefully;
use crate::url_scrape::extract_public_url;

const RECENT_OUTPUT_LINES: usize = 50;
const URL_PLACEHOLDER: &str = "{url}";

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub program: String,
    /// `{url}` is replaced by the local server URL.
    pub args: Vec<String>,
    pub startup_timeout: Duration,
    pub stop_grace: Duration,
    pub max_restarts: u32,
    pub restart_delay: Duration,
}

impl From<&TunnelSettings> for TunnelConfig {
    fn from(settings: &TunnelSettings) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.args.clone(),
            startup_timeout: Duration::from_millis(settings.startup_timeout_ms),
            stop_grace: Duration::from_millis(settings.stop_grace_ms),
            max_restarts: settings.max_restarts,
            restart_delay: Duration::from_millis(settings.restart_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TunnelStatus {
    Stopped,
    Starting,
    Running,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelSnapshot {
    pub status: TunnelStatus,
    pub public_url: Option<String>,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub recent_output: Vec<String>,
}

#[derive(Debug, Clone)]
struct Failure {
    kind: ProcessFailure,
    message: String,
}

#[derive(Debug)]
struct TunnelState {
    status: TunnelStatus,
    /// Set only while a live child has printed its URL.
    public_url: Option<String>,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    restart_count: u32,
    recent_output: VecDeque<String>,
    last_failure: Option<Failure>,
}

impl TunnelState {
    fn stopped() -> Self {
        Self {
            status: TunnelStatus::Stopped,
            public_url: None,
            pid: None,
            started_at: None,
            restart_count: 0,
            recent_output: VecDeque::new(),
            last_failure: None,
        }
    }

    fn push_output(&mut self, line: String) {
        if self.recent_output.len() == RECENT_OUTPUT_LINES {
            self.recent_output.pop_front();
        }
        self.recent_output.push_back(line);
    }

    fn output_text(&self) -> String {
        self.recent_output.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    fn snapshot(&self) -> TunnelSnapshot {
        TunnelSnapshot {
            status: self.status,
            public_url: self.public_url.clone(),
            pid: self.pid,
            started_at: self.started_at,
            restart_count: self.restart_count,
            recent_output: self.recent_output.iter().cloned().collect(),
        }
    }
}

struct Lifetime {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct TunnelSupervisor {
    config: TunnelConfig,
    state: Arc<watch::Sender<TunnelState>>,
    lifetime: Mutex<Option<Lifetime>>,
    /// Serializes `start` so concurrent callers share one child.
    start_lock: tokio::sync::Mutex<()>,
}

impl TunnelSupervisor {
    pub fn new(config: TunnelConfig) -> Self {
        let (state, _) = watch::channel(TunnelState::stopped());
        Self {
            config,
            state: Arc::new(state),
            lifetime: Mutex::new(None),
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> TunnelSnapshot {
        self.state.borrow().snapshot()
    }

    pub fn public_url(&self) -> Option<String> {
        self.state.borrow().public_url.clone()
    }

    /// Ensure the tunnel is running for `local_url` and return its public URL.
    ///
    /// A running tunnel is reused. If a previous lifetime ended (failed start or restart
    /// budget spent), it is torn down and a fresh lifetime begins.
    pub async fn start(&self, local_url: &str) -> Result<String, GatewayError> {
        let _guard = self.start_lock.lock().await;

        if let Some(url) = self.public_url() {
            return Ok(url);
        }

        let alive = self
            .lifetime
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|l| !l.task.is_finished()))
            .unwrap_or(false);
        if !alive {
            self.teardown("restart after previous lifetime ended").await;

            let program = resolve_program(&self.config.program).ok_or_else(|| {
                GatewayError::process(
                    ProcessFailure::MissingDependency,
                    format!(
                        "tunnel binary '{}' was not found; install it or set tunnel.program",
                        self.config.program
                    ),
                )
            })?;

            self.state.send_modify(|s| {
                *s = TunnelState::stopped();
                s.status = TunnelStatus::Starting;
            });

            let (stop_tx, stop_rx) = watch::channel(false);
            let task = tokio::spawn(supervise(
                Arc::clone(&self.state),
                self.config.clone(),
                program,
                expand_args(&self.config.args, local_url),
                stop_rx,
            ));
            if let Ok(mut slot) = self.lifetime.lock() {
                *slot = Some(Lifetime { stop_tx, task });
            }
            info!(program = %self.config.program, local_url, "Starting tunnel");
        }

        self.await_public_url().await
    }

    async fn await_public_url(&self) -> Result<String, GatewayError> {
        let mut rx = self.state.subscribe();
        let budget = self.config.startup_timeout
            + self.config.restart_delay
            + self.config.stop_grace
            + Duration::from_secs(1);

        let waited = tokio::time::timeout(
            budget,
            rx.wait_for(|s| s.public_url.is_some() || s.status == TunnelStatus::Stopped),
        )
        .await;

        match waited {
            Ok(Ok(state)) => match (&state.public_url, &state.last_failure) {
                (Some(url), _) => Ok(url.clone()),
                (None, Some(failure)) => Err(GatewayError::process_with_output(
                    failure.kind,
                    failure.message.clone(),
                    state.output_text(),
                )),
                (None, None) => Err(GatewayError::process(
                    ProcessFailure::Exited,
                    "tunnel was stopped before it became ready",
                )),
            },
            Ok(Err(_)) => Err(GatewayError::process(
                ProcessFailure::Exited,
                "tunnel supervisor is gone",
            )),
            Err(_) => Err(GatewayError::process_with_output(
                ProcessFailure::StartupTimeout,
                format!("tunnel did not report a public URL within {budget:?}"),
                self.state.borrow().output_text(),
            )),
        }
    }

    /// Intentional stop: terminate the child (SIGTERM, then SIGKILL after the grace period)
    /// and reset the restart budget.
    pub async fn stop(&self) {
        self.teardown("stopped").await;
    }

    async fn teardown(&self, reason: &str) {
        let lifetime = self.lifetime.lock().ok().and_then(|mut slot| slot.take());
        let Some(lifetime) = lifetime else {
            return;
        };

        let was_live = !lifetime.task.is_finished();
        let _ = lifetime.stop_tx.send(true);
        if let Err(e) = lifetime.task.await {
            warn!(error = %e, "Tunnel supervision task failed");
        }

        self.state.send_modify(|s| {
            s.status = TunnelStatus::Stopped;
            s.public_url = None;
            s.pid = None;
            s.restart_count = 0;
        });

        if was_live {
            info!(reason, "Tunnel stopped");
            AuditLogger::record(AuditEvent::TunnelStopped {
                reason: reason.to_string(),
            });
        }
    }
}

enum Startup {
    Ready(String),
    TimedOut,
    Exited(String),
    Stopped,
}

enum RunEnd {
    Crashed(String),
    Stopped,
}

/// Supervise one lifetime: spawn, wait for the URL, watch for exits and restart within budget.
async fn supervise(
    state: Arc<watch::Sender<TunnelState>>,
    config: TunnelConfig,
    program: PathBuf,
    args: Vec<String>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut restarting = false;

    loop {
        state.send_modify(|s| {
            s.status = TunnelStatus::Starting;
            s.public_url = None;
            s.pid = None;
        });

        let mut child = match spawn_child(&program, &args) {
            Ok(child) => child,
            Err(failure) => {
                fail(&state, failure);
                return;
            }
        };
        let pid = child.id();
        state.send_modify(|s| s.pid = pid);

        let Some(stderr) = child.stderr.take() else {
            let _ = terminate_gracefully(&mut child, config.stop_grace).await;
            fail(
                &state,
                Failure {
                    kind: ProcessFailure::Spawn,
                    message: "tunnel stderr was not captured".to_string(),
                },
            );
            return;
        };
        let mut lines = BufReader::new(stderr).lines();
        let mut stderr_open = true;

        let deadline = tokio::time::sleep(config.startup_timeout);
        tokio::pin!(deadline);

        let startup = loop {
            tokio::select! {
                _ = stop_rx.changed() => break Startup::Stopped,
                _ = &mut deadline => break Startup::TimedOut,
                status = child.wait() => {
                    break Startup::Exited(describe_exit(status));
                }
                line = lines.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => {
                        let url = extract_public_url(&line).map(str::to_string);
                        state.send_modify(|s| s.push_output(line));
                        if let Some(url) = url {
                            break Startup::Ready(url);
                        }
                    }
                    _ => stderr_open = false,
                },
            }
        };

        let crash = match startup {
            Startup::Stopped => {
                let _ = terminate_gracefully(&mut child, config.stop_grace).await;
                return;
            }
            Startup::TimedOut => {
                let _ = terminate_gracefully(&mut child, config.stop_grace).await;
                Failure {
                    kind: ProcessFailure::StartupTimeout,
                    message: format!(
                        "tunnel did not report a public URL within {:?}",
                        config.startup_timeout
                    ),
                }
            }
            Startup::Exited(how) => Failure {
                kind: ProcessFailure::Exited,
                message: format!("tunnel {how} before reporting a public URL"),
            },
            Startup::Ready(url) => {
                info!(public_url = %url, pid = ?pid, "Tunnel running");
                state.send_modify(|s| {
                    s.status = TunnelStatus::Running;
                    s.public_url = Some(url);
                    s.started_at = Some(Utc::now());
                    s.last_failure = None;
                });
                restarting = true;

                let end = loop {
                    tokio::select! {
                        _ = stop_rx.changed() => break RunEnd::Stopped,
                        status = child.wait() => break RunEnd::Crashed(describe_exit(status)),
                        line = lines.next_line(), if stderr_open => match line {
                            Ok(Some(line)) => state.send_modify(|s| s.push_output(line)),
                            _ => stderr_open = false,
                        },
                    }
                };
                match end {
                    RunEnd::Stopped => {
                        let _ = terminate_gracefully(&mut child, config.stop_grace).await;
                        return;
                    }
                    RunEnd::Crashed(how) => Failure {
                        kind: ProcessFailure::Exited,
                        message: format!("tunnel {how} unexpectedly"),
                    },
                }
            }
        };

        // The first start surfaces its failure to the caller; once the tunnel has been up,
        // every failure counts against the restart budget.
        if !restarting {
            warn!(reason = %crash.message, "Tunnel failed to start");
            fail(&state, crash);
            return;
        }

        let attempt = {
            let mut next = None;
            state.send_modify(|s| {
                s.public_url = None;
                s.pid = None;
                if s.restart_count < config.max_restarts {
                    s.restart_count += 1;
                    s.status = TunnelStatus::Starting;
                    next = Some(s.restart_count);
                }
            });
            next
        };

        let Some(attempt) = attempt else {
            warn!(reason = %crash.message, max_restarts = config.max_restarts, "Tunnel restart limit reached");
            fail(
                &state,
                Failure {
                    kind: crash.kind,
                    message: format!(
                        "{}; restart limit of {} reached",
                        crash.message, config.max_restarts
                    ),
                },
            );
            AuditLogger::record(AuditEvent::TunnelStopped {
                reason: "restart limit reached".to_string(),
            });
            return;
        };

        warn!(reason = %crash.message, attempt, max_restarts = config.max_restarts, "Restarting tunnel");
        AuditLogger::record(AuditEvent::TunnelRestarted {
            attempt,
            max_restarts: config.max_restarts,
        });

        tokio::select! {
            _ = stop_rx.changed() => return,
            _ = tokio::time::sleep(config.restart_delay) => {}
        }
    }
}

fn fail(state: &watch::Sender<TunnelState>, failure: Failure) {
    state.send_modify(|s| {
        s.status = TunnelStatus::Stopped;
        s.public_url = None;
        s.pid = None;
        s.last_failure = Some(failure);
    });
}

fn spawn_child(program: &Path, args: &[String]) -> Result<Child, Failure> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Failure {
            kind: if e.kind() == std::io::ErrorKind::NotFound {
                ProcessFailure::MissingDependency
            } else {
                ProcessFailure::Spawn
            },
            message: format!("cannot spawn {}: {e}", program.display()),
        })
}

fn describe_exit(status: std::io::Result<std::process::ExitStatus>) -> String {
    match status {
        Ok(status) => format!("exited with {status}"),
        Err(e) => format!("could not be waited on ({e})"),
    }
}

fn expand_args(args: &[String], local_url: &str) -> Vec<String> {
    args.iter()
        .map(|a| a.replace(URL_PLACEHOLDER, local_url))
        .collect()
}

/// Locate `program` the way the OS would: a path is checked directly, a bare name is searched
/// on `PATH`.
fn resolve_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    let found = std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|p| p.is_file());
    if found.is_none() {
        debug!(program, "Program not found on PATH");
    }
    found
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const URL: &str = "https://calm-otter-7.trycloudflare.com";

    fn config(script: &str) -> TunnelConfig {
        TunnelConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            startup_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_millis(500),
            max_restarts: 2,
            restart_delay: Duration::from_millis(20),
        }
    }

    async fn wait_for_status(supervisor: &TunnelSupervisor, status: TunnelStatus) -> TunnelSnapshot {
        for _ in 0..200 {
            let snap = supervisor.snapshot();
            if snap.status == status {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("tunnel never reached {status:?}: {:?}", supervisor.snapshot());
    }

    #[test]
    fn url_placeholder_is_expanded() {
        let args = expand_args(
            &["tunnel".to_string(), "--url".to_string(), "{url}".to_string()],
            "http://127.0.0.1:38080",
        );
        assert_eq!(args[2], "http://127.0.0.1:38080");
    }

    #[tokio::test]
    async fn start_resolves_with_scraped_url_and_stop_resets() {
        let supervisor = TunnelSupervisor::new(config(&format!(
            "echo 'INF connecting' >&2; echo 'INF | {URL} |' >&2; exec sleep 30"
        )));

        let url = supervisor.start("http://127.0.0.1:1").await.unwrap();
        assert_eq!(url, URL);
        let snap = supervisor.snapshot();
        assert_eq!(snap.status, TunnelStatus::Running);
        assert!(snap.pid.is_some());
        assert!(snap.started_at.is_some());
        assert_eq!(snap.recent_output.len(), 2);

        assert_eq!(supervisor.start("http://127.0.0.1:1").await.unwrap(), URL);

        supervisor.stop().await;
        let snap = supervisor.snapshot();
        assert_eq!(snap.status, TunnelStatus::Stopped);
        assert!(snap.public_url.is_none());
        assert_eq!(snap.restart_count, 0);
    }

    #[tokio::test]
    async fn startup_timeout_terminates_and_fails() {
        let mut cfg = config("echo 'INF still waiting' >&2; exec sleep 30");
        cfg.startup_timeout = Duration::from_millis(300);
        let supervisor = TunnelSupervisor::new(cfg);

        let err = supervisor.start("http://127.0.0.1:1").await.unwrap_err();
        match err {
            GatewayError::ExternalProcessFailure { failure, output, .. } => {
                assert_eq!(failure, ProcessFailure::StartupTimeout);
                assert!(output.unwrap_or_default().contains("still waiting"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(supervisor.snapshot().status, TunnelStatus::Stopped);
    }

    #[tokio::test]
    async fn exit_before_url_fails_start() {
        let supervisor = TunnelSupervisor::new(config("echo 'ERR no route' >&2; exit 1"));
        let err = supervisor.start("http://127.0.0.1:1").await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::ExternalProcessFailure {
                failure: ProcessFailure::Exited,
                ..
            }
        ));
        assert_eq!(supervisor.snapshot().restart_count, 0);
    }

    #[tokio::test]
    async fn crashes_restart_until_budget_is_spent() {
        let supervisor = TunnelSupervisor::new(config(&format!(
            "echo '{URL}' >&2; sleep 0.3; exit 1"
        )));

        assert_eq!(supervisor.start("http://127.0.0.1:1").await.unwrap(), URL);

        let snap = wait_for_status(&supervisor, TunnelStatus::Stopped).await;
        assert_eq!(snap.restart_count, 2);
        assert!(snap.public_url.is_none());
        assert!(!snap.recent_output.is_empty());

        // A new start begins a fresh lifetime.
        assert_eq!(supervisor.start("http://127.0.0.1:1").await.unwrap(), URL);
        assert_eq!(supervisor.snapshot().restart_count, 0);
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn missing_binary_is_reported_before_spawning() {
        let mut cfg = config("");
        cfg.program = "tollgate-no-such-tunnel-binary".to_string();
        let supervisor = TunnelSupervisor::new(cfg);

        let err = supervisor.start("http://127.0.0.1:1").await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::ExternalProcessFailure {
                failure: ProcessFailure::MissingDependency,
                ..
            }
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn concurrent_starts_share_one_child() {
        let supervisor = Arc::new(TunnelSupervisor::new(config(&format!(
            "sleep 0.2; echo '{URL}' >&2; exec sleep 30"
        ))));

        let a = {
            let s = Arc::clone(&supervisor);
            tokio::spawn(async move { s.start("http://127.0.0.1:1").await })
        };
        let b = {
            let s = Arc::clone(&supervisor);
            tokio::spawn(async move { s.start("http://127.0.0.1:1").await })
        };
        assert_eq!(a.await.unwrap().unwrap(), URL);
        assert_eq!(b.await.unwrap().unwrap(), URL);
        assert_eq!(supervisor.snapshot().restart_count, 0);

        supervisor.stop().await;
    }
}
