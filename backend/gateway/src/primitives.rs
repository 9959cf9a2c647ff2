//! Default capability primitives: HTTP fetch over reqwest and shell-free process spawning.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client, Method};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tollgate_core::{
    FetchRequest, FetchResponse, GatewayError, ProcessFailure, ProcessSpawner, SpawnOutput,
    SpawnRequest, UrlFetcher,
};
use tollgate_supervisor::terminate_gracefully;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("tollgate/", env!("CARGO_PKG_VERSION"));
const READ_CHUNK: usize = 8 * 1024;
/// How long to wait for pipes to drain after a timed-out child was killed.
const DRAIN_AFTER_KILL: Duration = Duration::from_secs(1);

/// Fetches over HTTP without following redirects and with a hard body ceiling.
pub struct ReqwestFetcher {
    client: Client,
    max_body_bytes: u64,
}

impl ReqwestFetcher {
    pub fn new(max_body_bytes: u64) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| GatewayError::Other(anyhow::anyhow!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            max_body_bytes,
        })
    }

    fn too_large(&self, actual: u64, url: &str) -> GatewayError {
        GatewayError::ResourceTooLarge {
            what: format!("response body from {url}"),
            actual,
            limit: self.max_body_bytes,
        }
    }
}

#[async_trait]
impl UrlFetcher for ReqwestFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, GatewayError> {
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            GatewayError::ValidationFailed(format!("invalid HTTP method '{}'", request.method))
        })?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let mut response = builder.send().await.map_err(upstream)?;
        if let Some(declared) = response.content_length() {
            if declared > self.max_body_bytes {
                return Err(self.too_large(declared, &request.url));
            }
        }

        let status_code = response.status().as_u16();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else {
                continue;
            };
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(upstream)? {
            let total = (body.len() + chunk.len()) as u64;
            if total > self.max_body_bytes {
                return Err(self.too_large(total, &request.url));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url = %request.url, status_code, bytes = body.len(), "Fetched");
        Ok(FetchResponse {
            status_code,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

fn upstream(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::UpstreamFailure(format!("request timed out: {e}"))
    } else {
        GatewayError::UpstreamFailure(e.to_string())
    }
}

/// Spawns the executable directly with an argv vector; no shell ever sees the arguments.
pub struct TokioProcessSpawner {
    kill_grace: Duration,
    max_output_bytes: usize,
}

impl TokioProcessSpawner {
    pub fn new(kill_grace: Duration, max_output_bytes: usize) -> Self {
        Self {
            kill_grace,
            max_output_bytes,
        }
    }
}

#[async_trait]
impl ProcessSpawner for TokioProcessSpawner {
    async fn spawn(&self, request: SpawnRequest) -> Result<SpawnOutput, GatewayError> {
        let mut cmd = Command::new(&request.command);
        cmd.args(&request.args)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GatewayError::process(
                    ProcessFailure::MissingDependency,
                    format!("command '{}' was not found", request.command),
                )
            } else {
                GatewayError::process(
                    ProcessFailure::Spawn,
                    format!("cannot spawn '{}': {e}", request.command),
                )
            }
        })?;
        info!(command = %request.command, pid = ?child.id(), "Spawned process");

        let max = self.max_output_bytes;
        let stdout = tokio::spawn(read_capped(child.stdout.take(), max));
        let stderr = tokio::spawn(read_capped(child.stderr.take(), max));

        match tokio::time::timeout(request.timeout, child.wait()).await {
            Ok(status) => {
                let status = status.map_err(|e| {
                    GatewayError::process(ProcessFailure::Spawn, format!("wait failed: {e}"))
                })?;
                let (stdout, out_truncated) = stdout.await.unwrap_or_default();
                let (stderr, err_truncated) = stderr.await.unwrap_or_default();
                Ok(SpawnOutput {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                    truncated: out_truncated || err_truncated,
                })
            }
            Err(_) => {
                warn!(command = %request.command, timeout = ?request.timeout, "Process timed out, terminating");
                if let Err(e) = terminate_gracefully(&mut child, self.kill_grace).await {
                    warn!(error = %e, "Failed to terminate timed-out process");
                }
                let partial = match tokio::time::timeout(DRAIN_AFTER_KILL, stderr).await {
                    Ok(Ok((bytes, _))) => String::from_utf8_lossy(&bytes).into_owned(),
                    _ => String::new(),
                };
                stdout.abort();
                Err(GatewayError::process_with_output(
                    ProcessFailure::Timeout,
                    format!(
                        "'{}' timed out after {}ms",
                        request.command,
                        request.timeout.as_millis()
                    ),
                    partial,
                ))
            }
        }
    }
}

/// Read a pipe to the end, keeping at most `max` bytes. Excess output is drained so the child
/// never blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, max: usize) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return (Vec::new(), false);
    };
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = max.saturating_sub(kept.len());
                if n > room {
                    truncated = true;
                }
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    (kept, truncated)
}
