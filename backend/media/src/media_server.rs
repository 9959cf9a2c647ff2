//! Local exposure server: serves registered files over HTTP by `<id>.<ext>`.
//!
//! One instance per process. It binds loopback on first use and stays up until shutdown;
//! the ingress tunnel forwards public traffic to it.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tollgate_core::GatewayError;
use tracing::{debug, info, warn};

use crate::mime_detect::is_inline_safe;
use crate::registry::{FileRegistry, SERVED_NAME_RE};

/// Where the server tries to bind.
#[derive(Debug, Clone, Copy)]
pub struct ServerBinding {
    pub host: IpAddr,
    /// First port tried. 0 asks the OS for an ephemeral port.
    pub preferred_port: u16,
    /// Ports tried in order `preferred, preferred + 1, ...` while the address is in use.
    pub max_port_attempts: u16,
}

impl Default for ServerBinding {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            preferred_port: 38080,
            max_port_attempts: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalServerState {
    pub bound_port: u16,
    pub started_at: DateTime<Utc>,
}

struct RunningServer {
    state: LocalServerState,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct LocalExposureServer {
    registry: Arc<FileRegistry>,
    binding: ServerBinding,
    running: Mutex<Option<RunningServer>>,
}

impl LocalExposureServer {
    pub fn new(registry: Arc<FileRegistry>, binding: ServerBinding) -> Self {
        Self {
            registry,
            binding,
            running: Mutex::new(None),
        }
    }

    /// Start serving if not already running and return the bound port.
    ///
    /// Concurrent callers serialize on the state lock, so at most one listener is created.
    pub async fn start(&self) -> Result<u16, GatewayError> {
        let mut running = self.running.lock().await;
        if let Some(server) = running.as_ref() {
            if !server.task.is_finished() {
                return Ok(server.state.bound_port);
            }
            warn!(port = server.state.bound_port, "Exposure server task ended, restarting");
        }

        let listener = self.bind().await?;
        let addr = listener.local_addr().map_err(|e| {
            GatewayError::Other(anyhow::anyhow!("cannot read bound address: {e}"))
        })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = exposure_router(Arc::clone(&self.registry));
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "Exposure server exited with error");
            }
        });

        let state = LocalServerState {
            bound_port: addr.port(),
            started_at: Utc::now(),
        };
        info!(addr = %addr, "Exposure server listening");
        *running = Some(RunningServer {
            state,
            shutdown: shutdown_tx,
            task,
        });
        Ok(addr.port())
    }

    async fn bind(&self) -> Result<TcpListener, GatewayError> {
        let ServerBinding {
            host,
            preferred_port,
            max_port_attempts,
        } = self.binding;

        if preferred_port == 0 {
            return TcpListener::bind(SocketAddr::new(host, 0))
                .await
                .map_err(|e| GatewayError::Other(anyhow::anyhow!("cannot bind {host}: {e}")));
        }

        let mut last_port = preferred_port;
        for offset in 0..max_port_attempts.max(1) {
            let Some(port) = preferred_port.checked_add(offset) else {
                break;
            };
            last_port = port;
            match TcpListener::bind(SocketAddr::new(host, port)).await {
                Ok(listener) => return Ok(listener),
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    debug!(port, "Port in use, trying next");
                }
                Err(e) => {
                    return Err(GatewayError::Other(anyhow::anyhow!(
                        "cannot bind {host}:{port}: {e}"
                    )))
                }
            }
        }

        Err(GatewayError::Other(anyhow::anyhow!(
            "no free port in {preferred_port}..={last_port}"
        )))
    }

    /// Stop serving. A later [`start`](Self::start) binds again.
    pub async fn stop(&self) {
        let Some(server) = self.running.lock().await.take() else {
            return;
        };
        let _ = server.shutdown.send(());
        if let Err(e) = server.task.await {
            warn!(error = %e, "Exposure server task failed during shutdown");
        }
        info!(port = server.state.bound_port, "Exposure server stopped");
    }

    pub async fn state(&self) -> Option<LocalServerState> {
        self.running.lock().await.as_ref().map(|s| s.state.clone())
    }

    pub async fn port(&self) -> Option<u16> {
        self.state().await.map(|s| s.bound_port)
    }
}

#[derive(Clone)]
struct ExposureState {
    registry: Arc<FileRegistry>,
}

/// Router serving `GET`/`HEAD /files/:name`. Other methods on that path are 405.
pub fn exposure_router(registry: Arc<FileRegistry>) -> Router {
    Router::new()
        .route("/files/:name", get(serve_file))
        .fallback(|| async { not_found() })
        .with_state(ExposureState { registry })
}

async fn serve_file(Path(name): Path<String>, State(state): State<ExposureState>) -> Response {
    let Some(captures) = SERVED_NAME_RE.captures(&name) else {
        return not_found();
    };
    let (id, ext) = (&captures[1], &captures[2]);

    let Some(registration) = state.registry.lookup(&id.to_lowercase()).await else {
        return not_found();
    };
    if !registration.extension().eq_ignore_ascii_case(ext) {
        return not_found();
    }

    let file = match tokio::fs::File::open(&registration.served_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(id = %registration.id, "Exposed copy vanished from disk");
            return not_found();
        }
        Err(e) => {
            warn!(path = %registration.served_path.display(), error = %e, "Failed to open exposed file");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read file").into_response();
        }
    };
    let length = match file.metadata().await {
        Ok(meta) => meta.len(),
        Err(_) => registration.size_bytes,
    };

    let disposition_type = if is_inline_safe(&registration.content_type) {
        "inline"
    } else {
        "attachment"
    };
    let disposition = format!(
        "{disposition_type}; filename=\"{}\"",
        header_safe_filename(&registration.filename)
    );

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&registration.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, HEAD"),
    );

    debug!(id = %registration.id, bytes = length, "Serving exposed file");
    (StatusCode::OK, headers, Body::from_stream(ReaderStream::new(file))).into_response()
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

/// Printable ASCII without quotes or backslashes; everything else becomes `_`.
fn header_safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect()
}
