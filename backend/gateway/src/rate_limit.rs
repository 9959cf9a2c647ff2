//! Gateway Rate Limiting Module
//!
//! Sliding-window admission per identifier. The limiter knows nothing about policy; the
//! gateway calls it only after a request has been cleared, so blocked or un-approved requests
//! never consume quota.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Admission timestamps for one identifier, all within the last `window`.
struct RateWindow {
    admitted: VecDeque<Instant>,
    window: Duration,
    last_admit: Instant,
}

impl RateWindow {
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.admitted.front() {
            if now.duration_since(oldest) >= self.window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    /// Empty and has been for longer than twice its window.
    fn is_stale(&self, now: Instant) -> bool {
        self.admitted.is_empty()
            && now.duration_since(self.last_admit) > self.window.saturating_mul(3)
    }
}

#[derive(Clone, Default)]
pub struct SlidingWindowLimiter {
    windows: Arc<Mutex<HashMap<String, RateWindow>>>,
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit or deny one request for `identifier`.
    ///
    /// Calls for the same identifier are decided in arrival order.
    pub async fn admit(&self, identifier: &str, max_requests: u32, window: Duration) -> RateDecision {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let state = windows
            .entry(identifier.to_string())
            .or_insert_with(|| RateWindow {
                admitted: VecDeque::new(),
                window,
                last_admit: now,
            });
        state.window = window;
        state.prune(now);

        let used = state.admitted.len() as u32;
        if used >= max_requests {
            let retry_after = state
                .admitted
                .front()
                .map(|&oldest| (oldest + window).saturating_duration_since(now))
                .unwrap_or(window);
            debug!(identifier, used, max_requests, "Rate limit check: denied");
            return RateDecision {
                allowed: false,
                remaining: 0,
                retry_after_ms: Some(retry_after.as_millis() as u64),
            };
        }

        state.admitted.push_back(now);
        state.last_admit = now;
        let remaining = max_requests - used - 1;
        debug!(identifier, remaining, "Rate limit check: allowed");
        RateDecision {
            allowed: true,
            remaining,
            retry_after_ms: None,
        }
    }

    /// Drop identifiers that have been idle long enough. Returns how many were purged.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, state| {
            state.prune(now);
            !state.is_stale(now)
        });
        let purged = before - windows.len();
        if purged > 0 {
            debug!(purged, remaining = windows.len(), "Rate limiter sweep");
        }
        purged
    }

    pub async fn tracked(&self) -> usize {
        self.windows.lock().await.len()
    }

    /// Run [`sweep`](Self::sweep) every `interval` on a background task.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.sweep().await;
            }
        })
    }
}
