//! Timeout Killer
//!
//! Escalates signals on a child process: SIGTERM, wait out the grace period, then SIGKILL.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, warn};

/// Ask `child` to exit and force it if it is still alive after `grace`.
///
/// Returns the exit status. A child that already exited is reaped without signalling.
pub async fn terminate_gracefully(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    if let Some(pid) = child.id() {
        if send_sigterm(pid) {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => {
                    debug!(pid, "Process exited after SIGTERM");
                    return status;
                }
                Err(_) => warn!(pid, ?grace, "Process ignored SIGTERM, escalating to SIGKILL"),
            }
        }
    }

    child.kill().await?;
    child.wait().await
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        // Already gone; the wait below reaps it.
        Err(Errno::ESRCH) => true,
        Err(e) => {
            warn!(pid, error = %e, "SIGTERM failed");
            false
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> bool {
    false
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::Stdio;
    use tokio::process::Command;

    fn spawn_sh(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn sigterm_is_enough_for_cooperative_process() {
        let mut child = spawn_sh("exec sleep 30");
        let status = terminate_gracefully(&mut child, Duration::from_secs(5)).await.unwrap();
        assert_eq!(status.signal(), Some(15));
    }

    #[tokio::test]
    async fn escalates_when_sigterm_is_ignored() {
        let mut child = spawn_sh("trap '' TERM; while true; do sleep 0.05; done");
        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = terminate_gracefully(&mut child, Duration::from_millis(200)).await.unwrap();
        assert_eq!(status.signal(), Some(9));
    }

    #[tokio::test]
    async fn already_exited_child_is_reaped() {
        let mut child = spawn_sh("exit 3");
        tokio::time::sleep(Duration::from_millis(300)).await;
        let status = terminate_gracefully(&mut child, Duration::from_secs(1)).await.unwrap();
        assert_eq!(status.code(), Some(3));
    }
}
