//! Browser-process lifecycle: spawn, exit monitoring and shutdown.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::ProcessArgs;
use crate::error::HostError;

/// How to launch the browser process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub executable: PathBuf,
    pub cache_path: Option<PathBuf>,
    pub extra_args: Vec<String>,
    pub inherit_stderr: bool,
}

impl LaunchOptions {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            cache_path: None,
            extra_args: Vec::new(),
            inherit_stderr: true,
        }
    }

    /// Full argument list passed to the child.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = ProcessArgs::for_parent(std::process::id(), self.cache_path.clone()).to_command_args();
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// The child's stdio, used as the RPC transport
pub struct ChildPipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Owns the spawned browser process
pub struct ProcessSupervisor {
    pid: Option<u32>,
    exit_rx: watch::Receiver<Option<ExitStatus>>,
    kill_tx: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
}

impl ProcessSupervisor {
    /// Spawns the browser process.
    ///
    /// Fails fast with [`HostError::ExecutableNotFound`] when the executable
    /// does not exist; other spawn errors become [`HostError::Launch`].
    pub fn start(options: &LaunchOptions) -> Result<(Self, ChildPipes), HostError> {
        if !options.executable.is_file() {
            return Err(HostError::ExecutableNotFound(options.executable.clone()));
        }

        let args = options.command_args();
        info!("Launching browser process {} {:?}", options.executable.display(), args);

        let mut command = Command::new(&options.executable);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if options.inherit_stderr {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .kill_on_drop(false);

        let mut child = command.spawn().map_err(|source| HostError::Launch {
            path: options.executable.clone(),
            source,
        })?;

        let pid = child.id();
        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.start_kill();
                return Err(HostError::Launch {
                    path: options.executable.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child stdio was not captured"),
                });
            }
        };

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                Ok(()) = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill browser process: {}", e);
                    }
                    child.wait().await
                }
            };

            match status {
                Ok(status) => {
                    info!("Browser process exited with {}", status);
                    exit_tx.send_replace(Some(status));
                }
                Err(e) => {
                    warn!("Failed to wait for browser process: {}", e);
                    // Report a failure exit so waiters are released.
                    exit_tx.send_replace(Some(failed_status()));
                }
            }
        });

        debug!(pid = ?pid, "Browser process started");

        Ok((
            Self {
                pid,
                exit_rx,
                kill_tx: parking_lot::Mutex::new(Some(kill_tx)),
            },
            ChildPipes { stdin, stdout },
        ))
    }

    /// OS process id, if the process was still running after spawn.
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.exit_rx.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_status().is_some()
    }

    /// Receiver that changes once the process exits.
    pub fn exit_watch(&self) -> watch::Receiver<Option<ExitStatus>> {
        self.exit_rx.clone()
    }

    /// Waits for the process to exit.
    pub async fn wait_for_exit(&self) -> Option<ExitStatus> {
        let mut exit_rx = self.exit_rx.clone();
        let status = match exit_rx.wait_for(|status| status.is_some()).await {
            Ok(status) => *status,
            Err(_) => None,
        };
        status
    }

    /// Requests a force kill. Returns immediately.
    pub fn kill(&self) {
        if let Some(kill_tx) = self.kill_tx.lock().take() {
            let _ = kill_tx.send(());
        }
    }

    /// Waits up to `grace` for the process to exit, then kills it.
    pub async fn shutdown(&self, grace: Duration) -> Option<ExitStatus> {
        if let Ok(status) = tokio::time::timeout(grace, self.wait_for_exit()).await {
            return status;
        }

        warn!("Browser process did not exit within {:?}, killing it", grace);
        self.kill();
        self.wait_for_exit().await
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if !self.has_exited() {
            self.kill();
        }
    }
}

#[cfg(unix)]
fn failed_status() -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    ExitStatus::from_raw(1 << 8)
}

#[cfg(windows)]
fn failed_status() -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;
    ExitStatus::from_raw(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_executable_fails_fast() {
        let options = LaunchOptions::new("/definitely/not/a/browser");
        match ProcessSupervisor::start(&options) {
            Err(HostError::ExecutableNotFound(path)) => {
                assert_eq!(path, PathBuf::from("/definitely/not/a/browser"))
            }
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("launch should fail"),
        }
    }

    #[test]
    fn test_command_args() {
        let mut options = LaunchOptions::new("ki-browser-host");
        options.cache_path = Some(PathBuf::from("/tmp/cache"));
        options.extra_args.push("-v".to_string());

        let args = options.command_args();
        assert_eq!(args[0], format!("--parentProcessId={}", std::process::id()));
        assert_eq!(args[1], "--cachePath=/tmp/cache");
        assert_eq!(args[2], "-v");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_kills_after_grace() {
        use std::os::unix::fs::PermissionsExt;

        // Ignores its arguments and stdin, so only the kill ends it.
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("stubborn-browser");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut options = LaunchOptions::new(&script);
        options.inherit_stderr = false;

        let (supervisor, _pipes) = ProcessSupervisor::start(&options).unwrap();
        assert!(supervisor.id().is_some());

        let started = std::time::Instant::now();
        let status = supervisor.shutdown(Duration::from_millis(200)).await;
        assert!(status.is_some());
        assert!(!status.unwrap().success());
        assert!(supervisor.has_exited());
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
