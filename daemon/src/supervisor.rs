/// Backend subprocess lifecycle and process signals.
///
/// [`Backend::spawn`] starts `<backend> watch` and two tasks:
///   - a reader task running [`reader::run`] over the child's stdout
///   - a waiter task that reports the child's exit as a shutdown
///
/// Both stop when [`Backend::stop`] is called; the child is killed if still running.
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::event::{DaemonEvent, EventSenders, ShutdownReason};
use crate::reader;

/// Subcommand that streams device events.
pub const WATCH_SUBCOMMAND: &str = "watch";

/// A running backend subprocess and its tasks.
pub struct Backend {
    /// Setting this to `true` signals both tasks to stop.
    stop_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Backend {
    /// Launches `<program> watch`. Records flow into `senders`; the child's exit
    /// or a framing violation is sent to `control` as a [`DaemonEvent::Shutdown`].
    pub fn spawn(
        program: &str,
        senders: EventSenders,
        control: mpsc::Sender<DaemonEvent>,
    ) -> Result<Self> {
        let mut child = Command::new(program)
            .arg(WATCH_SUBCOMMAND)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start `{program} {WATCH_SUBCOMMAND}`"))?;
        let stdout = child
            .stdout
            .take()
            .context("Failed to capture backend stdout")?;

        info!(pid = ?child.id(), "started `{program} {WATCH_SUBCOMMAND}`");

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handles = vec![];

        // ── Reader task ───────────────────────────────────────────────────────
        {
            let mut stop_rx = stop_rx.clone();
            let control = control.clone();
            handles.push(tokio::spawn(async move {
                tokio::select! {
                    result = reader::run(BufReader::new(stdout), senders) => {
                        if let Err(e) = result {
                            error!("backend protocol violation: {e}");
                            let reason = ShutdownReason::ProtocolViolation(e);
                            let _ = control.send(DaemonEvent::Shutdown(reason)).await;
                        }
                    }
                    _ = stop_rx.changed() => {}
                }
            }));
        }

        // ── Waiter task ───────────────────────────────────────────────────────
        {
            let mut stop_rx = stop_rx;
            handles.push(tokio::spawn(async move {
                tokio::select! {
                    status = child.wait() => {
                        let reason = match status {
                            Ok(status) => {
                                warn!("backend exited: {status}");
                                ShutdownReason::BackendExited(status.code())
                            }
                            Err(e) => {
                                error!("failed to wait for backend: {e}");
                                ShutdownReason::BackendFailed(e.to_string())
                            }
                        };
                        let _ = control.send(DaemonEvent::Shutdown(reason)).await;
                    }
                    _ = stop_rx.changed() => {
                        if let Err(e) = child.kill().await {
                            warn!("failed to kill backend: {e}");
                        }
                    }
                }
            }));
        }

        Ok(Backend { stop_tx, handles })
    }

    /// Signals both tasks to stop and waits for them to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Sends `Shutdown(Interrupted)` on the first SIGINT or SIGTERM.
pub fn spawn_signal_listener(control: mpsc::Sender<DaemonEvent>) -> Result<JoinHandle<()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        Ok(tokio::spawn(async move {
            let name = tokio::select! {
                _ = interrupt.recv() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            };
            info!("received {name}");
            let _ = control
                .send(DaemonEvent::Shutdown(ShutdownReason::Interrupted(name)))
                .await;
        }))
    }
    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = control
                    .send(DaemonEvent::Shutdown(ShutdownReason::Interrupted("Ctrl+C")))
                    .await;
            }
        }))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::event::event_channels;
    use crate::parser::ProtocolError;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    /// Writes an executable shell script standing in for the backend.
    fn fake_backend(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("backend");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    async fn next_shutdown(rx: &mut mpsc::Receiver<DaemonEvent>) -> ShutdownReason {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no shutdown within timeout")
            .expect("control channel closed");
        match event {
            DaemonEvent::Shutdown(reason) => reason,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error() {
        let (senders, _receivers) = event_channels(10);
        let (control_tx, _control_rx) = mpsc::channel(4);
        let result = Backend::spawn("/nonexistent/usbguard", senders, control_tx);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn backend_receives_watch_subcommand_and_streams_records() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_backend(
            dir.path(),
            r#"[ "$1" = watch ] || exit 9
echo '[IPC] Connected'
echo '[device] PresenceChanged: id=8'
echo ' event=Insert'
echo ' target=block'
echo ' device_rule=block name "Key"'"#,
        );
        let (senders, mut receivers) = event_channels(10);
        let (control_tx, mut control_rx) = mpsc::channel(4);

        let backend = Backend::spawn(script.to_str().unwrap(), senders, control_tx).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), receivers.presence.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.id, 8);

        // A clean exit of the backend is still a shutdown.
        assert_eq!(
            next_shutdown(&mut control_rx).await,
            ShutdownReason::BackendExited(Some(0))
        );
        backend.stop().await;
    }

    #[tokio::test]
    async fn bad_handshake_reports_protocol_violation() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_backend(dir.path(), "echo 'hello'\nsleep 5");
        let (senders, _receivers) = event_channels(10);
        let (control_tx, mut control_rx) = mpsc::channel(4);

        let backend = Backend::spawn(script.to_str().unwrap(), senders, control_tx).unwrap();

        assert_eq!(
            next_shutdown(&mut control_rx).await,
            ShutdownReason::ProtocolViolation(ProtocolError::Handshake("hello".into()))
        );
        backend.stop().await;
    }

    #[tokio::test]
    async fn stop_kills_running_backend() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_backend(dir.path(), "echo '[IPC] Connected'\nexec sleep 30");
        let (senders, _receivers) = event_channels(10);
        let (control_tx, mut control_rx) = mpsc::channel(4);

        let backend = Backend::spawn(script.to_str().unwrap(), senders, control_tx).unwrap();

        tokio::time::timeout(Duration::from_secs(5), backend.stop())
            .await
            .expect("stop did not finish");
        // Stopping is not reported as a backend exit.
        assert!(control_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sigterm_requests_interrupted_shutdown() {
        let (control_tx, mut control_rx) = mpsc::channel(4);
        let listener = spawn_signal_listener(control_tx).unwrap();

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        assert_eq!(
            next_shutdown(&mut control_rx).await,
            ShutdownReason::Interrupted("SIGTERM")
        );
        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .unwrap()
            .unwrap();
    }
}
