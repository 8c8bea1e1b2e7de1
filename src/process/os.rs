// src/process/os.rs

//! OS child process handle.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::errors::LaunchError;
use crate::process::ipc::{PipeChannel, StdinSlot, SHUTDOWN_PROTOCOL};
use crate::process::{BoxFuture, CloseOutcome, ExitNotifier, ExitSignal, ManagedProcess, ProcessExit};
use crate::types::{AppDescriptor, InstanceIdentity};

/// Everything needed to launch one app process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Used in log lines, e.g. `hello@1.2.0`.
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
    /// Pipe stdin so it can carry shutdown requests.
    pub ipc_stdin: bool,
}

impl LaunchSpec {
    pub fn for_app(identity: &InstanceIdentity, descriptor: &AppDescriptor) -> Self {
        let program = descriptor.resolve_binary(&identity.local_store_path);
        let working_dir = program.parent().map(Path::to_path_buf);

        let mut env = vec![
            ("ROLLD_APP_ID".to_string(), descriptor.app_id.to_string()),
            ("ROLLD_APP_VERSION".to_string(), descriptor.version.to_string()),
            ("ROLLD_CLUSTER_ID".to_string(), identity.cluster_id.clone()),
            ("ROLLD_INSTANCE_ID".to_string(), identity.instance_id.clone()),
            ("ROLLD_UPDATE_DOMAIN".to_string(), identity.update_domain.to_string()),
        ];
        if descriptor.graceful_shutdown {
            env.push(("ROLLD_SHUTDOWN_PROTOCOL".to_string(), SHUTDOWN_PROTOCOL.to_string()));
        }

        Self {
            label: descriptor.to_string(),
            program,
            args: descriptor.args.clone(),
            env,
            working_dir,
            ipc_stdin: descriptor.graceful_shutdown,
        }
    }
}

/// One OS process, started at most once.
///
/// A background task owns the `tokio::process::Child` and waits on it; the
/// handle talks to that task through a kill oneshot and learns about the exit
/// through the [`ExitNotifier`]. Dropping the handle kills the child.
#[derive(Debug)]
pub struct OsProcess {
    spec: LaunchSpec,
    notifier: Arc<ExitNotifier>,
    kill_tx: Option<oneshot::Sender<()>>,
    stdin: StdinSlot,
    pid: Option<u32>,
    started: bool,
}

impl OsProcess {
    pub fn new(spec: LaunchSpec) -> Self {
        Self {
            spec,
            notifier: Arc::new(ExitNotifier::new()),
            kill_tx: None,
            stdin: Arc::new(Mutex::new(None)),
            pid: None,
            started: false,
        }
    }

    /// Channel writing to this process's stdin. Only useful when the launch spec
    /// has `ipc_stdin` set; otherwise every send reports `Disconnected`.
    pub fn stdin_channel(&self) -> PipeChannel {
        PipeChannel::new(Arc::clone(&self.stdin))
    }

    async fn launch(&mut self) -> Result<(), LaunchError> {
        if self.started {
            return Err(LaunchError::AlreadyStarted);
        }
        check_binary(&self.spec.program)?;

        info!(
            app = %self.spec.label,
            program = %self.spec.program.display(),
            "starting application process"
        );

        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&self.spec.args)
            .envs(self.spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if self.spec.ipc_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            path: self.spec.program.clone(),
            source,
        })?;

        self.started = true;
        self.pid = child.id();

        if let Some(stdin) = child.stdin.take() {
            *self.stdin.lock().await = Some(stdin);
        }
        drain_lines(self.spec.label.clone(), "stdout", child.stdout.take());
        drain_lines(self.spec.label.clone(), "stderr", child.stderr.take());

        let (kill_tx, kill_rx) = oneshot::channel();
        self.kill_tx = Some(kill_tx);

        tokio::spawn(watch_child(
            self.spec.label.clone(),
            child,
            kill_rx,
            Arc::clone(&self.notifier),
            Arc::clone(&self.stdin),
        ));

        Ok(())
    }

    async fn kill(&mut self) {
        if !self.started || self.notifier.has_fired() {
            return;
        }
        let mut exit = self.notifier.subscribe();
        if let Some(kill) = self.kill_tx.take() {
            debug!(app = %self.spec.label, "terminating application process");
            let _ = kill.send(());
        }
        exit.wait().await;
    }
}

impl ManagedProcess for OsProcess {
    fn start(&mut self) -> BoxFuture<'_, Result<(), LaunchError>> {
        Box::pin(self.launch())
    }

    fn is_running(&self) -> bool {
        self.started && !self.notifier.has_fired()
    }

    fn exit_code(&self) -> Option<i32> {
        self.notifier.subscribe().peek().and_then(|exit| exit.code)
    }

    fn terminate(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(self.kill())
    }

    fn exit_signal(&self) -> ExitSignal {
        self.notifier.subscribe()
    }

    fn close(&mut self) -> BoxFuture<'_, CloseOutcome> {
        Box::pin(async move {
            if !self.is_running() {
                return CloseOutcome::AlreadyExited;
            }
            self.kill().await;
            CloseOutcome::ForcedKill
        })
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

fn check_binary(path: &Path) -> Result<(), LaunchError> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(LaunchError::BinaryMissing(path.to_path_buf()));
        }
        Err(source) => {
            return Err(LaunchError::Spawn {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if !metadata.is_file() {
        return Err(LaunchError::NotExecutable(path.to_path_buf()));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(LaunchError::NotExecutable(path.to_path_buf()));
        }
    }

    Ok(())
}

/// Consume a child output stream line by line so OS buffers never fill.
fn drain_lines<R>(label: String, stream_name: &'static str, stream: Option<R>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(stream) = stream else {
        return;
    };
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(app = %label, stream = stream_name, "{}", line);
        }
    });
}

/// Own the child until it exits, either on its own or because the handle
/// asked for a kill (or was dropped).
async fn watch_child(
    label: String,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    notifier: Arc<ExitNotifier>,
    stdin: StdinSlot,
) {
    let exit = tokio::select! {
        status = child.wait() => {
            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(app = %label, error = %e, "failed to wait for application process");
                    None
                }
            };
            ProcessExit { code, forced: false }
        }
        _ = kill_rx => {
            if let Err(e) = child.kill().await {
                warn!(app = %label, error = %e, "failed to kill application process");
            }
            let code = child.try_wait().ok().flatten().and_then(|status| status.code());
            ProcessExit { code, forced: true }
        }
    };

    stdin.lock().await.take();

    info!(
        app = %label,
        exit_code = ?exit.code,
        forced = exit.forced,
        "application process exited"
    );
    notifier.notify(exit);
}
