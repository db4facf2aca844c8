//! Purpose: Run the external provisioning engine against a staged directory.
//! Exports: `Engine`, `CommandEngine`.
//! Role: The single seam between request handling and the engine black box.
//! Invariants: stdin is closed; the engine can never block on an interactive prompt.
//! Invariants: stdout goes to `Ui::output`, stderr to `Ui::error`.
//! Invariants: A non-zero engine exit is a result, not an `Error`.
//! Invariants: On timeout the engine's whole process group is killed and reaped.
//! Notes: `Engine::run` blocks; callers run it on a blocking worker thread.
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::runtime::{Builder, Handle};
use tracing::warn;

use crate::core::error::{Error, ErrorKind};
use crate::core::invocation::Invocation;
use crate::core::ui::Ui;

/// Exit code reported when the engine was terminated by a signal.
const SIGNALED_EXIT_CODE: i32 = 1;

pub trait Engine: Send + Sync {
    /// Runs one operation, streaming everything it prints into `ui`, and
    /// returns the engine's exit code.
    fn run(&self, invocation: &Invocation, ui: &mut dyn Ui) -> Result<i32, Error>;
}

/// Spawns `<program> <subcommand> <args...>` as a child process.
#[derive(Clone, Debug)]
pub struct CommandEngine {
    program: PathBuf,
    timeout: Option<Duration>,
}

struct Captured {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn capture(&self, invocation: &Invocation) -> Result<Captured, Error> {
        let mut command = Command::new(&self.program);
        command
            .arg(invocation.operation.subcommand())
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group: a timeout can reach helpers the engine forks, and a
        // terminal Ctrl-C meant for the server does not abort in-flight runs.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|err| {
            Error::new(ErrorKind::Engine)
                .with_message("failed to launch provisioning engine")
                .with_hint("Check --engine points at an executable.")
                .with_path(&self.program)
                .with_source(err)
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        tokio::select! {
            result = async {
                let (status, stdout, stderr) =
                    tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr));
                Ok(Captured {
                    status: status.map_err(|err| {
                        Error::new(ErrorKind::Engine)
                            .with_message("failed waiting for provisioning engine")
                            .with_source(err)
                    })?,
                    stdout: stdout?,
                    stderr: stderr?,
                })
            } => result,
            () = deadline(self.timeout) => {
                terminate(&mut child).await;
                let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
                Err(Error::new(ErrorKind::Timeout)
                    .with_message(format!("provisioning engine timed out after {secs}s"))
                    .with_hint("Raise --run-timeout-secs or omit it to wait indefinitely."))
            }
        }
    }
}

impl Engine for CommandEngine {
    fn run(&self, invocation: &Invocation, ui: &mut dyn Ui) -> Result<i32, Error> {
        let captured = block_on(self.capture(invocation))??;

        if !captured.stdout.is_empty() {
            ui.output(&String::from_utf8_lossy(&captured.stdout));
        }
        if !captured.stderr.is_empty() {
            ui.error(&String::from_utf8_lossy(&captured.stderr));
        }

        Ok(captured.status.code().unwrap_or(SIGNALED_EXIT_CODE))
    }
}

/// Drives `future` on the ambient runtime when called from one of its blocking
/// threads, or on a private current-thread runtime otherwise.
fn block_on<F: Future>(future: F) -> Result<F::Output, Error> {
    if let Ok(handle) = Handle::try_current() {
        return Ok(handle.block_on(future));
    }
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start engine runtime")
                .with_source(err)
        })?;
    Ok(runtime.block_on(future))
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await.map_err(|err| {
            Error::new(ErrorKind::Engine)
                .with_message("failed reading provisioning engine output")
                .with_source(err)
        })?;
    }
    Ok(buf)
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) {
        // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
        // addresses the process group the engine leads.
        if unsafe { libc::kill(-pid, libc::SIGKILL) } != 0 {
            warn!(
                pid,
                error = %std::io::Error::last_os_error(),
                "failed to kill engine process group"
            );
        }
    }
    if let Err(err) = child.kill().await {
        warn!(error = %err, "failed to kill provisioning engine");
    }
}
