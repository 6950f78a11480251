//! Non-interactive runner: compile submitted source in a scratch directory,
//! run the binary with piped stdio and stream its output as tagged frames.

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

use std::path::Path;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use livecc_protocol::EndStatus;
use livecc_protocol::OutputStream;
use livecc_protocol::ServerFrame;
use tokio::process::Child;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::compiler::CompileOutcome;
use crate::compiler::Compiler;
use crate::error::LiveccErr;
use crate::error::Result;
use crate::platform::Platform;
use crate::pump::pump_tagged;
use crate::session::Session;

const EXIT_CODE_SIGNAL_BASE: i32 = 128; // conventional shell: 128 + signal

const SCRATCH_DIR_PREFIX: &str = "livecc-";
const SOURCE_FILE_NAME: &str = "main.c";
const BINARY_STEM: &str = "main";

/// Output still in the pipes after the program exits is forwarded for at
/// most this long; a grandchild holding the pipes open cannot wedge the run.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

pub(crate) const NO_ACTIVE_PROGRAM_NOTICE: &str =
    " \r\n\u{1b}[31;1mError:\u{1b}[0m No active program running to receive input.\r\n";
const TIMEOUT_NOTICE: &str = " \r\n\u{1b}[31;1m*** PROCESS KILLED (Timeout) ***\u{1b}[0m\r\n";
const CANCEL_NOTICE: &str = " \r\n^C\r\n";

#[derive(Debug, Clone)]
pub struct ExecParams {
    pub compiler: Compiler,
    pub compile_timeout: Duration,
    pub exec_timeout: Duration,
    /// Parent directory for per-run scratch directories.
    pub scratch_dir: PathBuf,
    pub platform: Platform,
}

/// How a running program ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Exited(i32),
    TimedOut,
    Cancelled,
}

impl RunOutcome {
    /// The frames that close out a run: a human-readable line, then `END:`.
    pub fn report(self) -> [ServerFrame; 2] {
        match self {
            RunOutcome::Exited(code) => [
                ServerFrame::stdout(format!("\r\nProcess exited with status: {code}\r\n")),
                ServerFrame::End(EndStatus::Success),
            ],
            RunOutcome::TimedOut => [
                ServerFrame::stdout(TIMEOUT_NOTICE),
                ServerFrame::End(EndStatus::Timeout),
            ],
            RunOutcome::Cancelled => [
                ServerFrame::stdout(CANCEL_NOTICE),
                ServerFrame::End(EndStatus::Cancelled),
            ],
        }
    }
}

/// Compiles and runs `source` for `session`. Never fails: faults are logged
/// and reported to the client as an internal error. The scratch directory is
/// gone by the time this returns, or when the task running it is aborted.
pub async fn run_batch(session: &Arc<Session>, source: &str, params: &ExecParams) {
    let connection_id = session.connection_id();
    match run_batch_inner(session, source, params).await {
        Ok(()) => {}
        Err(LiveccErr::ConnectionClosed) => {
            debug!(%connection_id, "connection closed during run");
        }
        Err(err) => {
            error!(%connection_id, error = %err, "batch run failed");
            if session.claim_terminal_report() {
                let _ = session
                    .outbound()
                    .send(ServerFrame::error(format!(
                        "An internal server error occurred: {err}"
                    )))
                    .await;
            }
        }
    }
}

async fn run_batch_inner(session: &Arc<Session>, source: &str, params: &ExecParams) -> Result<()> {
    let outbound = session.outbound();

    tokio::fs::create_dir_all(&params.scratch_dir).await?;
    let scratch = tempfile::Builder::new()
        .prefix(SCRATCH_DIR_PREFIX)
        .tempdir_in(&params.scratch_dir)?;
    let source_path = scratch.path().join(SOURCE_FILE_NAME);
    let exe_path = scratch
        .path()
        .join(params.platform.executable_name(BINARY_STEM));
    tokio::fs::write(&source_path, source).await?;

    outbound.send(ServerFrame::build_log("Compiling...\n")).await?;
    let compiled = params
        .compiler
        .compile(&source_path, &exe_path, scratch.path(), params.compile_timeout)
        .await?;
    match compiled {
        CompileOutcome::Succeeded { .. } => {}
        CompileOutcome::TimedOut => {
            outbound
                .send(ServerFrame::error("Compilation timed out."))
                .await?;
            return Ok(());
        }
        CompileOutcome::Failed { exit_code, output } => {
            outbound
                .send(ServerFrame::error(format!(
                    "Compilation Failed (Exit Code: {exit_code})\n{output}"
                )))
                .await?;
            return Ok(());
        }
    }

    // Interrupted while the compiler was still running.
    if session.cancel_observed() {
        report(session, RunOutcome::Cancelled).await?;
        return Ok(());
    }

    outbound
        .send(ServerFrame::build_log("Compilation successful. Running...\n"))
        .await?;

    let outcome = execute(session, &exe_path, scratch.path(), params.exec_timeout).await?;
    info!(connection_id = %session.connection_id(), ?outcome, "run finished");
    report(session, outcome).await
}

async fn execute(session: &Arc<Session>, exe: &Path, cwd: &Path, timeout: Duration) -> Result<RunOutcome> {
    let mut child = Command::new(exe)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| LiveccErr::spawn(exe.display().to_string(), err))?;

    let stdin = child
        .stdin
        .take()
        .ok_or(LiveccErr::MissingPipe { stream: "stdin" })?;
    let stdout = child
        .stdout
        .take()
        .ok_or(LiveccErr::MissingPipe { stream: "stdout" })?;
    let stderr = child
        .stderr
        .take()
        .ok_or(LiveccErr::MissingPipe { stream: "stderr" })?;

    let kill = CancellationToken::new();
    session.attach_piped(kill.clone(), stdin).await?;

    let pump_cancel = session.tasks().cancellation().child_token();
    let outbound = session.outbound().clone();
    let stdout_task = session.tasks().spawn(pump_tagged(
        stdout,
        outbound.clone(),
        OutputStream::Stdout,
        pump_cancel.clone(),
    ));
    let stderr_task = session.tasks().spawn(pump_tagged(
        stderr,
        outbound,
        OutputStream::Stderr,
        pump_cancel.clone(),
    ));

    let outcome = tokio::select! {
        waited = tokio::time::timeout(timeout, child.wait()) => match waited {
            Ok(status) => RunOutcome::Exited(exit_code_of(status?)),
            Err(_) => {
                warn!(connection_id = %session.connection_id(), timeout_ms = timeout.as_millis() as u64, "program timed out; killing it");
                kill_child(&mut child).await;
                RunOutcome::TimedOut
            }
        },
        _ = kill.cancelled() => {
            kill_child(&mut child).await;
            RunOutcome::Cancelled
        }
    };
    session.mark_exited().await;

    if !matches!(outcome, RunOutcome::Exited(_)) {
        pump_cancel.cancel();
    }
    let drained = tokio::time::timeout(OUTPUT_DRAIN_GRACE, async {
        let _ = stdout_task.await;
        let _ = stderr_task.await;
    })
    .await;
    if drained.is_err() {
        debug!(connection_id = %session.connection_id(), "output still open after exit; abandoning pumps");
        pump_cancel.cancel();
    }

    Ok(outcome)
}

async fn kill_child(child: &mut Child) {
    if let Err(err) = child.kill().await {
        debug!(error = %err, "kill failed; child already gone");
    }
}

async fn report(session: &Session, outcome: RunOutcome) -> Result<()> {
    if !session.claim_terminal_report() {
        return Ok(());
    }
    for frame in outcome.report() {
        session.outbound().send(frame).await?;
    }
    Ok(())
}

pub(crate) fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        if let Some(signal) = status.signal() {
            return EXIT_CODE_SIGNAL_BASE + signal;
        }
    }
    -1
}
