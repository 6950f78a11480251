//! Interactive runner: attach an already built binary to a pseudo-terminal
//! and stream raw bytes in both directions.

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use livecc_protocol::ServerFrame;
use livecc_protocol::TerminalSize;
use portable_pty::CommandBuilder;
use portable_pty::PtySize;
use portable_pty::native_pty_system;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::LiveccErr;
use crate::error::Result;
use crate::platform::SpawnStrategy;
use crate::pump::pump_terminal;
use crate::reconcile::ExitEvidence;
use crate::reconcile::reconcile_exit_code;
use crate::reconcile::signed_exit_code;
use crate::sentinel::ExitSentinelScanner;
use crate::session::PtyWriter;
use crate::session::Session;

/// Pause between the child's exit and the exit report, so the last bytes
/// the pty produced reach the client first.
const EXIT_FLUSH_DELAY: Duration = Duration::from_millis(30);

pub(crate) const INTERRUPT_NOTICE: &str = "\r\n^C\r\n[process terminated]\r\n";
const IDLE_NOTICE: &str = "[terminal idle – press Run to start again]\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalParams {
    pub strategy: SpawnStrategy,
    pub size: TerminalSize,
    pub sentinel_buffer_bytes: usize,
}

/// Starts `exe` on a fresh pty owned by `session` and spawns the output pump
/// and the exit waiter. Returns once the child is running.
pub async fn start_terminal(session: &Arc<Session>, exe: &Path, params: &TerminalParams) -> Result<()> {
    let exe = tokio::fs::canonicalize(exe).await?;
    let exe_file_name = exe
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or(LiveccErr::ExecutableNotFound)?;
    let cwd = exe.parent().ok_or(LiveccErr::ExecutableNotFound)?;
    let strategy = params.strategy;
    let size = session.window();

    let pair = native_pty_system()
        .openpty(PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(LiveccErr::create_pty)?;

    let mut command = match strategy {
        SpawnStrategy::Direct => CommandBuilder::new(&exe),
        SpawnStrategy::WrapperShell(shell) => {
            let mut command = CommandBuilder::new(shell.program());
            command.args(shell.args());
            command
        }
    };
    command.cwd(cwd);

    let mut child = pair
        .slave
        .spawn_command(command)
        .map_err(LiveccErr::create_pty)?;
    // The child holds its own handle; ours would keep the pty open after exit.
    drop(pair.slave);
    let killer = child.clone_killer();
    let pid = child.process_id();

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(LiveccErr::create_pty)?;
    let writer: PtyWriter = Arc::new(StdMutex::new(
        pair.master.take_writer().map_err(LiveccErr::create_pty)?,
    ));

    if let Err(err) = session
        .attach_pty(strategy, pair.master, killer, pid, writer)
        .await
    {
        tokio::task::spawn_blocking(move || child.wait());
        return Err(err);
    }

    let connection_id = session.connection_id();
    info!(%connection_id, exe = %exe.display(), ?strategy, "terminal session started");
    session
        .outbound()
        .send(ServerFrame::notice(format!("[started] {exe_file_name}\n")))
        .await?;

    let scanner = strategy
        .is_wrapper_shell()
        .then(|| ExitSentinelScanner::new(params.sentinel_buffer_bytes));
    let pump_session = Arc::clone(session);
    let pump_outbound = session.outbound().clone();
    tokio::task::spawn_blocking(move || {
        let forwarded = pump_terminal(reader, pump_outbound, scanner, |code| {
            if pump_session.record_exit_code(code) {
                debug!(connection_id = %pump_session.connection_id(), exit_code = code, "exit sentinel seen");
            }
        });
        debug!(%connection_id, bytes = forwarded, "terminal pump finished");
    });

    if let SpawnStrategy::WrapperShell(shell) = strategy {
        session
            .write_input(shell.launch_line(&exe_file_name).as_bytes())
            .await?;
    }

    let waiter_session = Arc::clone(session);
    session.tasks().spawn(async move {
        let raw = match tokio::task::spawn_blocking(move || child.wait()).await {
            Ok(Ok(status)) => signed_exit_code(status.exit_code()),
            Ok(Err(err)) => {
                warn!(%connection_id, error = %err, "waiting for terminal child failed");
                -1
            }
            Err(err) => {
                warn!(%connection_id, error = %err, "terminal waiter panicked");
                -1
            }
        };
        waiter_session.mark_exited().await;
        tokio::time::sleep(EXIT_FLUSH_DELAY).await;
        report_exit(&waiter_session, strategy, raw).await;
    });

    Ok(())
}

async fn report_exit(session: &Session, strategy: SpawnStrategy, raw: i32) {
    let connection_id = session.connection_id();
    let evidence = ExitEvidence {
        raw,
        sentinel: session.reconciled_exit_code(),
        cancel_observed: session.cancel_observed(),
    };
    let exit_code = reconcile_exit_code(strategy, evidence);

    if !session.claim_terminal_report() {
        info!(%connection_id, exit_code, raw, "terminal child ended after interrupt");
        return;
    }
    info!(%connection_id, exit_code, raw, sentinel = ?evidence.sentinel, "terminal child exited");

    for frame in exit_frames(exit_code) {
        if session.outbound().send(frame).await.is_err() {
            break;
        }
    }
}

fn exit_frames(exit_code: i32) -> [ServerFrame; 2] {
    [
        ServerFrame::notice(format!("\r\n[process exited with code {exit_code}]\r\n")),
        ServerFrame::notice(IDLE_NOTICE),
    ]
}
