use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;

use async_channel::Sender;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::LiveccErr;
use crate::error::Result;
use crate::exec::exit_code_of;

const READ_CHUNK_SIZE: usize = 8192;
/// How long to keep reading compiler output after it exits or is killed.
/// Bounded because helper processes (cc1, as, ld) may outlive the driver.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    Succeeded { output: String },
    Failed { exit_code: i32, output: String },
    TimedOut,
}

/// External C compiler invoked as `<program> <source> <flags...> -o <output>`.
#[derive(Debug, Clone)]
pub struct Compiler {
    program: String,
    flags: Vec<String>,
}

impl Compiler {
    pub fn new(program: impl Into<String>, flags: Vec<String>) -> Self {
        Self {
            program: program.into(),
            flags,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self, source: &Path, output: &Path) -> Vec<OsString> {
        let mut args = Vec::with_capacity(self.flags.len() + 3);
        args.push(source.as_os_str().to_owned());
        args.extend(self.flags.iter().map(OsString::from));
        args.push(OsString::from("-o"));
        args.push(output.as_os_str().to_owned());
        args
    }

    /// Runs the compiler to completion or until `timeout`, returning its
    /// combined stdout/stderr. A timed-out compiler is killed.
    pub async fn compile(
        &self,
        source: &Path,
        output: &Path,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<CompileOutcome> {
        let started = Instant::now();
        let mut child = Command::new(&self.program)
            .args(self.args(source, output))
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| LiveccErr::spawn(&self.program, err))?;

        let stdout = child
            .stdout
            .take()
            .ok_or(LiveccErr::MissingPipe { stream: "stdout" })?;
        let stderr = child
            .stderr
            .take()
            .ok_or(LiveccErr::MissingPipe { stream: "stderr" })?;

        let (agg_tx, agg_rx) = async_channel::unbounded::<Vec<u8>>();
        let stdout_task = tokio::spawn(forward_chunks(stdout, agg_tx.clone()));
        let stderr_task = tokio::spawn(forward_chunks(stderr, agg_tx));
        let abort_handles = [stdout_task.abort_handle(), stderr_task.abort_handle()];

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => Some(status?),
            Err(_) => {
                warn!(program = %self.program, timeout_ms = timeout.as_millis() as u64, "compiler timed out; killing it");
                if let Err(err) = child.start_kill() {
                    debug!(error = %err, "compiler kill failed");
                }
                let _ = child.wait().await;
                None
            }
        };

        let drained = tokio::time::timeout(OUTPUT_DRAIN_GRACE, async {
            let _ = stdout_task.await;
            let _ = stderr_task.await;
        })
        .await;
        if drained.is_err() {
            for handle in abort_handles {
                handle.abort();
            }
        }

        let mut combined = Vec::new();
        while let Ok(chunk) = agg_rx.try_recv() {
            combined.extend_from_slice(&chunk);
        }
        let output = String::from_utf8_lossy(&combined).into_owned();

        let outcome = match status {
            None => CompileOutcome::TimedOut,
            Some(status) if status.success() => CompileOutcome::Succeeded { output },
            Some(status) => CompileOutcome::Failed {
                exit_code: exit_code_of(status),
                output,
            },
        };
        info!(
            program = %self.program,
            source = %source.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            succeeded = matches!(outcome, CompileOutcome::Succeeded { .. }),
            "compile finished"
        );
        Ok(outcome)
    }
}

async fn forward_chunks<R>(mut reader: R, tx: Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
        }
    }
}
