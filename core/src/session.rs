use std::fmt;
use std::future::Future;
use std::io;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard;
use std::sync::OnceLock;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use livecc_protocol::TerminalSize;
use portable_pty::ChildKiller;
use portable_pty::MasterPty;
use portable_pty::PtySize;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::ConnectionId;
use crate::connection::Outbound;
use crate::error::LiveccErr;
use crate::error::Result;
use crate::platform::SpawnStrategy;

pub(crate) type PtyWriter = Arc<StdMutex<Box<dyn Write + Send>>>;

/// The session's grip on its child process.
pub(crate) enum ChildHandle {
    /// A piped child owned by the runner task; cancelling the token makes the
    /// runner kill it.
    Piped { kill: CancellationToken },
    /// A pty-backed child. Dropping `master` closes the terminal.
    Pty {
        master: Box<dyn MasterPty + Send>,
        killer: Box<dyn ChildKiller + Send + Sync>,
        pid: Option<u32>,
    },
}

impl ChildHandle {
    fn kill(&mut self) {
        match self {
            ChildHandle::Piped { kill } => kill.cancel(),
            ChildHandle::Pty { killer, pid, .. } => {
                // SIGHUP on unix, TerminateProcess on windows.
                if let Err(err) = killer.kill() {
                    debug!(error = %err, "pty child kill failed; it has probably exited");
                }
                #[cfg(unix)]
                if let Some(pid) = *pid {
                    force_kill_process_group(pid);
                }
                #[cfg(not(unix))]
                let _ = pid;
            }
        }
    }
}

/// SIGKILLs the pty child's process group. The child is a session leader
/// (portable-pty calls `setsid`), so its pid is also the group id. Falls
/// back to the single process if the group is already gone.
#[cfg(unix)]
fn force_kill_process_group(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    let group_killed = unsafe { libc::kill(-pid, libc::SIGKILL) } == 0;
    if !group_killed {
        // SAFETY: as above.
        let killed = unsafe { libc::kill(pid, libc::SIGKILL) } == 0;
        if !killed {
            debug!(pid, "SIGKILL not delivered; child already reaped");
        }
    }
}

pub(crate) enum StdinHandle {
    Piped(ChildStdin),
    Pty(PtyWriter),
}

impl StdinHandle {
    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            StdinHandle::Piped(stdin) => {
                stdin.write_all(bytes).await?;
                stdin.flush().await
            }
            StdinHandle::Pty(writer) => {
                let writer = Arc::clone(writer);
                let bytes = bytes.to_vec();
                tokio::task::spawn_blocking(move || {
                    let mut guard = writer
                        .lock()
                        .map_err(|_| io::Error::other("pty writer poisoned"))?;
                    guard.write_all(&bytes)?;
                    guard.flush()
                })
                .await
                .map_err(io::Error::other)?
            }
        }
    }
}

/// Per-connection process state.
///
/// Flags are atomics so the dispatcher, pumps and the exit waiter can read
/// them without coordinating. The process handle and stdin are taken out
/// (never replaced) when the child is gone, so a session hosts at most one
/// child over its lifetime.
pub struct Session {
    outbound: Outbound,
    alive: AtomicBool,
    cancel_requested: AtomicBool,
    reconciled_exit_code: OnceLock<i32>,
    strategy: OnceLock<SpawnStrategy>,
    process: StdMutex<Option<ChildHandle>>,
    stdin: Mutex<Option<StdinHandle>>,
    window: StdMutex<TerminalSize>,
    tasks: TaskGroup,
    terminal_reported: AtomicBool,
    torn_down: AtomicBool,
}

impl Session {
    pub fn new(outbound: Outbound, window: TerminalSize) -> Self {
        Self {
            outbound,
            alive: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            reconciled_exit_code: OnceLock::new(),
            strategy: OnceLock::new(),
            process: StdMutex::new(None),
            stdin: Mutex::new(None),
            window: StdMutex::new(window),
            tasks: TaskGroup::default(),
            terminal_reported: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.outbound.connection_id()
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn cancel_observed(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn strategy(&self) -> Option<SpawnStrategy> {
        self.strategy.get().copied()
    }

    pub fn reconciled_exit_code(&self) -> Option<i32> {
        self.reconciled_exit_code.get().copied()
    }

    pub fn window(&self) -> TerminalSize {
        *self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tasks(&self) -> &TaskGroup {
        &self.tasks
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub(crate) async fn attach_piped(&self, kill: CancellationToken, stdin: ChildStdin) -> Result<()> {
        self.attach(ChildHandle::Piped { kill }, StdinHandle::Piped(stdin))
            .await
    }

    pub(crate) async fn attach_pty(
        &self,
        strategy: SpawnStrategy,
        master: Box<dyn MasterPty + Send>,
        killer: Box<dyn ChildKiller + Send + Sync>,
        pid: Option<u32>,
        writer: PtyWriter,
    ) -> Result<()> {
        let _ = self.strategy.set(strategy);
        self.attach(
            ChildHandle::Pty {
                master,
                killer,
                pid,
            },
            StdinHandle::Pty(writer),
        )
        .await
    }

    async fn attach(&self, mut process: ChildHandle, stdin: StdinHandle) -> Result<()> {
        let mut stdin_slot = self.stdin.lock().await;
        let mut process_slot = self.lock_process();
        // The connection went away while the child was spawning.
        if self.is_torn_down() || process_slot.is_some() {
            process.kill();
            return Err(LiveccErr::ConnectionClosed);
        }
        *process_slot = Some(process);
        *stdin_slot = Some(stdin);
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stores the sentinel-derived code. Only the first call has an effect.
    pub fn record_exit_code(&self, code: i32) -> bool {
        self.reconciled_exit_code.set(code).is_ok()
    }

    /// Writes to the child's stdin. Fails with `NoActiveProcess` once the
    /// session is no longer alive. A failed write marks the session dead.
    pub async fn write_input(&self, bytes: &[u8]) -> Result<()> {
        if !self.is_alive() {
            return Err(LiveccErr::NoActiveProcess);
        }
        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Err(LiveccErr::NoActiveProcess);
        };
        if let Err(err) = stdin.write_all(bytes).await {
            debug!(connection_id = %self.connection_id(), error = %err, "stdin write failed");
            *guard = None;
            self.alive.store(false, Ordering::SeqCst);
            return Err(LiveccErr::WriteToStdin);
        }
        // Teardown could not take stdin while this write held the lock.
        if self.is_torn_down() {
            *guard = None;
        }
        Ok(())
    }

    /// Applies a new window size. Requests after the child is gone are
    /// dropped without error.
    pub fn resize(&self, size: TerminalSize) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        let guard = self.lock_process();
        if let Some(ChildHandle::Pty { master, .. }) = guard.as_ref() {
            master
                .resize(PtySize {
                    rows: size.rows,
                    cols: size.cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(LiveccErr::resize_pty)?;
        }
        *self.window.lock().unwrap_or_else(PoisonError::into_inner) = size;
        Ok(())
    }

    /// Client interrupt: remember it, kill the child and stop accepting input.
    /// Returns whether a child was alive to be interrupted.
    pub async fn interrupt(&self) -> bool {
        self.cancel_requested.store(true, Ordering::SeqCst);
        let was_alive = self.alive.swap(false, Ordering::SeqCst);
        if let Some(mut process) = self.lock_process().take() {
            process.kill();
        }
        self.stdin.lock().await.take();
        was_alive
    }

    /// The child ended on its own. Releases the process handle and stdin.
    pub async fn mark_exited(&self) -> bool {
        let was_alive = self.alive.swap(false, Ordering::SeqCst);
        self.lock_process().take();
        self.stdin.lock().await.take();
        was_alive
    }

    /// Returns `true` for the first caller only. Whoever wins sends the
    /// session's single terminal status report.
    pub fn claim_terminal_report(&self) -> bool {
        !self.terminal_reported.swap(true, Ordering::SeqCst)
    }

    /// Releases everything the session owns. Safe to call more than once and
    /// from any task.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.alive.store(false, Ordering::SeqCst);
        if let Some(mut process) = self.lock_process().take() {
            process.kill();
        }
        if let Ok(mut stdin) = self.stdin.try_lock() {
            stdin.take();
        }
        self.tasks.cancel_all();
        debug!(connection_id = %self.connection_id(), "session torn down");
    }

    fn lock_process(&self) -> MutexGuard<'_, Option<ChildHandle>> {
        self.process.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connection_id", &self.connection_id())
            .field("alive", &self.is_alive())
            .field("cancel_observed", &self.cancel_observed())
            .field("strategy", &self.strategy())
            .field("reconciled_exit_code", &self.reconciled_exit_code())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

/// Background tasks belonging to one session, cancelled together.
#[derive(Debug, Default)]
pub struct TaskGroup {
    cancel: CancellationToken,
    handles: StdMutex<Vec<AbortHandle>>,
}

impl TaskGroup {
    /// Token that fires when the group is cancelled. Cooperative tasks select
    /// on it; everything spawned through the group is also aborted.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.track(handle.abort_handle());
        handle
    }

    pub fn track(&self, handle: AbortHandle) {
        if self.cancel.is_cancelled() {
            handle.abort();
            return;
        }
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|handle| !handle.is_finished());
        handles.push(handle);
    }

    pub fn cancel_all(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            handle.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
