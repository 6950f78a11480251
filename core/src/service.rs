use std::sync::Arc;

use livecc_protocol::Channel;
use livecc_protocol::ClientFrame;
use livecc_protocol::ServerFrame;
use livecc_protocol::WireFrame;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::compiler::Compiler;
use crate::config::Config;
use crate::connection::ConnectionId;
use crate::connection::Outbound;
use crate::error::LiveccErr;
use crate::error::Result;
use crate::exec::ExecParams;
use crate::exec::NO_ACTIVE_PROGRAM_NOTICE;
use crate::exec::run_batch;
use crate::platform::Platform;
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::store::SourceStore;
use crate::terminal::INTERRUPT_NOTICE;
use crate::terminal::TerminalParams;
use crate::terminal::start_terminal;

/// Routes decoded client frames to sessions and owns everything shared
/// between connections.
#[derive(Debug)]
pub struct RunService {
    registry: Arc<SessionRegistry>,
    store: SourceStore,
    exec_params: Arc<ExecParams>,
    terminal: TerminalParams,
    outbound_queue: usize,
}

impl RunService {
    pub fn new(config: &Config) -> Self {
        let platform = Platform::current();
        let compiler = Compiler::new(config.compiler.program.clone(), config.compiler.flags.clone());
        let store = SourceStore::new(
            config.workspace_dir.clone(),
            compiler.clone(),
            config.compile_timeout,
            platform,
        );
        let exec_params = ExecParams {
            compiler,
            compile_timeout: config.compile_timeout,
            exec_timeout: config.exec_timeout,
            scratch_dir: config.scratch_dir.clone(),
            platform,
        };
        let terminal = TerminalParams {
            strategy: config.terminal.spawn_strategy(platform),
            size: config.terminal.size,
            sentinel_buffer_bytes: config.terminal.sentinel_buffer_bytes,
        };
        Self {
            registry: Arc::new(SessionRegistry::new()),
            store,
            exec_params: Arc::new(exec_params),
            terminal,
            outbound_queue: config.outbound_queue,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &SourceStore {
        &self.store
    }

    /// Allocates an id and an outbound queue for a new connection. The
    /// receiver belongs to the connection's writer task.
    pub fn connect(&self) -> (Outbound, mpsc::Receiver<WireFrame>) {
        Outbound::channel(self.registry.next_connection_id(), self.outbound_queue)
    }

    /// Starts the terminal session for a `/pty` connection. On failure the
    /// client has already been sent an `ERROR:` frame and the connection
    /// should be closed.
    pub async fn open_terminal(&self, outbound: &Outbound, file_name: Option<&str>) -> Result<()> {
        let result = self.open_terminal_inner(outbound, file_name).await;
        if let Err(err) = &result {
            let message = match err {
                LiveccErr::InvalidFileName | LiveccErr::ExecutableNotFound => format!("{err}\n"),
                other => format!("An internal server error occurred: {other}\n"),
            };
            warn!(connection_id = %outbound.connection_id(), error = %err, "terminal rejected");
            let _ = outbound.send(ServerFrame::error(message)).await;
        }
        result
    }

    async fn open_terminal_inner(&self, outbound: &Outbound, file_name: Option<&str>) -> Result<()> {
        let name = file_name.ok_or(LiveccErr::InvalidFileName)?;
        let exe = self.store.resolve_executable(name)?;

        let id = outbound.connection_id();
        let session = Arc::new(Session::new(outbound.clone(), self.terminal.size));
        self.registry.register(id, Arc::clone(&session))?;

        if let Err(err) = start_terminal(&session, &exe, &self.terminal).await {
            self.registry.remove_if_current(id, &session);
            session.teardown();
            return Err(err);
        }
        Ok(())
    }

    pub async fn dispatch(&self, outbound: &Outbound, channel: Channel, frame: ClientFrame) {
        let id = outbound.connection_id();
        match frame {
            ClientFrame::Run { source } => self.start_batch(outbound, source).await,
            ClientFrame::Input { text } => self.deliver_line(outbound, text).await,
            ClientFrame::Raw(bytes) => self.deliver_raw(id, &bytes).await,
            ClientFrame::Resize(size) => {
                if let Some(session) = self.registry.lookup(id)
                    && let Err(err) = session.resize(size)
                {
                    debug!(connection_id = %id, error = %err, "resize failed");
                }
            }
            ClientFrame::Interrupt => self.interrupt(outbound, channel).await,
            ClientFrame::Ignored { reason } => {
                debug!(connection_id = %id, reason, "ignoring client frame");
            }
        }
    }

    /// Removes the connection's session, if any, and releases its resources.
    pub fn disconnect(&self, id: ConnectionId) {
        if let Some(session) = self.registry.remove(id) {
            session.teardown();
            info!(connection_id = %id, "session closed");
        }
    }

    async fn start_batch(&self, outbound: &Outbound, source: String) {
        let id = outbound.connection_id();
        let session = Arc::new(Session::new(outbound.clone(), self.terminal.size));
        if let Err(err) = self.registry.register(id, Arc::clone(&session)) {
            debug!(connection_id = %id, error = %err, "run rejected");
            let _ = outbound
                .send(ServerFrame::error("A program is already running."))
                .await;
            return;
        }

        info!(connection_id = %id, source_bytes = source.len(), "run requested");
        let registry = Arc::clone(&self.registry);
        let params = Arc::clone(&self.exec_params);
        let task_session = Arc::clone(&session);
        session.tasks().spawn(async move {
            run_batch(&task_session, &source, &params).await;
            registry.remove_if_current(task_session.connection_id(), &task_session);
            task_session.teardown();
        });
    }

    async fn deliver_line(&self, outbound: &Outbound, text: String) {
        let id = outbound.connection_id();
        let delivered = match self.registry.lookup(id) {
            Some(session) => {
                let line = format!("{text}\n");
                match session.write_input(line.as_bytes()).await {
                    Ok(()) => true,
                    Err(LiveccErr::NoActiveProcess) => false,
                    Err(err) => {
                        debug!(connection_id = %id, error = %err, "input not delivered");
                        false
                    }
                }
            }
            None => false,
        };
        if !delivered {
            let _ = outbound.send(ServerFrame::stdout(NO_ACTIVE_PROGRAM_NOTICE)).await;
        }
    }

    async fn deliver_raw(&self, id: ConnectionId, bytes: &[u8]) {
        let Some(session) = self.registry.lookup(id) else {
            return;
        };
        match session.write_input(bytes).await {
            Ok(()) | Err(LiveccErr::NoActiveProcess) => {}
            Err(err) => debug!(connection_id = %id, error = %err, "keystrokes not delivered"),
        }
    }

    async fn interrupt(&self, outbound: &Outbound, channel: Channel) {
        let id = outbound.connection_id();
        let Some(session) = self.registry.lookup(id) else {
            if channel == Channel::Batch {
                let _ = outbound.send(ServerFrame::stdout(NO_ACTIVE_PROGRAM_NOTICE)).await;
            }
            return;
        };
        let was_alive = session.interrupt().await;
        info!(connection_id = %id, was_alive, "interrupt received");

        // The batch runner notices the kill itself and reports END:CANCELLED.
        if channel == Channel::Terminal && was_alive && session.claim_terminal_report() {
            let _ = session
                .outbound()
                .send(ServerFrame::notice(INTERRUPT_NOTICE))
                .await;
        }
    }
}
