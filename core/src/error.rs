use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::connection::ConnectionId;

pub type Result<T> = std::result::Result<T, LiveccErr>;

/// Faults that abort an operation. Expected outcomes such as a compile error
/// or a timeout are not represented here; see `CompileOutcome` and
/// `RunOutcome`.
#[derive(Debug, Error)]
pub enum LiveccErr {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to create terminal session: {pty_error}")]
    CreatePty {
        #[source]
        pty_error: anyhow::Error,
    },

    #[error("connection {connection_id} already has a session")]
    DuplicateSession { connection_id: ConnectionId },

    #[error("missing/invalid fileName")]
    InvalidFileName,

    #[error("executable not found. Compile first.")]
    ExecutableNotFound,

    #[error("{stream} pipe was unexpectedly not available")]
    MissingPipe { stream: &'static str },

    #[error("failed to resize terminal: {pty_error}")]
    ResizePty {
        #[source]
        pty_error: anyhow::Error,
    },

    #[error("no active program running to receive input")]
    NoActiveProcess,

    #[error("failed to write to stdin")]
    WriteToStdin,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value for `{field}`: {message}")]
    ConfigValue { field: &'static str, message: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl LiveccErr {
    pub(crate) fn spawn(program: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    pub(crate) fn create_pty(error: anyhow::Error) -> Self {
        Self::CreatePty { pty_error: error }
    }

    pub(crate) fn resize_pty(error: anyhow::Error) -> Self {
        Self::ResizePty { pty_error: error }
    }
}
