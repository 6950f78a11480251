use std::fmt;

const BUILD_LOG_PREFIX: &str = "BUILD_LOG: ";
const OUTPUT_PREFIX: &str = "OUTPUT:";
const OUTPUT_ERROR_PREFIX: &str = "OUTPUT: [Error] ";
const ERROR_PREFIX: &str = "ERROR: ";
const END_PREFIX: &str = "END:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    fn prefix(self) -> &'static str {
        match self {
            OutputStream::Stdout => OUTPUT_PREFIX,
            OutputStream::Stderr => OUTPUT_ERROR_PREFIX,
        }
    }
}

/// Terminal status of a non-interactive run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndStatus {
    Success,
    Timeout,
    Cancelled,
}

impl fmt::Display for EndStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    BuildLog(String),
    Output { stream: OutputStream, text: String },
    Error(String),
    End(EndStatus),
    /// Untagged text, used for terminal-channel notices.
    Notice(String),
    /// Pseudo-terminal output, forwarded untouched.
    TerminalBytes(Vec<u8>),
}

impl ServerFrame {
    pub fn build_log(text: impl Into<String>) -> Self {
        Self::BuildLog(text.into())
    }

    pub fn stdout(text: impl Into<String>) -> Self {
        Self::Output {
            stream: OutputStream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self::Output {
            stream: OutputStream::Stderr,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error(text.into())
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Self::Notice(text.into())
    }
}

/// What actually goes over the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl WireFrame {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

impl From<ServerFrame> for WireFrame {
    fn from(frame: ServerFrame) -> Self {
        match frame {
            ServerFrame::BuildLog(text) => Self::Text(format!("{BUILD_LOG_PREFIX}{text}")),
            ServerFrame::Output { stream, text } => {
                Self::Text(format!("{}{text}", stream.prefix()))
            }
            ServerFrame::Error(text) => Self::Text(format!("{ERROR_PREFIX}{text}")),
            ServerFrame::End(status) => Self::Text(format!("{END_PREFIX}{status}")),
            ServerFrame::Notice(text) => Self::Text(text),
            ServerFrame::TerminalBytes(bytes) => Self::Binary(bytes),
        }
    }
}
