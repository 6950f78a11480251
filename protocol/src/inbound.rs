use crate::TerminalSize;

pub const RUN_PREFIX: &str = "RUN:";
pub const INPUT_PREFIX: &str = "INPUT:";
pub const RESIZE_PREFIX: &str = "__RESIZE__:";
/// ETX, what a terminal sends for Ctrl+C.
pub const INTERRUPT_BYTE: u8 = 0x03;

/// Which endpoint a frame arrived on. The same bytes mean different things
/// on the two channels: `RUN:` typed into a terminal is just keystrokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Compile-and-run with piped stdio.
    Batch,
    /// Pseudo-terminal attached to an already compiled binary.
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Run { source: String },
    /// A line of console input. A newline is appended before delivery.
    Input { text: String },
    Resize(TerminalSize),
    Interrupt,
    /// Keystrokes forwarded to the terminal verbatim.
    Raw(Vec<u8>),
    Ignored { reason: &'static str },
}

impl ClientFrame {
    pub fn from_text(text: &str, channel: Channel) -> Self {
        if is_interrupt(text.as_bytes()) {
            return Self::Interrupt;
        }

        match channel {
            Channel::Batch => {
                if let Some(source) = text.strip_prefix(RUN_PREFIX) {
                    Self::Run {
                        source: source.to_string(),
                    }
                } else if let Some(input) = text.strip_prefix(INPUT_PREFIX) {
                    Self::Input {
                        text: input.to_string(),
                    }
                } else {
                    Self::Ignored {
                        reason: "unknown batch directive",
                    }
                }
            }
            Channel::Terminal => {
                if let Some(dims) = text.strip_prefix(RESIZE_PREFIX) {
                    match parse_resize(dims) {
                        Some(size) => Self::Resize(size),
                        None => Self::Ignored {
                            reason: "malformed resize",
                        },
                    }
                } else if let Some(input) = text.strip_prefix(INPUT_PREFIX) {
                    Self::Raw(input.as_bytes().to_vec())
                } else {
                    Self::Raw(text.as_bytes().to_vec())
                }
            }
        }
    }

    pub fn from_binary(bytes: &[u8], channel: Channel) -> Self {
        match channel {
            Channel::Batch => Self::Ignored {
                reason: "binary frame on batch channel",
            },
            Channel::Terminal if is_interrupt(bytes) => Self::Interrupt,
            Channel::Terminal => Self::Raw(bytes.to_vec()),
        }
    }
}

fn is_interrupt(bytes: &[u8]) -> bool {
    bytes == [INTERRUPT_BYTE]
}

/// Parses `<cols>x<rows>`. Anything else, including zero sizes, is rejected.
fn parse_resize(dims: &str) -> Option<TerminalSize> {
    let (cols, rows) = dims.trim().split_once('x')?;
    let cols = cols.trim().parse::<u16>().ok()?;
    let rows = rows.trim().parse::<u16>().ok()?;
    if cols == 0 || rows == 0 {
        return None;
    }
    Some(TerminalSize::new(cols, rows))
}
