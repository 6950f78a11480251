//! Wire grammar shared by the `livecc` server and its clients.
//!
//! Every inbound WebSocket message is decoded into a [`ClientFrame`] and every
//! outbound event is rendered from a [`ServerFrame`] into a [`WireFrame`]. The
//! grammar is deliberately tiny: textual prefixes for the non-interactive
//! channel and raw bytes plus two control forms for the terminal channel.

mod inbound;
mod outbound;

pub use inbound::Channel;
pub use inbound::ClientFrame;
pub use inbound::INPUT_PREFIX;
pub use inbound::INTERRUPT_BYTE;
pub use inbound::RESIZE_PREFIX;
pub use inbound::RUN_PREFIX;
pub use outbound::EndStatus;
pub use outbound::OutputStream;
pub use outbound::ServerFrame;
pub use outbound::WireFrame;

use serde::Deserialize;
use serde::Serialize;

/// Geometry of a pseudo-terminal window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}
