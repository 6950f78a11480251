//! Picks the exit code reported to the client for an interactive session.

use crate::platform::SpawnStrategy;

/// `STATUS_CONTROL_C_EXIT` (0xC000013A) as a signed 32-bit value. Console
/// hosts report it for a wrapper shell torn down by a control event.
pub const CONTROL_C_EXIT: i32 = 0xC000_013A_u32 as i32;

/// Inputs gathered over the lifetime of one interactive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitEvidence {
    /// Raw wait status of the process that owned the pty.
    pub raw: i32,
    /// Code recovered from the sentinel echoed by a wrapper shell.
    pub sentinel: Option<i32>,
    /// Whether the client sent an interrupt during the session.
    pub cancel_observed: bool,
}

pub fn reconcile_exit_code(strategy: SpawnStrategy, evidence: ExitEvidence) -> i32 {
    let ExitEvidence {
        raw,
        sentinel,
        cancel_observed,
    } = evidence;

    match strategy {
        // The binary is the pty owner; a sentinel cannot exist here but would
        // win if it did.
        SpawnStrategy::Direct => sentinel.unwrap_or(raw),
        SpawnStrategy::WrapperShell(_) => {
            let code = sentinel.unwrap_or(raw);
            // Heuristic: a control-exit nobody asked for is console teardown
            // noise, not a failure of the user's program.
            if code == CONTROL_C_EXIT && !cancel_observed {
                0
            } else {
                code
            }
        }
    }
}

/// Converts a portable-pty exit code (unsigned) to the signed form shells
/// print, so `0xC000013A` reads as `-1073741510`.
pub fn signed_exit_code(code: u32) -> i32 {
    code as i32
}
