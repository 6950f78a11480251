//! Byte pumps: relay a child's output to a connection until EOF, until the
//! connection goes away, or until cancelled.

use std::io::ErrorKind;
use std::io::Read;
use std::time::Duration;

use livecc_protocol::OutputStream;
use livecc_protocol::ServerFrame;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::Outbound;
use crate::sentinel::ExitSentinelScanner;

const READ_CHUNK_SIZE: usize = 8192;

/// Text flavour: every chunk becomes an `OUTPUT:` frame tagged by stream.
/// Returns the number of bytes read from `reader`.
pub async fn pump_tagged<R>(
    mut reader: R,
    outbound: Outbound,
    stream: OutputStream,
    cancel: CancellationToken,
) -> u64
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_CHUNK_SIZE];
    let mut carry = Utf8Carry::default();
    let mut total: u64 = 0;

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read(&mut buf) => read,
        };
        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(connection_id = %outbound.connection_id(), ?stream, error = %err, "output pump read failed");
                break;
            }
        };
        total += n as u64;

        let text = carry.push(&buf[..n]);
        if text.is_empty() {
            continue;
        }
        if outbound.send(tagged(stream, text)).await.is_err() {
            return total;
        }
    }

    if let Some(rest) = carry.finish()
        && !cancel.is_cancelled()
    {
        let _ = outbound.send(tagged(stream, rest)).await;
    }
    total
}

fn tagged(stream: OutputStream, text: String) -> ServerFrame {
    ServerFrame::Output { stream, text }
}

/// Binary flavour, for the pseudo-terminal. Runs on a blocking thread
/// because portable-pty readers are synchronous. Ends on EOF, on a read
/// error (EIO once the slave side is gone), or when the connection closes.
///
/// When `scanner` is set, output is also fed to it and `on_exit_code` is
/// called once with the first sentinel value.
pub fn pump_terminal<F>(
    mut reader: Box<dyn Read + Send>,
    outbound: Outbound,
    mut scanner: Option<ExitSentinelScanner>,
    mut on_exit_code: F,
) -> u64
where
    F: FnMut(i32),
{
    let mut buf = [0u8; READ_CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(ref err) if err.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(5));
                continue;
            }
            Err(_) => break,
        };
        total += n as u64;

        let chunk = &buf[..n];
        if outbound
            .blocking_send(ServerFrame::TerminalBytes(chunk.to_vec()))
            .is_err()
        {
            break;
        }

        if let Some(active) = scanner.as_mut() {
            if let Some(code) = active.feed(chunk) {
                on_exit_code(code);
            }
            if active.is_done() {
                scanner = None;
            }
        }
    }
    total
}

/// Holds back an incomplete trailing UTF-8 sequence so a multi-byte
/// character split across two reads is not turned into replacement chars.
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let keep = incomplete_tail_len(&self.pending);
        let tail = self.pending.split_off(self.pending.len() - keep);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = tail;
        text
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}

fn incomplete_tail_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(4) {
        let byte = bytes[len - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match byte {
            0x00..=0x7F => 1,
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return 0,
        };
        return if needed > back { back } else { 0 };
    }
    0
}
