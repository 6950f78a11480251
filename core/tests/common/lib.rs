#![allow(clippy::expect_used)]

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use livecc_core::Config;
use livecc_core::ConfigOverrides;
use livecc_core::config::ConfigToml;
use livecc_protocol::WireFrame;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub mod fixtures;

/// Whether the default compiler is on `PATH`. Tests that build C code use
/// [`skip_if_no_compiler!`] instead of calling this directly.
pub fn compiler_available() -> bool {
    which::which("gcc").is_ok()
}

#[macro_export]
macro_rules! skip_if_no_compiler {
    () => {{
        if !$crate::compiler_available() {
            eprintln!("gcc not found on PATH; skipping test.");
            return;
        }
    }};
    ($return_value:expr $(,)?) => {{
        if !$crate::compiler_available() {
            eprintln!("gcc not found on PATH; skipping test.");
            return $return_value;
        }
    }};
}

/// Workspace and scratch directories for one test, removed on drop.
pub struct TestDirs {
    _root: TempDir,
    pub workspace: PathBuf,
    pub scratch: PathBuf,
    pub home: PathBuf,
}

impl TestDirs {
    pub fn new() -> Self {
        let root = TempDir::new().expect("tempdir");
        let workspace = root.path().join("workspace");
        let scratch = root.path().join("scratch");
        let home = root.path().join("home");
        for dir in [&workspace, &scratch, &home] {
            std::fs::create_dir_all(dir).expect("create test dir");
        }
        Self {
            _root: root,
            workspace,
            scratch,
            home,
        }
    }

    /// Defaults, pointed at this test's directories.
    pub fn config(&self) -> Config {
        let overrides = ConfigOverrides {
            bind_addr: Some("127.0.0.1:0".parse().expect("addr")),
            workspace_dir: Some(self.workspace.clone()),
            scratch_dir: Some(self.scratch.clone()),
            ..Default::default()
        };
        Config::load_from_base_config_with_overrides(
            ConfigToml::default(),
            overrides,
            self.home.clone(),
        )
        .expect("test config")
    }

    /// Number of per-run scratch directories still on disk.
    pub fn scratch_entries(&self) -> usize {
        count_entries(&self.scratch)
    }
}

impl Default for TestDirs {
    fn default() -> Self {
        Self::new()
    }
}

fn count_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.count())
        .unwrap_or(0)
}

/// Receives frames until `done` matches one of them (inclusive) or
/// `timeout` elapses. Returns everything received either way.
pub async fn recv_until<F>(
    rx: &mut mpsc::Receiver<WireFrame>,
    timeout: Duration,
    mut done: F,
) -> Vec<WireFrame>
where
    F: FnMut(&WireFrame) -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut frames = Vec::new();
    while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        let finished = done(&frame);
        frames.push(frame);
        if finished {
            break;
        }
    }
    frames
}

/// Receives until a text frame starting with `prefix` arrives.
pub async fn recv_until_text(
    rx: &mut mpsc::Receiver<WireFrame>,
    timeout: Duration,
    prefix: &str,
) -> Vec<WireFrame> {
    recv_until(rx, timeout, |frame| {
        frame.as_text().is_some_and(|text| text.starts_with(prefix))
    })
    .await
}

pub fn texts(frames: &[WireFrame]) -> Vec<String> {
    frames
        .iter()
        .filter_map(WireFrame::as_text)
        .map(str::to_string)
        .collect()
}

/// Everything a terminal client would have displayed, binary and text
/// frames alike.
pub fn screen(frames: &[WireFrame]) -> String {
    let mut out = String::new();
    for frame in frames {
        match frame {
            WireFrame::Text(text) => out.push_str(text),
            WireFrame::Binary(bytes) => out.push_str(&String::from_utf8_lossy(bytes)),
        }
    }
    out
}

/// Concatenated `OUTPUT:` payloads (stdout and stderr), prefixes removed.
pub fn program_output(frames: &[WireFrame]) -> String {
    texts(frames)
        .iter()
        .filter_map(|text| {
            text.strip_prefix("OUTPUT: [Error] ")
                .or_else(|| text.strip_prefix("OUTPUT:"))
        })
        .collect()
}

/// Writes an executable shell script named `name` into `dir`, for terminal
/// tests that do not need a real compiler.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod");
    path
}
