#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use core_test_support::TestDirs;
use core_test_support::fixtures;
use core_test_support::program_output;
use core_test_support::recv_until_text;
use core_test_support::skip_if_no_compiler;
use core_test_support::texts;
use livecc_core::Config;
use livecc_core::ConfigOverrides;
use livecc_core::Outbound;
use livecc_core::RunService;
use livecc_protocol::Channel;
use livecc_protocol::ClientFrame;
use livecc_protocol::WireFrame;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

const LONG: Duration = Duration::from_secs(30);

struct Harness {
    dirs: TestDirs,
    service: Arc<RunService>,
    outbound: Outbound,
    rx: mpsc::Receiver<WireFrame>,
}

impl Harness {
    fn new(configure: impl FnOnce(&mut Config)) -> Self {
        let dirs = TestDirs::new();
        let mut config = dirs.config();
        configure(&mut config);
        let service = Arc::new(RunService::new(&config));
        let (outbound, rx) = service.connect();
        Self {
            dirs,
            service,
            outbound,
            rx,
        }
    }

    async fn send(&self, frame: ClientFrame) {
        self.service
            .dispatch(&self.outbound, Channel::Batch, frame)
            .await;
    }

    async fn run(&self, source: &str) {
        self.send(ClientFrame::Run {
            source: source.to_string(),
        })
        .await;
    }

    async fn until(&mut self, prefix: &str) -> Vec<WireFrame> {
        recv_until_text(&mut self.rx, LONG, prefix).await
    }

    async fn wait_for(&self, what: &str, mut check: impl FnMut(&RunService) -> bool) {
        let deadline = tokio::time::Instant::now() + LONG;
        while !check(&self.service) {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn wait_until_running(&self) {
        let id = self.outbound.connection_id();
        self.wait_for("program start", |service| {
            service
                .registry()
                .lookup(id)
                .is_some_and(|session| session.is_alive())
        })
        .await;
    }

    async fn wait_until_finished(&self) {
        self.wait_for("run teardown", |service| service.registry().is_empty())
            .await;
    }
}

/// `sh` standing in for the compiler: the submitted "source" is a shell
/// script run as `sh main.c -O2 -o <exe>`, so `$3` is the binary path.
fn shell_compiler(config: &mut Config) {
    config.compiler.program = "sh".to_string();
}

#[cfg(unix)]
#[tokio::test]
async fn compile_timeout_reports_error_and_never_runs() {
    let mut harness = Harness::new(|config| {
        shell_compiler(config);
        config.compile_timeout = Duration::from_millis(300);
    });

    harness.run("exec sleep 30\n").await;
    let frames = harness.until("ERROR:").await;

    assert_eq!(
        texts(&frames),
        vec![
            "BUILD_LOG: Compiling...\n".to_string(),
            "ERROR: Compilation timed out.".to_string(),
        ]
    );
    harness.wait_until_finished().await;
    assert_eq!(harness.dirs.scratch_entries(), 0);
    assert!(harness.rx.try_recv().is_err());
}

#[cfg(unix)]
#[tokio::test]
async fn compile_failure_reports_exit_code_and_output() {
    let mut harness = Harness::new(shell_compiler);

    harness.run("echo 'main.c:1:1: error: nope' >&2\nexit 4\n").await;
    let frames = harness.until("ERROR:").await;

    assert_eq!(
        texts(&frames).last().map(String::as_str),
        Some("ERROR: Compilation Failed (Exit Code: 4)\nmain.c:1:1: error: nope\n")
    );
    harness.wait_until_finished().await;
    assert!(harness.rx.try_recv().is_err(), "no END frame after a compile error");
}

#[cfg(unix)]
#[tokio::test]
async fn successful_run_streams_both_streams_then_status() {
    let mut harness = Harness::new(shell_compiler);

    harness
        .run("printf '#!/bin/sh\\necho out\\necho err >&2\\nexit 6\\n' > \"$3\"\nchmod +x \"$3\"\n")
        .await;
    let frames = harness.until("END:").await;
    let texts = texts(&frames);

    assert_eq!(texts[0], "BUILD_LOG: Compiling...\n");
    assert_eq!(texts[1], "BUILD_LOG: Compilation successful. Running...\n");
    assert!(texts.contains(&"OUTPUT:out\n".to_string()), "{texts:?}");
    assert!(texts.contains(&"OUTPUT: [Error] err\n".to_string()), "{texts:?}");
    assert_eq!(
        texts[texts.len() - 2..],
        [
            "OUTPUT:\r\nProcess exited with status: 6\r\n".to_string(),
            "END:SUCCESS".to_string(),
        ]
    );

    harness.wait_until_finished().await;
    assert_eq!(harness.dirs.scratch_entries(), 0);
}

#[tokio::test]
async fn hello_world_compiles_and_runs() {
    skip_if_no_compiler!();
    let mut harness = Harness::new(|_| {});

    harness.run(fixtures::HELLO).await;
    let frames = harness.until("END:").await;

    assert_eq!(
        program_output(&frames),
        "hello, livecc\n\r\nProcess exited with status: 0\r\n"
    );
    assert_eq!(texts(&frames).last().map(String::as_str), Some("END:SUCCESS"));
}

#[tokio::test]
async fn syntax_error_is_reported_without_running() {
    skip_if_no_compiler!();
    let mut harness = Harness::new(|_| {});

    harness.run(fixtures::SYNTAX_ERROR).await;
    let frames = harness.until("ERROR:").await;
    let error = texts(&frames).pop().expect("error frame");

    assert!(
        error.starts_with("ERROR: Compilation Failed (Exit Code: 1)\n"),
        "{error:?}"
    );
    assert!(error.contains("main.c"), "diagnostics name the source: {error:?}");
    harness.wait_until_finished().await;
    assert!(harness.rx.try_recv().is_err());
}

#[tokio::test]
async fn nonzero_exit_and_stderr_are_reported() {
    skip_if_no_compiler!();
    let mut harness = Harness::new(|_| {});

    harness.run(fixtures::EXIT_THREE).await;
    let texts = texts(&harness.until("END:").await);

    assert!(texts.contains(&"OUTPUT: [Error] bad thing\n".to_string()), "{texts:?}");
    assert!(texts.contains(&"OUTPUT:\r\nProcess exited with status: 3\r\n".to_string()));
    assert_eq!(texts.last().map(String::as_str), Some("END:SUCCESS"));
}

#[tokio::test]
async fn input_lines_reach_the_program() {
    skip_if_no_compiler!();
    let mut harness = Harness::new(|_| {});

    harness.run(fixtures::DOUBLE_INPUT).await;
    harness.wait_until_running().await;
    harness
        .send(ClientFrame::Input {
            text: "21".to_string(),
        })
        .await;
    let frames = harness.until("END:").await;

    assert!(program_output(&frames).contains("double=42\n"));
    assert_eq!(texts(&frames).last().map(String::as_str), Some("END:SUCCESS"));
}

#[tokio::test]
async fn runaway_program_is_killed_on_timeout() {
    skip_if_no_compiler!();
    let mut harness = Harness::new(|config| config.exec_timeout = Duration::from_millis(500));

    harness.run(fixtures::SILENT_LOOP).await;
    let frames = harness.until("END:").await;
    let texts = texts(&frames);

    assert_eq!(
        texts[texts.len() - 2..],
        [
            "OUTPUT: \r\n\u{1b}[31;1m*** PROCESS KILLED (Timeout) ***\u{1b}[0m\r\n".to_string(),
            "END:TIMEOUT".to_string(),
        ]
    );
    assert!(!texts.iter().any(|text| text == "END:SUCCESS"));
    harness.wait_until_finished().await;
    assert_eq!(harness.dirs.scratch_entries(), 0);
}

#[tokio::test]
async fn interrupt_cancels_the_run() {
    skip_if_no_compiler!();
    let mut harness = Harness::new(|_| {});

    harness.run(fixtures::BLOCK_ON_STDIN).await;
    harness.wait_until_running().await;
    harness.send(ClientFrame::Interrupt).await;
    let frames = harness.until("END:").await;
    let texts = texts(&frames);

    assert_eq!(
        texts[texts.len() - 2..],
        ["OUTPUT: \r\n^C\r\n".to_string(), "END:CANCELLED".to_string()]
    );
    harness.wait_until_finished().await;
    assert!(harness.rx.try_recv().is_err(), "exactly one terminal report");
}

#[tokio::test]
async fn second_run_is_rejected_while_one_is_live() {
    skip_if_no_compiler!();
    let mut harness = Harness::new(|_| {});

    harness.run(fixtures::BLOCK_ON_STDIN).await;
    harness.wait_until_running().await;
    harness.run(fixtures::HELLO).await;
    let frames = harness.until("ERROR:").await;

    assert_eq!(
        texts(&frames).last().map(String::as_str),
        Some("ERROR: A program is already running.")
    );
    assert!(harness
        .service
        .registry()
        .lookup(harness.outbound.connection_id())
        .is_some_and(|session| session.is_alive()));
    harness.send(ClientFrame::Interrupt).await;
    harness.until("END:").await;
}

#[tokio::test]
async fn disconnect_mid_run_releases_everything() {
    skip_if_no_compiler!();
    let harness = Harness::new(|_| {});

    harness.run(fixtures::BLOCK_ON_STDIN).await;
    harness.wait_until_running().await;
    harness.service.disconnect(harness.outbound.connection_id());

    assert!(harness.service.registry().is_empty());
    let deadline = tokio::time::Instant::now() + LONG;
    while harness.dirs.scratch_entries() != 0 {
        assert!(tokio::time::Instant::now() < deadline, "scratch dir left behind");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[test]
fn overrides_reach_the_runner_config() {
    let dirs = TestDirs::new();
    let config = Config::load(
        &dirs.home,
        ConfigOverrides {
            exec_timeout_ms: Some(1_234),
            ..Default::default()
        },
    )
    .expect("config");
    assert_eq!(config.exec_timeout, Duration::from_millis(1_234));
}
