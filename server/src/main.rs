use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use clap::ValueEnum;
use livecc_core::Config;
use livecc_core::ConfigOverrides;
use livecc_core::find_livecc_home;
use livecc_core::platform::StrategyChoice;

/// Compile and run C programs for browser clients over WebSockets.
#[derive(Debug, Parser)]
#[command(name = "livecc-server", version)]
struct Cli {
    /// Address to listen on.
    #[arg(long, value_name = "ADDR")]
    bind: Option<SocketAddr>,

    /// Directory holding sources and binaries for the pty endpoint.
    #[arg(long, value_name = "DIR")]
    workspace_dir: Option<PathBuf>,

    /// Parent directory for per-run scratch directories.
    #[arg(long, value_name = "DIR")]
    scratch_dir: Option<PathBuf>,

    /// Compiler executable.
    #[arg(long, value_name = "PROGRAM")]
    compiler: Option<String>,

    /// Compile timeout in milliseconds.
    #[arg(long, value_name = "MS")]
    compile_timeout_ms: Option<u64>,

    /// Run timeout for the compile-and-run endpoint, in milliseconds.
    #[arg(long, value_name = "MS")]
    exec_timeout_ms: Option<u64>,

    /// How pty children are launched.
    #[arg(long, value_enum, value_name = "STRATEGY")]
    terminal_strategy: Option<CliStrategy>,

    /// Overrides `$LIVECC_HOME` (default `~/.livecc`).
    #[arg(long, value_name = "DIR")]
    livecc_home: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliStrategy {
    Auto,
    Direct,
    Cmd,
    PosixShell,
}

impl From<CliStrategy> for StrategyChoice {
    fn from(value: CliStrategy) -> Self {
        match value {
            CliStrategy::Auto => StrategyChoice::Auto,
            CliStrategy::Direct => StrategyChoice::Direct,
            CliStrategy::Cmd => StrategyChoice::Cmd,
            CliStrategy::PosixShell => StrategyChoice::PosixShell,
        }
    }
}

impl Cli {
    fn into_overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            bind_addr: self.bind,
            workspace_dir: self.workspace_dir,
            scratch_dir: self.scratch_dir,
            compiler_program: self.compiler,
            compile_timeout_ms: self.compile_timeout_ms,
            exec_timeout_ms: self.exec_timeout_ms,
            terminal_strategy: self.terminal_strategy.map(Into::into),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    let mut cli = Cli::parse();

    let livecc_home = match cli.livecc_home.take() {
        Some(home) => home,
        None => find_livecc_home().context("failed to locate livecc home")?,
    };
    let config = Config::load(&livecc_home, cli.into_overrides())
        .with_context(|| format!("failed to load config from {}", livecc_home.display()))?;
    tracing::info!(
        bind_addr = %config.bind_addr,
        workspace_dir = %config.workspace_dir.display(),
        compiler = %config.compiler.program,
        "starting livecc"
    );

    livecc_server::run_main(config).await
}

fn setup_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
