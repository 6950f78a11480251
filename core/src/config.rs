use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use livecc_protocol::TerminalSize;
use serde::Deserialize;

use crate::error::LiveccErr;
use crate::error::Result;
use crate::platform::Platform;
use crate::platform::SpawnStrategy;
use crate::platform::StrategyChoice;
use crate::sentinel::DEFAULT_SENTINEL_BUFFER_BYTES;

pub const CONFIG_TOML_FILE: &str = "config.toml";
pub const LIVECC_HOME_ENV: &str = "LIVECC_HOME";

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_WORKSPACE_DIR: &str = "./temp_files";
const DEFAULT_COMPILER: &str = "gcc";
const DEFAULT_COMPILE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_EXEC_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_OUTBOUND_QUEUE: usize = 256;
const MIN_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Fully resolved runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Where named sources and their binaries live.
    pub workspace_dir: PathBuf,
    /// Parent of the per-run scratch directories of the batch runner.
    pub scratch_dir: PathBuf,
    pub compiler: CompilerConfig,
    pub compile_timeout: Duration,
    pub exec_timeout: Duration,
    pub terminal: TerminalConfig,
    /// Frames buffered per connection before producers wait on the socket.
    pub outbound_queue: usize,
    pub livecc_home: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    pub program: String,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalConfig {
    pub strategy: StrategyChoice,
    pub size: TerminalSize,
    pub sentinel_buffer_bytes: usize,
}

impl TerminalConfig {
    pub fn spawn_strategy(&self, platform: Platform) -> SpawnStrategy {
        self.strategy.resolve(platform)
    }
}

/// On-disk shape of `config.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigToml {
    pub bind_addr: Option<String>,
    pub workspace_dir: Option<PathBuf>,
    pub scratch_dir: Option<PathBuf>,
    pub compiler: Option<CompilerToml>,
    pub compile_timeout_ms: Option<u64>,
    pub exec_timeout_ms: Option<u64>,
    pub terminal: Option<TerminalToml>,
    pub outbound_queue: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompilerToml {
    pub program: Option<String>,
    pub flags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerminalToml {
    pub strategy: Option<StrategyChoice>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub sentinel_buffer_bytes: Option<usize>,
}

/// Values supplied on the command line; they win over `config.toml`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub bind_addr: Option<SocketAddr>,
    pub workspace_dir: Option<PathBuf>,
    pub scratch_dir: Option<PathBuf>,
    pub compiler_program: Option<String>,
    pub compile_timeout_ms: Option<u64>,
    pub exec_timeout_ms: Option<u64>,
    pub terminal_strategy: Option<StrategyChoice>,
}

impl Config {
    /// Reads `<livecc_home>/config.toml` (a missing file means defaults) and
    /// applies `overrides` on top.
    pub fn load(livecc_home: &Path, overrides: ConfigOverrides) -> Result<Self> {
        let cfg = load_config_as_toml(livecc_home)?;
        Self::load_from_base_config_with_overrides(cfg, overrides, livecc_home.to_path_buf())
    }

    pub fn load_from_base_config_with_overrides(
        cfg: ConfigToml,
        overrides: ConfigOverrides,
        livecc_home: PathBuf,
    ) -> Result<Self> {
        let ConfigOverrides {
            bind_addr,
            workspace_dir,
            scratch_dir,
            compiler_program,
            compile_timeout_ms,
            exec_timeout_ms,
            terminal_strategy,
        } = overrides;

        let bind_addr = match bind_addr {
            Some(addr) => addr,
            None => {
                let raw = cfg.bind_addr.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
                raw.parse().map_err(|err| LiveccErr::ConfigValue {
                    field: "bind_addr",
                    message: format!("{raw:?}: {err}"),
                })?
            }
        };

        let compiler_toml = cfg.compiler.unwrap_or_default();
        let program = compiler_program
            .or(compiler_toml.program)
            .unwrap_or_else(|| DEFAULT_COMPILER.to_string());
        if program.trim().is_empty() {
            return Err(LiveccErr::ConfigValue {
                field: "compiler.program",
                message: "must not be empty".to_string(),
            });
        }
        let flags = compiler_toml
            .flags
            .unwrap_or_else(|| vec!["-O2".to_string()]);

        let terminal_toml = cfg.terminal.unwrap_or_default();
        let default_size = TerminalSize::default();
        let cols = terminal_toml.cols.unwrap_or(default_size.cols);
        let rows = terminal_toml.rows.unwrap_or(default_size.rows);
        if cols == 0 || rows == 0 {
            return Err(LiveccErr::ConfigValue {
                field: "terminal",
                message: format!("window size {cols}x{rows} must be non-zero"),
            });
        }

        Ok(Self {
            bind_addr,
            workspace_dir: workspace_dir
                .or(cfg.workspace_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKSPACE_DIR)),
            scratch_dir: scratch_dir
                .or(cfg.scratch_dir)
                .unwrap_or_else(std::env::temp_dir),
            compiler: CompilerConfig { program, flags },
            compile_timeout: clamp_timeout(
                compile_timeout_ms
                    .or(cfg.compile_timeout_ms)
                    .unwrap_or(DEFAULT_COMPILE_TIMEOUT_MS),
            ),
            exec_timeout: clamp_timeout(
                exec_timeout_ms
                    .or(cfg.exec_timeout_ms)
                    .unwrap_or(DEFAULT_EXEC_TIMEOUT_MS),
            ),
            terminal: TerminalConfig {
                strategy: terminal_strategy
                    .or(terminal_toml.strategy)
                    .unwrap_or_default(),
                size: TerminalSize::new(cols, rows),
                sentinel_buffer_bytes: terminal_toml
                    .sentinel_buffer_bytes
                    .unwrap_or(DEFAULT_SENTINEL_BUFFER_BYTES),
            },
            outbound_queue: cfg
                .outbound_queue
                .unwrap_or(DEFAULT_OUTBOUND_QUEUE)
                .max(1),
            livecc_home,
        })
    }
}

fn clamp_timeout(ms: u64) -> Duration {
    Duration::from_millis(ms).clamp(MIN_TIMEOUT, MAX_TIMEOUT)
}

pub fn load_config_as_toml(livecc_home: &Path) -> Result<ConfigToml> {
    let path = livecc_home.join(CONFIG_TOML_FILE);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::info!("{} not found, using defaults", path.display());
            return Ok(ConfigToml::default());
        }
        Err(source) => return Err(LiveccErr::ConfigRead { path, source }),
    };
    toml::from_str(&contents).map_err(|source| LiveccErr::ConfigParse { path, source })
}

/// `$LIVECC_HOME` if set (it must exist), otherwise `~/.livecc`, which need
/// not exist yet.
pub fn find_livecc_home() -> std::io::Result<PathBuf> {
    if let Ok(val) = std::env::var(LIVECC_HOME_ENV)
        && !val.is_empty()
    {
        return PathBuf::from(val).canonicalize();
    }

    let mut home = dirs::home_dir().ok_or_else(|| {
        std::io::Error::new(ErrorKind::NotFound, "could not find home directory")
    })?;
    home.push(".livecc");
    Ok(home)
}
