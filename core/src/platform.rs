use serde::Deserialize;
use serde::Serialize;

/// Host family. Decided once at startup and passed down; nothing re-probes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }

    /// `prog` -> `prog` on Unix, `prog.exe` on Windows.
    pub fn executable_name(self, stem: &str) -> String {
        match self {
            Platform::Unix => stem.to_string(),
            Platform::Windows => format!("{stem}.exe"),
        }
    }
}

/// How an interactive session gets the user's binary onto the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnStrategy {
    /// The binary owns the pty; its wait status is the answer.
    Direct,
    /// A persistent shell owns the pty and is told to run the binary, then
    /// echo an exit-status sentinel.
    WrapperShell(WrapperShell),
}

impl SpawnStrategy {
    pub fn is_wrapper_shell(self) -> bool {
        matches!(self, SpawnStrategy::WrapperShell(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperShell {
    /// `cmd.exe /Q /D`: quiet, no AutoRun.
    Cmd,
    /// `/bin/sh` reading from the tty.
    Posix,
}

impl WrapperShell {
    pub fn program(self) -> &'static str {
        match self {
            WrapperShell::Cmd => "cmd.exe",
            WrapperShell::Posix => "/bin/sh",
        }
    }

    pub fn args(self) -> &'static [&'static str] {
        match self {
            WrapperShell::Cmd => &["/Q", "/D"],
            WrapperShell::Posix => &[],
        }
    }

    /// The line typed into the shell: run the binary (quoted), then echo the
    /// shell's last exit status inside the sentinel.
    pub fn launch_line(self, exe_file_name: &str) -> String {
        match self {
            WrapperShell::Cmd => {
                format!("\"{exe_file_name}\" & echo __RC:%errorlevel%__\r\n")
            }
            WrapperShell::Posix => {
                let target = format!("./{exe_file_name}");
                let quoted = shlex::try_quote(&target)
                    .map(|quoted| quoted.into_owned())
                    .unwrap_or(target);
                format!("{quoted}; echo __RC:$?__\n")
            }
        }
    }
}

/// The `terminal.strategy` config knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyChoice {
    #[default]
    Auto,
    Direct,
    Cmd,
    PosixShell,
}

impl StrategyChoice {
    pub fn resolve(self, platform: Platform) -> SpawnStrategy {
        match self {
            StrategyChoice::Auto => match platform {
                Platform::Windows => SpawnStrategy::WrapperShell(WrapperShell::Cmd),
                Platform::Unix => SpawnStrategy::Direct,
            },
            StrategyChoice::Direct => SpawnStrategy::Direct,
            StrategyChoice::Cmd => SpawnStrategy::WrapperShell(WrapperShell::Cmd),
            StrategyChoice::PosixShell => SpawnStrategy::WrapperShell(WrapperShell::Posix),
        }
    }
}
