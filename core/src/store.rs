//! Named C sources under the workspace directory, and the binaries built
//! from them for the terminal endpoint.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::compiler::CompileOutcome;
use crate::compiler::Compiler;
use crate::error::LiveccErr;
use crate::error::Result;
use crate::platform::Platform;

const SOURCE_EXTENSION: &str = ".c";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildReport {
    /// `exe` is the executable's file name inside the workspace.
    Built { exe: String, output: String },
    CompileError { output: String },
    TimedOut,
    NotFound,
}

/// Returns the stem of a client-supplied source name, or `InvalidFileName`
/// unless it is a bare `<stem>.c` that cannot escape the workspace.
pub fn validate_file_name(name: &str) -> Result<&str> {
    let stem = name
        .strip_suffix(SOURCE_EXTENSION)
        .ok_or(LiveccErr::InvalidFileName)?;
    if stem.is_empty()
        || stem.contains(['/', '\\'])
        || stem.contains("..")
        || stem.starts_with('.')
        || stem.chars().any(char::is_control)
    {
        return Err(LiveccErr::InvalidFileName);
    }
    Ok(stem)
}

#[derive(Debug, Clone)]
pub struct SourceStore {
    root: PathBuf,
    compiler: Compiler,
    compile_timeout: Duration,
    platform: Platform,
}

impl SourceStore {
    pub fn new(root: PathBuf, compiler: Compiler, compile_timeout: Duration, platform: Platform) -> Self {
        Self {
            root,
            compiler,
            compile_timeout,
            platform,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates an empty `<uuid>.c` and returns its name.
    pub async fn create(&self) -> Result<String> {
        tokio::fs::create_dir_all(&self.root).await?;
        let name = format!("{}{SOURCE_EXTENSION}", Uuid::new_v4());
        tokio::fs::write(self.root.join(&name), b"").await?;
        info!(file_name = %name, "source file created");
        Ok(name)
    }

    pub async fn save(&self, name: &str, code: &str) -> Result<SaveOutcome> {
        validate_file_name(name)?;
        let path = self.root.join(name);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(SaveOutcome::NotFound);
        }
        tokio::fs::write(&path, code).await?;
        Ok(SaveOutcome::Saved)
    }

    /// Compiles `<stem>.c` into the platform executable next to it.
    pub async fn build(&self, name: &str) -> Result<BuildReport> {
        let stem = validate_file_name(name)?;
        let source = self.root.join(name);
        if !tokio::fs::try_exists(&source).await? {
            return Ok(BuildReport::NotFound);
        }
        let exe = self.platform.executable_name(stem);

        let outcome = self
            .compiler
            .compile(Path::new(name), Path::new(&exe), &self.root, self.compile_timeout)
            .await?;
        Ok(match outcome {
            CompileOutcome::Succeeded { output } => BuildReport::Built { exe, output },
            CompileOutcome::Failed { output, .. } => BuildReport::CompileError { output },
            CompileOutcome::TimedOut => BuildReport::TimedOut,
        })
    }

    /// Locates the binary built from `name`. The platform's own naming is
    /// tried first, then the other convention.
    pub fn resolve_executable(&self, name: &str) -> Result<PathBuf> {
        let stem = validate_file_name(name)?;
        let preferred = self.platform.executable_name(stem);
        let alternate = match self.platform {
            Platform::Unix => Platform::Windows.executable_name(stem),
            Platform::Windows => Platform::Unix.executable_name(stem),
        };
        [preferred, alternate]
            .into_iter()
            .map(|candidate| self.root.join(candidate))
            .find(|path| path.is_file())
            .ok_or(LiveccErr::ExecutableNotFound)
    }
}
