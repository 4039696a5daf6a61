//! Runtime version resolution and installation.
//!
//! Each managed runtime maps to a version-manager backend from the
//! pin-per-directory family: nodenv, pyenv, goenv, phpenv, and asdf for
//! Java. `setup` installs a version and pins it in the service's working
//! directory; `list` surfaces the installable versions, newest first.

use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

use crate::command::{CommandExecutor, CommandOptions};
use crate::error::{DeployError, DeployResult};
use crate::types::Runtime;

/// Version-manager backend for one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Nodenv,
    Pyenv,
    Goenv,
    Phpenv,
    AsdfJava,
}

impl Backend {
    fn for_runtime(runtime: Runtime) -> DeployResult<Self> {
        match runtime {
            Runtime::NodeJs => Ok(Self::Nodenv),
            Runtime::Python => Ok(Self::Pyenv),
            Runtime::Go => Ok(Self::Goenv),
            Runtime::Php => Ok(Self::Phpenv),
            Runtime::Java => Ok(Self::AsdfJava),
            Runtime::Static | Runtime::Image => {
                Err(DeployError::UnsupportedRuntime(runtime.as_str().to_owned()))
            }
        }
    }

    /// Install a specific version. All backends treat an already-installed
    /// version as a no-op.
    fn install_command(self, version: &str) -> String {
        match self {
            Self::Nodenv => format!("nodenv install --skip-existing {version}"),
            Self::Pyenv => format!("pyenv install --skip-existing {version}"),
            Self::Goenv => format!("goenv install --skip-existing {version}"),
            Self::Phpenv => format!("phpenv install --skip-existing {version}"),
            Self::AsdfJava => format!("asdf install java {version}"),
        }
    }

    /// Pin a version for the working directory the command runs in.
    fn pin_command(self, version: &str) -> String {
        match self {
            Self::Nodenv => format!("nodenv local {version}"),
            Self::Pyenv => format!("pyenv local {version}"),
            Self::Goenv => format!("goenv local {version}"),
            Self::Phpenv => format!("phpenv local {version}"),
            Self::AsdfJava => format!("asdf local java {version}"),
        }
    }

    /// List every installable version.
    const fn list_command(self) -> &'static str {
        match self {
            Self::Nodenv => "nodenv install --list",
            Self::Pyenv => "pyenv install --list",
            Self::Goenv => "goenv install --list",
            Self::Phpenv => "phpenv install --list",
            Self::AsdfJava => "asdf list all java",
        }
    }

    /// Backend-specific keep-filter for list output.
    ///
    /// pyenv's listing mixes distributions (anaconda, pypy, …) into the
    /// CPython versions; only semver-like tokens survive.
    fn keep(self, token: &str) -> bool {
        match self {
            Self::Pyenv => semver_like(token),
            _ => true,
        }
    }
}

/// Token starts with a digit and has at least `major.minor`, optionally
/// `.patch` and a trailing suffix.
fn semver_like(token: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^\d+\.\d+(\.\d+)?[0-9A-Za-z.+-]*$").expect("valid pattern"));
    pattern.is_match(token)
}

/// Numeric segment-aware comparison key.
///
/// Each dot-separated segment compares by its numeric prefix first, then
/// by the remaining text, so `1.10` orders above `1.9`.
fn version_key(version: &str) -> Vec<(u64, String)> {
    version
        .split('.')
        .map(|segment| {
            let digits: String = segment.chars().take_while(char::is_ascii_digit).collect();
            let number = digits.parse().unwrap_or(0);
            (number, segment[digits.len()..].to_owned())
        })
        .collect()
}

/// Parse a raw version listing: trim whitespace and control characters,
/// drop blanks, apply the keep-filter, dedupe, and sort newest-first.
fn parse_versions(output: &str, backend: Backend) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut versions: Vec<String> = output
        .lines()
        .map(|line| {
            line.trim_matches(|c: char| c.is_whitespace() || c.is_control())
                .to_owned()
        })
        .filter(|line| !line.is_empty())
        .filter(|line| backend.keep(line))
        .filter(|line| seen.insert(line.clone()))
        .collect();

    versions.sort_by(|a, b| version_key(b).cmp(&version_key(a)));
    versions
}

/// Installs and pins runtime versions through the version-manager CLIs.
#[derive(Debug, Clone)]
pub struct RuntimeManager {
    executor: CommandExecutor,
    timeout: Duration,
}

impl RuntimeManager {
    /// Create a manager. Installs can compile from source, so the timeout
    /// should be generous.
    #[must_use]
    pub fn new(executor: CommandExecutor, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    /// Install `version` and pin it for the working directory at `path`.
    pub async fn setup(&self, path: &Path, runtime: Runtime, version: &str) -> DeployResult<()> {
        let backend = Backend::for_runtime(runtime)?;

        info!(runtime = %runtime, version, path = %path.display(), "setting up runtime");

        let install = self
            .executor
            .execute(
                &backend.install_command(version),
                CommandOptions::default().with_timeout(self.timeout),
            )
            .await?;
        if !install.successful {
            return Err(DeployError::RuntimeSetup {
                runtime: runtime.as_str().to_owned(),
                version: version.to_owned(),
                stderr: install.stderr,
            });
        }

        let pin = self
            .executor
            .execute(
                &backend.pin_command(version),
                CommandOptions::default()
                    .with_timeout(self.timeout)
                    .with_cwd(path),
            )
            .await?;
        if !pin.successful {
            return Err(DeployError::RuntimeSetup {
                runtime: runtime.as_str().to_owned(),
                version: version.to_owned(),
                stderr: pin.stderr,
            });
        }

        debug!(runtime = %runtime, version, "runtime pinned");
        Ok(())
    }

    /// List installable versions for a runtime, newest first.
    pub async fn list(&self, runtime: Runtime) -> DeployResult<Vec<String>> {
        let backend = Backend::for_runtime(runtime)?;

        let result = self
            .executor
            .execute(
                backend.list_command(),
                CommandOptions::default().with_timeout(self.timeout),
            )
            .await?;

        if !result.successful {
            return Err(DeployError::Execution {
                command: result.command,
                stderr: result.stderr,
            });
        }

        Ok(parse_versions(&result.stdout, backend))
    }
}
