//! Environment and secret file management.
//!
//! Every service owns two key-value files with distinct confidentiality
//! levels: `.env` (owner/group read-write) and `.env.secrets` (owner
//! read-write only). Values can be staged before the working directory
//! exists and promoted into it later. Secret values never appear in
//! command strings or log lines.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::command::{CommandExecutor, CommandOptions};
use crate::error::{DeployError, DeployResult};

/// Plain environment file name.
pub const ENV_FILE: &str = ".env";
/// Secrets file name.
pub const SECRETS_FILE: &str = ".env.secrets";

/// Mode for the plain environment file.
pub const ENV_MODE: u32 = 0o640;
/// Mode for the secrets file; strictly tighter than [`ENV_MODE`].
pub const SECRETS_MODE: u32 = 0o600;

/// Manages per-service `.env` and `.env.secrets` files.
#[derive(Debug, Clone)]
pub struct SecretsManager {
    staging_root: PathBuf,
    executor: CommandExecutor,
}

impl SecretsManager {
    /// Create a manager staging under `staging_root`.
    #[must_use]
    pub fn new(staging_root: impl Into<PathBuf>, executor: CommandExecutor) -> Self {
        Self {
            staging_root: staging_root.into(),
            executor,
        }
    }

    /// Staging directory for a service.
    #[must_use]
    pub fn staging_dir(&self, name: &str) -> PathBuf {
        self.staging_root.join(name)
    }

    /// Stage environment and secret values for a service whose working
    /// directory may not exist yet.
    ///
    /// Both files are written with their final permission split. Mode
    /// reassertion is fire-and-forgotten through the executor; the command
    /// names only the file paths, never the values.
    pub async fn stage(
        &self,
        name: &str,
        env_vars: &BTreeMap<String, String>,
        secrets: &BTreeMap<String, String>,
    ) -> DeployResult<()> {
        let dir = self.staging_dir(name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| write_error(&dir, &e))?;

        let env_path = dir.join(ENV_FILE);
        let secrets_path = dir.join(SECRETS_FILE);

        write_env_file(&env_path, env_vars, ENV_MODE)?;
        write_env_file(&secrets_path, secrets, SECRETS_MODE)?;

        // Re-assert the permission split in the background; a failure here
        // never widens either file because the modes were already applied
        // at creation.
        let chmod = format!(
            "chmod {ENV_MODE:o} {} && chmod {SECRETS_MODE:o} {}",
            env_path.display(),
            secrets_path.display()
        );
        if let Err(e) = self
            .executor
            .execute(&chmod, CommandOptions::default().detached())
            .await
        {
            warn!(service = name, error = %e, "permission reassertion not queued");
        }

        info!(service = name, "environment files staged");
        Ok(())
    }

    /// Promote staged files into the working directory, or create empty
    /// ones when nothing was staged.
    ///
    /// Idempotent: re-running after a partial failure converges on both
    /// files present with the correct permission split, and the staging
    /// directory removed.
    pub async fn promote(&self, working_dir: &Path, name: &str) -> DeployResult<()> {
        let staged = self.staging_dir(name);

        let env_content = read_staged(&staged.join(ENV_FILE)).await?;
        let secrets_content = read_staged(&staged.join(SECRETS_FILE)).await?;

        let env_target = working_dir.join(ENV_FILE);
        let secrets_target = working_dir.join(SECRETS_FILE);

        write_raw_file(&env_target, env_content.as_deref().unwrap_or(""), ENV_MODE)?;
        write_raw_file(
            &secrets_target,
            secrets_content.as_deref().unwrap_or(""),
            SECRETS_MODE,
        )?;

        if staged.exists() {
            tokio::fs::remove_dir_all(&staged)
                .await
                .map_err(|e| write_error(&staged, &e))?;
            debug!(service = name, "staging area removed");
        }

        info!(service = name, path = %working_dir.display(), "environment files promoted");
        Ok(())
    }

    /// Parse a `KEY=VALUE` file.
    ///
    /// Blank lines and lines starting with `#` are skipped; surrounding
    /// quotes are stripped from values.
    pub async fn read(&self, file: &Path) -> DeployResult<BTreeMap<String, String>> {
        let content = tokio::fs::read_to_string(file).await?;
        Ok(parse_env(&content))
    }

    /// Key names in a service's secrets file. Values are never returned.
    pub async fn secret_keys(&self, working_dir: &Path) -> DeployResult<Vec<String>> {
        let parsed = self.read(&working_dir.join(SECRETS_FILE)).await?;
        Ok(parsed.into_keys().collect())
    }
}

fn write_error(path: &Path, e: &std::io::Error) -> DeployError {
    DeployError::FileWrite {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Serialise key-value pairs as `KEY=VALUE` lines and write them with the
/// given mode.
fn write_env_file(path: &Path, vars: &BTreeMap<String, String>, mode: u32) -> DeployResult<()> {
    let mut content = String::new();
    for (key, value) in vars {
        content.push_str(key);
        content.push('=');
        content.push_str(value);
        content.push('\n');
    }
    write_raw_file(path, &content, mode)
}

/// Write a file and apply its mode, even when the file already exists.
fn write_raw_file(path: &Path, content: &str, mode: u32) -> DeployResult<()> {
    std::fs::write(path, content).map_err(|e| write_error(path, &e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| write_error(path, &e))?;
    }

    Ok(())
}

async fn read_staged(path: &Path) -> DeployResult<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn parse_env(content: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        let key = key.trim().to_owned();
        let value = strip_quotes(value.trim()).to_owned();
        vars.insert(key, value);
    }

    vars
}

fn strip_quotes(value: &str) -> &str {
    let stripped = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')));
    stripped.unwrap_or(value)
}
