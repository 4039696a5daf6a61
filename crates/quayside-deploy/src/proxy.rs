//! Reverse-proxy configuration management.
//!
//! Each service gets one Caddy site file in the sites directory; the base
//! Caddyfile imports them all. Installs are atomic: the rendered block is
//! written to a temp file, renamed into place, and the *whole merged*
//! configuration is validated with `caddy validate`. A rejected install is
//! rolled back so the running proxy never sees a broken config directory.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::command::{CommandExecutor, CommandOptions};
use crate::config::ProxyConfig;
use crate::error::{DeployError, DeployResult};
use crate::http::HttpClient;
use crate::types::Runtime;

/// Render the routing block for one service.
///
/// Three shapes: pure static serving when the runtime is static, a combined
/// block serving `/assets/*` statically and proxying everything else when
/// both a static path and a backend port are present, and proxy-only
/// otherwise. PHP backends are addressed through FastCGI.
#[must_use]
pub fn render_block(
    static_path: Option<&Path>,
    port: u16,
    service_port: Option<u16>,
    runtime: Runtime,
) -> String {
    let upstream = |target: u16| {
        if runtime == Runtime::Php {
            format!("php_fastcgi 127.0.0.1:{target}")
        } else {
            format!("reverse_proxy 127.0.0.1:{target}")
        }
    };

    match (static_path, service_port) {
        _ if runtime == Runtime::Static => {
            let root = static_path.map_or_else(String::new, |p| p.display().to_string());
            format!(
                ":{port} {{\n\
                 \troot * {root}\n\
                 \tencode zstd gzip\n\
                 \theader Cache-Control \"public, max-age=31536000, immutable\"\n\
                 \tfile_server\n\
                 }}\n"
            )
        }
        (Some(root), Some(target)) => {
            format!(
                ":{port} {{\n\
                 \thandle_path /assets/* {{\n\
                 \t\troot * {}\n\
                 \t\tencode zstd gzip\n\
                 \t\theader Cache-Control \"public, max-age=31536000, immutable\"\n\
                 \t\tfile_server\n\
                 \t}}\n\
                 \thandle {{\n\
                 \t\t{}\n\
                 \t}}\n\
                 }}\n",
                root.display(),
                upstream(target),
            )
        }
        (None, Some(target)) => {
            format!(":{port} {{\n\t{}\n}}\n", upstream(target))
        }
        (Some(root), None) => {
            // Static assets but no backend process to route to.
            format!(
                ":{port} {{\n\
                 \troot * {}\n\
                 \tencode zstd gzip\n\
                 \theader Cache-Control \"public, max-age=31536000, immutable\"\n\
                 \tfile_server\n\
                 }}\n",
                root.display(),
            )
        }
        (None, None) => {
            format!(":{port} {{\n\trespond \"service unavailable\" 503\n}}\n")
        }
    }
}

/// Boundary-safe check for a `:{port}` listener in a configuration text.
///
/// `:80` must not match inside `:8080`, so the match requires that the port
/// digits are not followed by another digit.
#[must_use]
pub fn listens_on(config: &str, port: u16) -> bool {
    let needle = format!(":{port}");
    let bytes = config.as_bytes();

    let mut from = 0;
    while let Some(pos) = config[from..].find(&needle) {
        let end = from + pos + needle.len();
        let followed_by_digit = bytes.get(end).is_some_and(u8::is_ascii_digit);
        if !followed_by_digit {
            return true;
        }
        from += pos + 1;
    }
    false
}

/// Manages per-service site files and the Caddy control surface.
#[derive(Debug, Clone)]
pub struct CaddyManager {
    executor: CommandExecutor,
    http: HttpClient,
    config: ProxyConfig,
}

impl CaddyManager {
    /// Create a manager for the given proxy configuration.
    #[must_use]
    pub fn new(executor: CommandExecutor, http: HttpClient, config: ProxyConfig) -> Self {
        Self {
            executor,
            http,
            config,
        }
    }

    /// Path of the site file for a service.
    #[must_use]
    pub fn site_path(&self, service_name: &str) -> PathBuf {
        self.config.sites_dir.join(format!("{service_name}.conf"))
    }

    /// Atomically install a rendered block as `<service>.conf` and validate
    /// the merged configuration.
    ///
    /// On validation failure the previous site file is restored (or the new
    /// one removed) before the error is returned; the running proxy is
    /// never touched by a failed install. A rollback that itself fails is
    /// reported as [`DeployError::RollbackFailure`].
    pub async fn install(&self, service_name: &str, block: &str) -> DeployResult<()> {
        tokio::fs::create_dir_all(&self.config.sites_dir)
            .await
            .map_err(|e| {
                DeployError::ConfigInstall(format!(
                    "failed to create sites directory {}: {e}",
                    self.config.sites_dir.display()
                ))
            })?;

        let target = self.site_path(service_name);
        let previous = match tokio::fs::read_to_string(&target).await {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(DeployError::ConfigInstall(format!(
                    "failed to read existing site file {}: {e}",
                    target.display()
                )))
            }
        };

        let temp = self.config.sites_dir.join(format!(".{service_name}.conf.tmp"));
        write_site_file(&temp, block).await.map_err(|e| {
            DeployError::ConfigInstall(format!("failed to write {}: {e}", temp.display()))
        })?;

        tokio::fs::rename(&temp, &target).await.map_err(|e| {
            let _ = std::fs::remove_file(&temp);
            DeployError::ConfigInstall(format!(
                "failed to install {}: {e}",
                target.display()
            ))
        })?;

        debug!(service = service_name, path = %target.display(), "site file installed");

        let result = self
            .executor
            .execute(
                &format!(
                    "{} validate --config {}",
                    self.config.caddy_bin,
                    self.config.base_config.display()
                ),
                CommandOptions::default().with_timeout(self.config.timeout()),
            )
            .await?;

        if !result.successful {
            warn!(
                service = service_name,
                "merged proxy configuration rejected, rolling back"
            );
            self.rollback(&target, previous).await?;
            let diagnostic = if result.stderr.is_empty() {
                result.stdout
            } else {
                result.stderr
            };
            return Err(DeployError::ConfigValidation(diagnostic));
        }

        info!(service = service_name, "proxy configuration validated");
        Ok(())
    }

    async fn rollback(&self, target: &Path, previous: Option<String>) -> DeployResult<()> {
        let outcome = match previous {
            Some(content) => write_site_file(target, &content).await,
            None => tokio::fs::remove_file(target).await,
        };

        outcome.map_err(|e| {
            DeployError::RollbackFailure(format!(
                "could not restore {}: {e}",
                target.display()
            ))
        })
    }

    /// Apply the validated on-disk configuration to the running proxy.
    ///
    /// A reload failure does not roll back the site file: the file is
    /// valid, only the live apply failed.
    pub async fn reload(&self) -> DeployResult<()> {
        let result = self
            .executor
            .execute(
                &format!(
                    "{} reload --config {}",
                    self.config.caddy_bin,
                    self.config.base_config.display()
                ),
                CommandOptions::default().with_timeout(self.config.timeout()),
            )
            .await?;

        if !result.successful {
            let diagnostic = if result.stderr.is_empty() {
                result.stdout
            } else {
                result.stderr
            };
            return Err(DeployError::ReloadFailed(diagnostic));
        }

        info!("proxy configuration reloaded");
        Ok(())
    }

    /// Whether the *running* proxy has a listener bound to `port`.
    ///
    /// Reads the live merged configuration from the admin API rather than
    /// the on-disk files, so pending-but-unapplied site files don't count.
    pub async fn port_in_use(&self, port: u16) -> DeployResult<bool> {
        let url = format!("{}/config/", self.config.admin_url.trim_end_matches('/'));
        let live = self.http.get_text(&url, "proxy-config").await?;
        Ok(listens_on(&live, port))
    }
}

async fn write_site_file(path: &Path, content: &str) -> std::io::Result<()> {
    tokio::fs::write(path, content).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o644);
        tokio::fs::set_permissions(path, perms).await?;
    }

    Ok(())
}
