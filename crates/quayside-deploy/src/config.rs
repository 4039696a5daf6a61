//! Configuration for the deployment pipeline.

use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::DeployResult;

/// Top-level configuration for the deploy service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DeployConfig {
    /// On-disk layout.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Edge proxy control surface.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Service schema source.
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Hosting provider API tokens.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Command execution defaults.
    #[serde(default)]
    pub command: CommandConfig,

    /// Deploy queue behaviour.
    #[serde(default)]
    pub queue: QueueConfig,
}

impl DeployConfig {
    /// Load configuration from the default sources.
    ///
    /// Later sources override earlier ones:
    /// 1. Default values
    /// 2. `quayside.toml` in the current directory (if present)
    /// 3. Environment variables with a `QUAYSIDE_` prefix
    pub fn load() -> DeployResult<Self> {
        Ok(Figment::new()
            .merge(Toml::file("quayside.toml"))
            .merge(Env::prefixed("QUAYSIDE_").split("__"))
            .extract()?)
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> DeployResult<Self> {
        Ok(Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("QUAYSIDE_").split("__"))
            .extract()?)
    }
}

/// On-disk layout for managed services.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Root directory containing one subdirectory per service.
    #[serde(default = "default_services_root")]
    pub services_root: PathBuf,

    /// Staging area for environment files keyed by service name.
    #[serde(default = "default_staging_root")]
    pub staging_root: PathBuf,
}

fn default_services_root() -> PathBuf {
    PathBuf::from("/var/lib/quayside/services")
}

fn default_staging_root() -> PathBuf {
    PathBuf::from("/tmp/quayside/staging")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            services_root: default_services_root(),
            staging_root: default_staging_root(),
        }
    }
}

/// Edge proxy (Caddy) control surface.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Caddy binary used for validate and reload.
    #[serde(default = "default_caddy_bin")]
    pub caddy_bin: String,

    /// Base Caddyfile that imports the sites directory.
    #[serde(default = "default_base_config")]
    pub base_config: PathBuf,

    /// Directory holding one site file per service.
    #[serde(default = "default_sites_dir")]
    pub sites_dir: PathBuf,

    /// Admin API base URL of the running proxy.
    #[serde(default = "default_admin_url")]
    pub admin_url: String,

    /// Timeout for validate and reload commands, in seconds.
    #[serde(default = "default_proxy_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_caddy_bin() -> String {
    "caddy".to_owned()
}

fn default_base_config() -> PathBuf {
    PathBuf::from("/etc/caddy/Caddyfile")
}

fn default_sites_dir() -> PathBuf {
    PathBuf::from("/etc/caddy/sites")
}

fn default_admin_url() -> String {
    "http://127.0.0.1:2019".to_owned()
}

const fn default_proxy_timeout_secs() -> u64 {
    30
}

impl ProxyConfig {
    /// Timeout for proxy control commands.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            caddy_bin: default_caddy_bin(),
            base_config: default_base_config(),
            sites_dir: default_sites_dir(),
            admin_url: default_admin_url(),
            timeout_secs: default_proxy_timeout_secs(),
        }
    }
}

/// Service schema source.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaConfig {
    /// HTTPS URL of the versioned service schema document.
    #[serde(default = "default_schema_url")]
    pub url: String,

    /// How long a fetched schema stays valid, in seconds.
    #[serde(default = "default_schema_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_schema_url() -> String {
    "https://schemas.quayside.dev/service/v1.json".to_owned()
}

const fn default_schema_ttl_secs() -> u64 {
    86_400
}

impl SchemaConfig {
    /// Cache time-to-live.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            url: default_schema_url(),
            ttl_secs: default_schema_ttl_secs(),
        }
    }
}

/// API tokens per hosting provider. Tokens are embedded in clone URLs and
/// API headers; they never appear in logs or error messages.
#[derive(Clone, Deserialize, Default)]
pub struct ProvidersConfig {
    /// Token for github.com.
    pub github_token: Option<String>,
    /// Token for gitlab.com.
    pub gitlab_token: Option<String>,
    /// Token for bitbucket.org.
    pub bitbucket_token: Option<String>,
}

impl std::fmt::Debug for ProvidersConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvidersConfig")
            .field("github_token", &self.github_token.as_ref().map(|_| "***"))
            .field("gitlab_token", &self.gitlab_token.as_ref().map(|_| "***"))
            .field(
                "bitbucket_token",
                &self.bitbucket_token.as_ref().map(|_| "***"),
            )
            .finish()
    }
}

/// Command execution defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    /// Default timeout for synchronous commands, in seconds.
    #[serde(default = "default_command_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_command_timeout_secs() -> u64 {
    300
}

impl CommandConfig {
    /// Default command timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_command_timeout_secs(),
        }
    }
}

/// Deploy queue behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Number of worker tasks draining the queue.
    #[serde(default = "default_worker_count")]
    pub workers: usize,

    /// Exclusivity window for a dispatched blueprint id, in seconds.
    /// A second dispatch for the same id inside this window is suppressed.
    #[serde(default = "default_exclusivity_secs")]
    pub exclusivity_secs: u64,

    /// Maximum number of queued jobs.
    #[serde(default = "default_max_queue_size")]
    pub max_size: usize,
}

const fn default_worker_count() -> usize {
    2
}

const fn default_exclusivity_secs() -> u64 {
    3_600
}

const fn default_max_queue_size() -> usize {
    64
}

impl QueueConfig {
    /// Exclusivity window for dispatched blueprint ids.
    #[must_use]
    pub const fn exclusivity(&self) -> Duration {
        Duration::from_secs(self.exclusivity_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            exclusivity_secs: default_exclusivity_secs(),
            max_size: default_max_queue_size(),
        }
    }
}
