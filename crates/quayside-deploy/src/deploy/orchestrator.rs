//! Core pipeline logic: blueprint in, routed service out.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::command::{CommandExecutor, CommandOptions};
use crate::config::PathsConfig;
use crate::error::{DeployError, DeployResult};
use crate::http::SchemaCache;
use crate::proxy::{render_block, CaddyManager};
use crate::runtime::RuntimeManager;
use crate::secrets::SecretsManager;
use crate::source::SourceProvider;
use crate::store::{BlueprintStore, RemoteStore, ServiceStore};
use crate::types::{Blueprint, BlueprintId, BlueprintStatus, Service, ServiceSpec, SourceKind};

/// The keyed stores the pipeline reads and writes.
#[derive(Clone)]
pub struct Stores {
    /// Blueprint records.
    pub blueprints: Arc<dyn BlueprintStore>,
    /// Remote repository references.
    pub remotes: Arc<dyn RemoteStore>,
    /// Deployed service records.
    pub services: Arc<dyn ServiceStore>,
}

/// The infrastructure components the pipeline drives.
#[derive(Clone)]
pub struct Components {
    /// External command execution.
    pub executor: CommandExecutor,
    /// Reverse-proxy configuration.
    pub proxy: CaddyManager,
    /// Runtime version management.
    pub runtimes: RuntimeManager,
    /// Environment and secret files.
    pub secrets: SecretsManager,
    /// Repository resolution and cloning.
    pub source: SourceProvider,
    /// Service schema cache.
    pub schema: Arc<SchemaCache>,
}

/// Turns a blueprint into a running, routed service.
///
/// The pipeline claims the blueprint (`in_progress`) before any I/O,
/// executes the steps strictly in order, and settles on exactly one of the
/// terminal states. Every component failure is caught here; nothing
/// escapes past the pipeline boundary.
pub struct Orchestrator {
    stores: Stores,
    components: Components,
    paths: PathsConfig,
    command_timeout: Duration,
}

impl Orchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        stores: Stores,
        components: Components,
        paths: PathsConfig,
        command_timeout: Duration,
    ) -> Self {
        Self {
            stores,
            components,
            paths,
            command_timeout,
        }
    }

    /// Process one blueprint to a terminal status.
    ///
    /// Re-invoking for a blueprint that already finished is a no-op, so a
    /// retry dispatch against the same id is always safe.
    pub async fn run(&self, id: &BlueprintId) -> DeployResult<()> {
        let blueprint = self
            .stores
            .blueprints
            .find(id)
            .await?
            .ok_or_else(|| DeployError::reference(format!("blueprint not found: {id}")))?;

        if blueprint.status.is_terminal() {
            info!(
                blueprint_id = %id,
                status = %blueprint.status,
                "blueprint already finished, nothing to do"
            );
            return Ok(());
        }

        // Claim before any I/O so a crash shows up as a stuck in-progress
        // blueprint rather than a silently lost one.
        self.stores
            .blueprints
            .update_status(id, BlueprintStatus::InProgress, None)
            .await?;

        match self.execute(&blueprint).await {
            Ok(service) => {
                self.stores
                    .blueprints
                    .update_status(id, BlueprintStatus::Completed, None)
                    .await?;
                self.stores.services.insert(&service).await?;
                info!(
                    blueprint_id = %id,
                    service = %service.name,
                    "deployment completed"
                );
                Ok(())
            }
            Err(e) => {
                error!(blueprint_id = %id, error = %e, "deployment failed");
                self.stores
                    .blueprints
                    .update_status(id, BlueprintStatus::Failed, Some(&e.to_string()))
                    .await?;
                Err(e)
            }
        }
    }

    async fn execute(&self, blueprint: &Blueprint) -> DeployResult<Service> {
        // Structural validation against the cached service schema, then
        // parse into the typed spec.
        self.components.schema.validate(&blueprint.config).await?;
        let spec: ServiceSpec = serde_json::from_value(blueprint.config.clone())
            .map_err(|e| DeployError::validation(format!("configuration does not parse: {e}")))?;

        let working_dir = self.working_path(&spec);
        tokio::fs::create_dir_all(&working_dir).await?;

        if spec.source == SourceKind::Git {
            self.materialize_source(&spec, &working_dir).await?;
        }

        if spec.runtime.is_managed() {
            if let Some(version) = &spec.version {
                self.components
                    .runtimes
                    .setup(&working_dir, spec.runtime, version)
                    .await?;
            }
        }

        if !spec.env.is_empty() || !spec.secrets.is_empty() {
            self.components
                .secrets
                .stage(&spec.name, &spec.env, &spec.secrets)
                .await?;
        }
        self.components
            .secrets
            .promote(&working_dir, &spec.name)
            .await?;

        if let Some(build) = &spec.build_command {
            self.run_service_command(build, &spec, &working_dir).await?;
        }

        if let Some(port) = spec.port {
            self.expose(&spec, port, &working_dir).await?;
        }

        if let Some(run) = &spec.run_command {
            self.run_service_command(run, &spec, &working_dir).await?;
        }

        if spec.port.is_some() {
            self.components.proxy.reload().await?;
        }

        Ok(Service::from_spec(&spec, blueprint, &working_dir))
    }

    /// Resolve the referenced remote, refresh its commit, and clone it.
    async fn materialize_source(
        &self,
        spec: &ServiceSpec,
        working_dir: &std::path::Path,
    ) -> DeployResult<()> {
        let remote_id = spec.remote_id.as_deref().ok_or_else(|| {
            DeployError::validation("git-sourced blueprint has no remote reference")
        })?;

        let remote = self
            .stores
            .remotes
            .find(remote_id)
            .await?
            .ok_or_else(|| DeployError::reference(format!("remote not found: {remote_id}")))?;

        // Record the commit being deployed. Provider API trouble is not
        // fatal; the clone still resolves the branch head.
        match self.components.source.latest_commit(&remote).await {
            Ok(Some(commit)) => {
                self.stores.remotes.update_commit(&remote.id, &commit).await?;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(remote = %remote.full_name(), error = %e, "could not refresh commit");
            }
        }

        self.components.source.clone(&remote, working_dir).await
    }

    /// Render and install the service's routing block.
    async fn expose(
        &self,
        spec: &ServiceSpec,
        port: u16,
        working_dir: &std::path::Path,
    ) -> DeployResult<()> {
        // Two services must never share a public port. A retry of the same
        // service re-installs its own site file, so only fresh names are
        // probed against the live configuration.
        if !self.components.proxy.site_path(&spec.name).exists() {
            match self.components.proxy.port_in_use(port).await {
                Ok(true) => {
                    return Err(DeployError::validation(format!(
                        "port {port} is already routed by another service"
                    )));
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(port, error = %e, "could not probe live proxy configuration");
                }
            }
        }

        let static_path = spec.static_dir.as_ref().map(|dir| working_dir.join(dir));
        let block = render_block(static_path.as_deref(), port, spec.service_port, spec.runtime);
        self.components.proxy.install(&spec.name, &block).await
    }

    /// Run a configured build or run command in the working directory.
    async fn run_service_command(
        &self,
        command: &str,
        spec: &ServiceSpec,
        working_dir: &std::path::Path,
    ) -> DeployResult<()> {
        let result = self
            .components
            .executor
            .execute(
                command,
                CommandOptions::default()
                    .with_timeout(self.command_timeout)
                    .with_cwd(working_dir)
                    .with_envs(spec.env.clone()),
            )
            .await?;

        if result.successful {
            return Ok(());
        }

        if result.is_timeout() {
            return Err(DeployError::Timeout {
                command: command.to_owned(),
                limit: self.command_timeout,
            });
        }

        Err(DeployError::Execution {
            command: command.to_owned(),
            stderr: result.stderr,
        })
    }

    fn working_path(&self, spec: &ServiceSpec) -> PathBuf {
        let mut path = self.paths.services_root.join(&spec.name);
        if let Some(suffix) = &spec.working_dir {
            path.push(suffix);
        }
        path
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProvidersConfig, ProxyConfig};
    use crate::http::HttpClient;
    use crate::store::MemoryStore;
    use crate::types::Runtime;
    use serde_json::json;

    struct Fixture {
        orchestrator: Orchestrator,
        store: Arc<MemoryStore>,
        _services_root: tempfile::TempDir,
        _staging: tempfile::TempDir,
        _sites: tempfile::TempDir,
    }

    /// Full orchestrator wired to temp directories, an accept-everything
    /// validator stub, and an unreachable admin endpoint.
    async fn fixture(caddy_bin: &str) -> Fixture {
        let services_root = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let sites = tempfile::tempdir().unwrap();

        let store = Arc::new(MemoryStore::new());
        let executor = CommandExecutor::new();
        let http = HttpClient::new(Duration::from_millis(500)).unwrap();

        let proxy_config = ProxyConfig {
            caddy_bin: caddy_bin.to_owned(),
            base_config: PathBuf::from("/dev/null"),
            sites_dir: sites.path().to_path_buf(),
            admin_url: "http://127.0.0.1:1".to_owned(),
            timeout_secs: 10,
        };

        let schema = Arc::new(SchemaCache::new(
            http.clone(),
            "https://schemas.invalid/service/v1.json",
            Duration::from_secs(60),
        ));
        schema
            .prime(json!({
                "type": "object",
                "required": ["name", "runtime"],
                "properties": {
                    "name": { "type": "string", "minLength": 1 },
                    "runtime": { "type": "string" }
                }
            }))
            .await;

        let stores = Stores {
            blueprints: store.clone(),
            remotes: store.clone(),
            services: store.clone(),
        };
        let components = Components {
            executor: executor.clone(),
            proxy: CaddyManager::new(executor.clone(), http.clone(), proxy_config),
            runtimes: RuntimeManager::new(executor.clone(), Duration::from_secs(10)),
            secrets: SecretsManager::new(staging.path(), executor.clone()),
            source: SourceProvider::new(
                http,
                executor,
                ProvidersConfig::default(),
                Duration::from_secs(10),
            ),
            schema,
        };
        let paths = PathsConfig {
            services_root: services_root.path().to_path_buf(),
            staging_root: staging.path().to_path_buf(),
        };

        Fixture {
            orchestrator: Orchestrator::new(stores, components, paths, Duration::from_secs(10)),
            store,
            _services_root: services_root,
            _staging: staging,
            _sites: sites,
        }
    }

    async fn insert_blueprint(store: &MemoryStore, config: serde_json::Value) -> Blueprint {
        let blueprint = Blueprint::new(config).with_metadata("project_id", "proj-1");
        BlueprintStore::insert(store, &blueprint).await.unwrap();
        blueprint
    }

    #[tokio::test]
    async fn static_service_deploys_end_to_end() {
        let f = fixture("true").await;
        let blueprint = insert_blueprint(
            &f.store,
            json!({
                "name": "blog",
                "source": "image",
                "runtime": "static",
                "port": 18080,
                "static_dir": "public",
                "run_command": "echo started",
                "env": {"APP_ENV": "production"},
                "secrets": {"TOKEN": "sekrit"}
            }),
        )
        .await;

        f.orchestrator.run(&blueprint.id).await.unwrap();

        let stored = BlueprintStore::find(f.store.as_ref(), &blueprint.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, BlueprintStatus::Completed);
        assert!(stored.error.is_none());

        let service = f.store.find_by_name("blog").await.unwrap().expect("service row");
        assert_eq!(service.blueprint_id, blueprint.id);
        assert_eq!(service.runtime, Runtime::Static);
        assert_eq!(service.port, Some(18080));
        assert_eq!(service.project_id.as_deref(), Some("proj-1"));

        // Environment files landed in the working directory
        let working = PathBuf::from(service.working_dir.unwrap());
        assert!(working.join(".env").exists());
        assert!(working.join(".env.secrets").exists());
    }

    #[tokio::test]
    async fn failed_run_records_reason_and_creates_no_service() {
        let f = fixture("true").await;
        let blueprint = insert_blueprint(
            &f.store,
            json!({
                "name": "broken",
                "source": "image",
                "runtime": "static",
                "run_command": "echo doomed >&2; exit 7"
            }),
        )
        .await;

        let err = f.orchestrator.run(&blueprint.id).await.unwrap_err();
        assert!(matches!(err, DeployError::Execution { .. }));

        let stored = BlueprintStore::find(f.store.as_ref(), &blueprint.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, BlueprintStatus::Failed);
        assert!(stored.error.as_deref().unwrap().contains("doomed"));

        assert!(f.store.find_by_name("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn schema_rejection_is_fatal_without_partial_work() {
        let f = fixture("true").await;
        let blueprint = insert_blueprint(&f.store, json!({"runtime": "static"})).await;

        let err = f.orchestrator.run(&blueprint.id).await.unwrap_err();
        assert!(matches!(err, DeployError::Validation(_)));

        let stored = BlueprintStore::find(f.store.as_ref(), &blueprint.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, BlueprintStatus::Failed);
    }

    #[tokio::test]
    async fn missing_remote_is_a_reference_failure() {
        let f = fixture("true").await;
        let blueprint = insert_blueprint(
            &f.store,
            json!({
                "name": "api",
                "source": "git",
                "runtime": "go",
                "remote_id": "no-such-remote"
            }),
        )
        .await;

        let err = f.orchestrator.run(&blueprint.id).await.unwrap_err();
        assert!(matches!(err, DeployError::Reference(_)));

        let stored = BlueprintStore::find(f.store.as_ref(), &blueprint.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, BlueprintStatus::Failed);
    }

    #[tokio::test]
    async fn rejected_proxy_configuration_fails_the_run() {
        let f = fixture("false").await;
        let blueprint = insert_blueprint(
            &f.store,
            json!({
                "name": "edge",
                "source": "image",
                "runtime": "static",
                "port": 18081
            }),
        )
        .await;

        let err = f.orchestrator.run(&blueprint.id).await.unwrap_err();
        assert!(matches!(err, DeployError::ConfigValidation(_)));
        assert!(f.store.find_by_name("edge").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finished_blueprint_is_not_reprocessed() {
        let f = fixture("true").await;
        let blueprint = insert_blueprint(
            &f.store,
            json!({
                "name": "once",
                "source": "image",
                "runtime": "static"
            }),
        )
        .await;

        f.orchestrator.run(&blueprint.id).await.unwrap();
        // A second dispatch against the same id must be safe to repeat.
        f.orchestrator.run(&blueprint.id).await.unwrap();

        let stored = BlueprintStore::find(f.store.as_ref(), &blueprint.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, BlueprintStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_blueprint_is_a_reference_failure() {
        let f = fixture("true").await;
        let err = f
            .orchestrator
            .run(&BlueprintId::new("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Reference(_)));
    }

    #[tokio::test]
    async fn run_command_timeout_is_distinguished() {
        let services_root = tempfile::tempdir().unwrap();
        let mut f = fixture("true").await;
        // Rebuild with a very short command timeout
        f.orchestrator.command_timeout = Duration::from_millis(100);
        f.orchestrator.paths.services_root = services_root.path().to_path_buf();

        let blueprint = insert_blueprint(
            &f.store,
            json!({
                "name": "slow",
                "source": "image",
                "runtime": "static",
                "run_command": "sleep 5"
            }),
        )
        .await;

        let err = f.orchestrator.run(&blueprint.id).await.unwrap_err();
        assert!(matches!(err, DeployError::Timeout { .. }));

        let stored = BlueprintStore::find(f.store.as_ref(), &blueprint.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, BlueprintStatus::Failed);
        assert!(stored.error.as_deref().unwrap().contains("timed out"));
    }
}
