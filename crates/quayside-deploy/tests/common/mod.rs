//! Shared fixtures for deploy pipeline integration tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use quayside_deploy::{
    Blueprint, BlueprintStore, CaddyManager, CommandExecutor, Components, HttpClient, MemoryStore,
    Orchestrator, PathsConfig, ProvidersConfig, ProxyConfig, RuntimeManager, SchemaCache,
    SecretsManager, SourceProvider, Stores,
};

/// A fully wired orchestrator over temp directories and stub proxy
/// binaries.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub store: Arc<MemoryStore>,
    pub services_root: TempDir,
    pub sites_dir: TempDir,
    _staging: TempDir,
}

impl Harness {
    /// Build a harness whose proxy validator is the given binary
    /// (`"true"` accepts everything, `"false"` rejects everything).
    pub async fn with_validator(caddy_bin: &str) -> Self {
        let services_root = TempDir::new().expect("services root");
        let staging = TempDir::new().expect("staging root");
        let sites_dir = TempDir::new().expect("sites dir");

        let store = Arc::new(MemoryStore::new());
        let executor = CommandExecutor::new();
        let http = HttpClient::new(Duration::from_millis(500)).expect("http client");

        let schema = Arc::new(SchemaCache::new(
            http.clone(),
            "https://schemas.invalid/service/v1.json",
            Duration::from_secs(300),
        ));
        schema
            .prime(json!({
                "type": "object",
                "required": ["name", "runtime"],
                "properties": {
                    "name": { "type": "string", "minLength": 1 },
                    "runtime": { "type": "string" },
                    "port": { "type": "integer", "minimum": 1, "maximum": 65535 }
                }
            }))
            .await;

        let proxy_config = ProxyConfig {
            caddy_bin: caddy_bin.to_owned(),
            base_config: PathBuf::from("/dev/null"),
            sites_dir: sites_dir.path().to_path_buf(),
            admin_url: "http://127.0.0.1:1".to_owned(),
            timeout_secs: 10,
        };

        let orchestrator = Orchestrator::new(
            Stores {
                blueprints: store.clone(),
                remotes: store.clone(),
                services: store.clone(),
            },
            Components {
                executor: executor.clone(),
                proxy: CaddyManager::new(executor.clone(), http.clone(), proxy_config),
                runtimes: RuntimeManager::new(executor.clone(), Duration::from_secs(30)),
                secrets: SecretsManager::new(staging.path(), executor.clone()),
                source: SourceProvider::new(
                    http,
                    executor,
                    ProvidersConfig::default(),
                    Duration::from_secs(30),
                ),
                schema,
            },
            PathsConfig {
                services_root: services_root.path().to_path_buf(),
                staging_root: staging.path().to_path_buf(),
            },
            Duration::from_secs(30),
        );

        Self {
            orchestrator,
            store,
            services_root,
            sites_dir,
            _staging: staging,
        }
    }

    /// Insert a pending blueprint with the given configuration.
    pub async fn submit(&self, config: serde_json::Value) -> Blueprint {
        let blueprint = Blueprint::new(config).with_metadata("project_id", "test-project");
        BlueprintStore::insert(self.store.as_ref(), &blueprint)
            .await
            .expect("insert blueprint");
        blueprint
    }
}
