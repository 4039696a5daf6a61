//! In-memory store implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{DeployError, DeployResult};
use crate::types::{Blueprint, BlueprintId, BlueprintStatus, Remote, Service};

use super::{BlueprintStore, RemoteStore, ServiceStore};

/// In-memory store for blueprints, remotes, and services.
///
/// Data is lost when the process exits; production deployments plug their
/// own backends into the store traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blueprints: RwLock<HashMap<String, Blueprint>>,
    remotes: RwLock<HashMap<String, Remote>>,
    services: RwLock<HashMap<String, Service>>,
}

impl MemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> DeployError {
    DeployError::internal("store lock poisoned")
}

#[async_trait]
impl BlueprintStore for MemoryStore {
    async fn insert(&self, blueprint: &Blueprint) -> DeployResult<()> {
        let mut blueprints = self.blueprints.write().map_err(|_| poisoned())?;

        let key = blueprint.id.as_str().to_owned();
        if blueprints.contains_key(&key) {
            return Err(DeployError::internal(format!(
                "blueprint {key} already exists"
            )));
        }

        blueprints.insert(key, blueprint.clone());
        Ok(())
    }

    async fn find(&self, id: &BlueprintId) -> DeployResult<Option<Blueprint>> {
        let blueprints = self.blueprints.read().map_err(|_| poisoned())?;
        Ok(blueprints.get(id.as_str()).cloned())
    }

    async fn update_status(
        &self,
        id: &BlueprintId,
        status: BlueprintStatus,
        error: Option<&str>,
    ) -> DeployResult<()> {
        let mut blueprints = self.blueprints.write().map_err(|_| poisoned())?;

        let blueprint = blueprints
            .get_mut(id.as_str())
            .ok_or_else(|| DeployError::reference(format!("blueprint not found: {id}")))?;

        if !blueprint.status.can_transition_to(status) {
            return Err(DeployError::InvalidStatusTransition {
                from: blueprint.status.as_str(),
                to: status.as_str(),
            });
        }

        blueprint.status = status;
        blueprint.error = error.map(ToOwned::to_owned);
        blueprint.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn list(&self) -> DeployResult<Vec<Blueprint>> {
        let blueprints = self.blueprints.read().map_err(|_| poisoned())?;
        let mut all: Vec<_> = blueprints.values().cloned().collect();
        all.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(all)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn insert(&self, remote: &Remote) -> DeployResult<()> {
        let mut remotes = self.remotes.write().map_err(|_| poisoned())?;

        if remotes.contains_key(&remote.id) {
            return Err(DeployError::internal(format!(
                "remote {} already exists",
                remote.id
            )));
        }

        remotes.insert(remote.id.clone(), remote.clone());
        Ok(())
    }

    async fn find(&self, id: &str) -> DeployResult<Option<Remote>> {
        let remotes = self.remotes.read().map_err(|_| poisoned())?;
        Ok(remotes.get(id).cloned())
    }

    async fn update_commit(&self, id: &str, commit: &str) -> DeployResult<()> {
        let mut remotes = self.remotes.write().map_err(|_| poisoned())?;

        let remote = remotes
            .get_mut(id)
            .ok_or_else(|| DeployError::reference(format!("remote not found: {id}")))?;

        remote.commit = Some(commit.to_owned());
        Ok(())
    }
}

#[async_trait]
impl ServiceStore for MemoryStore {
    async fn insert(&self, service: &Service) -> DeployResult<()> {
        let mut services = self.services.write().map_err(|_| poisoned())?;

        if services.contains_key(&service.name) {
            return Err(DeployError::internal(format!(
                "service {} already exists",
                service.name
            )));
        }

        services.insert(service.name.clone(), service.clone());
        Ok(())
    }

    async fn find_by_name(&self, name: &str) -> DeployResult<Option<Service>> {
        let services = self.services.read().map_err(|_| poisoned())?;
        Ok(services.get(name).cloned())
    }

    async fn list(&self) -> DeployResult<Vec<Service>> {
        let services = self.services.read().map_err(|_| poisoned())?;
        let mut all: Vec<_> = services.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blueprint() -> Blueprint {
        Blueprint::new(json!({"name": "api", "runtime": "go"}))
    }

    #[tokio::test]
    async fn insert_and_find_blueprint() {
        let store = MemoryStore::new();
        let bp = blueprint();

        BlueprintStore::insert(&store, &bp).await.unwrap();
        let found = BlueprintStore::find(&store, &bp.id).await.unwrap().expect("present");
        assert_eq!(found.id, bp.id);
        assert_eq!(found.status, BlueprintStatus::Pending);
    }

    #[tokio::test]
    async fn duplicate_blueprint_rejected() {
        let store = MemoryStore::new();
        let bp = blueprint();

        BlueprintStore::insert(&store, &bp).await.unwrap();
        assert!(BlueprintStore::insert(&store, &bp).await.is_err());
    }

    #[tokio::test]
    async fn status_updates_are_monotonic() {
        let store = MemoryStore::new();
        let bp = blueprint();
        BlueprintStore::insert(&store, &bp).await.unwrap();

        store
            .update_status(&bp.id, BlueprintStatus::InProgress, None)
            .await
            .unwrap();
        store
            .update_status(&bp.id, BlueprintStatus::Failed, Some("clone failed"))
            .await
            .unwrap();

        // Terminal state: no way back
        let err = store
            .update_status(&bp.id, BlueprintStatus::Pending, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::InvalidStatusTransition { .. }));

        let err = store
            .update_status(&bp.id, BlueprintStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::InvalidStatusTransition { .. }));

        let found = BlueprintStore::find(&store, &bp.id).await.unwrap().unwrap();
        assert_eq!(found.status, BlueprintStatus::Failed);
        assert_eq!(found.error.as_deref(), Some("clone failed"));
    }

    #[tokio::test]
    async fn remote_commit_refresh() {
        let store = MemoryStore::new();
        let remote = Remote::new("acme", "shop", "github.com", "main");
        RemoteStore::insert(&store, &remote).await.unwrap();

        store.update_commit(&remote.id, "abc123").await.unwrap();
        let found = RemoteStore::find(&store, &remote.id).await.unwrap().unwrap();
        assert_eq!(found.commit.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn duplicate_service_name_rejected() {
        let store = MemoryStore::new();
        let bp = blueprint();
        let spec: crate::types::ServiceSpec =
            serde_json::from_value(json!({"name": "api", "runtime": "go"})).unwrap();
        let service =
            Service::from_spec(&spec, &bp, std::path::Path::new("/var/lib/quayside/services/api"));

        ServiceStore::insert(&store, &service).await.unwrap();
        assert!(ServiceStore::insert(&store, &service).await.is_err());

        let found = store.find_by_name("api").await.unwrap().expect("present");
        assert_eq!(found.blueprint_id, bp.id);
    }
}
