//! Keyed storage for blueprints, remotes, and services.
//!
//! Persistence of domain records is an external concern; the pipeline only
//! needs a create/update/find contract. The in-memory implementation backs
//! tests and single-node deployments.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::DeployResult;
use crate::types::{Blueprint, BlueprintId, BlueprintStatus, Remote, Service};

/// Storage contract for blueprints.
///
/// Implementations must enforce the forward-only status order: an update
/// that would move a blueprint backwards is rejected. Blueprints are never
/// deleted by the pipeline.
#[async_trait]
pub trait BlueprintStore: Send + Sync {
    /// Insert a new blueprint.
    ///
    /// Returns an error if a blueprint with the same id already exists.
    async fn insert(&self, blueprint: &Blueprint) -> DeployResult<()>;

    /// Find a blueprint by id.
    async fn find(&self, id: &BlueprintId) -> DeployResult<Option<Blueprint>>;

    /// Update a blueprint's status, recording a failure reason when given.
    ///
    /// Also bumps the `updated_at` timestamp.
    async fn update_status(
        &self,
        id: &BlueprintId,
        status: BlueprintStatus,
        error: Option<&str>,
    ) -> DeployResult<()>;

    /// List all blueprints ordered by id (ULIDs sort by creation time).
    async fn list(&self) -> DeployResult<Vec<Blueprint>>;
}

/// Storage contract for remote repository references.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert a new remote.
    async fn insert(&self, remote: &Remote) -> DeployResult<()>;

    /// Find a remote by id.
    async fn find(&self, id: &str) -> DeployResult<Option<Remote>>;

    /// Refresh the last-known commit for a remote.
    async fn update_commit(&self, id: &str, commit: &str) -> DeployResult<()>;
}

/// Storage contract for deployed service records.
#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// Insert the record of a completed deployment.
    ///
    /// Returns an error if a service with the same name already exists.
    async fn insert(&self, service: &Service) -> DeployResult<()>;

    /// Find a service by name.
    async fn find_by_name(&self, name: &str) -> DeployResult<Option<Service>>;

    /// List all services ordered by creation time.
    async fn list(&self) -> DeployResult<Vec<Service>>;
}
