//! Core types for the deployment pipeline.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DeployError, DeployResult};

/// Unique identifier for a blueprint.
///
/// ULIDs are globally unique and lexicographically sortable, so listing by
/// id yields creation order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlueprintId(String);

impl BlueprintId {
    /// Create a blueprint ID from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique blueprint ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlueprintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for BlueprintId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BlueprintId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Lifecycle status of a blueprint.
///
/// Status only ever moves forward: `Pending` → `InProgress` →
/// `Completed` or `Failed`. The two final states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlueprintStatus {
    /// Created, waiting to be picked up.
    Pending,
    /// A pipeline run has claimed this blueprint.
    InProgress,
    /// The pipeline finished and a service record exists.
    Completed,
    /// The pipeline aborted; the failure reason is recorded.
    Failed,
}

impl BlueprintStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Check if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving to `next` respects the forward-only status order.
    ///
    /// Re-asserting the current non-terminal status is allowed so that a
    /// retried run can re-enter `InProgress` after a crash.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Pending | Self::InProgress) => true,
            (Self::InProgress, Self::InProgress | Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BlueprintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BlueprintStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown blueprint status: {s}")),
        }
    }
}

/// A pending unit of deployment work.
///
/// The raw `config` value is validated against the service schema and then
/// parsed into a [`ServiceSpec`] at the start of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blueprint {
    /// Unique identifier.
    pub id: BlueprintId,
    /// Raw service configuration as submitted.
    pub config: serde_json::Value,
    /// Free-form metadata (e.g. owning project id).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Current lifecycle status.
    pub status: BlueprintStatus,
    /// Failure reason if the pipeline aborted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the blueprint was created.
    pub created_at: DateTime<Utc>,
    /// When the blueprint was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Blueprint {
    /// Create a new pending blueprint from a raw configuration value.
    #[must_use]
    pub fn new(config: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: BlueprintId::generate(),
            config,
            metadata: BTreeMap::new(),
            status: BlueprintStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The owning project id, when the trigger layer recorded one.
    #[must_use]
    pub fn project_id(&self) -> Option<&str> {
        self.metadata.get("project_id").map(String::as_str)
    }
}

/// Where a service's code comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Cloned from a git hosting provider.
    #[default]
    Git,
    /// Pulled as a prebuilt container image.
    Image,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Git => write!(f, "git"),
            Self::Image => write!(f, "image"),
        }
    }
}

/// A named language execution environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Runtime {
    /// Node.js, versions managed by nodenv.
    NodeJs,
    /// Python, versions managed by pyenv.
    Python,
    /// Go, versions managed by goenv.
    Go,
    /// Java, versions managed through asdf.
    Java,
    /// PHP, versions managed by phpenv; routed via FastCGI.
    Php,
    /// Static file serving only, no process.
    Static,
    /// Prebuilt image, runtime baked in.
    Image,
}

impl Runtime {
    /// Get the runtime name as it appears in blueprint configuration.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NodeJs => "node-js",
            Self::Python => "python",
            Self::Go => "go",
            Self::Java => "java",
            Self::Php => "php",
            Self::Static => "static",
            Self::Image => "image",
        }
    }

    /// Whether a version-management backend exists for this runtime.
    #[must_use]
    pub const fn is_managed(&self) -> bool {
        !matches!(self, Self::Static | Self::Image)
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Runtime {
    type Err = DeployError;

    fn from_str(s: &str) -> DeployResult<Self> {
        match s {
            "node-js" => Ok(Self::NodeJs),
            "python" => Ok(Self::Python),
            "go" => Ok(Self::Go),
            "java" => Ok(Self::Java),
            "php" => Ok(Self::Php),
            "static" => Ok(Self::Static),
            "image" => Ok(Self::Image),
            other => Err(DeployError::UnsupportedRuntime(other.to_owned())),
        }
    }
}

/// Parsed blueprint configuration.
///
/// Fields left unset stay `None` and are omitted from the persisted
/// [`Service`] record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Service name; also the working-directory and site-file name.
    pub name: String,
    /// Where the code comes from.
    #[serde(default)]
    pub source: SourceKind,
    /// Language runtime.
    pub runtime: Runtime,
    /// Runtime version to install and pin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Command that starts the service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_command: Option<String>,
    /// Command that builds the service before it starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,
    /// Public port the edge proxy listens on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Backend port the service process listens on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_port: Option<u16>,
    /// Working-directory suffix under the service root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Directory of static assets, relative to the working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,
    /// Container image, for image-sourced services.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Plain environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Confidential environment variables.
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    /// Identifier of the source repository record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    /// Public domain for the service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// DNS provider managing the domain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_provider: Option<String>,
}

/// A reference to a source repository.
///
/// Immutable once created, except for the last-known commit which is
/// refreshed from the provider before each clone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Remote {
    /// Identifier used by blueprints to reference this remote.
    pub id: String,
    /// Owner or organisation name.
    pub name: String,
    /// Repository name.
    pub repository: String,
    /// Hosting provider host (e.g. `github.com`).
    pub provider: String,
    /// Branch to deploy.
    pub branch: String,
    /// Last-known commit SHA on the branch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// When the remote was registered.
    pub created_at: DateTime<Utc>,
}

impl Remote {
    /// Create a new remote reference.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        repository: impl Into<String>,
        provider: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            name: name.into(),
            repository: repository.into(),
            provider: provider.into(),
            branch: branch.into(),
            commit: None,
            created_at: Utc::now(),
        }
    }

    /// `owner/repository` form used in provider API paths.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.name, self.repository)
    }
}

/// The persisted record of a successfully deployed unit.
///
/// Created exactly once per blueprint that reaches `completed`; never
/// created for a failed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Unique identifier.
    pub id: String,
    /// The blueprint this service was deployed from.
    pub blueprint_id: BlueprintId,
    /// Service name.
    pub name: String,
    /// Where the code came from.
    pub source: SourceKind,
    /// Language runtime.
    pub runtime: Runtime,
    /// Pinned runtime version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Start command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_command: Option<String>,
    /// Build command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,
    /// Public port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Working directory on disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Static asset directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,
    /// Container image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Source repository record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    /// Owning project.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// When the deployment completed.
    pub created_at: DateTime<Utc>,
}

impl Service {
    /// Build a service record from a resolved spec and its blueprint.
    #[must_use]
    pub fn from_spec(spec: &ServiceSpec, blueprint: &Blueprint, working_dir: &std::path::Path) -> Self {
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            blueprint_id: blueprint.id.clone(),
            name: spec.name.clone(),
            source: spec.source,
            runtime: spec.runtime,
            version: spec.version.clone(),
            run_command: spec.run_command.clone(),
            build_command: spec.build_command.clone(),
            port: spec.port,
            working_dir: Some(working_dir.display().to_string()),
            static_dir: spec.static_dir.clone(),
            image: spec.image.clone(),
            remote_id: spec.remote_id.clone(),
            project_id: blueprint.project_id().map(ToOwned::to_owned),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blueprint_id_generates_unique_sortable_values() {
        let a = BlueprintId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = BlueprintId::generate();
        assert_ne!(a, b);
        // ULIDs generated later sort later
        assert!(a.as_str() < b.as_str());
    }

    #[test]
    fn status_transitions_are_monotonic() {
        use BlueprintStatus::*;

        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));

        // No regression
        assert!(!InProgress.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));

        // Terminal states stay terminal
        assert!(Completed.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Pending.is_terminal());
    }

    #[test]
    fn crash_retry_can_reassert_in_progress() {
        assert!(BlueprintStatus::InProgress.can_transition_to(BlueprintStatus::InProgress));
        assert!(!BlueprintStatus::Completed.can_transition_to(BlueprintStatus::Completed));
    }

    #[test]
    fn runtime_parses_wire_names() {
        assert_eq!("node-js".parse::<Runtime>().unwrap(), Runtime::NodeJs);
        assert_eq!("python".parse::<Runtime>().unwrap(), Runtime::Python);
        assert_eq!("static".parse::<Runtime>().unwrap(), Runtime::Static);

        let err = "cobol".parse::<Runtime>().unwrap_err();
        assert!(matches!(err, DeployError::UnsupportedRuntime(name) if name == "cobol"));
    }

    #[test]
    fn service_spec_parses_minimal_config() {
        let spec: ServiceSpec = serde_json::from_value(json!({
            "name": "blog",
            "runtime": "static",
            "port": 8080,
            "static_dir": "public"
        }))
        .unwrap();

        assert_eq!(spec.name, "blog");
        assert_eq!(spec.runtime, Runtime::Static);
        assert_eq!(spec.port, Some(8080));
        assert!(spec.run_command.is_none());
        assert!(spec.env.is_empty());
    }

    #[test]
    fn service_record_omits_unset_fields() {
        let blueprint = Blueprint::new(json!({}));
        let spec: ServiceSpec = serde_json::from_value(json!({
            "name": "api",
            "runtime": "go",
            "port": 9000
        }))
        .unwrap();

        let service = Service::from_spec(&spec, &blueprint, std::path::Path::new("/srv/api"));
        let value = serde_json::to_value(&service).unwrap();

        assert!(value.get("version").is_none());
        assert!(value.get("image").is_none());
        assert_eq!(value["port"], 9000);
        assert_eq!(value["name"], "api");
    }

    #[test]
    fn remote_full_name() {
        let remote = Remote::new("acme", "shop", "github.com", "main");
        assert_eq!(remote.full_name(), "acme/shop");
        assert!(remote.commit.is_none());
    }
}
