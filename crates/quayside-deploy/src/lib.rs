//! Deployment pipeline for the Quayside platform.
//!
//! This crate turns a declarative blueprint into a running, routed
//! service: it materialises the source, pins the runtime, seeds
//! environment files, installs an edge-proxy site, runs the service
//! command, and records the deployed unit.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────────┐
//! │   Trigger    │───▶│ Deploy Queue │───▶│   Orchestrator   │
//! └──────────────┘    └──────────────┘    └──────────────────┘
//!                                                  │
//!          ┌───────────────┬───────────────┬───────┴───────┐
//!          ▼               ▼               ▼               ▼
//!   ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌────────────┐
//!   │   Source   │  │  Runtime   │  │  Secrets   │  │   Caddy    │
//!   │  Provider  │  │  Manager   │  │  Manager   │  │  Manager   │
//!   └────────────┘  └────────────┘  └────────────┘  └────────────┘
//!          └───────────────┴───────┬───────┴───────────────┘
//!                                  ▼
//!                         ┌─────────────────┐
//!                         │ Command Executor│
//!                         └─────────────────┘
//! ```

pub mod command;
mod config;
pub mod deploy;
pub mod env_check;
pub mod error;
pub mod http;
pub mod proxy;
pub mod queue;
pub mod runtime;
pub mod secrets;
pub mod source;
pub mod store;
pub mod types;
pub mod worker;

// Re-export configuration types
pub use config::{
    CommandConfig, DeployConfig, PathsConfig, ProvidersConfig, ProxyConfig, QueueConfig,
    SchemaConfig,
};

// Re-export error types
pub use error::{DeployError, DeployResult};

// Re-export core types
pub use types::{
    Blueprint, BlueprintId, BlueprintStatus, Remote, Runtime, Service, ServiceSpec, SourceKind,
};

// Re-export command execution
pub use command::{CommandExecutor, CommandOptions, CommandResult, TIMEOUT_EXIT_CODE};

// Re-export queue types
pub use queue::{DeployJob, DeployQueue};

// Re-export store types
pub use store::{BlueprintStore, MemoryStore, RemoteStore, ServiceStore};

// Re-export pipeline types
pub use deploy::{Components, Orchestrator, Stores};

// Re-export worker
pub use worker::DeployWorker;

// Re-export proxy manager
pub use proxy::CaddyManager;

// Re-export runtime manager
pub use runtime::RuntimeManager;

// Re-export secrets manager
pub use secrets::SecretsManager;

// Re-export source provider
pub use source::{normalize_url, NormalizedRepo, Provider, SourceProvider};

// Re-export HTTP helpers
pub use http::{HttpClient, SchemaCache};

// Re-export environment validation
pub use env_check::EnvironmentCheck;
