//! HTTP client and schema cache.
//!
//! A thin verb-based JSON helper used by the remote source provider and
//! the schema fetch. Every call carries a logical context string
//! ("repository", "branches", "schema") that ends up in the error when the
//! response is not a success.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{DeployError, DeployResult};

/// Verb-based JSON request helper.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a client with the given request timeout.
    pub fn new(timeout: Duration) -> DeployResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("quayside-deploy")
            .build()
            .map_err(DeployError::Http)?;
        Ok(Self { client })
    }

    /// GET a JSON document.
    ///
    /// `headers` are applied verbatim; a non-2xx response becomes an
    /// [`DeployError::Api`] carrying `context` and the response body.
    pub async fn get_json(
        &self,
        url: &str,
        context: &str,
        headers: &[(&str, &str)],
    ) -> DeployResult<Value> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await.map_err(DeployError::Http)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeployError::api(
                context,
                format!("{status}: {}", truncate(&body, 512)),
            ));
        }

        response.json().await.map_err(DeployError::Http)
    }

    /// POST a JSON body and parse the JSON response.
    pub async fn post_json(
        &self,
        url: &str,
        body: &Value,
        context: &str,
        headers: &[(&str, &str)],
    ) -> DeployResult<Value> {
        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await.map_err(DeployError::Http)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeployError::api(
                context,
                format!("{status}: {}", truncate(&body, 512)),
            ));
        }

        response.json().await.map_err(DeployError::Http)
    }

    /// GET a plain-text document (used for the proxy's live config).
    pub async fn get_text(&self, url: &str, context: &str) -> DeployResult<String> {
        let response = self.client.get(url).send().await.map_err(DeployError::Http)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeployError::api(
                context,
                format!("{status}: {}", truncate(&body, 512)),
            ));
        }

        response.text().await.map_err(DeployError::Http)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

struct CachedSchema {
    fetched_at: Instant,
    document: Value,
}

/// Fetches and caches the versioned service schema.
///
/// The schema document is fetched over HTTPS, cached for a configurable
/// time-to-live, and can be invalidated explicitly.
pub struct SchemaCache {
    http: HttpClient,
    url: String,
    ttl: Duration,
    cached: RwLock<Option<CachedSchema>>,
}

impl SchemaCache {
    /// Create a cache for the schema at `url`.
    #[must_use]
    pub fn new(http: HttpClient, url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            http,
            url: url.into(),
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Get the schema document, fetching it if the cache is empty or stale.
    pub async fn get(&self) -> DeployResult<Value> {
        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref() {
                if entry.fetched_at.elapsed() < self.ttl {
                    debug!("service schema served from cache");
                    return Ok(entry.document.clone());
                }
            }
        }

        let document = self.http.get_json(&self.url, "schema", &[]).await?;
        info!(url = %self.url, "service schema fetched");

        let mut cached = self.cached.write().await;
        *cached = Some(CachedSchema {
            fetched_at: Instant::now(),
            document: document.clone(),
        });

        Ok(document)
    }

    /// Drop the cached schema so the next `get` refetches.
    pub async fn invalidate(&self) {
        let mut cached = self.cached.write().await;
        *cached = None;
    }

    /// Store a schema document directly, bypassing the fetch.
    ///
    /// Used by tests and by operators running without a schema endpoint.
    pub async fn prime(&self, document: Value) {
        let mut cached = self.cached.write().await;
        *cached = Some(CachedSchema {
            fetched_at: Instant::now(),
            document,
        });
    }

    /// Validate a blueprint configuration against the schema.
    ///
    /// Collects every violation into one [`DeployError::Validation`]
    /// message.
    pub async fn validate(&self, config: &Value) -> DeployResult<()> {
        let schema = self.get().await?;

        let compiled = jsonschema::JSONSchema::compile(&schema)
            .map_err(|e| DeployError::api("schema", format!("schema does not compile: {e}")))?;

        if let Err(errors) = compiled.validate(config) {
            let messages: Vec<String> = errors
                .map(|e| format!("{} at {}", e, e.instance_path))
                .collect();
            return Err(DeployError::Validation(messages.join("; ")));
        }

        Ok(())
    }
}

impl std::fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCache")
            .field("url", &self.url)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
