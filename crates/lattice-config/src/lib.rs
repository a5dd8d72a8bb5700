//! Configuration for the Lattice engine.
//!
//! Layering, lowest precedence first: built-in defaults, a TOML file, then
//! `LATTICE_*` environment variables. Secrets (API key, bearer token) are
//! only ever read from the environment so config files stay committable.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Relational storage connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Postgres DSN, e.g. `postgres://lattice@localhost/lattice`
    pub dsn: String,
    pub max_conns: u32,
    pub statement_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            dsn: "postgres://localhost/lattice".to_string(),
            max_conns: 10,
            statement_timeout_ms: 30_000,
        }
    }
}

/// Which upstream serves embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingProviderKind {
    /// Vertex AI prediction endpoint, bearer-token auth
    #[serde(rename = "vertex")]
    Vertex,
    /// Generative Language API, API-key auth
    #[serde(rename = "api-key")]
    ApiKey,
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    /// Vertex region, e.g. `us-central1`
    pub location: String,
    /// Vertex project id; unused in api-key mode
    pub project: String,
    pub model: String,
    pub dimension: usize,
    pub timeout_ms: u64,
    pub max_retries: u32,
    /// Base delay between retry attempts; doubles per attempt
    pub retry_backoff_ms: u64,
    /// Base URL override, used by tests against a local mock server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// API key (api-key mode); environment only
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Bearer token (vertex mode); environment only
    #[serde(skip)]
    pub auth_token: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            provider: EmbeddingProviderKind::ApiKey,
            location: "us-central1".to_string(),
            project: String::new(),
            model: "text-embedding-004".to_string(),
            dimension: 768,
            timeout_ms: 10_000,
            max_retries: 3,
            retry_backoff_ms: 250,
            api_base: None,
            api_key: None,
            auth_token: None,
        }
    }
}

/// Unified search tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub rrf_k: f64,
    pub default_fusion: String,
    pub graph_weight: f64,
    pub text_weight: f64,
    pub default_limit: usize,
    pub max_query_len: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            rrf_k: 60.0,
            default_fusion: "weighted".to_string(),
            graph_weight: 0.6,
            text_weight: 0.4,
            default_limit: 20,
            max_query_len: 800,
        }
    }
}

/// Access-tracking coalescing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessTrackingConfig {
    pub coalesce_window_ms: u64,
    /// Pending-batch buffer; overflow drops rather than backpressures search
    pub queue_capacity: usize,
}

impl Default for AccessTrackingConfig {
    fn default() -> Self {
        AccessTrackingConfig {
            coalesce_window_ms: 100,
            queue_capacity: 1024,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LatticeConfig {
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub access_tracking: AccessTrackingConfig,
}

impl LatticeConfig {
    /// Load configuration: defaults, then the TOML file when one is given
    /// and exists, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                debug!(path = %p.display(), "loading config file");
                let raw = std::fs::read_to_string(p)?;
                toml::from_str(&raw)?
            }
            Some(p) => {
                debug!(path = %p.display(), "config file not found, using defaults");
                LatticeConfig::default()
            }
            None => LatticeConfig::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dsn) = std::env::var("LATTICE_DSN") {
            self.storage.dsn = dsn;
        }
        if let Ok(key) = std::env::var("LATTICE_EMBED_API_KEY") {
            self.embedding.api_key = Some(key);
        }
        if let Ok(token) = std::env::var("LATTICE_EMBED_TOKEN") {
            self.embedding.auth_token = Some(token);
        }
        if let Ok(model) = std::env::var("LATTICE_EMBED_MODEL") {
            self.embedding.model = model;
        }
        if let Ok(base) = std::env::var("LATTICE_EMBED_API_BASE") {
            self.embedding.api_base = Some(base);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.dsn.is_empty() {
            return Err(ConfigError::Invalid("storage.dsn must not be empty".into()));
        }
        if self.storage.max_conns == 0 {
            return Err(ConfigError::Invalid("storage.max_conns must be at least 1".into()));
        }
        if self.embedding.dimension == 0 {
            return Err(ConfigError::Invalid(
                "embedding.dimension must be positive".into(),
            ));
        }
        if self.embedding.provider == EmbeddingProviderKind::Vertex
            && self.embedding.project.is_empty()
        {
            return Err(ConfigError::Invalid(
                "embedding.project is required for the vertex provider".into(),
            ));
        }
        if self.search.default_limit == 0 || self.search.default_limit > 100 {
            return Err(ConfigError::Invalid(
                "search.default_limit must be between 1 and 100".into(),
            ));
        }
        if self.search.graph_weight < 0.0 || self.search.text_weight < 0.0 {
            return Err(ConfigError::Invalid(
                "search weights must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn clear_env() {
        for var in [
            "LATTICE_DSN",
            "LATTICE_EMBED_API_KEY",
            "LATTICE_EMBED_TOKEN",
            "LATTICE_EMBED_MODEL",
            "LATTICE_EMBED_API_BASE",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn defaults_match_contract() {
        clear_env();
        let config = LatticeConfig::load(None).unwrap();
        assert_eq!(config.storage.max_conns, 10);
        assert_eq!(config.embedding.dimension, 768);
        assert_eq!(config.search.rrf_k, 60.0);
        assert_eq!(config.search.graph_weight, 0.6);
        assert_eq!(config.search.text_weight, 0.4);
        assert_eq!(config.search.default_limit, 20);
        assert_eq!(config.search.max_query_len, 800);
        assert_eq!(config.access_tracking.coalesce_window_ms, 100);
    }

    #[test]
    #[serial]
    fn missing_file_falls_back_to_defaults() {
        clear_env();
        let result = LatticeConfig::load(Some(Path::new("/nonexistent/lattice.toml")));
        assert!(result.is_ok());
    }

    #[test]
    #[serial]
    fn toml_file_overrides_defaults() {
        clear_env();
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[storage]
dsn = "postgres://db.internal/knowledge"
max_conns = 25

[embedding]
provider = "vertex"
project = "acme-prod"
location = "europe-west4"

[search]
graph_weight = 0.7
text_weight = 0.3
"#
        )
        .unwrap();

        let config = LatticeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.storage.dsn, "postgres://db.internal/knowledge");
        assert_eq!(config.storage.max_conns, 25);
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Vertex);
        assert_eq!(config.embedding.location, "europe-west4");
        assert_eq!(config.search.graph_weight, 0.7);
        // Untouched sections keep their defaults
        assert_eq!(config.search.rrf_k, 60.0);
    }

    #[test]
    #[serial]
    fn invalid_toml_is_an_error() {
        clear_env();
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "this is not valid toml [[[").unwrap();
        assert!(LatticeConfig::load(Some(file.path())).is_err());
    }

    #[test]
    #[serial]
    fn env_overrides_file() {
        clear_env();
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[storage]\ndsn = \"postgres://from-file/db\"\n").unwrap();

        std::env::set_var("LATTICE_DSN", "postgres://from-env/db");
        std::env::set_var("LATTICE_EMBED_API_KEY", "sekrit");
        let config = LatticeConfig::load(Some(file.path())).unwrap();
        clear_env();

        assert_eq!(config.storage.dsn, "postgres://from-env/db");
        assert_eq!(config.embedding.api_key.as_deref(), Some("sekrit"));
    }

    #[test]
    #[serial]
    fn vertex_without_project_is_invalid() {
        clear_env();
        let mut config = LatticeConfig::default();
        config.embedding.provider = EmbeddingProviderKind::Vertex;
        config.embedding.project = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn secrets_never_serialize() {
        clear_env();
        let mut config = LatticeConfig::default();
        config.embedding.api_key = Some("sekrit".to_string());
        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("sekrit"));
    }
}
