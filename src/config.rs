//! Service configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RecommendError, Result};

/// Configuration shared by ingestion and query serving
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommenderConfig {
    /// Maximum number of catalog images returned per query
    pub top_k: usize,
    /// Worker threads for focus-mode fan-out (None = rayon default)
    pub query_threads: Option<usize>,
    /// Worker threads issuing embedding requests during ingestion (None = rayon default)
    pub ingest_threads: Option<usize>,
    /// Where the fitted foreground pipeline is persisted
    pub pipeline_path: Option<PathBuf>,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            query_threads: None,
            ingest_threads: None,
            pipeline_path: None,
        }
    }
}

impl RecommenderConfig {
    /// Load a configuration from a JSON file; missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RecommendError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            RecommendError::Config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(RecommendError::Config("top_k must be greater than 0".into()));
        }
        if self.query_threads == Some(0) {
            return Err(RecommendError::Config(
                "query_threads must be greater than 0".into(),
            ));
        }
        if self.ingest_threads == Some(0) {
            return Err(RecommendError::Config(
                "ingest_threads must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn thread_pool(threads: Option<usize>) -> Result<rayon::ThreadPool> {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = threads {
            builder = builder.num_threads(n);
        }
        builder
            .build()
            .map_err(|e| RecommendError::Config(format!("cannot start thread pool: {}", e)))
    }
}
