//! Configuration for the pipeline controller

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::Stage;

/// Main pipeline controller configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Status store configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Per-stage executor configuration
    #[serde(default)]
    pub stages: StagesConfig,
    /// Coordinator tuning
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Source corpus discovery
    #[serde(default)]
    pub corpus: CorpusConfig,
}

impl PipelineConfig {
    /// Load from a TOML file (defaults when the file is absent), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => Self::load_from(p)?,
            Some(p) => {
                tracing::warn!("Config file {} not found, using defaults", p.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Apply overrides from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PIPELINE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PIPELINE_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| Error::Config(format!("PIPELINE_PORT is not a port: {}", port)))?;
        }
        if let Some(path) = lookup("PIPELINE_DB_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        // Comma-separated ASR, validation and embedding service base URLs
        if let Some(urls) = lookup("GPU_SERVICES_URL") {
            let urls: Vec<&str> = urls.split(',').map(str::trim).collect();
            if urls.len() != 3 {
                return Err(Error::Config(format!(
                    "GPU_SERVICES_URL needs 3 comma-separated URLs (asr, validate, embed), got {}",
                    urls.len()
                )));
            }
            self.stages.asr.service_url = urls[0].to_string();
            self.stages.validate.service_url = urls[1].to_string();
            self.stages.embed.service_url = urls[2].to_string();
        }
        if let Some(n) = lookup("ASR_MAX_CONCURRENT") {
            self.stages.asr.concurrency = n
                .parse()
                .map_err(|_| Error::Config(format!("ASR_MAX_CONCURRENT is not a number: {}", n)))?;
        }
        if let Some(root) = lookup("PIPELINE_CORPUS_ROOT") {
            self.corpus.root = Some(PathBuf::from(root));
        }
        Ok(())
    }

    /// Reject settings the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        for stage in Stage::ALL {
            let cfg = self.stages.get(stage);
            if cfg.concurrency == 0 {
                return Err(Error::Config(format!("{} concurrency must be at least 1", stage)));
            }
            if cfg.timeout_secs == 0 {
                return Err(Error::Config(format!("{} timeout must be at least 1s", stage)));
            }
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS for the dashboard
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8021,
            enable_cors: true,
        }
    }
}

/// Status store backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Durable SQLite file
    #[default]
    Sqlite,
    /// Process-local map, lost on restart
    Memory,
}

/// Status store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// SQLite database path
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pipeline-controller")
            .join("status.db");

        Self {
            backend: StorageBackend::Sqlite,
            path,
        }
    }
}

/// Settings for one stage executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Base URL of the executor service
    pub service_url: String,
    /// Concurrent dispatches allowed for this stage
    pub concurrency: usize,
    /// Deadline for one executor invocation
    pub timeout_secs: u64,
}

impl StageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Per-stage executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    pub asr: StageConfig,
    pub validate: StageConfig,
    pub embed: StageConfig,
}

impl StagesConfig {
    pub fn get(&self, stage: Stage) -> &StageConfig {
        match stage {
            Stage::Asr => &self.asr,
            Stage::Validate => &self.validate,
            Stage::Embed => &self.embed,
        }
    }
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            // GPU-bound transcription: one at a time
            asr: StageConfig {
                service_url: "http://asr_gpu:8001".to_string(),
                concurrency: 1,
                timeout_secs: 3600,
            },
            validate: StageConfig {
                service_url: "http://validation_gpu:8005".to_string(),
                concurrency: num_cpus::get().min(4),
                timeout_secs: 600,
            },
            embed: StageConfig {
                service_url: "http://chunking_embeddings_gpu:8006".to_string(),
                concurrency: 2,
                timeout_secs: 1200,
            },
        }
    }
}

/// Coordinator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Retries for the coordinator's own stage writes
    pub write_retries: u32,
    /// Delay between write retries in milliseconds
    pub retry_backoff_ms: u64,
    /// Treat `running` units older than this as abandoned during resume runs.
    /// Unset: running units are always skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_running_after_secs: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            write_retries: 3,
            retry_backoff_ms: 50,
            stale_running_after_secs: None,
        }
    }
}

/// Source corpus discovery
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorpusConfig {
    /// Directory holding raw media and documents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Register unseen files when the server starts
    #[serde(default)]
    pub scan_on_startup: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.server.port, 8021);
        assert_eq!(config.stages.asr.concurrency, 1);
        assert!(config.stages.validate.concurrency >= 1);
        assert!(config.coordinator.stale_running_after_secs.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9000
            enable_cors = false

            [coordinator]
            write_retries = 5
            retry_backoff_ms = 10
            stale_running_after_secs = 7200
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.coordinator.write_retries, 5);
        assert_eq!(config.coordinator.stale_running_after_secs, Some(7200));
        assert_eq!(config.stages.embed.service_url, "http://chunking_embeddings_gpu:8006");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PIPELINE_PORT", "9100"),
            ("ASR_MAX_CONCURRENT", "2"),
            ("GPU_SERVICES_URL", "http://a:1, http://v:2,http://e:3"),
        ]);

        let mut config = PipelineConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.stages.asr.concurrency, 2);
        assert_eq!(config.stages.validate.service_url, "http://v:2");
        assert_eq!(config.stages.embed.service_url, "http://e:3");
    }

    #[test]
    fn test_bad_env_values() {
        let mut config = PipelineConfig::default();
        assert!(config
            .apply_env(|k| (k == "GPU_SERVICES_URL").then(|| "http://only-one".to_string()))
            .is_err());
        assert!(config
            .apply_env(|k| (k == "PIPELINE_PORT").then(|| "eighty".to_string()))
            .is_err());
    }

    #[test]
    fn test_printed_config_loads_back() {
        let mut config = PipelineConfig::default();
        config.stages.validate.concurrency = 3;
        let printed = toml::to_string_pretty(&config).unwrap();

        let parsed: PipelineConfig = toml::from_str(&printed).unwrap();
        assert_eq!(parsed.stages.validate.concurrency, 3);
        assert_eq!(parsed.storage.path, config.storage.path);
        assert!(parsed.corpus.root.is_none());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = PipelineConfig::default();
        config.stages.embed.concurrency = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
