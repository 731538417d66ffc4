//! Application state for the pipeline controller server

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::ingestion::CorpusScanner;
use crate::processing::Coordinator;
use crate::storage::{self, StatusStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: PipelineConfig,
    /// Run and reprocess coordinator (owns the status store)
    coordinator: Coordinator,
    /// Corpus walker, when a corpus root is configured
    scanner: Option<Arc<CorpusScanner>>,
    /// Ready state
    ready: RwLock<bool>,
    started_at: DateTime<Utc>,
}

impl AppState {
    /// Open the status store, build the HTTP executors and, if configured,
    /// register the corpus.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        tracing::info!("Initializing pipeline controller state...");

        let store = storage::open_store(&config.storage)?;
        tracing::info!("Status store backend: {}", store.name());

        let coordinator = Coordinator::from_config(store, &config)?;
        let state = Self::with_coordinator(config, coordinator);

        if state.inner.config.corpus.scan_on_startup {
            match state.scanner() {
                Some(scanner) => {
                    if let Err(e) = scanner.scan_into(state.store().as_ref()) {
                        tracing::warn!("Startup corpus scan failed: {}", e);
                    }
                }
                None => tracing::warn!("scan_on_startup is set but no corpus root is configured"),
            }
        }

        state.set_ready(true);
        tracing::info!(
            "Pipeline controller ready ({} tracked files)",
            state.store().get_all().map(|r| r.len()).unwrap_or(0)
        );
        Ok(state)
    }

    /// State around an existing coordinator. Not ready until `set_ready`.
    pub fn with_coordinator(config: PipelineConfig, coordinator: Coordinator) -> Self {
        let scanner = config
            .corpus
            .root
            .as_ref()
            .map(|root| Arc::new(CorpusScanner::new(root.clone())));

        Self {
            inner: Arc::new(AppStateInner {
                config,
                coordinator,
                scanner,
                ready: RwLock::new(false),
                started_at: Utc::now(),
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.inner.coordinator
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        self.inner.coordinator.store()
    }

    pub fn scanner(&self) -> Option<Arc<CorpusScanner>> {
        self.inner.scanner.clone()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Check if ready
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read()
    }

    /// Set ready state
    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }
}
