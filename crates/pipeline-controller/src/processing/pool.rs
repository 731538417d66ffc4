//! Per-stage dispatch limits
//!
//! One semaphore per stage, shared by every run and reprocess in the process.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::StagesConfig;
use crate::error::{Error, Result};
use crate::types::Stage;

/// Bounded concurrency for each stage
pub struct StagePools {
    pools: HashMap<Stage, (Arc<Semaphore>, usize)>,
}

impl StagePools {
    pub fn new(config: &StagesConfig) -> Self {
        let pools = Stage::ALL
            .into_iter()
            .map(|stage| {
                let limit = config.get(stage).concurrency.max(1);
                (stage, (Arc::new(Semaphore::new(limit)), limit))
            })
            .collect();

        Self { pools }
    }

    /// Wait for a dispatch slot for `stage`
    pub async fn acquire(&self, stage: Stage) -> Result<OwnedSemaphorePermit> {
        let (semaphore, _) = self
            .pools
            .get(&stage)
            .ok_or_else(|| Error::internal(format!("no pool for stage {}", stage)))?;

        semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::internal(format!("{} pool closed", stage)))
    }

    /// Configured limit for `stage`
    pub fn limit(&self, stage: Stage) -> usize {
        self.pools.get(&stage).map(|(_, limit)| *limit).unwrap_or(0)
    }

    /// Dispatches currently holding a slot for `stage`
    pub fn in_flight(&self, stage: Stage) -> usize {
        self.pools
            .get(&stage)
            .map(|(sem, limit)| limit.saturating_sub(sem.available_permits()))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_track_in_flight() {
        let mut config = StagesConfig::default();
        config.asr.concurrency = 1;
        config.embed.concurrency = 2;
        let pools = StagePools::new(&config);

        assert_eq!(pools.limit(Stage::Asr), 1);
        let permit = pools.acquire(Stage::Asr).await.unwrap();
        assert_eq!(pools.in_flight(Stage::Asr), 1);
        assert_eq!(pools.in_flight(Stage::Embed), 0);

        let waiting = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            pools.acquire(Stage::Asr),
        )
        .await;
        assert!(waiting.is_err());

        drop(permit);
        assert_eq!(pools.in_flight(Stage::Asr), 0);
    }
}
