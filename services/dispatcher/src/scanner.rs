//! Queue scanner: periodic sweep that re-enters jobs stuck in `queued`.
//!
//! Every tick picks the oldest queued jobs whose failure count is still
//! under the threshold and spawns one orchestrator run per job. The
//! broadcaster list is reloaded once per tick and shared by the whole
//! batch. Re-entry is idempotent because the orchestrator only proceeds on
//! rows that are still `queued`.

use crate::config::ScannerConfig;
use crate::orchestrate::Orchestrator;
use crate::registry::load_broadcasters;
use crate::storage::store::Store;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub struct Scanner {
    store: Arc<Store>,
    orchestrator: Arc<Orchestrator>,
    broadcasters_file: PathBuf,
    config: ScannerConfig,
}

impl Scanner {
    pub fn new(
        store: Arc<Store>,
        orchestrator: Arc<Orchestrator>,
        broadcasters_file: PathBuf,
        config: ScannerConfig,
    ) -> Self {
        Scanner {
            store,
            orchestrator,
            broadcasters_file,
            config,
        }
    }

    /// Sweep forever at the configured cadence. The first sweep runs
    /// immediately, picking up whatever queued before this start.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// One sweep. Failures to read the store or the broadcaster list skip
    /// the tick; the next one retries from scratch.
    pub async fn tick(&self) {
        let jobs = match self
            .store
            .queued_transcodes(self.config.batch, self.config.max_failures)
        {
            Ok(jobs) => jobs,
            Err(err) => {
                error!(error = %err, "could not get queued transcodes");
                return;
            }
        };
        if jobs.is_empty() {
            return;
        }

        let broadcasters = match load_broadcasters(&self.broadcasters_file) {
            Ok(list) => Arc::new(list),
            Err(err) => {
                error!(
                    error = %err,
                    "could not get broadcasters for processing queued transcodes"
                );
                return;
            }
        };

        info!(jobs = jobs.len(), "re-entering queued transcodes");
        for job in jobs {
            let orchestrator = self.orchestrator.clone();
            let broadcasters = broadcasters.clone();
            tokio::spawn(async move {
                let request_id = job.id.clone();
                if let Err(err) = orchestrator.run(job, broadcasters).await {
                    error!(%request_id, error = %err, "queued transcode failed");
                }
            });
        }
    }
}
