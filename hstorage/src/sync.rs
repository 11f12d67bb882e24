use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::errors::{Result, StorageError};
use crate::fetch::{Heartbeat, SnapshotFetcher};
use crate::models::RunReport;
use crate::store::Ledger;
use crate::{batch, sweep};

/// Runs ingestion passes against the ledger using registered fetchers.
///
/// One pass for one resource kind is sequential: drain all pages, fix the
/// watermark, commit the batch, then sweep. Different kinds may run
/// concurrently from separate ingestors since their rows are disjoint.
pub struct Ingestor {
    ledger: Arc<Ledger>,
    fetchers: HashMap<&'static str, Arc<dyn SnapshotFetcher>>,
    heartbeat: Option<Heartbeat>,
}

impl Ingestor {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            fetchers: HashMap::new(),
            heartbeat: None,
        }
    }

    /// Registers a concrete fetcher implementation under its static name.
    pub fn register_fetcher(&mut self, fetcher: Arc<dyn SnapshotFetcher>) {
        self.fetchers.insert(fetcher.name(), fetcher);
    }

    /// Installs the liveness callback invoked after every fetched page.
    pub fn set_heartbeat(&mut self, heartbeat: Heartbeat) {
        self.heartbeat = Some(heartbeat);
    }

    /// Runs one full ingestion pass with the named fetcher: fetch, diff,
    /// write, commit, sweep. Errors before commit roll back the whole
    /// batch; a sweep failure degrades to a warning because the committed
    /// ingestion result stands.
    pub async fn run(&self, fetcher_name: &str, params: serde_json::Value) -> Result<RunReport> {
        let started = Instant::now();
        let run_name = format!("ingest_with_{fetcher_name}");
        let run_id = self.ledger.create_run_log(&run_name)?;

        match self.run_inner(fetcher_name, params).await {
            Ok(mut report) => {
                report.duration_millis = started.elapsed().as_millis() as u64;
                self.ledger.update_run_log_status(
                    run_id,
                    "SUCCESS",
                    &format!("Ingested {} snapshot(s).", report.item_count),
                )?;
                Ok(report)
            }
            Err(err) => {
                // Bookkeeping must not mask the ingestion failure itself.
                if let Err(log_err) =
                    self.ledger
                        .update_run_log_status(run_id, "FAILED", &err.to_string())
                {
                    log::warn!("Could not mark run {run_id} as FAILED: {log_err}");
                }
                Err(err)
            }
        }
    }

    async fn run_inner(
        &self,
        fetcher_name: &str,
        params: serde_json::Value,
    ) -> Result<RunReport> {
        let fetcher = self.fetchers.get(fetcher_name).ok_or_else(|| {
            StorageError::Config(format!("Fetcher '{fetcher_name}' not registered."))
        })?;
        let kind = fetcher.kind();

        let mut source = fetcher.open(params).await?;
        let mut snapshots = Vec::new();
        while source.has_more() {
            let page = source.next_page().await?;
            log::debug!(
                "Fetched page of {} snapshot(s) for kind '{}'",
                page.len(),
                kind.name
            );
            snapshots.extend(page);
            if let Some(heartbeat) = &self.heartbeat {
                heartbeat();
            }
        }

        // The watermark is fixed before the first write and shared by
        // every snapshot of the run.
        let watermark = Utc::now();
        let outcome = batch::run_batch(&self.ledger, kind, &snapshots, watermark)?;

        if let Err(err) = sweep::retire(&self.ledger, kind, watermark) {
            log::warn!(
                "Retirement sweep for kind '{}' failed; committed batch stands: {err}",
                kind.name
            );
        }

        Ok(RunReport {
            item_count: outcome.processed_count,
            collected_at: outcome.collected_at,
            duration_millis: 0,
        })
    }
}
