//! DLQ replay
//!
//! Re-enters dead-lettered signals into the pipeline: oldest entries
//! first, each one re-checked against the log store before any dispatch so
//! a message that has since succeeded is skipped instead of redelivered.
//! Entries are never auto-discarded; failed replays only increment the
//! attempt counter. Dry-run previews the same decisions without touching
//! the store or any agent.

use crate::config::ReplaySection;
use crate::error::{FailureReason, RouterError, RouterResult};
use crate::observability::metrics;
use crate::pipeline::SignalRouter;
use crate::signal::{
    DlqEntry, LogRecord, RecordStatus, ReplayItem, ReplayItemOutcome, ReplayReport,
};
use crate::store::StoreError;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

impl SignalRouter {
    /// Replay up to `limit` of the oldest DLQ entries
    ///
    /// With `dry_run` the duplicate check and would-be classification run
    /// but no agent is called and nothing is mutated.
    pub async fn replay_dlq(&self, limit: usize, dry_run: bool) -> RouterResult<ReplayReport> {
        let entries = self
            .store
            .dlq_list_oldest(limit)
            .await
            .map_err(store_err)?;
        info!(candidates = entries.len(), limit, dry_run, "starting DLQ replay pass");

        let mut report = ReplayReport {
            processed: 0,
            skipped: 0,
            failed: 0,
            remaining: 0,
            dry_run,
            items: Vec::new(),
        };

        for entry in entries {
            let outcome = self.replay_entry(&entry, dry_run).await?;
            match &outcome {
                ReplayItemOutcome::Replayed { .. } => {
                    report.processed += 1;
                    metrics().record_replay_processed();
                }
                ReplayItemOutcome::SkippedDuplicate => {
                    report.skipped += 1;
                    metrics().record_replay_skipped();
                }
                ReplayItemOutcome::Failed { .. } => {
                    report.failed += 1;
                    metrics().record_replay_failed();
                }
                ReplayItemOutcome::WouldReplay { .. }
                | ReplayItemOutcome::WouldSkipDuplicate => {}
            }
            report.items.push(ReplayItem {
                message_id: entry.message_id.clone(),
                outcome,
            });
        }

        report.remaining = self.store.dlq_depth().await.map_err(store_err)?;
        if !dry_run {
            metrics().set_dlq_depth(report.remaining as u64);
        }
        info!(
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            remaining = report.remaining,
            dry_run,
            "DLQ replay pass complete"
        );
        Ok(report)
    }

    async fn replay_entry(
        &self,
        entry: &DlqEntry,
        dry_run: bool,
    ) -> RouterResult<ReplayItemOutcome> {
        // A later request with the same identity may have already succeeded
        let existing = self.store.get(&entry.message_id).await.map_err(store_err)?;
        let already_succeeded =
            matches!(&existing, Some(record) if record.status == RecordStatus::Success);

        if dry_run {
            if already_succeeded {
                return Ok(ReplayItemOutcome::WouldSkipDuplicate);
            }
            let kind = self.classifier.classify(&entry.signal);
            return Ok(ReplayItemOutcome::WouldReplay { kind });
        }

        if already_succeeded {
            info!(message_id = entry.message_id, "skipping replay, already processed");
            self.store
                .dlq_resolve(&entry.message_id)
                .await
                .map_err(store_err)?;
            return Ok(ReplayItemOutcome::SkippedDuplicate);
        }

        let kind = self.classifier.classify(&entry.signal);
        let agents = self.table.agents_for(kind).to_vec();
        if agents.is_empty() {
            self.store
                .dlq_increment_attempt(&entry.message_id)
                .await
                .map_err(store_err)?;
            return Ok(ReplayItemOutcome::Failed {
                reason: FailureReason::ClassificationUnknown,
            });
        }

        let trace_id = Uuid::new_v4().simple().to_string();
        let started = Instant::now();
        let mode = self.table.mode_for(kind);
        let result = self
            .engine
            .dispatch(&agents, &entry.signal.payload, &trace_id, mode)
            .await;

        if let Some(reason) = result.failure_reason {
            warn!(message_id = entry.message_id, reason = reason.as_str(),
                "replay dispatch failed, entry retained");
            self.store
                .dlq_increment_attempt(&entry.message_id)
                .await
                .map_err(store_err)?;
            return Ok(ReplayItemOutcome::Failed { reason });
        }

        let record = LogRecord {
            message_id: entry.message_id.clone(),
            ts: chrono::Utc::now(),
            sender_id: entry.signal.sender_id.clone(),
            status: RecordStatus::Success,
            kind: Some(kind),
            routed_agents: agents,
            outcomes: result.outcomes,
            response: result.response,
            reason: None,
            latency_ms: started.elapsed().as_millis() as u64,
        };
        self.store.update(record).await.map_err(store_err)?;
        self.store
            .dlq_resolve(&entry.message_id)
            .await
            .map_err(store_err)?;
        info!(message_id = entry.message_id, kind = kind.as_str(), "DLQ entry replayed");
        Ok(ReplayItemOutcome::Replayed { kind })
    }
}

fn store_err(error: StoreError) -> RouterError {
    RouterError::store_unavailable(error.to_string())
}

/// Interval-triggered automatic replay; runs until the task is cancelled
pub async fn auto_replay_loop(router: Arc<SignalRouter>, config: ReplaySection) {
    if !config.auto {
        return;
    }
    info!(
        interval_secs = config.interval_secs,
        batch_size = config.batch_size,
        "automatic DLQ replay enabled"
    );
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(config.interval_secs));
    // The immediate first tick would replay on startup before agents settle
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let depth = match router.store().dlq_depth().await {
            Ok(depth) => depth,
            Err(error) => {
                error!(%error, "failed to read DLQ depth, skipping replay cycle");
                continue;
            }
        };
        if depth == 0 {
            continue;
        }
        if let Err(error) = router.replay_dlq(config.batch_size, false).await {
            error!(%error, "automatic DLQ replay failed");
        }
    }
}
