//! Per-item workflow: skip, dedup, detail fetch, record construction, quality gate, commit.
//!
//! Every error is caught at this boundary and recorded in the checkpoint's failed
//! backlog. Only cancellation and a lost pagination position escape to the caller.

use serde_json::json;
use thiserror::Error;
use tracing::{Instrument, Span, debug, error, info, warn};

use super::statistics::CrawlStatistics;
use crate::domain::quality::QualityGate;
use crate::domain::record::{NoticeRecord, RawItem, RecordCollection, RecordError, fields};
use crate::domain::session::PageSurface;
use crate::infrastructure::checkpoint_store::CheckpointStore;
use crate::infrastructure::dedup_store::DedupStore;
use crate::infrastructure::navigation::{DetailFetcher, NavigationError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ItemError {
    #[error(transparent)]
    Navigation(#[from] NavigationError),

    #[error(transparent)]
    Record(#[from] RecordError),
}

impl ItemError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Navigation(e) if e.is_cancelled())
    }

    /// Errors that must stop the crawl instead of just failing the item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Navigation(e) if e.is_fatal())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    AlreadyProcessed,
    Duplicate,
    Committed,
    /// Recorded in the failed backlog with this message
    Failed(String),
}

impl ItemOutcome {
    /// The item needs no further attention.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// Mutable crawl state threaded through the workflow
pub struct HarvestState {
    pub checkpoint: CheckpointStore,
    pub dedup: DedupStore,
    pub collection: RecordCollection,
    pub stats: CrawlStatistics,
}

impl HarvestState {
    pub fn new(checkpoint: CheckpointStore, dedup: DedupStore) -> Self {
        Self {
            checkpoint,
            dedup,
            collection: RecordCollection::new(),
            stats: CrawlStatistics::default(),
        }
    }
}

pub struct ItemProcessor {
    fetcher: DetailFetcher,
    gate: QualityGate,
    early_exit_threshold: u32,
    consecutive_duplicates: u32,
    span: Span,
}

impl ItemProcessor {
    pub fn new(fetcher: DetailFetcher, gate: QualityGate, early_exit_threshold: u32, span: Span) -> Self {
        Self {
            fetcher,
            gate,
            early_exit_threshold,
            consecutive_duplicates: 0,
            span,
        }
    }

    pub fn consecutive_duplicates(&self) -> u32 {
        self.consecutive_duplicates
    }

    /// Listings are newest-first: a long run of known items means the frontier is reached.
    pub fn early_exit_reached(&self) -> bool {
        self.consecutive_duplicates >= self.early_exit_threshold
    }

    pub async fn process(
        &mut self,
        page: &dyn PageSurface,
        raw: &RawItem,
        page_number: u32,
        state: &mut HarvestState,
    ) -> Result<ItemOutcome, ItemError> {
        let item_id = raw.item_id();
        let span = self.span.clone();
        async {
            if state.checkpoint.is_item_processed(&item_id) {
                debug!("Skipping already processed item: {}", item_id);
                state.stats.items_skipped += 1;
                return Ok(ItemOutcome::AlreadyProcessed);
            }

            if state.dedup.is_duplicate(raw) {
                self.consecutive_duplicates += 1;
                state.stats.items_skipped += 1;
                state.checkpoint.mark_item_processed(&item_id);
                info!(
                    "⏭️ Skipping duplicate item: {} ({}/{} consecutive)",
                    item_id, self.consecutive_duplicates, self.early_exit_threshold
                );
                return Ok(ItemOutcome::Duplicate);
            }
            self.consecutive_duplicates = 0;

            match self.commit(page, raw, page_number, state).await {
                Ok(()) => Ok(ItemOutcome::Committed),
                Err(e) if e.is_cancelled() => Err(e),
                Err(e) => {
                    error!("❌ Error processing item {}: {}", item_id, e);
                    state.stats.item_errors += 1;
                    state.stats.items_failed += 1;
                    let details = json!({
                        "page": page_number,
                        "name": raw.text(fields::NAME),
                    });
                    state.checkpoint.mark_item_failed(&item_id, &e.to_string(), Some(details));
                    if e.is_fatal() {
                        return Err(e);
                    }
                    Ok(ItemOutcome::Failed(e.to_string()))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn commit(
        &self,
        page: &dyn PageSurface,
        raw: &RawItem,
        page_number: u32,
        state: &mut HarvestState,
    ) -> Result<(), ItemError> {
        let item_id = raw.item_id();
        let enriched = if raw.needs_detail_fetch() {
            self.fetcher.fetch(page, raw, page_number).await?
        } else {
            raw.clone()
        };

        let record = match NoticeRecord::try_from_raw(&enriched) {
            Ok(record) => record,
            Err(e) => {
                warn!("Record construction failed for {}: {}. Using fallback record", item_id, e);
                NoticeRecord::fallback(raw, &enriched, &e)
            }
        };

        if let Err(e) = self.gate.check(&record) {
            if let RecordError::QualityGateRejected { empty_fields, .. } = &e {
                warn!("⚠️ Quality check failed for {}: empty {:?}", item_id, empty_fields);
            }
            return Err(e.into());
        }

        state.collection.push(record);
        state.dedup.mark_as_seen(raw);
        state.checkpoint.mark_item_processed(&item_id);
        state.stats.total_collected = state.collection.len();
        info!("✅ Committed {} ({} collected)", item_id, state.collection.len());
        Ok(())
    }
}
