//! Single pass over the failed backlog
//!
//! Each failed item is looked up directly by identifier (not by paging) and run
//! through the regular item workflow. A recovered item leaves the backlog at once
//! and the dedup store is persisted right away, so a crash mid-pass never replays
//! an item that was already fixed. Items that fail again stay for the next pass.

use std::sync::Arc;

use tracing::{Instrument, Span, info, warn};

use super::item_processor::{HarvestState, ItemError, ItemProcessor};
use super::statistics::ReplaySummary;
use crate::domain::collaborators::ListingExtractor;
use crate::domain::record::RawItem;
use crate::domain::session::PageSurface;
use crate::infrastructure::navigation::{NavigationError, Navigator};
use crate::infrastructure::retry_policy::{RetryPolicy, with_retry};

pub struct RetryReplayer {
    navigator: Arc<Navigator>,
    extractor: Arc<dyn ListingExtractor>,
    lookup_policy: RetryPolicy,
    span: Span,
}

impl RetryReplayer {
    pub fn new(
        navigator: Arc<Navigator>,
        extractor: Arc<dyn ListingExtractor>,
        lookup_policy: RetryPolicy,
        span: Span,
    ) -> Self {
        Self {
            navigator,
            extractor,
            lookup_policy,
            span,
        }
    }

    pub async fn run(
        &self,
        page: &dyn PageSurface,
        processor: &mut ItemProcessor,
        state: &mut HarvestState,
    ) -> Result<ReplaySummary, ItemError> {
        async {
            let backlog: Vec<String> = state
                .checkpoint
                .failed_items()
                .iter()
                .map(|item| item.item_id.clone())
                .collect();
            let mut summary = ReplaySummary::default();
            if backlog.is_empty() {
                info!("No failed items to retry");
                return Ok(summary);
            }
            info!("🔁 Retrying {} failed items", backlog.len());

            for item_id in &backlog {
                summary.attempted += 1;
                match self.replay_one(page, item_id, processor, state).await {
                    Ok(true) => {
                        summary.recovered += 1;
                        if let Err(e) = state.checkpoint.remove_failed_item(item_id) {
                            warn!("Could not persist removal of {}: {}", item_id, e);
                        }
                        if let Err(e) = state.dedup.save() {
                            warn!("Could not persist dedup store: {}", e);
                        }
                        info!("✅ Retry succeeded for {}", item_id);
                    }
                    Ok(false) => summary.still_failed += 1,
                    Err(e) if e.is_cancelled() || e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("Retry of {} failed: {}", item_id, e);
                        summary.still_failed += 1;
                    }
                }
            }

            info!(
                "Retry pass finished: {}/{} recovered, {} still failing",
                summary.recovered, summary.attempted, summary.still_failed
            );
            Ok(summary)
        }
        .instrument(self.span.clone())
        .await
    }

    async fn replay_one(
        &self,
        page: &dyn PageSurface,
        item_id: &str,
        processor: &mut ItemProcessor,
        state: &mut HarvestState,
    ) -> Result<bool, ItemError> {
        let Some(raw) = self.lookup(page, item_id).await? else {
            warn!("Item {} not found by targeted lookup", item_id);
            return Ok(false);
        };
        // a targeted query always lands on the first page
        let outcome = processor.process(page, &raw, 1, state).await?;
        Ok(outcome.is_resolved())
    }

    async fn lookup(&self, page: &dyn PageSurface, item_id: &str) -> Result<Option<RawItem>, NavigationError> {
        let navigator: &Navigator = &self.navigator;
        let found = with_retry(
            &self.lookup_policy,
            navigator.pacer().token(),
            |e: &NavigationError| !e.is_cancelled(),
            move |_| navigator.search_item(page, item_id),
        )
        .await
        .map_err(|e| e.into_inner().unwrap_or(NavigationError::Cancelled))?;
        if !found {
            return Ok(None);
        }

        let rows = self.extractor.extract_rows(page).await?;
        Ok(rows.into_iter().find(|row| row.item_id() == item_id))
    }
}
