//! Run statistics reported at the end of every crawl

use serde::Serialize;
use tracing::info;

use crate::domain::checkpoint::ResumeInfo;
use crate::infrastructure::dedup_store::DedupStats;

/// Counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStatistics {
    pub pages_crawled: u32,
    /// Rows read from listing pages
    pub items_extracted: u64,
    /// Already processed or duplicate
    pub items_skipped: u64,
    /// Items that ended in the failed backlog
    pub items_failed: u64,
    /// Errors caught at the item workflow boundary
    pub item_errors: u64,
    pub page_errors: u32,
    /// Sink saves that failed while flushing the collection
    pub sink_failures: u32,
    pub total_collected: usize,
}

impl CrawlStatistics {
    pub fn log_summary(&self) {
        info!("{}", "=".repeat(50));
        info!("📊 Crawl statistics");
        info!("  Pages crawled:   {}", self.pages_crawled);
        info!("  Items extracted: {}", self.items_extracted);
        info!("  Items skipped:   {}", self.items_skipped);
        info!("  Items failed:    {}", self.items_failed);
        info!("  Item errors:     {}", self.item_errors);
        info!("  Page errors:     {}", self.page_errors);
        info!("  Sink failures:   {}", self.sink_failures);
        info!("  Total collected: {}", self.total_collected);
        info!("{}", "=".repeat(50));
    }
}

/// Single pass over the failed backlog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub attempted: usize,
    pub recovered: usize,
    pub still_failed: usize,
}

/// Everything the statistics API exposes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsReport {
    pub run: CrawlStatistics,
    pub resume: ResumeInfo,
    pub dedup: DedupStats,
}
