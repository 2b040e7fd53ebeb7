//! Application layer - crawl workflows built on the domain contracts
//!
//! - `item_processor`: per-item skip / dedup / detail / quality gate / commit workflow
//! - `retry_replayer`: single pass over the failed backlog via targeted lookups
//! - `orchestrator`: page loop, resume policy and finalization
//! - `statistics`: run counters and the statistics report

pub mod item_processor;
pub mod orchestrator;
pub mod retry_replayer;
pub mod statistics;

pub use item_processor::{HarvestState, ItemError, ItemOutcome, ItemProcessor};
pub use orchestrator::{CrawlError, Orchestrator};
pub use retry_replayer::RetryReplayer;
pub use statistics::{CrawlStatistics, ReplaySummary, StatisticsReport};
