//! Listing Harvester - resumable, crash-safe harvesting of paginated JavaScript listings
//!
//! The crate owns the decision logic of a long-running listing crawl: checkpointed
//! resume, fingerprint deduplication, the navigation recovery ladder, data-quality
//! gates and the failed-item replay. The browser backend, row/detail extraction
//! and additional output formats are supplied by the host through the traits in
//! [`domain::session`] and [`domain::collaborators`].

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
pub(crate) mod test_utils;

pub use application::{CrawlError, CrawlStatistics, Orchestrator};
pub use infrastructure::{ConfigManager, HarvestConfig};
