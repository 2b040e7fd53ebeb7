//! Crawl checkpoint domain model
//!
//! The checkpoint is the durable snapshot of crawl progress. It is owned by
//! `CheckpointStore` and only mutated through the store; this module holds the
//! plain data plus the state-transition rules.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a crawl target
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum CrawlState {
    #[default]
    Initialized,
    InProgress,
    Paused,
    Completed,
    Failed,
}

impl CrawlState {
    /// `Initialized → InProgress → {Completed | Failed}` with `InProgress ↔ Paused`.
    /// A `Failed` crawl may be picked up again (`Failed → InProgress`); `Completed` is final.
    ///
    /// Re-initialization is handled by `CheckpointStore::initialize_crawl`, which resets
    /// the whole checkpoint and is not a transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        use CrawlState::{Completed, Failed, InProgress, Initialized, Paused};
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Initialized, InProgress)
                | (InProgress, Paused | Completed | Failed)
                | (Paused, InProgress | Completed | Failed)
                | (Failed, InProgress)
        )
    }

    /// Only interrupted crawls are resumable as-is.
    pub fn is_resumable(self) -> bool {
        matches!(self, Self::InProgress | Self::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CrawlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An item that could not be harvested, kept for the retry replayer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedItem {
    pub item_id: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Ordered, append-only set of processed item ids with O(1) membership.
///
/// Serialized as a plain JSON array; the index is rebuilt on load.
#[derive(Debug, Clone, Default)]
pub struct ProcessedItems {
    order: Vec<String>,
    index: HashSet<String>,
}

impl ProcessedItems {
    /// Returns `false` when the id was already present.
    pub fn insert(&mut self, item_id: &str) -> bool {
        if self.index.contains(item_id) {
            return false;
        }
        self.index.insert(item_id.to_string());
        self.order.push(item_id.to_string());
        true
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.index.contains(item_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.order
    }
}

impl PartialEq for ProcessedItems {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl Serialize for ProcessedItems {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.order.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ProcessedItems {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ids = Vec::<String>::deserialize(deserializer)?;
        let mut items = Self::default();
        for id in &ids {
            items.insert(id);
        }
        Ok(items)
    }
}

/// Persisted crawl progress
///
/// File layout: `{state, current_page, processed_items[], failed_items[], statistics{},
/// metadata{}, last_updated}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrawlCheckpoint {
    pub state: CrawlState,
    pub current_page: u32,
    #[serde(default)]
    pub processed_items: ProcessedItems,
    #[serde(default)]
    pub failed_items: Vec<FailedItem>,
    #[serde(default)]
    pub statistics: BTreeMap<String, Value>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for CrawlCheckpoint {
    fn default() -> Self {
        Self {
            state: CrawlState::Initialized,
            current_page: 1,
            processed_items: ProcessedItems::default(),
            failed_items: Vec::new(),
            statistics: BTreeMap::new(),
            metadata: BTreeMap::new(),
            last_updated: None,
        }
    }
}

/// Statistic keys written into `CrawlCheckpoint::statistics`
pub mod stat_keys {
    pub const START_TIME: &str = "start_time";
    pub const END_TIME: &str = "end_time";
    pub const DURATION_SECONDS: &str = "duration_seconds";
    pub const TOTAL_PROCESSED: &str = "total_processed";
    pub const TOTAL_FAILED: &str = "total_failed";
    pub const PAGES_CRAWLED: &str = "pages_crawled";
}

/// What a caller needs to decide whether (and where) to resume
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResumeInfo {
    pub state: CrawlState,
    pub current_page: u32,
    pub total_processed: usize,
    pub total_failed: usize,
    pub can_resume: bool,
}

impl CrawlCheckpoint {
    pub fn resume_info(&self) -> ResumeInfo {
        ResumeInfo {
            state: self.state,
            current_page: self.current_page,
            total_processed: self.processed_items.len(),
            total_failed: self.failed_items.len(),
            can_resume: self.state.is_resumable(),
        }
    }
}
